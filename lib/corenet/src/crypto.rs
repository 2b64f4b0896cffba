use ctor::ctor;

/// Session tokens are 16 raw bytes on the wire (section 6's "Constants").
pub const SESSION_TOKEN_SIZE: usize = 16;

/// Initializes the sodium infrastructure. Encryption is out of scope for this core (a
/// stated Non-goal), but libsodium is still the cryptographically secure RNG source behind
/// `random_bytes` — session token predictability would let an attacker hijack a session.
#[ctor]
fn init_sodium() {
    unsafe {
        if libsodium_sys::sodium_init() < 0 {
            panic!("cryptography initialization failed")
        }
    }
}

/// Fills the provided buffer with cryptographically secure random bytes.
#[inline]
pub fn random_bytes(out: &mut [u8]) {
    unsafe {
        libsodium_sys::randombytes_buf(out.as_mut_ptr() as *mut ::std::ffi::c_void, out.len());
    }
}

/// Generates a fresh 128-bit session token.
#[inline]
pub fn session_token() -> [u8; SESSION_TOKEN_SIZE] {
    let mut token = [0u8; SESSION_TOKEN_SIZE];
    random_bytes(&mut token);
    token
}
