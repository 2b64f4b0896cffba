#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

//! Ambient infrastructure shared by every other crate in the workspace: error types,
//! wall-clock time helpers, structured logging setup and cryptographic randomness.
//! Nothing in here is specific to the city-sim wire protocol.

pub const PROTOCOL_VERSION: u8 = 1;

pub mod crypto;
pub mod logging;
pub mod shared;
pub mod time;

pub use shared::{Deserialize, ErrorType, NetworkError, NetworkResult, Serialize, SizedRead, SizedWrite};
