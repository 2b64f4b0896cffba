use std::env;
use std::fs;
use std::path::Path;

const GAME_CFG_NAME: &str = "game_config.toml";

fn main() {
    let source_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let out_dir = env::var("OUT_DIR").unwrap();

    let source_path = Path::new(&source_dir).join("config").join(GAME_CFG_NAME);

    // Navigate three levels up: OUT_DIR is target/<profile>/build/<crate>-<hash>/out.
    let out_path = Path::new(&out_dir)
        .parent()
        .and_then(|pth| pth.parent())
        .and_then(|pth| pth.parent())
        .expect("failed navigating to the target directory");

    println!("cargo:rerun-if-changed={}", source_path.display());

    fs::copy(&source_path, out_path.join(GAME_CFG_NAME))
        .unwrap_or_else(|err| panic!("failed to copy {}: {}", GAME_CFG_NAME, err));
}
