//! Build script for reflex-core
//!
//! This script checks system requirements before compilation:
//! - Minimum Rust version (`div_ceil` and let-else need Rust 1.75.0+)
//! - Architecture support for the call emulator

fn main()
{
    if let Ok(rustc_version) = rustc_version::version() {
        let min_rust_version = rustc_version::Version::new(1, 75, 0);

        assert!(
            rustc_version >= min_rust_version,
            "reflex-core requires Rust {min_rust_version} or newer, found {rustc_version}"
        );
    } else {
        // If we can't get version (e.g., in some build environments), just warn
        println!("cargo:warning=could not verify Rust version");
    }

    let arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    if arch != "x86_64" && arch != "aarch64" {
        println!("cargo:warning=reflex-core can introspect {arch} images but cannot call into them");
    }
}
