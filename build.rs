//! # Build Script
//!
//! Embeds the Windows Application Manifest (`app.manifest`) into `uwplaunch.exe`.
//!
//! The manifest pins the launcher to `asInvoker` so it starts without a UAC prompt;
//! `--elevate` is the explicit opt-in for tuning processes owned by other users.

fn main() {
    println!("cargo:rerun-if-changed=app.manifest");
    // A missing resource compiler only costs us the manifest, not the build.
    let _ = embed_resource::compile("app.manifest", embed_resource::NONE);
}
