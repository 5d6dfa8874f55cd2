//! Build script for ttlfw
//!
//! Embeds build-time information (git commit, dirty status, build timestamp)
//! shown by `ttlfw --version`.

fn main() {
    // Packagers may relocate the default ledger and lock paths
    println!("cargo:rerun-if-env-changed=TTLFW_SYSTEM_LEDGER_PATH");
    println!("cargo:rerun-if-env-changed=TTLFW_SYSTEM_LOCK_PATH");

    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
