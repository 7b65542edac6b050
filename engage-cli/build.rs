//! Build identification for the `engage` binary
//!
//! Exports to the crate at compile time:
//! - `GIT_HASH`: `git describe` of the checkout, `-dirty` when it has local edits
//! - `BUILD_TIMESTAMP`: RFC 3339, UTC, second precision
//! - `BUILD_PROFILE`: cargo profile (debug/release)

use std::path::Path;
use std::process::Command;

/// Trimmed stdout of a successful `git` invocation
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn export(key: &str, value: &str) {
    println!("cargo:rustc-env={}={}", key, value);
}

fn main() {
    let describe = git(&["describe", "--always", "--dirty", "--abbrev=8"]).unwrap_or_else(|| "unknown".into());
    export("GIT_HASH", &describe);
    export(
        "BUILD_TIMESTAMP",
        &chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    );
    export(
        "BUILD_PROFILE",
        &std::env::var("PROFILE").unwrap_or_else(|_| "unknown".into()),
    );

    // New commits and branch switches change the hash; outside a checkout
    // the script reruns on every build
    if let Some(git_dir) = git(&["rev-parse", "--git-dir"]) {
        let git_dir = Path::new(&git_dir);
        for watched in ["HEAD", "index"] {
            println!("cargo:rerun-if-changed={}", git_dir.join(watched).display());
        }
    }
}
