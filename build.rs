// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-env-changed=ATTENDANCE_SCANNER_VERSION");

    // Packagers can pin the version string
    let version = std::env::var("ATTENDANCE_SCANNER_VERSION")
        .ok()
        .or_else(git_version)
        .unwrap_or_else(|| std::env::var("CARGO_PKG_VERSION").unwrap_or_default());

    println!("cargo::rustc-env=SCANNER_VERSION={}", version);
}

/// "1.2.0" on a tag, "1.2.0+3.gabc1234" after it, the short hash without tags
fn git_version() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--match", "v*"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let described = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let described = described.strip_prefix('v').unwrap_or(&described);
    let parts: Vec<&str> = described.rsplitn(3, '-').collect();
    Some(match parts.as_slice() {
        [hash, commits, base] => format!("{}+{}.{}", base, commits, hash),
        _ => described.to_string(),
    })
}
