//! Stamps the CLI version string with the build date and source revision.

use std::path::Path;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    if Path::new(".git/HEAD").exists() {
        println!("cargo:rerun-if-changed=.git/HEAD");
        println!("cargo:rerun-if-changed=.git/index");
    }

    let package = std::env::var("CARGO_PKG_VERSION").unwrap_or_default();
    let date = chrono::Utc::now().format("%Y-%m-%d");

    let version = match git(&["describe", "--always", "--dirty"]) {
        Some(revision) => {
            println!("cargo:rustc-env=DBUS_DISPATCH_REVISION={}", revision);
            format!("{} ({}, built {})", package, revision, date)
        }
        None => format!("{} (built {})", package, date),
    };
    println!("cargo:rustc-env=DBUS_DISPATCH_VERSION={}", version);
}

/// Output of a git command, or `None` outside a checkout.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
