#![allow(missing_docs)]

fn main() {
    // trap: crates.io builds don't get a git short hash
    let hash = git_short_hash().unwrap_or("unknown".into());
    println!("cargo:rustc-env=SSHPIPE_BUILD_GIT_HASH={hash}");
    let cargo_version = env!("CARGO_PKG_VERSION");

    let version_string = if let Some(tag) = release_tag() {
        // Tagged builds are named "v1.2.3"; strip the leading v before matching.
        let short_tag = tag.strip_prefix("v").unwrap_or(&tag);
        assert_eq!(
            cargo_version, short_tag,
            "mismatched cargo and release tag versions"
        );
        tag
    } else {
        format!("{cargo_version}+g{hash}")
    };
    println!("cargo:rustc-env=SSHPIPE_VERSION_STRING={version_string}");
    println!("cargo:rerun-if-env-changed=GITHUB_REF_NAME");
}

fn release_tag() -> Option<String> {
    if !std::env::var("GITHUB_REF_TYPE").is_ok_and(|v| v == "tag") {
        return None;
    }
    std::env::var("GITHUB_REF_NAME").ok()
}

fn git_short_hash() -> Option<String> {
    use std::process::Command;
    let args = &["rev-parse", "--short=8", "HEAD"];
    let output = Command::new("git").args(args).output().ok()?;
    let rev = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if rev.is_empty() {
        None
    } else {
        Some(rev)
    }
}
