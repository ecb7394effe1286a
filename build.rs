//! Build script: embeds the git short hash for the version string and checks
//! GPU toolkits before whisper-rs-sys tries to compile.

use std::process::Command;

fn main() {
    // Embed git short hash for version string
    if let Ok(output) = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        && output.status.success()
    {
        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        println!("cargo:rustc-env=GIT_HASH={}", hash);
    }
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");

    // Feature flags reach build scripts as CARGO_FEATURE_* variables.
    if std::env::var_os("CARGO_FEATURE_CUDA").is_some() {
        require_tool(
            "nvcc",
            &["--version"],
            "CUDA toolkit",
            "https://developer.nvidia.com/cuda-downloads",
        );
    }
    if std::env::var_os("CARGO_FEATURE_VULKAN").is_some() {
        require_tool(
            "vulkaninfo",
            &["--summary"],
            "Vulkan SDK",
            "https://vulkan.lunarg.com/",
        );
    }
}

fn require_tool(tool: &str, args: &[&str], what: &str, url: &str) {
    match Command::new(tool).args(args).output() {
        Ok(out) if out.status.success() => {
            println!("cargo::warning={} detected", what);
        }
        _ => {
            panic!(
                "\n\n`{}` not found: {} is not installed.\n  Install: {}\n  Or build without the GPU feature: cargo build --release\n",
                tool, what, url
            );
        }
    }
}
