//! voxgate - streaming speech recognition server
//!
//! Accepts raw 16 kHz PCM over HTTP-framed connections (or stdin), drives a
//! decoding engine chunk by chunk and replies with JSON results: optional
//! intermediate transcripts followed by exactly one terminal result.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod cli;
pub mod config;
pub mod decoder;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod response;
pub mod server;

// Core traits (source → engine → writer)
pub use audio::{AudioSource, ChunkRead, PcmSource};
pub use engine::{DecodingEngine, MockEngine};
pub use response::{Reply, ResponseWriter};

// Session control
pub use decoder::{Decoder, SessionParams};
pub use server::{Server, ServerHandle, ShutdownTrigger};

// Error handling
pub use error::{Result, VoxgateError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_carries_hash_only_when_known() {
        let ver = version_string();
        match option_env!("GIT_HASH") {
            Some(hash) if !hash.is_empty() => assert_eq!(ver.split('+').nth(1), Some(hash)),
            _ => assert_eq!(ver, env!("CARGO_PKG_VERSION")),
        }
    }
}
