//! Error types for voxgate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxgateError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio input errors
    #[error("Audio format mismatch: expected {expected}, got {actual}")]
    AudioFormatMismatch { expected: String, actual: String },

    #[error("Audio input failed: {message}")]
    AudioInput { message: String },

    // Decoding engine errors
    #[error("Acoustic model not found at {path}")]
    ModelNotFound { path: String },

    #[error("Decoding engine failed: {message}")]
    Engine { message: String },

    #[error("Unknown decoding engine backend: {name}")]
    UnknownBackend { name: String },

    // Symbol table and lattice errors
    #[error("Symbol table {path}: {message}")]
    SymbolTable { path: String, message: String },

    #[error("Malformed lattice: {message}")]
    Lattice { message: String },

    // Request protocol errors
    #[error("Invalid value for parameter {name}: {value:?}")]
    InvalidParameter { name: String, value: String },

    #[error("Malformed request: {message}")]
    Request { message: String },

    // Transport errors
    #[error("Failed to bind {address}: {message}")]
    Bind { address: String, message: String },

    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Failed to serialize response: {0}")]
    Serialize(#[from] serde_json::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxgateError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = VoxgateError::ConfigInvalidValue {
            key: "server.threads".to_string(),
            message: "must be at least 1".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for server.threads: must be at least 1"
        );
    }

    #[test]
    fn test_audio_format_mismatch_display() {
        let error = VoxgateError::AudioFormatMismatch {
            expected: "16000 Hz".to_string(),
            actual: "8000 Hz".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Audio format mismatch: expected 16000 Hz, got 8000 Hz"
        );
    }

    #[test]
    fn test_engine_display() {
        let error = VoxgateError::Engine {
            message: "decoder state lost".to_string(),
        };
        assert_eq!(error.to_string(), "Decoding engine failed: decoder state lost");
    }

    #[test]
    fn test_invalid_parameter_display() {
        let error = VoxgateError::InvalidParameter {
            name: "nbest".to_string(),
            value: "many".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid value for parameter nbest: \"many\""
        );
    }

    #[test]
    fn test_symbol_table_display() {
        let error = VoxgateError::SymbolTable {
            path: "words.txt".to_string(),
            message: "line 3: missing id".to_string(),
        };
        assert_eq!(error.to_string(), "Symbol table words.txt: line 3: missing id");
    }

    #[test]
    fn test_bind_display() {
        let error = VoxgateError::Bind {
            address: "127.0.0.1:80".to_string(),
            message: "permission denied".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to bind 127.0.0.1:80: permission denied"
        );
    }

    #[test]
    fn test_other_display() {
        let error = VoxgateError::Other("unexpected error".to_string());
        assert_eq!(error.to_string(), "unexpected error");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: VoxgateError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: VoxgateError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: VoxgateError = io_error.into();

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<VoxgateError>();
        assert_sync::<VoxgateError>();
    }
}
