use crate::decoder::extract::ConfidenceFloor;
use crate::defaults;
use crate::engine::lattice::ScoreScale;
use crate::error::{Result, VoxgateError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub decoder: DecoderConfig,
    pub engine: EngineConfig,
}

/// Listening socket and worker pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port` or `unix:/path/to/socket`
    pub listen: String,
    pub backlog: i32,
    pub threads: usize,
    /// Default response framing when a request does not choose one.
    pub multipart: bool,
    /// Default endpoint detection when a request does not choose.
    pub do_endpointing: bool,
    /// Socket read/write timeout. 0 disables it.
    pub io_timeout_secs: u64,
}

/// Decode-session limits and result extraction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecoderConfig {
    pub chunk_length_secs: f32,
    /// 0 = unlimited
    pub max_record_length_secs: f32,
    /// Accepted for compatibility; not used by the decode loop.
    pub max_lattice_unchanged_interval_secs: f32,
    /// 0 = unlimited
    pub decoding_timeout_secs: f32,
    pub lm_scale: f32,
    pub acoustic_scale: f32,
    pub word_alignment: bool,
    pub confidence_threshold: Option<f32>,
    pub confidence_default: Option<f32>,
    pub word_symbol_table: PathBuf,
}

/// Decoding engine backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: String,
    pub model_path: PathBuf,
    pub language: String,
    /// Inference threads (None = backend default)
    pub threads: Option<usize>,
    pub min_samples: usize,
    pub endpoint_speech_level: f32,
    pub endpoint_silence_ms: u32,
    pub endpoint_min_speech_ms: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: defaults::LISTEN_ADDRESS.to_string(),
            backlog: defaults::BACKLOG,
            threads: 1,
            multipart: false,
            do_endpointing: false,
            io_timeout_secs: defaults::IO_TIMEOUT_SECS,
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            chunk_length_secs: defaults::CHUNK_LENGTH_SECS,
            max_record_length_secs: 0.0,
            max_lattice_unchanged_interval_secs: 0.0,
            decoding_timeout_secs: 0.0,
            lm_scale: defaults::LM_SCALE,
            acoustic_scale: defaults::ACOUSTIC_SCALE,
            word_alignment: true,
            confidence_threshold: None,
            confidence_default: None,
            word_symbol_table: PathBuf::from(defaults::WORD_SYMBOL_TABLE),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: defaults::ENGINE_BACKEND.to_string(),
            model_path: PathBuf::from(defaults::WHISPER_MODEL),
            language: defaults::AUTO_LANGUAGE.to_string(),
            threads: None,
            min_samples: defaults::MIN_SAMPLES,
            endpoint_speech_level: defaults::ENDPOINT_SPEECH_LEVEL,
            endpoint_silence_ms: defaults::ENDPOINT_SILENCE_MS,
            endpoint_min_speech_ms: defaults::ENDPOINT_MIN_SPEECH_MS,
        }
    }
}

impl DecoderConfig {
    pub fn scale(&self) -> ScoreScale {
        ScoreScale {
            lm: self.lm_scale,
            acoustic: self.acoustic_scale,
        }
    }

    /// Active only when both threshold and default are configured.
    pub fn confidence_floor(&self) -> Option<ConfidenceFloor> {
        match (self.confidence_threshold, self.confidence_default) {
            (Some(threshold), Some(default)) => Some(ConfidenceFloor { threshold, default }),
            _ => None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VoxgateError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                VoxgateError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if it doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(VoxgateError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXGATE_LISTEN → server.listen
    /// - VOXGATE_THREADS → server.threads
    /// - VOXGATE_MODEL → engine.model_path
    /// - VOXGATE_SYMBOLS → decoder.word_symbol_table
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(listen) = std::env::var("VOXGATE_LISTEN")
            && !listen.is_empty()
        {
            self.server.listen = listen;
        }

        if let Ok(threads) = std::env::var("VOXGATE_THREADS")
            && !threads.is_empty()
        {
            self.server.threads =
                threads
                    .trim()
                    .parse()
                    .map_err(|_| VoxgateError::ConfigInvalidValue {
                        key: "VOXGATE_THREADS".to_string(),
                        message: format!("not a number: {:?}", threads),
                    })?;
        }

        if let Ok(model) = std::env::var("VOXGATE_MODEL")
            && !model.is_empty()
        {
            self.engine.model_path = PathBuf::from(model);
        }

        if let Ok(symbols) = std::env::var("VOXGATE_SYMBOLS")
            && !symbols.is_empty()
        {
            self.decoder.word_symbol_table = PathBuf::from(symbols);
        }

        Ok(self)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.threads == 0 {
            return Err(invalid("server.threads", "must be at least 1"));
        }
        if self.server.backlog < 0 {
            return Err(invalid("server.backlog", "must not be negative"));
        }
        let d = &self.decoder;
        if !(d.chunk_length_secs > 0.0) {
            return Err(invalid("decoder.chunk_length_secs", "must be positive"));
        }
        for (key, value) in [
            ("decoder.chunk_length_secs", d.chunk_length_secs),
            ("decoder.max_record_length_secs", d.max_record_length_secs),
            (
                "decoder.max_lattice_unchanged_interval_secs",
                d.max_lattice_unchanged_interval_secs,
            ),
            ("decoder.decoding_timeout_secs", d.decoding_timeout_secs),
        ] {
            if !(value >= 0.0) {
                return Err(invalid(key, "must not be negative"));
            }
            if Duration::try_from_secs_f32(value).is_err() {
                return Err(invalid(key, "must be a finite number of seconds"));
            }
        }
        for (key, value) in [
            ("decoder.confidence_threshold", d.confidence_threshold),
            ("decoder.confidence_default", d.confidence_default),
        ] {
            if let Some(v) = value
                && !(0.0..=1.0).contains(&v)
            {
                return Err(invalid(key, "must be within [0, 1]"));
            }
        }
        if self.engine.min_samples == 0 {
            return Err(invalid("engine.min_samples", "must be at least 1"));
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxgate/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voxgate")
            .join("config.toml")
    }
}

fn invalid(key: &str, message: &str) -> VoxgateError {
    VoxgateError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_voxgate_env() {
        remove_env("VOXGATE_LISTEN");
        remove_env("VOXGATE_THREADS");
        remove_env("VOXGATE_MODEL");
        remove_env("VOXGATE_SYMBOLS");
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.server.listen, "127.0.0.1:8086");
        assert_eq!(config.server.threads, 1);
        assert!(!config.server.multipart);
        assert!(!config.server.do_endpointing);

        assert_eq!(config.decoder.chunk_length_secs, 0.18);
        assert_eq!(config.decoder.max_record_length_secs, 0.0);
        assert_eq!(config.decoder.decoding_timeout_secs, 0.0);
        assert_eq!(config.decoder.lm_scale, 10.0);
        assert!(config.decoder.confidence_floor().is_none());

        assert_eq!(config.engine.backend, "whisper");
        assert_eq!(config.engine.min_samples, 400);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_config(
            r#"
            [server]
            listen = "unix:/run/voxgate.sock"
            backlog = 16
            threads = 4
            multipart = true

            [decoder]
            chunk_length_secs = 0.25
            max_record_length_secs = 30.0
            decoding_timeout_secs = 10.0
            confidence_threshold = 0.3
            confidence_default = 0.5
            word_symbol_table = "/srv/words.txt"

            [engine]
            backend = "mock"
            min_samples = 800
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.server.listen, "unix:/run/voxgate.sock");
        assert_eq!(config.server.backlog, 16);
        assert_eq!(config.server.threads, 4);
        assert!(config.server.multipart);
        assert_eq!(config.decoder.chunk_length_secs, 0.25);
        assert_eq!(config.decoder.max_record_length_secs, 30.0);
        assert_eq!(
            config.decoder.confidence_floor(),
            Some(ConfidenceFloor {
                threshold: 0.3,
                default: 0.5
            })
        );
        assert_eq!(config.decoder.word_symbol_table, PathBuf::from("/srv/words.txt"));
        assert_eq!(config.engine.backend, "mock");
        assert_eq!(config.engine.min_samples, 800);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_config(
            r#"
            [server]
            threads = 2
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.server.threads, 2);
        assert_eq!(config.server.listen, "127.0.0.1:8086");
        assert_eq!(config.decoder, DecoderConfig::default());
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn test_confidence_floor_needs_both_values() {
        let config = DecoderConfig {
            confidence_threshold: Some(0.4),
            ..DecoderConfig::default()
        };
        assert!(config.confidence_floor().is_none());
    }

    #[test]
    fn test_validate_rejects_zero_threads() {
        let mut config = Config::default();
        config.server.threads = 0;
        match config.validate() {
            Err(VoxgateError::ConfigInvalidValue { key, .. }) => assert_eq!(key, "server.threads"),
            other => panic!("Expected ConfigInvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_limits() {
        let mut config = Config::default();
        config.decoder.chunk_length_secs = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.decoder.decoding_timeout_secs = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.decoder.confidence_default = Some(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unbounded_durations() {
        for value in [f32::INFINITY, 1e30, f32::NAN] {
            let mut config = Config::default();
            config.decoder.decoding_timeout_secs = value;
            match config.validate() {
                Err(VoxgateError::ConfigInvalidValue { key, .. }) => {
                    assert_eq!(key, "decoder.decoding_timeout_secs")
                }
                other => panic!("Expected ConfigInvalidValue for {}, got {:?}", value, other),
            }
        }

        let mut config = Config::default();
        config.decoder.max_record_length_secs = f32::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_infinite_timeout_from_toml_is_rejected() {
        let config: Config = toml::from_str("[decoder]\ndecoding_timeout_secs = inf\n").unwrap();
        assert!(config.decoder.decoding_timeout_secs.is_infinite());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_override_listen_and_threads() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxgate_env();

        set_env("VOXGATE_LISTEN", "0.0.0.0:9000");
        set_env("VOXGATE_THREADS", "8");
        let config = Config::default().with_env_overrides().unwrap();

        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.server.threads, 8);
        assert_eq!(config.engine.model_path, PathBuf::from(defaults::WHISPER_MODEL));

        clear_voxgate_env();
    }

    #[test]
    fn test_env_override_paths() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxgate_env();

        set_env("VOXGATE_MODEL", "/models/ggml-small.bin");
        set_env("VOXGATE_SYMBOLS", "/models/words.txt");
        let config = Config::default().with_env_overrides().unwrap();

        assert_eq!(config.engine.model_path, PathBuf::from("/models/ggml-small.bin"));
        assert_eq!(config.decoder.word_symbol_table, PathBuf::from("/models/words.txt"));

        clear_voxgate_env();
    }

    #[test]
    fn test_env_override_bad_threads_is_error() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxgate_env();

        set_env("VOXGATE_THREADS", "lots");
        assert!(Config::default().with_env_overrides().is_err());

        clear_voxgate_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxgate_env();

        set_env("VOXGATE_LISTEN", "");
        let config = Config::default().with_env_overrides().unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:8086");

        clear_voxgate_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_config(
            r#"
            [server
            listen = "broken
        "#,
        );

        let result = Config::load(temp_file.path());
        assert!(matches!(result, Err(VoxgateError::Config(_))));
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_default_path_ends_with_config_toml() {
        let path = Config::default_path();
        let path_str = path.to_string_lossy();

        assert!(path_str.contains("voxgate"));
        assert!(path_str.ends_with("config.toml"));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_voxgate_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();
        assert_eq!(config, Config::default());
    }
}
