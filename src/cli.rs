//! Command-line interface for voxgate
//!
//! Provides argument parsing using clap derive macros. Flags given on the
//! command line override the configuration file and the environment.

use crate::config::Config;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Streaming speech recognition server
#[derive(Parser, Debug)]
#[command(name = "voxgate", version, about = "Streaming speech recognition server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the concurrent request server
    Serve(ServeArgs),

    /// Decode one raw PCM stream or WAV file and print the replies
    Decode(DecodeArgs),
}

/// Engine selection shared by every command
#[derive(Args, Debug, Default, Clone, PartialEq)]
pub struct EngineArgs {
    /// Decoding engine backend (whisper, mock)
    #[arg(long, value_name = "NAME")]
    pub backend: Option<String>,

    /// Acoustic model file
    #[arg(long, value_name = "PATH")]
    pub model: Option<PathBuf>,

    /// Word symbol table (`word id` per line)
    #[arg(long, value_name = "PATH")]
    pub symbols: Option<PathBuf>,
}

#[derive(Args, Debug, Default, Clone, PartialEq)]
pub struct ServeArgs {
    /// Listen address: host:port or unix:/path/to.sock
    #[arg(long, value_name = "ADDRESS")]
    pub listen: Option<String>,

    /// Number of worker threads
    #[arg(long, short = 't', value_name = "N")]
    pub threads: Option<usize>,

    /// Listen backlog
    #[arg(long, value_name = "N")]
    pub backlog: Option<i32>,

    /// Use multipart replies unless a request chooses otherwise
    #[arg(long)]
    pub multipart: bool,

    /// Enable end-of-speech detection unless a request chooses otherwise
    #[arg(long)]
    pub endpointing: bool,

    /// Audio chunk length in seconds
    #[arg(long, value_name = "SECONDS")]
    pub chunk_length: Option<f32>,

    /// Longest accepted recording in seconds (0 = unlimited)
    #[arg(long, value_name = "SECONDS")]
    pub max_record_length: Option<f32>,

    /// Per-session decoding timeout in seconds (0 = unlimited)
    #[arg(long, value_name = "SECONDS")]
    pub decoding_timeout: Option<f32>,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct DecodeArgs {
    /// Raw 16 kHz 16-bit PCM or WAV file; `-` reads stdin
    #[arg(value_name = "FILE")]
    pub input: PathBuf,

    /// Request parameters as a query string, e.g. "nbest=3&intermediate=500"
    #[arg(long, value_name = "QUERY", default_value = "")]
    pub params: String,

    #[command(flatten)]
    pub engine: EngineArgs,
}

impl DecodeArgs {
    pub fn reads_stdin(&self) -> bool {
        self.input.as_os_str() == "-"
    }
}

impl EngineArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(backend) = &self.backend {
            config.engine.backend = backend.clone();
        }
        if let Some(model) = &self.model {
            config.engine.model_path = model.clone();
        }
        if let Some(symbols) = &self.symbols {
            config.decoder.word_symbol_table = symbols.clone();
        }
    }
}

impl ServeArgs {
    /// Override `config` with every flag that was given.
    pub fn apply(&self, config: &mut Config) {
        if let Some(listen) = &self.listen {
            config.server.listen = listen.clone();
        }
        if let Some(threads) = self.threads {
            config.server.threads = threads;
        }
        if let Some(backlog) = self.backlog {
            config.server.backlog = backlog;
        }
        if self.multipart {
            config.server.multipart = true;
        }
        if self.endpointing {
            config.server.do_endpointing = true;
        }
        if let Some(secs) = self.chunk_length {
            config.decoder.chunk_length_secs = secs;
        }
        if let Some(secs) = self.max_record_length {
            config.decoder.max_record_length_secs = secs;
        }
        if let Some(secs) = self.decoding_timeout {
            config.decoder.decoding_timeout_secs = secs;
        }
        self.engine.apply(config);
    }
}

/// Log filter directive for the verbosity flags. `RUST_LOG` still wins.
pub fn log_filter(quiet: bool, verbose: u8) -> &'static str {
    match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    }
}
