use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voxgate::audio::wav::{is_wav, read_wav};
use voxgate::audio::{AudioSource, ChannelReader, PcmSource};
use voxgate::cli::{Cli, Commands, DecodeArgs, ServeArgs, log_filter};
use voxgate::config::Config;
use voxgate::decoder::{Decoder, SessionParams};
use voxgate::engine::symbols::SymbolTable;
use voxgate::engine::{DecodingEngine, create_engine};
use voxgate::response::ResponseWriter;
use voxgate::response::json::JsonWriter;
use voxgate::response::multipart::MultipartWriter;
use voxgate::server::Server;

/// Bytes needed to recognise a RIFF/WAVE header.
const WAV_MAGIC_LEN: usize = 12;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter(cli.quiet, cli.verbose).into()),
        )
        .with_writer(io::stderr)
        .init();

    info!("voxgate {}", voxgate::version_string());

    match cli.command {
        Commands::Serve(args) => serve(cli.config.as_deref(), args).await,
        Commands::Decode(args) => {
            let config = load_config(cli.config.as_deref(), |config| args.engine.apply(config))?;
            tokio::task::spawn_blocking(move || decode(config, args)).await?
        }
    }
}

/// File or default path, then environment, then command-line flags.
fn load_config(custom_path: Option<&Path>, flags: impl FnOnce(&mut Config)) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    let mut config = config.with_env_overrides()?;
    flags(&mut config);
    config.validate()?;
    Ok(config)
}

fn load_engine(config: &Config) -> Result<(Arc<SymbolTable>, Box<dyn DecodingEngine>)> {
    let symbols = Arc::new(SymbolTable::load(&config.decoder.word_symbol_table)?);
    info!(
        "Loaded {} symbols from {}",
        symbols.len(),
        config.decoder.word_symbol_table.display()
    );
    let engine = create_engine(&config.engine, Arc::clone(&symbols))?;
    info!("Decoding engine ready: {}", engine.name());
    Ok((symbols, engine))
}

async fn serve(config_path: Option<&Path>, args: ServeArgs) -> Result<()> {
    let config = load_config(config_path, |config| args.apply(config))?;
    let (symbols, engine) = load_engine(&config)?;
    let decoder = Decoder::new(config.decoder.clone(), symbols);
    let server = Server::bind(&config.server, decoder)?;

    let trigger = server.shutdown_trigger()?;
    let mut workers = tokio::task::spawn_blocking(move || server.serve(engine));

    tokio::select! {
        result = &mut workers => return Ok(result??),
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                warn!("Error setting up signal handler: {}", e);
            }
            info!("Received SIGTERM, shutting down");
        }
    }

    tokio::task::spawn_blocking(move || trigger.trigger()).await?;
    workers.await??;
    info!("Server stopped");
    Ok(())
}

/// Wait for SIGTERM (sent by service managers).
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    sigterm.recv().await;
    Ok(())
}

/// One session over a file or stdin, replies on stdout.
fn decode(config: Config, args: DecodeArgs) -> Result<()> {
    let (symbols, mut engine) = load_engine(&config)?;
    let decoder = Decoder::new(config.decoder.clone(), symbols);
    let params = SessionParams::with_defaults(config.server.multipart, config.server.do_endpointing)
        .apply_query(&args.params)?;

    let mut source: Box<dyn AudioSource> = if args.reads_stdin() {
        let mut reader = ChannelReader::stdin()?;
        if is_wav(reader.peek(WAV_MAGIC_LEN)?) {
            Box::new(PcmSource::from_samples(&read_wav(reader)?, params.clone()))
        } else {
            Box::new(PcmSource::new(reader, params.clone()))
        }
    } else {
        let mut bytes = Vec::new();
        BufReader::new(
            File::open(&args.input)
                .with_context(|| format!("Failed to open {}", args.input.display()))?,
        )
        .read_to_end(&mut bytes)?;
        if is_wav(&bytes) {
            Box::new(PcmSource::from_samples(&read_wav(io::Cursor::new(bytes))?, params.clone()))
        } else {
            Box::new(PcmSource::new(io::Cursor::new(bytes), params.clone()))
        }
    };

    let stdout = io::stdout().lock();
    let mut writer: Box<dyn ResponseWriter> = if params.multipart {
        Box::new(MultipartWriter::new(stdout))
    } else {
        Box::new(JsonWriter::new(stdout))
    };

    decoder.run(engine.as_mut(), source.as_mut(), writer.as_mut())?;
    Ok(())
}
