//! Decoding engines: waveform in, word lattice out.

pub mod endpoint;
pub mod lattice;
pub mod mock;
pub mod symbols;
pub mod whisper;

use crate::config::EngineConfig;
use crate::defaults;
use crate::error::{Result, VoxgateError};
use lattice::Lattice;
use std::sync::Arc;
use symbols::SymbolTable;

pub use mock::{EngineCall, MockEngine};
pub use whisper::WhisperEngine;

/// A stateful per-session acoustic decoder.
///
/// A worker owns one engine for its whole lifetime and drives it through
/// `start`, any number of `accept_waveform` calls, `finish_input`,
/// `lattice` and finally `reset`. Engines are never shared between threads;
/// use [`DecodingEngine::try_clone`] to give each worker its own.
pub trait DecodingEngine: Send {
    /// Backend name, for logging.
    fn name(&self) -> &str;

    /// Allocate per-utterance state. `graph` selects an optional decoding
    /// graph or phrase set.
    fn start(&mut self, graph: Option<&str>) -> Result<()>;

    /// Feed one chunk of samples (raw 16-bit amplitude scale).
    ///
    /// Returns true when endpointing is enabled and the engine decided the
    /// speaker has stopped.
    fn accept_waveform(
        &mut self,
        sample_rate: u32,
        samples: &[f32],
        do_endpointing: bool,
    ) -> Result<bool>;

    /// Signal that no more audio will arrive for this utterance.
    fn finish_input(&mut self) -> Result<()>;

    /// Current lattice. `end_of_utterance` is false for intermediate snapshots.
    fn lattice(&mut self, end_of_utterance: bool) -> Result<Lattice>;

    /// Release all per-utterance state. Must be safe to call at any point.
    fn reset(&mut self);

    /// Independent instance that shares no mutable decode state with `self`.
    fn try_clone(&self) -> Result<Box<dyn DecodingEngine>>;

    /// Samples needed before finalizing; shorter input is padded with silence.
    fn min_samples(&self) -> usize {
        defaults::MIN_SAMPLES
    }

    /// Duration of one lattice frame in seconds.
    fn frame_shift_secs(&self) -> f32 {
        0.01
    }
}

impl DecodingEngine for Box<dyn DecodingEngine> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn start(&mut self, graph: Option<&str>) -> Result<()> {
        (**self).start(graph)
    }

    fn accept_waveform(
        &mut self,
        sample_rate: u32,
        samples: &[f32],
        do_endpointing: bool,
    ) -> Result<bool> {
        (**self).accept_waveform(sample_rate, samples, do_endpointing)
    }

    fn finish_input(&mut self) -> Result<()> {
        (**self).finish_input()
    }

    fn lattice(&mut self, end_of_utterance: bool) -> Result<Lattice> {
        (**self).lattice(end_of_utterance)
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn try_clone(&self) -> Result<Box<dyn DecodingEngine>> {
        (**self).try_clone()
    }

    fn min_samples(&self) -> usize {
        (**self).min_samples()
    }

    fn frame_shift_secs(&self) -> f32 {
        (**self).frame_shift_secs()
    }
}

/// Construct the backend named in the configuration.
pub fn create_engine(
    config: &EngineConfig,
    symbols: Arc<SymbolTable>,
) -> Result<Box<dyn DecodingEngine>> {
    match config.backend.as_str() {
        "whisper" => Ok(Box::new(WhisperEngine::new(config, symbols)?)),
        "mock" => Ok(Box::new(MockEngine::new("mock").with_min_samples(config.min_samples))),
        other => Err(VoxgateError::UnknownBackend {
            name: other.to_string(),
        }),
    }
}
