//! Whisper-backed decoding engine.
//!
//! Whisper is not a streaming lattice decoder, so this backend buffers the
//! utterance's audio, runs a full transcription whenever a lattice is
//! requested, and turns the timed segments into a single-path lattice. Words
//! are mapped through the symbol table so results use the same vocabulary as
//! any other backend.
//!
//! # Feature Gate
//!
//! Requires the `whisper` feature (and cmake):
//!
//! ```bash
//! cargo build --features whisper
//! ```

#[cfg(feature = "whisper")]
use crate::engine::endpoint::{EndpointConfig, EndpointDetector};
use crate::engine::lattice::{EPSILON, Lattice, LatticeWeight, WordId};
use crate::engine::symbols::SymbolTable;
#[cfg(feature = "whisper")]
use crate::engine::DecodingEngine;
#[cfg(feature = "whisper")]
use crate::config::EngineConfig;
#[cfg(feature = "whisper")]
use crate::error::{Result, VoxgateError};
use tracing::warn;

#[cfg(feature = "whisper")]
use std::sync::{Arc, Once};
#[cfg(feature = "whisper")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Lowest speech probability used when costing a segment.
const MIN_SPEECH_PROB: f32 = 1e-6;

/// One timed transcription segment. Timestamps are in centiseconds, which
/// equals the 10 ms lattice frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub start: i64,
    pub end: i64,
    pub text: String,
    pub no_speech_probability: f32,
}

/// Build a single-path lattice from timed segments.
///
/// Gaps between segments become epsilon arcs. Each segment's span is split
/// evenly across its words, and the segment cost `-ln(1 - p_no_speech)` is
/// shared between them.
pub fn segments_to_lattice(segments: &[Segment], symbols: &SymbolTable) -> Lattice {
    let mut arcs: Vec<(WordId, LatticeWeight, u32)> = Vec::new();
    let mut cursor: u32 = 0;

    for segment in segments {
        let words: Vec<&str> = segment
            .text
            .split_whitespace()
            .map(normalize_word)
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            continue;
        }

        let start = segment.start.max(0) as u32;
        if start > cursor {
            arcs.push((EPSILON, LatticeWeight::default(), start - cursor));
            cursor = start;
        }

        let end = segment.end.max(0) as u32;
        let count = words.len() as u32;
        let span = end.saturating_sub(cursor).max(count);
        let per_word = span / count;
        let speech = (1.0 - segment.no_speech_probability).clamp(MIN_SPEECH_PROB, 1.0);
        let cost = -speech.ln() / count as f32;

        for (i, word) in words.iter().enumerate() {
            let frames = if i as u32 == count - 1 {
                span - per_word * (count - 1)
            } else {
                per_word
            };
            let id = symbols.id_or_unknown(&word.to_lowercase());
            if id == EPSILON {
                warn!("Word {:?} not in symbol table and no <unk> entry", word);
            }
            arcs.push((id, LatticeWeight::new(0.0, cost), frames));
        }
        cursor += span;
    }

    Lattice::linear(&arcs)
}

fn normalize_word(word: &str) -> &str {
    word.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
}

/// Whisper decoding engine.
///
/// Clones share the read-only model context. Each inference runs on its own
/// `WhisperState`, and the audio buffer and endpoint state are per instance.
#[cfg(feature = "whisper")]
pub struct WhisperEngine {
    context: Arc<WhisperContext>,
    config: EngineConfig,
    symbols: Arc<SymbolTable>,
    model_name: String,
    audio: Vec<f32>,
    prompt: Option<String>,
    endpoint: EndpointDetector,
    cached: Option<(usize, Lattice)>,
}

#[cfg(feature = "whisper")]
impl std::fmt::Debug for WhisperEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperEngine")
            .field("model_name", &self.model_name)
            .field("buffered_samples", &self.audio.len())
            .field("context", &"<WhisperContext>")
            .finish()
    }
}

#[cfg(feature = "whisper")]
impl WhisperEngine {
    /// Load the model named in `config.model_path`.
    pub fn new(config: &EngineConfig, symbols: Arc<SymbolTable>) -> Result<Self> {
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !config.model_path.exists() {
            return Err(VoxgateError::ModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }

        let model_name = config
            .model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let mut context_params = WhisperContextParameters::default();
        context_params.flash_attn(true);
        let context = WhisperContext::new_with_params(
            config
                .model_path
                .to_str()
                .ok_or_else(|| VoxgateError::Engine {
                    message: "Invalid UTF-8 in model path".to_string(),
                })?,
            context_params,
        )
        .map_err(|e| VoxgateError::Engine {
            message: format!("Failed to load Whisper model: {}", e),
        })?;

        tracing::info!("Loaded Whisper model {} ({})", model_name, crate::defaults::gpu_backend());

        Ok(Self {
            context: Arc::new(context),
            config: config.clone(),
            symbols,
            model_name,
            audio: Vec::new(),
            prompt: None,
            endpoint: EndpointDetector::new(endpoint_config(config), crate::defaults::SAMPLE_RATE),
            cached: None,
        })
    }

    fn transcribe(&self) -> Result<Vec<Segment>> {
        let mut state = self.context.create_state().map_err(|e| VoxgateError::Engine {
            message: format!("Failed to create Whisper state: {}", e),
        })?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        if self.config.language == crate::defaults::AUTO_LANGUAGE {
            params.set_language(None);
        } else {
            params.set_language(Some(&self.config.language));
        }
        if let Some(threads) = self.config.threads {
            params.set_n_threads(threads as i32);
        }
        if let Some(prompt) = &self.prompt {
            params.set_initial_prompt(prompt);
        }
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &self.audio)
            .map_err(|e| VoxgateError::Engine {
                message: format!("Whisper inference failed: {}", e),
            })?;

        Ok(state
            .as_iter()
            .map(|segment| Segment {
                start: segment.start_timestamp(),
                end: segment.end_timestamp(),
                text: segment.to_string(),
                no_speech_probability: segment.no_speech_probability(),
            })
            .collect())
    }
}

#[cfg(feature = "whisper")]
impl DecodingEngine for WhisperEngine {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn start(&mut self, graph: Option<&str>) -> Result<()> {
        self.reset();
        self.prompt = graph.map(str::to_string);
        Ok(())
    }

    fn accept_waveform(
        &mut self,
        sample_rate: u32,
        samples: &[f32],
        do_endpointing: bool,
    ) -> Result<bool> {
        if sample_rate != crate::defaults::SAMPLE_RATE {
            return Err(VoxgateError::AudioFormatMismatch {
                expected: format!("{} Hz", crate::defaults::SAMPLE_RATE),
                actual: format!("{} Hz", sample_rate),
            });
        }
        // Whisper expects [-1.0, 1.0]; samples arrive on the 16-bit scale.
        self.audio.extend(samples.iter().map(|&s| s / 32768.0));
        let reached = self.endpoint.process(samples);
        Ok(do_endpointing && reached)
    }

    fn finish_input(&mut self) -> Result<()> {
        Ok(())
    }

    fn lattice(&mut self, _end_of_utterance: bool) -> Result<Lattice> {
        if self.audio.is_empty() {
            return Ok(Lattice::empty());
        }
        if let Some((len, lattice)) = &self.cached
            && *len == self.audio.len()
        {
            return Ok(lattice.clone());
        }
        let segments = self.transcribe()?;
        let lattice = segments_to_lattice(&segments, &self.symbols);
        self.cached = Some((self.audio.len(), lattice.clone()));
        Ok(lattice)
    }

    fn reset(&mut self) {
        self.audio.clear();
        self.prompt = None;
        self.endpoint.reset();
        self.cached = None;
    }

    fn try_clone(&self) -> Result<Box<dyn DecodingEngine>> {
        Ok(Box::new(Self {
            context: Arc::clone(&self.context),
            config: self.config.clone(),
            symbols: Arc::clone(&self.symbols),
            model_name: self.model_name.clone(),
            audio: Vec::new(),
            prompt: None,
            endpoint: EndpointDetector::new(
                endpoint_config(&self.config),
                crate::defaults::SAMPLE_RATE,
            ),
            cached: None,
        }))
    }

    fn min_samples(&self) -> usize {
        self.config.min_samples
    }
}

#[cfg(feature = "whisper")]
fn endpoint_config(config: &EngineConfig) -> EndpointConfig {
    EndpointConfig {
        speech_level: config.endpoint_speech_level,
        silence_ms: config.endpoint_silence_ms,
        min_speech_ms: config.endpoint_min_speech_ms,
    }
}

/// Whisper engine placeholder (without the `whisper` feature).
///
/// Construction always fails so the server refuses to start instead of
/// answering every request with an error.
#[cfg(not(feature = "whisper"))]
#[derive(Debug)]
pub struct WhisperEngine {
    _private: (),
}

#[cfg(not(feature = "whisper"))]
impl WhisperEngine {
    pub fn new(
        _config: &crate::config::EngineConfig,
        _symbols: std::sync::Arc<SymbolTable>,
    ) -> crate::error::Result<Self> {
        Err(crate::error::VoxgateError::ConfigInvalidValue {
            key: "engine.backend".to_string(),
            message: concat!(
                "this binary was built without Whisper support.\n",
                "To fix: cargo build --release --features whisper\n",
                "If the build fails with cmake errors, install: sudo apt install cmake"
            )
            .to_string(),
        })
    }
}

#[cfg(not(feature = "whisper"))]
impl crate::engine::DecodingEngine for WhisperEngine {
    fn name(&self) -> &str {
        "whisper"
    }

    fn start(&mut self, _graph: Option<&str>) -> crate::error::Result<()> {
        Err(not_compiled())
    }

    fn accept_waveform(
        &mut self,
        _sample_rate: u32,
        _samples: &[f32],
        _do_endpointing: bool,
    ) -> crate::error::Result<bool> {
        Err(not_compiled())
    }

    fn finish_input(&mut self) -> crate::error::Result<()> {
        Err(not_compiled())
    }

    fn lattice(&mut self, _end_of_utterance: bool) -> crate::error::Result<Lattice> {
        Err(not_compiled())
    }

    fn reset(&mut self) {}

    fn try_clone(&self) -> crate::error::Result<Box<dyn crate::engine::DecodingEngine>> {
        Err(not_compiled())
    }
}

#[cfg(not(feature = "whisper"))]
fn not_compiled() -> crate::error::VoxgateError {
    crate::error::VoxgateError::Engine {
        message: "Whisper feature not enabled".to_string(),
    }
}
