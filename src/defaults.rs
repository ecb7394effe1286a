//! Default configuration constants for voxgate.
//!
//! Shared by the configuration types, the request parameter parser and the
//! decode-session controller so the same limits apply everywhere.

/// Sample rate of the audio accepted on the wire, in Hz.
///
/// The request body is raw signed 16-bit little-endian mono PCM at this rate.
/// Any other rate is a precondition failure in the controller.
pub const SAMPLE_RATE: u32 = 16000;

/// Bytes per PCM sample on the wire.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Length of one audio chunk pulled from the source, in seconds.
pub const CHUNK_LENGTH_SECS: f32 = 0.18;

/// Smallest and largest accepted n-best count.
pub const NBEST_MIN: u32 = 1;
pub const NBEST_MAX: u32 = 10;

/// Minimum spacing of intermediate results in milliseconds.
///
/// Requests asking for a shorter (but non-zero) interval are raised to this.
pub const INTERMEDIATE_MIN_MS: u32 = 500;

/// Minimum number of samples an engine needs before finalizing.
///
/// Shorter inputs are padded with trailing silence up to this floor.
pub const MIN_SAMPLES: usize = 400;

/// Scaling applied to the graph (language model) cost of lattice arcs.
pub const LM_SCALE: f32 = 10.0;

/// Scaling applied to the acoustic cost of lattice arcs.
pub const ACOUSTIC_SCALE: f32 = 1.0;

/// Default listening address.
pub const LISTEN_ADDRESS: &str = "127.0.0.1:8086";

/// Default listen backlog.
pub const BACKLOG: i32 = 128;

/// Read/write timeout on client sockets, in seconds.
///
/// Bounds request-head parsing and body reads when no decoding timeout is
/// configured, so a stalled client cannot pin a worker forever.
pub const IO_TIMEOUT_SECS: u64 = 30;

/// Boundary token used by the multipart response framing.
pub const MULTIPART_BOUNDARY: &str = "ResponseBoundary";

/// Symbol-table file used when none is configured.
pub const WORD_SYMBOL_TABLE: &str = "words.txt";

/// Default decoding engine backend.
pub const ENGINE_BACKEND: &str = "whisper";

/// Default Whisper model file.
pub const WHISPER_MODEL: &str = "models/ggml-base.en.bin";

/// Language value that triggers automatic language detection.
pub const AUTO_LANGUAGE: &str = "auto";

/// RMS level (raw 16-bit amplitude scale) above which a frame counts as speech.
pub const ENDPOINT_SPEECH_LEVEL: f32 = 600.0;

/// Trailing silence after speech that ends the utterance, in milliseconds.
pub const ENDPOINT_SILENCE_MS: u32 = 1000;

/// Speech required before an endpoint may fire, in milliseconds.
pub const ENDPOINT_MIN_SPEECH_MS: u32 = 300;

/// Report the GPU backend compiled into this build.
pub fn gpu_backend() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA"
    } else if cfg!(feature = "vulkan") {
        "Vulkan"
    } else {
        "CPU"
    }
}
