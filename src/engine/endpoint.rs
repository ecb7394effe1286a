//! Energy-based endpoint detection.
//!
//! Tracks speech activity with an RMS threshold and reports an endpoint once
//! enough trailing silence follows a minimum amount of speech. Durations are
//! measured in audio time (sample counts), not wall-clock time, so the result
//! does not depend on how fast the client streams.

use crate::defaults;

/// Configuration for endpoint detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndpointConfig {
    /// RMS level, on the raw 16-bit amplitude scale, that counts as speech.
    pub speech_level: f32,
    /// Trailing silence after speech that ends the utterance (milliseconds).
    pub silence_ms: u32,
    /// Speech needed before silence may end the utterance (milliseconds).
    pub min_speech_ms: u32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            speech_level: defaults::ENDPOINT_SPEECH_LEVEL,
            silence_ms: defaults::ENDPOINT_SILENCE_MS,
            min_speech_ms: defaults::ENDPOINT_MIN_SPEECH_MS,
        }
    }
}

/// Detector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// No speech yet.
    Idle,
    /// Speech in progress.
    Speaking,
    /// Silence after speech, not yet long enough to end the utterance.
    MaybeSilence,
    /// Endpoint reached.
    Stopped,
}

/// Endpoint detector over a stream of samples.
#[derive(Debug, Clone)]
pub struct EndpointDetector {
    config: EndpointConfig,
    state: EndpointState,
    frame_len: usize,
    /// Partial analysis frame carried between calls.
    pending: Vec<f32>,
    speech_samples: u64,
    silence_samples: u64,
    sample_rate: u32,
}

impl EndpointDetector {
    /// Analysis frames are 10 ms long.
    pub fn new(config: EndpointConfig, sample_rate: u32) -> Self {
        let frame_len = (sample_rate as usize / 100).max(1);
        Self {
            config,
            state: EndpointState::Idle,
            frame_len,
            pending: Vec::with_capacity(frame_len),
            speech_samples: 0,
            silence_samples: 0,
            sample_rate,
        }
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// Feed samples; returns true once the endpoint has been reached.
    pub fn process(&mut self, samples: &[f32]) -> bool {
        for &sample in samples {
            self.pending.push(sample);
            if self.pending.len() == self.frame_len {
                let rms = calculate_rms(&self.pending);
                self.pending.clear();
                self.step(rms > self.config.speech_level);
            }
        }
        self.state == EndpointState::Stopped
    }

    fn step(&mut self, is_speech: bool) {
        let frame = self.frame_len as u64;
        match self.state {
            EndpointState::Idle => {
                if is_speech {
                    self.state = EndpointState::Speaking;
                    self.speech_samples = frame;
                }
            }
            EndpointState::Speaking => {
                if is_speech {
                    self.speech_samples += frame;
                } else {
                    self.state = EndpointState::MaybeSilence;
                    self.silence_samples = frame;
                }
            }
            EndpointState::MaybeSilence => {
                if is_speech {
                    self.state = EndpointState::Speaking;
                    self.speech_samples += frame;
                    self.silence_samples = 0;
                } else {
                    self.silence_samples += frame;
                    if self.millis(self.silence_samples) >= self.config.silence_ms as u64 {
                        if self.millis(self.speech_samples) >= self.config.min_speech_ms as u64 {
                            self.state = EndpointState::Stopped;
                        } else {
                            // Too short to be an utterance: treat it as noise.
                            self.state = EndpointState::Idle;
                            self.speech_samples = 0;
                            self.silence_samples = 0;
                        }
                    }
                }
            }
            EndpointState::Stopped => {}
        }
    }

    fn millis(&self, samples: u64) -> u64 {
        samples * 1000 / self.sample_rate.max(1) as u64
    }

    pub fn reset(&mut self) {
        self.state = EndpointState::Idle;
        self.pending.clear();
        self.speech_samples = 0;
        self.silence_samples = 0;
    }
}

/// Root-mean-square level of a frame.
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}
