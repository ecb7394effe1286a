//! Scripted decoding engine for tests and dry runs.

use crate::defaults;
use crate::engine::DecodingEngine;
use crate::engine::lattice::{Lattice, LatticeWeight, WordId};
use crate::error::{Result, VoxgateError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Frames per word in lattices built by [`MockEngine::with_words`].
const FRAMES_PER_WORD: u32 = 50;

/// Engine operation recorded by [`MockEngine`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Start(Option<String>),
    /// Chunk length and whether every sample was zero.
    Accept { samples: usize, silent: bool },
    FinishInput,
    Lattice { end_of_utterance: bool },
    Reset,
}

/// Which operation a [`MockEngine`] should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Start,
    Accept,
    Lattice,
    Clone,
}

/// Mock engine with a scripted final lattice and intermediate lattices.
///
/// Clones share the call log, so a test can observe every worker.
#[derive(Debug, Clone)]
pub struct MockEngine {
    name: String,
    final_lattice: Lattice,
    partial_lattices: Vec<Lattice>,
    partial_index: usize,
    endpoint_after: Option<usize>,
    accept_delay: Option<Duration>,
    failure: Option<MockFailure>,
    panic_on_accept: bool,
    min_samples: usize,
    samples_seen: usize,
    calls: Arc<Mutex<Vec<EngineCall>>>,
}

impl MockEngine {
    /// Create a mock that produces an empty lattice.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            final_lattice: Lattice::empty(),
            partial_lattices: Vec::new(),
            partial_index: 0,
            endpoint_after: None,
            accept_delay: None,
            failure: None,
            panic_on_accept: false,
            min_samples: defaults::MIN_SAMPLES,
            samples_seen: 0,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Final lattice returned at end of utterance.
    pub fn with_lattice(mut self, lattice: Lattice) -> Self {
        self.final_lattice = lattice;
        self
    }

    /// Final lattice that is a single path over `words`, each 0.5 s long.
    pub fn with_words(self, words: &[WordId]) -> Self {
        let lattice = linear_words(words);
        self.with_lattice(lattice)
    }

    /// Lattices handed out, in order, for intermediate requests.
    ///
    /// The last one repeats once the script is exhausted. Without a script the
    /// final lattice is used.
    pub fn with_partial_lattices(mut self, lattices: Vec<Lattice>) -> Self {
        self.partial_lattices = lattices;
        self
    }

    /// Report an endpoint once this many samples have been accepted.
    pub fn with_endpoint_after(mut self, samples: usize) -> Self {
        self.endpoint_after = Some(samples);
        self
    }

    /// Sleep inside every `accept_waveform` call.
    pub fn with_accept_delay(mut self, delay: Duration) -> Self {
        self.accept_delay = Some(delay);
        self
    }

    pub fn with_failure(mut self, failure: MockFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn with_panic_on_accept(mut self) -> Self {
        self.panic_on_accept = true;
        self
    }

    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }

    /// Snapshot of every call made on this engine and its clones.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Handle to the shared call log, usable after the engine is moved.
    pub fn call_log(&self) -> Arc<Mutex<Vec<EngineCall>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: EngineCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn fail(&self, failure: MockFailure) -> Result<()> {
        if self.failure == Some(failure) {
            return Err(VoxgateError::Engine {
                message: format!("mock {:?} failure", failure).to_lowercase(),
            });
        }
        Ok(())
    }
}

impl DecodingEngine for MockEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, graph: Option<&str>) -> Result<()> {
        self.record(EngineCall::Start(graph.map(str::to_string)));
        self.fail(MockFailure::Start)?;
        self.samples_seen = 0;
        self.partial_index = 0;
        Ok(())
    }

    fn accept_waveform(
        &mut self,
        _sample_rate: u32,
        samples: &[f32],
        do_endpointing: bool,
    ) -> Result<bool> {
        self.record(EngineCall::Accept {
            samples: samples.len(),
            silent: samples.iter().all(|&s| s == 0.0),
        });
        if self.panic_on_accept {
            panic!("mock engine panic");
        }
        self.fail(MockFailure::Accept)?;
        if let Some(delay) = self.accept_delay {
            std::thread::sleep(delay);
        }
        self.samples_seen += samples.len();
        Ok(do_endpointing && self.endpoint_after.is_some_and(|n| self.samples_seen >= n))
    }

    fn finish_input(&mut self) -> Result<()> {
        self.record(EngineCall::FinishInput);
        Ok(())
    }

    fn lattice(&mut self, end_of_utterance: bool) -> Result<Lattice> {
        self.record(EngineCall::Lattice { end_of_utterance });
        self.fail(MockFailure::Lattice)?;
        if end_of_utterance || self.partial_lattices.is_empty() {
            return Ok(self.final_lattice.clone());
        }
        let index = self.partial_index.min(self.partial_lattices.len() - 1);
        self.partial_index += 1;
        Ok(self.partial_lattices[index].clone())
    }

    fn reset(&mut self) {
        self.record(EngineCall::Reset);
        self.samples_seen = 0;
        self.partial_index = 0;
    }

    fn try_clone(&self) -> Result<Box<dyn DecodingEngine>> {
        self.fail(MockFailure::Clone)?;
        let mut clone = self.clone();
        clone.samples_seen = 0;
        clone.partial_index = 0;
        Ok(Box::new(clone))
    }

    fn min_samples(&self) -> usize {
        self.min_samples
    }
}

/// Single-path lattice over `words` with unit acoustic cost per word.
pub fn linear_words(words: &[WordId]) -> Lattice {
    let arcs: Vec<_> = words
        .iter()
        .map(|&w| (w, LatticeWeight::new(0.0, 1.0), FRAMES_PER_WORD))
        .collect();
    Lattice::linear(&arcs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::lattice::ScoreScale;

    #[test]
    fn test_mock_records_calls() {
        let mut engine = MockEngine::new("test");
        engine.start(Some("digits")).unwrap();
        engine.accept_waveform(16000, &[0.0; 10], false).unwrap();
        engine.accept_waveform(16000, &[1.0; 5], false).unwrap();
        engine.finish_input().unwrap();
        engine.lattice(true).unwrap();
        engine.reset();

        assert_eq!(
            engine.calls(),
            vec![
                EngineCall::Start(Some("digits".to_string())),
                EngineCall::Accept {
                    samples: 10,
                    silent: true
                },
                EngineCall::Accept {
                    samples: 5,
                    silent: false
                },
                EngineCall::FinishInput,
                EngineCall::Lattice {
                    end_of_utterance: true
                },
                EngineCall::Reset,
            ]
        );
    }

    #[test]
    fn test_endpoint_only_when_enabled() {
        let mut engine = MockEngine::new("test").with_endpoint_after(100);
        engine.start(None).unwrap();
        assert!(!engine.accept_waveform(16000, &[0.0; 150], false).unwrap());
        assert!(engine.accept_waveform(16000, &[0.0; 10], true).unwrap());
    }

    #[test]
    fn test_partial_lattice_script_repeats_last() {
        let mut engine = MockEngine::new("test")
            .with_words(&[9])
            .with_partial_lattices(vec![linear_words(&[1]), linear_words(&[2])]);
        engine.start(None).unwrap();
        let scale = ScoreScale::default();
        let words = |l: Lattice| l.shortest_path(scale).unwrap().words();
        assert_eq!(words(engine.lattice(false).unwrap()), vec![1]);
        assert_eq!(words(engine.lattice(false).unwrap()), vec![2]);
        assert_eq!(words(engine.lattice(false).unwrap()), vec![2]);
        assert_eq!(words(engine.lattice(true).unwrap()), vec![9]);
    }

    #[test]
    fn test_failure_injection() {
        let mut engine = MockEngine::new("test").with_failure(MockFailure::Lattice);
        engine.start(None).unwrap();
        match engine.lattice(true) {
            Err(VoxgateError::Engine { message }) => assert_eq!(message, "mock lattice failure"),
            _ => panic!("Expected Engine error"),
        }
        assert!(
            MockEngine::new("test")
                .with_failure(MockFailure::Clone)
                .try_clone()
                .is_err()
        );
    }

    #[test]
    fn test_clones_share_call_log() {
        let engine = MockEngine::new("test");
        let mut clone = engine.try_clone().unwrap();
        clone.start(None).unwrap();
        assert_eq!(engine.calls(), vec![EngineCall::Start(None)]);
    }

    #[test]
    fn test_linear_words_spacing() {
        let lattice = linear_words(&[4, 5]);
        assert_eq!(lattice.state_time(2), Some(100));
    }
}
