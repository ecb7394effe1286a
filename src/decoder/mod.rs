//! Decode-session controller.
//!
//! [`Decoder::run`] drives one utterance: it pulls chunks from an
//! [`AudioSource`], feeds them to a [`DecodingEngine`], emits intermediate
//! snapshots at the requested cadence and finishes with exactly one terminal
//! reply. Session failures never escape `run`; they become error replies.

pub mod extract;
pub mod params;

use crate::audio::{AudioSource, ChunkRead};
use crate::config::DecoderConfig;
use crate::defaults::SAMPLE_RATE;
use crate::engine::DecodingEngine;
use crate::engine::lattice::WordId;
use crate::engine::symbols::SymbolTable;
use crate::error::{Result, VoxgateError};
use crate::response::{Interruption, Reply, ResponseWriter};
use extract::{ExtractOptions, ResultExtractor};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

pub use params::SessionParams;

pub const NO_DATA_MESSAGE: &str = "Got no data";
pub const BEST_PATH_FAILED_MESSAGE: &str = "Best-path failed";
const INTERNAL_ERROR_MESSAGE: &str = "Internal decoder error";

/// Why a session stopped early.
enum Abort {
    /// Reported to the client as an error reply.
    Session(String),
    /// The client can no longer be written to.
    Transport(VoxgateError),
}

impl From<VoxgateError> for Abort {
    fn from(e: VoxgateError) -> Self {
        Abort::Session(e.to_string())
    }
}

/// Session controller. Immutable and shareable across workers.
#[derive(Debug, Clone)]
pub struct Decoder {
    config: DecoderConfig,
    symbols: Arc<SymbolTable>,
}

impl Decoder {
    pub fn new(config: DecoderConfig, symbols: Arc<SymbolTable>) -> Self {
        Self { config, symbols }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode everything `source` delivers and write the replies.
    ///
    /// The engine is reset afterwards on every path, including panics inside
    /// the engine. Returns an error only when the writer fails.
    pub fn run(
        &self,
        engine: &mut dyn DecodingEngine,
        source: &mut dyn AudioSource,
        writer: &mut dyn ResponseWriter,
    ) -> Result<()> {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.decode(&mut *engine, &mut *source, &mut *writer)
        }));
        engine.reset();

        let reply = match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(Abort::Session(message))) => {
                warn!("Session failed: {}", message);
                Reply::error(message)
            }
            Ok(Err(Abort::Transport(e))) => return Err(e),
            Err(_) => {
                error!("Decoding engine {} panicked", engine.name());
                Reply::error(INTERNAL_ERROR_MESSAGE)
            }
        };
        writer.send(&reply)
    }

    fn decode(
        &self,
        engine: &mut dyn DecodingEngine,
        source: &mut dyn AudioSource,
        writer: &mut dyn ResponseWriter,
    ) -> std::result::Result<Reply, Abort> {
        let rate = source.sample_rate();
        if rate != SAMPLE_RATE {
            return Err(VoxgateError::AudioFormatMismatch {
                expected: format!("{} Hz", SAMPLE_RATE),
                actual: format!("{} Hz", rate),
            }
            .into());
        }

        let params = source.params().clone();
        let start = Instant::now();
        debug!("Session started on {} ({:?})", engine.name(), params);

        let samples_per_chunk = ((self.config.chunk_length_secs * rate as f32) as usize).max(1);
        let max_samples = (self.config.max_record_length_secs > 0.0)
            .then(|| (self.config.max_record_length_secs * rate as f32) as usize);
        // Unrepresentable timeouts are rejected by `Config::validate`.
        let timeout = (self.config.decoding_timeout_secs > 0.0)
            .then(|| Duration::try_from_secs_f32(self.config.decoding_timeout_secs).ok())
            .flatten();
        let intermediate_interval = params.intermediate_ms as usize * rate as usize / 1000;

        let extractor = ResultExtractor::new(
            &self.symbols,
            ExtractOptions {
                scale: self.config.scale(),
                word_alignment: self.config.word_alignment,
                confidence_floor: self.config.confidence_floor(),
                frame_shift_secs: engine.frame_shift_secs(),
            },
        );

        engine.start(params.phrase.as_deref())?;

        let mut consumed = 0usize;
        let mut next_intermediate = intermediate_interval;
        let mut prev_words: Vec<WordId> = Vec::new();
        let mut interruption = None;
        let mut samples_wanted = max_samples.map_or(samples_per_chunk, |m| m.min(samples_per_chunk));
        let mut time_left = timeout;

        loop {
            let chunk = match source.next_chunk(samples_wanted, time_left) {
                Ok(ChunkRead::Samples(chunk)) => chunk,
                Ok(ChunkRead::Finished) => break,
                Ok(ChunkRead::TimedOut) => {
                    interruption = Some(if timeout.is_some_and(|t| start.elapsed() >= t) {
                        debug!("Timeout reached @ {} ms", start.elapsed().as_millis());
                        Interruption::Timeout
                    } else {
                        debug!("Input stalled @ {} ms", start.elapsed().as_millis());
                        Interruption::UnexpectedEnd
                    });
                    break;
                }
                Err(e) => {
                    debug!("Input failed @ {} ms: {}", start.elapsed().as_millis(), e);
                    interruption = Some(Interruption::UnexpectedEnd);
                    break;
                }
            };

            consumed += chunk.len();
            let endpoint = engine.accept_waveform(rate, chunk, params.do_endpointing)?;
            if params.do_endpointing && endpoint {
                debug!("End point detected @ {} ms", start.elapsed().as_millis());
                interruption = Some(Interruption::EndOfSpeech);
                break;
            }

            if let Some(limit) = max_samples {
                if consumed >= limit {
                    debug!("Interrupted by record length @ {} ms", start.elapsed().as_millis());
                    interruption = Some(Interruption::SizeLimit);
                    break;
                }
                samples_wanted = (limit - consumed).min(samples_per_chunk);
            }

            if intermediate_interval > 0 && consumed > next_intermediate {
                next_intermediate = (consumed / intermediate_interval + 1) * intermediate_interval;
                let lattice = engine.lattice(false)?;
                match extractor.intermediate(&lattice) {
                    Some(snapshot) => {
                        if snapshot.words != prev_words {
                            writer
                                .send_intermediate(&snapshot.text)
                                .map_err(Abort::Transport)?;
                            prev_words = snapshot.words;
                        }
                    }
                    None => prev_words.clear(),
                }
            }

            if let Some(limit) = timeout {
                let elapsed = start.elapsed();
                if elapsed >= limit {
                    debug!("Timeout reached @ {} ms", elapsed.as_millis());
                    interruption = Some(Interruption::Timeout);
                    break;
                }
                time_left = Some(limit - elapsed);
            }
        }

        if consumed == 0 {
            return Err(Abort::Session(NO_DATA_MESSAGE.to_string()));
        }

        let floor = engine.min_samples();
        if consumed < floor {
            debug!("Input too short, padding with {} zero samples", floor - consumed);
            let padding = vec![0.0f32; floor - consumed];
            engine.accept_waveform(rate, &padding, false)?;
        }

        let audio_ms = (consumed as u64 * 1000) / rate as u64;
        debug!(
            "Input finished @ {} ms (audio length: {} ms)",
            start.elapsed().as_millis(),
            audio_ms
        );
        engine.finish_input()?;

        let lattice = engine.lattice(true)?;
        let results = extractor.final_results(&lattice, params.nbest);
        if results.is_empty() {
            return Err(Abort::Session(BEST_PATH_FAILED_MESSAGE.to_string()));
        }

        debug!("Recognized @ {} ms", start.elapsed().as_millis());
        Ok(Reply::ok(results, interruption, audio_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::PcmSource;
    use crate::engine::mock::{EngineCall, MockEngine, MockFailure, linear_words};
    use crate::response::CollectingWriter;

    fn symbols() -> Arc<SymbolTable> {
        Arc::new(SymbolTable::from_pairs([
            ("<eps>", 0),
            ("hello", 1),
            ("world", 2),
            ("again", 3),
        ]))
    }

    fn decoder(config: DecoderConfig) -> Decoder {
        Decoder::new(config, symbols())
    }

    fn source(samples: usize, params: SessionParams) -> PcmSource<std::io::Cursor<Vec<u8>>> {
        PcmSource::from_samples(&vec![1000i16; samples], params)
    }

    fn run(
        decoder: &Decoder,
        engine: &mut MockEngine,
        samples: usize,
        params: SessionParams,
    ) -> CollectingWriter {
        let mut writer = CollectingWriter::new();
        let mut source = source(samples, params);
        decoder.run(engine, &mut source, &mut writer).unwrap();
        writer
    }

    fn ok_data(reply: &Reply) -> (&[crate::response::RecognitionResult], Option<Interruption>, Option<u64>) {
        match reply {
            Reply::Ok {
                data,
                interrupted,
                time,
            } => (data.as_slice(), *interrupted, *time),
            other => panic!("Expected ok reply, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_session_returns_one_ok_reply() {
        let decoder = decoder(DecoderConfig::default());
        let mut engine = MockEngine::new("mock").with_words(&[1, 2]);
        let writer = run(&decoder, &mut engine, 32000, SessionParams::default());

        assert_eq!(writer.replies.len(), 1);
        let (data, interrupted, time) = ok_data(&writer.replies[0]);
        assert_eq!(data[0].text, "hello world");
        assert!(interrupted.is_none());
        assert!(time.is_none());
    }

    #[test]
    fn test_no_data_is_an_error() {
        let decoder = decoder(DecoderConfig::default());
        let mut engine = MockEngine::new("mock").with_words(&[1]);
        let params = SessionParams {
            intermediate_ms: 500,
            ..SessionParams::default()
        };
        let writer = run(&decoder, &mut engine, 0, params);

        assert_eq!(writer.replies, vec![Reply::error(NO_DATA_MESSAGE)]);
        assert_eq!(engine.calls().last(), Some(&EngineCall::Reset));
    }

    #[test]
    fn test_empty_lattice_is_best_path_failure() {
        let decoder = decoder(DecoderConfig::default());
        let mut engine = MockEngine::new("mock");
        let writer = run(&decoder, &mut engine, 8000, SessionParams::default());
        assert_eq!(writer.replies, vec![Reply::error(BEST_PATH_FAILED_MESSAGE)]);
    }

    #[test]
    fn test_short_input_is_padded_to_floor() {
        let decoder = decoder(DecoderConfig::default());
        let mut engine = MockEngine::new("mock").with_words(&[1]);
        run(&decoder, &mut engine, 150, SessionParams::default());

        let calls = engine.calls();
        assert!(calls.contains(&EngineCall::Accept {
            samples: 150,
            silent: false
        }));
        assert!(calls.contains(&EngineCall::Accept {
            samples: 250,
            silent: true
        }));
    }

    #[test]
    fn test_input_at_floor_is_not_padded() {
        let decoder = decoder(DecoderConfig::default());
        let mut engine = MockEngine::new("mock").with_words(&[1]);
        run(&decoder, &mut engine, 400, SessionParams::default());
        assert!(
            !engine
                .calls()
                .iter()
                .any(|c| matches!(c, EngineCall::Accept { silent: true, .. }))
        );
    }

    #[test]
    fn test_chunks_follow_chunk_length() {
        let decoder = decoder(DecoderConfig::default());
        let mut engine = MockEngine::new("mock").with_words(&[1]);
        run(&decoder, &mut engine, 6000, SessionParams::default());

        let sizes: Vec<usize> = engine
            .calls()
            .iter()
            .filter_map(|c| match c {
                EngineCall::Accept { samples, .. } => Some(*samples),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![2880, 2880, 240]);
    }

    #[test]
    fn test_size_limit_interrupts_at_limit() {
        let decoder = decoder(DecoderConfig {
            max_record_length_secs: 1.0,
            ..DecoderConfig::default()
        });
        let mut engine = MockEngine::new("mock").with_words(&[1]);
        let writer = run(&decoder, &mut engine, 48000, SessionParams::default());

        let (_, interrupted, time) = ok_data(&writer.replies[0]);
        assert_eq!(interrupted, Some(Interruption::SizeLimit));
        assert_eq!(time, Some(1000));
    }

    #[test]
    fn test_endpoint_stops_session() {
        let decoder = decoder(DecoderConfig::default());
        let mut engine = MockEngine::new("mock")
            .with_words(&[1])
            .with_endpoint_after(8000);
        let params = SessionParams {
            do_endpointing: true,
            ..SessionParams::default()
        };
        let writer = run(&decoder, &mut engine, 32000, params);

        let (_, interrupted, time) = ok_data(&writer.replies[0]);
        assert_eq!(interrupted, Some(Interruption::EndOfSpeech));
        // Three 0.18 s chunks reach 8000 samples.
        assert_eq!(time, Some(540));
    }

    #[test]
    fn test_endpoint_ignored_when_disabled() {
        let decoder = decoder(DecoderConfig::default());
        let mut engine = MockEngine::new("mock")
            .with_words(&[1])
            .with_endpoint_after(8000);
        let writer = run(&decoder, &mut engine, 32000, SessionParams::default());
        let (_, interrupted, _) = ok_data(&writer.replies[0]);
        assert!(interrupted.is_none());
    }

    #[test]
    fn test_timeout_between_chunks() {
        let decoder = decoder(DecoderConfig {
            decoding_timeout_secs: 0.1,
            ..DecoderConfig::default()
        });
        let mut engine = MockEngine::new("mock")
            .with_words(&[1])
            .with_accept_delay(Duration::from_millis(60));
        let writer = run(&decoder, &mut engine, 32000, SessionParams::default());

        let (_, interrupted, time) = ok_data(&writer.replies[0]);
        assert_eq!(interrupted, Some(Interruption::Timeout));
        assert!(time.unwrap() < 2000);
    }

    #[test]
    fn test_unrepresentable_timeout_does_not_abort_session() {
        let decoder = decoder(DecoderConfig {
            decoding_timeout_secs: f32::INFINITY,
            ..DecoderConfig::default()
        });
        let mut engine = MockEngine::new("mock").with_words(&[1]);
        let writer = run(&decoder, &mut engine, 8000, SessionParams::default());

        let (data, interrupted, _) = ok_data(&writer.replies[0]);
        assert_eq!(data[0].text, "hello");
        assert!(interrupted.is_none());
    }

    #[test]
    fn test_intermediates_only_when_words_change() {
        let decoder = decoder(DecoderConfig::default());
        let mut engine = MockEngine::new("mock")
            .with_words(&[1, 2, 3])
            .with_partial_lattices(vec![
                linear_words(&[1]),
                linear_words(&[1]),
                linear_words(&[1, 2]),
                linear_words(&[1, 2]),
            ]);
        let params = SessionParams {
            intermediate_ms: 500,
            ..SessionParams::default()
        };
        let writer = run(&decoder, &mut engine, 48000, params);

        assert_eq!(writer.intermediates(), vec!["hello", "hello world"]);
        let (data, _, _) = ok_data(writer.terminal().unwrap());
        assert_eq!(data[0].text, "hello world again");
    }

    #[test]
    fn test_empty_intermediate_resets_change_tracking() {
        let decoder = decoder(DecoderConfig::default());
        let mut engine = MockEngine::new("mock")
            .with_words(&[1])
            .with_partial_lattices(vec![
                linear_words(&[1]),
                crate::engine::lattice::Lattice::empty(),
                linear_words(&[1]),
            ]);
        let params = SessionParams {
            intermediate_ms: 500,
            ..SessionParams::default()
        };
        let writer = run(&decoder, &mut engine, 48000, params);
        assert_eq!(writer.intermediates(), vec!["hello", "hello"]);
    }

    #[test]
    fn test_no_intermediates_when_disabled() {
        let decoder = decoder(DecoderConfig::default());
        let mut engine = MockEngine::new("mock")
            .with_words(&[1])
            .with_partial_lattices(vec![linear_words(&[2])]);
        let writer = run(&decoder, &mut engine, 48000, SessionParams::default());
        assert!(writer.intermediates().is_empty());
        assert!(
            !engine
                .calls()
                .contains(&EngineCall::Lattice {
                    end_of_utterance: false
                })
        );
    }

    #[test]
    fn test_nbest_results() {
        let decoder = decoder(DecoderConfig::default());
        let mut engine = MockEngine::new("mock").with_words(&[1, 2]);
        let params = SessionParams {
            nbest: 3,
            ..SessionParams::default()
        };
        let writer = run(&decoder, &mut engine, 16000, params);
        let (data, _, _) = ok_data(&writer.replies[0]);
        assert_eq!(data.len(), 1);
        assert!(data[0].likelihood.is_some());
    }

    #[test]
    fn test_engine_error_becomes_error_reply_and_engine_is_reset() {
        let decoder = decoder(DecoderConfig::default());
        let mut engine = MockEngine::new("mock").with_failure(MockFailure::Accept);
        let writer = run(&decoder, &mut engine, 16000, SessionParams::default());

        match &writer.replies[..] {
            [Reply::Error { data }] => assert!(data[0].text.contains("mock accept failure")),
            other => panic!("Expected one error reply, got {:?}", other),
        }
        assert_eq!(engine.calls().last(), Some(&EngineCall::Reset));
    }

    #[test]
    fn test_engine_panic_is_contained() {
        let decoder = decoder(DecoderConfig::default());
        let mut engine = MockEngine::new("mock").with_panic_on_accept();
        let writer = run(&decoder, &mut engine, 16000, SessionParams::default());
        assert_eq!(writer.replies, vec![Reply::error(INTERNAL_ERROR_MESSAGE)]);
        assert_eq!(engine.calls().last(), Some(&EngineCall::Reset));
    }

    #[test]
    fn test_wrong_sample_rate_is_rejected() {
        let decoder = decoder(DecoderConfig::default());
        let mut engine = MockEngine::new("mock").with_words(&[1]);
        let mut source = source(8000, SessionParams::default()).with_sample_rate(8000);
        let mut writer = CollectingWriter::new();
        decoder.run(&mut engine, &mut source, &mut writer).unwrap();
        assert!(matches!(&writer.replies[..], [Reply::Error { .. }]));
    }

    #[test]
    fn test_phrase_is_passed_to_engine() {
        let decoder = decoder(DecoderConfig::default());
        let mut engine = MockEngine::new("mock").with_words(&[1]);
        let params = SessionParams {
            phrase: Some("digits".to_string()),
            ..SessionParams::default()
        };
        run(&decoder, &mut engine, 1600, params);
        assert_eq!(engine.calls()[0], EngineCall::Start(Some("digits".to_string())));
    }
}
