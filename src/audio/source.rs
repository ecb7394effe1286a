//! Chunked PCM audio sources.

use crate::decoder::params::SessionParams;
use crate::defaults::{BYTES_PER_SAMPLE, SAMPLE_RATE};
use crate::error::Result;
use std::io::{self, Cursor, Read};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};
use tracing::warn;

/// Outcome of one chunk request.
#[derive(Debug, PartialEq)]
pub enum ChunkRead<'a> {
    /// Up to the requested number of samples, borrowed until the next read.
    Samples(&'a [f32]),
    /// No sample arrived before the timeout.
    TimedOut,
    /// The input ended.
    Finished,
}

/// Supplier of audio chunks and the session's request parameters.
pub trait AudioSource {
    fn sample_rate(&self) -> u32;

    fn params(&self) -> &SessionParams;

    /// Read up to `max_samples`, waiting at most `timeout` for data.
    ///
    /// `None` means no session deadline; the source may still apply its own
    /// idle limit.
    fn next_chunk(&mut self, max_samples: usize, timeout: Option<Duration>)
    -> Result<ChunkRead<'_>>;
}

/// A byte stream whose blocking reads can be bounded.
pub trait TimedRead: Read {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl TimedRead for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

impl TimedRead for UnixStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        UnixStream::set_read_timeout(self, timeout)
    }
}

/// In-memory data never blocks.
impl<T: AsRef<[u8]>> TimedRead for Cursor<T> {
    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

impl<R: TimedRead + ?Sized> TimedRead for Box<R> {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_read_timeout(timeout)
    }
}

/// Raw little-endian signed 16-bit mono PCM read from a byte stream.
///
/// Samples are handed out as `f32` on the 16-bit amplitude scale.
pub struct PcmSource<R: TimedRead> {
    reader: R,
    params: SessionParams,
    sample_rate: u32,
    idle_timeout: Option<Duration>,
    bytes: Vec<u8>,
    samples: Vec<f32>,
    /// Odd byte left over from the previous read.
    carry: Option<u8>,
    finished: bool,
}

impl<R: TimedRead> PcmSource<R> {
    pub fn new(reader: R, params: SessionParams) -> Self {
        Self {
            reader,
            params,
            sample_rate: SAMPLE_RATE,
            idle_timeout: None,
            bytes: Vec::new(),
            samples: Vec::new(),
            carry: None,
            finished: false,
        }
    }

    /// Timeout used for reads when the caller passes none.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Declare a sample rate other than 16 kHz.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl PcmSource<Cursor<Vec<u8>>> {
    /// Source over in-memory samples.
    pub fn from_samples(samples: &[i16], params: SessionParams) -> Self {
        let bytes = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self::new(Cursor::new(bytes), params)
    }
}

impl<R: TimedRead> AudioSource for PcmSource<R> {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn params(&self) -> &SessionParams {
        &self.params
    }

    fn next_chunk(
        &mut self,
        max_samples: usize,
        timeout: Option<Duration>,
    ) -> Result<ChunkRead<'_>> {
        if self.finished || max_samples == 0 {
            return Ok(ChunkRead::Finished);
        }

        // The caller's timeout bounds the whole chunk; the idle timeout bounds
        // each read.
        let deadline = timeout.map(|t| Instant::now() + t);
        if deadline.is_none() {
            self.reader
                .set_read_timeout(self.idle_timeout.map(clamp_timeout))?;
        }

        let want = max_samples * BYTES_PER_SAMPLE;
        self.bytes.resize(want, 0);
        let mut filled = 0;
        if let Some(byte) = self.carry.take() {
            self.bytes[0] = byte;
            filled = 1;
        }

        let mut timed_out = false;
        while filled < want {
            if let Some(deadline) = deadline {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() && filled > 0 {
                    timed_out = true;
                    break;
                }
                self.reader.set_read_timeout(Some(clamp_timeout(left)))?;
            }
            match self.reader.read(&mut self.bytes[filled..want]) {
                Ok(0) => {
                    self.finished = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    timed_out = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let whole = filled - filled % BYTES_PER_SAMPLE;
        if whole < filled {
            if self.finished {
                warn!("Discarding dangling byte at end of audio stream");
            } else {
                self.carry = Some(self.bytes[whole]);
            }
        }

        self.samples.clear();
        self.samples.extend(
            self.bytes[..whole]
                .chunks_exact(BYTES_PER_SAMPLE)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32),
        );

        if !self.samples.is_empty() {
            Ok(ChunkRead::Samples(&self.samples))
        } else if timed_out {
            Ok(ChunkRead::TimedOut)
        } else {
            Ok(ChunkRead::Finished)
        }
    }
}

/// Sockets reject a zero timeout; one millisecond is the floor.
fn clamp_timeout(timeout: Duration) -> Duration {
    timeout.max(Duration::from_millis(1))
}
