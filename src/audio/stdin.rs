//! Timeout-capable reading from blocking streams such as stdin.
//!
//! Stdin cannot be given a read timeout, so a background thread performs the
//! blocking reads and forwards blocks over a bounded channel. The consumer
//! side then waits with `recv_timeout`.

use crate::audio::source::TimedRead;
use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use std::io::{self, Read};
use std::thread;
use std::time::Duration;
use tracing::debug;

const BLOCK_SIZE: usize = 8192;
const CHANNEL_CAPACITY: usize = 32;

/// Reader fed by a background thread.
pub struct ChannelReader {
    rx: Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    offset: usize,
    timeout: Option<Duration>,
    closed: bool,
}

impl ChannelReader {
    /// Move `reader` onto a background thread.
    pub fn spawn<R: Read + Send + 'static>(mut reader: R) -> io::Result<Self> {
        let (tx, rx) = bounded(CHANNEL_CAPACITY);
        thread::Builder::new()
            .name("input-reader".to_string())
            .spawn(move || {
                let mut block = vec![0u8; BLOCK_SIZE];
                loop {
                    match reader.read(&mut block) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(Ok(block[..n].to_vec())).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            tx.send(Err(e)).ok();
                            break;
                        }
                    }
                }
                debug!("Input reader finished");
            })?;
        Ok(Self {
            rx,
            pending: Vec::new(),
            offset: 0,
            timeout: None,
            closed: false,
        })
    }

    /// Reader over this process's stdin.
    pub fn stdin() -> io::Result<Self> {
        Self::spawn(io::stdin())
    }

    /// Up to `n` upcoming bytes, without consuming them.
    ///
    /// Shorter only when the stream ends first. Blocks until enough data
    /// arrives, ignoring the read timeout.
    pub fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        if self.offset > 0 {
            self.pending.drain(..self.offset);
            self.offset = 0;
        }
        while self.pending.len() < n && !self.closed {
            match self.rx.recv() {
                Ok(block) => self.pending.extend_from_slice(&block?),
                Err(_) => self.closed = true,
            }
        }
        Ok(&self.pending[..n.min(self.pending.len())])
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.offset >= self.pending.len() {
            if self.closed {
                return Ok(0);
            }
            let block = match self.timeout {
                Some(timeout) => match self.rx.recv_timeout(timeout) {
                    Ok(block) => block,
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        self.closed = true;
                        return Ok(0);
                    }
                },
                None => match self.rx.recv() {
                    Ok(block) => block,
                    Err(_) => {
                        self.closed = true;
                        return Ok(0);
                    }
                },
            };
            self.pending = block?;
            self.offset = 0;
        }

        let n = buf.len().min(self.pending.len() - self.offset);
        buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

impl TimedRead for ChannelReader {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }
}
