//! Minimal HTTP/1.x framing for decode requests.
//!
//! Only what a streaming upload needs: the request head, the three body
//! framings (length, chunked, until close) and the response heads. Every
//! response closes the connection.

use crate::audio::TimedRead;
use crate::error::{Result, VoxgateError};
use crate::response::Reply;
use crate::response::json::{self, format_reply};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::time::Duration;

/// Upper bound on the request head, request line included.
pub const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_CHUNK_LINE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    pub fn path(&self) -> &str {
        self.target.split_once('?').map_or(&self.target, |(path, _)| path)
    }

    /// Query string of the target without the leading `?`.
    pub fn query(&self) -> &str {
        self.target.split_once('?').map_or("", |(_, query)| query)
    }

    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_length(&self) -> Result<Option<u64>> {
        self.header("content-length")
            .map(|value| {
                value.trim().parse::<u64>().map_err(|_| VoxgateError::Request {
                    message: format!("invalid Content-Length {:?}", value),
                })
            })
            .transpose()
    }

    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .is_some_and(|v| v.split(',').any(|coding| coding.trim().eq_ignore_ascii_case("chunked")))
    }

    pub fn expects_continue(&self) -> bool {
        self.header("expect")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"))
    }
}

fn malformed(message: impl Into<String>) -> VoxgateError {
    VoxgateError::Request {
        message: message.into(),
    }
}

/// Read a request head up to and including the blank line.
pub fn read_head<R: BufRead>(reader: &mut R) -> Result<RequestHead> {
    let mut total = 0;
    let mut request_line = None;
    let mut headers = Vec::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader
            .by_ref()
            .take((MAX_HEAD_BYTES - total) as u64 + 1)
            .read_until(b'\n', &mut line)?;
        total += n;
        if total > MAX_HEAD_BYTES {
            return Err(malformed("request head too large"));
        }
        if n == 0 || line.last() != Some(&b'\n') {
            return Err(malformed("connection closed inside request head"));
        }

        let text = std::str::from_utf8(&line)
            .map_err(|_| malformed("request head is not valid UTF-8"))?
            .trim_end_matches(['\r', '\n']);

        if request_line.is_none() {
            // Stray blank lines before the request line are allowed.
            if !text.is_empty() {
                request_line = Some(text.to_string());
            }
            continue;
        }
        if text.is_empty() {
            break;
        }
        let (name, value) = text
            .split_once(':')
            .ok_or_else(|| malformed(format!("malformed header line {:?}", text)))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let request_line = request_line.unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed(format!("malformed request line {:?}", request_line)));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(malformed(format!("unsupported protocol {}", version)));
    }

    Ok(RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        headers,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Length { remaining: u64 },
    Chunked(ChunkState),
    UntilClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data { remaining: u64 },
    DataEnd,
    Trailer,
    Done,
}

/// Request body with its transfer framing removed.
///
/// Reads that time out keep any partially read chunk line, so the stream
/// can be resumed by the next call.
pub struct HttpBody<R: Read> {
    reader: BufReader<R>,
    framing: Framing,
    line: Vec<u8>,
}

impl<R: Read> HttpBody<R> {
    /// Body of `head`, read from the bytes following the head in `reader`.
    pub fn new(reader: BufReader<R>, head: &RequestHead) -> Result<Self> {
        let framing = if head.is_chunked() {
            Framing::Chunked(ChunkState::Size)
        } else if let Some(remaining) = head.content_length()? {
            Framing::Length { remaining }
        } else {
            Framing::UntilClose
        };
        Ok(Self {
            reader,
            framing,
            line: Vec::new(),
        })
    }

    pub fn into_inner(self) -> BufReader<R> {
        self.reader
    }

    fn read_line(&mut self) -> io::Result<String> {
        let budget = (MAX_CHUNK_LINE + 1).saturating_sub(self.line.len());
        (&mut self.reader)
            .take(budget as u64)
            .read_until(b'\n', &mut self.line)?;
        if self.line.len() > MAX_CHUNK_LINE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "chunk line too long"));
        }
        if self.line.last() != Some(&b'\n') {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside chunked body",
            ));
        }
        let text = String::from_utf8_lossy(&self.line)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.line.clear();
        Ok(text)
    }

    fn read_chunked(&mut self, state: ChunkState, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = state;
        loop {
            match state {
                ChunkState::Size => {
                    let line = self.read_line()?;
                    let digits = line.split(';').next().unwrap_or_default().trim();
                    let size = u64::from_str_radix(digits, 16).map_err(|_| {
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("invalid chunk size {:?}", digits),
                        )
                    })?;
                    state = if size == 0 {
                        ChunkState::Trailer
                    } else {
                        ChunkState::Data { remaining: size }
                    };
                }
                ChunkState::Data { remaining } => {
                    let max = remaining.min(buf.len() as u64) as usize;
                    let n = self.reader.read(&mut buf[..max])?;
                    if n == 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed inside chunk",
                        ));
                    }
                    let remaining = remaining - n as u64;
                    self.framing = Framing::Chunked(if remaining == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data { remaining }
                    });
                    return Ok(n);
                }
                ChunkState::DataEnd => {
                    if !self.read_line()?.is_empty() {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "missing CRLF after chunk",
                        ));
                    }
                    state = ChunkState::Size;
                }
                ChunkState::Trailer => {
                    if self.read_line()?.is_empty() {
                        state = ChunkState::Done;
                    }
                }
                ChunkState::Done => {
                    self.framing = Framing::Chunked(ChunkState::Done);
                    return Ok(0);
                }
            }
            self.framing = Framing::Chunked(state);
        }
    }
}

impl<R: Read> Read for HttpBody<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.framing {
            Framing::UntilClose => self.reader.read(buf),
            Framing::Length { remaining: 0 } => Ok(0),
            Framing::Length { remaining } => {
                let max = remaining.min(buf.len() as u64) as usize;
                let n = self.reader.read(&mut buf[..max])?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "body shorter than Content-Length",
                    ));
                }
                self.framing = Framing::Length {
                    remaining: remaining - n as u64,
                };
                Ok(n)
            }
            Framing::Chunked(state) => self.read_chunked(state, buf),
        }
    }
}

impl<R: TimedRead> TimedRead for HttpBody<R> {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.reader.get_mut().set_read_timeout(timeout)
    }
}

/// Interim reply to `Expect: 100-continue`.
pub fn write_continue<W: Write>(out: &mut W) -> io::Result<()> {
    out.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
    out.flush()
}

/// Status line and headers of a response whose body runs until close.
pub fn write_response_head<W: Write>(out: &mut W, status: &str, content_type: &str) -> io::Result<()> {
    write!(
        out,
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nConnection: close\r\n\r\n",
        status, content_type
    )?;
    out.flush()
}

/// Complete `400 Bad Request` response carrying an error reply.
pub fn write_bad_request<W: Write>(out: &mut W, message: &str) -> Result<()> {
    write_response_head(out, "400 Bad Request", json::CONTENT_TYPE)?;
    out.write_all(format_reply(&Reply::error(message))?.as_bytes())?;
    out.flush()?;
    Ok(())
}
