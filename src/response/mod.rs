//! Result replies and the writers that put them on the wire.
//!
//! Every reply is a self-describing JSON object tagged by `status`:
//!
//! ```json
//! {"status":"ok","data":[{"text":"hello world","confidence":0.93}]}
//! {"status":"intermediate","data":[{"text":"hello"}]}
//! {"status":"error","data":[{"text":"Got no data"}]}
//! ```

pub mod json;
pub mod multipart;

use crate::error::Result;
use serde::{Deserialize, Serialize};

pub use json::JsonWriter;
pub use multipart::MultipartWriter;

/// Why a session ended before its input did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Interruption {
    EndOfSpeech,
    SizeLimit,
    Timeout,
    UnexpectedEnd,
}

impl Interruption {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interruption::EndOfSpeech => "end-of-speech",
            Interruption::SizeLimit => "size-limit",
            Interruption::Timeout => "timeout",
            Interruption::UnexpectedEnd => "unexpected-end",
        }
    }
}

impl std::fmt::Display for Interruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing and confidence of one recognized word. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordInfo {
    pub word: String,
    pub start: f32,
    pub end: f32,
    pub confidence: f32,
}

/// One ranked recognition hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub text: String,
    pub confidence: f32,
    /// Path log-likelihood, reported for n-best results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likelihood: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<WordInfo>,
}

/// Text-only item used by intermediate and error replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextItem {
    pub text: String,
}

/// A reply written to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Ok {
        data: Vec<RecognitionResult>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interrupted: Option<Interruption>,
        /// Milliseconds of audio consumed, reported with an interruption.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time: Option<u64>,
    },
    Intermediate {
        data: Vec<TextItem>,
    },
    Error {
        data: Vec<TextItem>,
    },
}

impl Reply {
    /// Successful terminal reply. `time` is dropped unless interrupted and > 0.
    pub fn ok(
        data: Vec<RecognitionResult>,
        interrupted: Option<Interruption>,
        time_ms: u64,
    ) -> Self {
        let time = (interrupted.is_some() && time_ms > 0).then_some(time_ms);
        Reply::Ok {
            data,
            interrupted,
            time,
        }
    }

    pub fn intermediate(text: impl Into<String>) -> Self {
        Reply::Intermediate {
            data: vec![TextItem { text: text.into() }],
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error {
            data: vec![TextItem {
                text: message.into(),
            }],
        }
    }

    /// Whether this reply ends the session.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Reply::Intermediate { .. })
    }

    /// Serialize to a single JSON line (without the trailing newline).
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Sink for replies of one session.
///
/// The controller writes zero or more intermediate replies followed by
/// exactly one terminal reply.
pub trait ResponseWriter {
    /// MIME type of the response body.
    fn content_type(&self) -> &str;

    fn send(&mut self, reply: &Reply) -> Result<()>;

    fn send_result(
        &mut self,
        results: Vec<RecognitionResult>,
        interrupted: Option<Interruption>,
        time_ms: u64,
    ) -> Result<()> {
        self.send(&Reply::ok(results, interrupted, time_ms))
    }

    fn send_intermediate(&mut self, text: &str) -> Result<()> {
        self.send(&Reply::intermediate(text))
    }

    fn send_error(&mut self, message: &str) -> Result<()> {
        self.send(&Reply::error(message))
    }
}

impl<W: ResponseWriter + ?Sized> ResponseWriter for Box<W> {
    fn content_type(&self) -> &str {
        (**self).content_type()
    }

    fn send(&mut self, reply: &Reply) -> Result<()> {
        (**self).send(reply)
    }
}

/// Writer that keeps replies in memory. Useful for tests and embedding.
#[derive(Debug, Default)]
pub struct CollectingWriter {
    pub replies: Vec<Reply>,
}

impl CollectingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terminal(&self) -> Option<&Reply> {
        self.replies.last().filter(|r| r.is_terminal())
    }

    pub fn intermediates(&self) -> Vec<&str> {
        self.replies
            .iter()
            .filter_map(|r| match r {
                Reply::Intermediate { data } => data.first().map(|t| t.text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl ResponseWriter for CollectingWriter {
    fn content_type(&self) -> &str {
        json::CONTENT_TYPE
    }

    fn send(&mut self, reply: &Reply) -> Result<()> {
        self.replies.push(reply.clone());
        Ok(())
    }
}
