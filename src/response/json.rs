//! Single-shot JSON writer: one newline-terminated object per reply.

use crate::error::Result;
use crate::response::{Reply, ResponseWriter};
use std::io::Write;

pub const CONTENT_TYPE: &str = "application/json";

/// Render a reply as one JSON line including the trailing newline.
pub fn format_reply(reply: &Reply) -> Result<String> {
    let mut line = reply.to_json()?;
    line.push('\n');
    Ok(line)
}

/// Writes each reply as a JSON line and flushes it immediately.
#[derive(Debug)]
pub struct JsonWriter<W: Write> {
    out: W,
}

impl<W: Write> JsonWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ResponseWriter for JsonWriter<W> {
    fn content_type(&self) -> &str {
        CONTENT_TYPE
    }

    fn send(&mut self, reply: &Reply) -> Result<()> {
        self.out.write_all(format_reply(reply)?.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }
}
