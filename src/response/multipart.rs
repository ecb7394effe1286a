//! Multipart streaming writer (`multipart/x-mixed-replace`).
//!
//! Each reply becomes one body part. Intermediate replies are named
//! `partial`, terminal ones `result`, and the terminal part closes the
//! stream with `--BOUNDARY--`.

use crate::defaults::MULTIPART_BOUNDARY;
use crate::error::Result;
use crate::response::json::{CONTENT_TYPE as JSON_CONTENT_TYPE, format_reply};
use crate::response::{Reply, ResponseWriter};
use std::io::Write;

#[derive(Debug)]
pub struct MultipartWriter<W: Write> {
    out: W,
    content_type: String,
    started: bool,
}

impl<W: Write> MultipartWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            content_type: format!("multipart/x-mixed-replace;boundary={}", MULTIPART_BOUNDARY),
            started: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ResponseWriter for MultipartWriter<W> {
    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn send(&mut self, reply: &Reply) -> Result<()> {
        let body = format_reply(reply)?;
        let name = if reply.is_terminal() { "result" } else { "partial" };

        let mut part = String::with_capacity(body.len() + 128);
        if !self.started {
            part.push_str("\r\n--");
            part.push_str(MULTIPART_BOUNDARY);
            part.push_str("\r\n");
            self.started = true;
        }
        part.push_str(&format!(
            "Content-Disposition: form-data; name=\"{}\"\r\nContent-type: {}\r\n\r\n",
            name, JSON_CONTENT_TYPE
        ));
        part.push_str(&body);
        part.push_str("\r\n--");
        part.push_str(MULTIPART_BOUNDARY);
        if reply.is_terminal() {
            part.push_str("--");
        }
        part.push_str("\r\n");

        self.out.write_all(part.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }
}
