//! Event stream frame decoding.
//!
//! A [`FrameCodec`] turns the response body into [`Frame`]s: it buffers raw
//! bytes, splits on `\n` (tolerating `\r\n`), accumulates `event:`, `id:`
//! and `data:` fields and emits a message at each blank line. Comment lines
//! are surfaced as their own frames so callers can observe keepalives.

use std::io;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::{Stream, TryStreamExt};
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;
use tracing::trace;

/// One decoded unit of the event stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// A `: ...` comment line, e.g. a keepalive.
    Comment(String),
    /// A dispatched message.
    Message(Message),
}

/// Fields of one message frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    /// `event:` name, if present.
    pub event: Option<String>,
    /// `id:` value, if present.
    pub id: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

/// Line-oriented decoder for `text/event-stream` bodies.
#[derive(Debug, Default)]
pub struct FrameCodec {
    pending: Message,
    has_fields: bool,
    data_lines: usize,
}

impl FrameCodec {
    /// Creates a decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without its terminator). Returns a frame when the line
    /// completes one.
    fn push_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            if !self.has_fields {
                return None;
            }
            self.has_fields = false;
            self.data_lines = 0;
            return Some(Frame::Message(std::mem::take(&mut self.pending)));
        }
        if let Some(comment) = line.strip_prefix(':') {
            return Some(Frame::Comment(comment.trim_start().to_owned()));
        }

        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match name {
            "event" => self.pending.event = Some(value.to_owned()),
            "id" => self.pending.id = Some(value.to_owned()),
            "data" => {
                if self.data_lines > 0 {
                    self.pending.data.push('\n');
                }
                self.pending.data.push_str(value);
                self.data_lines += 1;
            }
            other => {
                trace!(field = other, "ignoring unknown stream field");
                return None;
            }
        }
        self.has_fields = true;
        None
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        while let Some(newline) = src.iter().position(|&b| b == b'\n') {
            let mut line = src.split_to(newline + 1);
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            let Ok(line) = std::str::from_utf8(&line) else {
                trace!("skipping non-utf8 stream line");
                continue;
            };
            if let Some(frame) = self.push_line(line) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        // an unterminated trailing frame is discarded
        src.clear();
        Ok(None)
    }
}

/// Decoded frames of one response body.
pub type FrameStream = Pin<Box<dyn Stream<Item = io::Result<Frame>> + Send>>;

/// Decode a response body into frames.
pub fn decode_frames<S>(body: S) -> FrameStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    Box::pin(FramedRead::new(
        StreamReader::new(body.map_err(io::Error::other)),
        FrameCodec::new(),
    ))
}
