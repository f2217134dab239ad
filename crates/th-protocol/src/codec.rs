//! Tokio codec for newline-delimited JSON events

use std::marker::PhantomData;

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder, LinesCodec};

use crate::error::ProtocolError;
use crate::event::{ClientEvent, ServerEvent};

/// Default maximum length of a single inbound event line (64 KiB)
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Maximum line length peers accept from the orchestrator (1 MiB)
///
/// Progress lines can carry captured build output, so this is larger than
/// the orchestrator's own inbound limit.
pub const CLIENT_MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// A decoded line
///
/// A line that is well framed but not a valid event does not poison the
/// stream; it is surfaced as [`Frame::Invalid`] so the receiver can answer
/// with an error and keep reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<T> {
    /// A valid event
    Event(T),
    /// A line that failed to deserialize
    Invalid { reason: String },
}

/// Codec decoding `In` and encoding `Out`, one JSON object per line
#[derive(Debug)]
pub struct JsonLinesCodec<In, Out> {
    lines: LinesCodec,
    max_length: usize,
    _marker: PhantomData<fn(Out) -> In>,
}

/// Codec used by the orchestrator side of a connection
pub type ServerCodec = JsonLinesCodec<ClientEvent, ServerEvent>;

/// Codec used by the peer side of a connection
pub type ClientCodec = JsonLinesCodec<ServerEvent, ClientEvent>;

impl<In, Out> JsonLinesCodec<In, Out> {
    /// Create a codec with the default frame length limit
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    /// Create a codec that rejects lines longer than `max_length` bytes
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
            max_length,
            _marker: PhantomData,
        }
    }

    fn parse(line: &str) -> Frame<In>
    where
        In: DeserializeOwned,
    {
        match serde_json::from_str(line) {
            Ok(event) => Frame::Event(event),
            Err(e) => Frame::Invalid {
                reason: e.to_string(),
            },
        }
    }
}

impl<In, Out> Default for JsonLinesCodec<In, Out> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In: DeserializeOwned, Out> Decoder for JsonLinesCodec<In, Out> {
    type Item = Frame<In>;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let line = self
                .lines
                .decode(src)
                .map_err(|e| ProtocolError::from_lines(e, self.max_length))?;

            match line {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(Some(Self::parse(line.trim()))),
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        let line = self
            .lines
            .decode_eof(src)
            .map_err(|e| ProtocolError::from_lines(e, self.max_length))?;

        Ok(line
            .filter(|l| !l.trim().is_empty())
            .map(|l| Self::parse(l.trim())))
    }
}

impl<In, Out: Serialize> Encoder<Out> for JsonLinesCodec<In, Out> {
    type Error = ProtocolError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // The length limit only guards decoding; outbound lines are bounded
        // by their producers
        let json = serde_json::to_string(&item)?;
        self.lines
            .encode(json, dst)
            .map_err(|e| ProtocolError::from_lines(e, self.max_length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ErrorKind;

    #[test]
    fn test_codec_decodes_client_event() {
        let mut codec = ServerCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"command\",\"text\":\"pwd\"}\n"[..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::Event(ClientEvent::command("pwd")));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = ServerCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"pi"[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"ng\"}\n");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::Event(ClientEvent::Ping));
    }

    #[test]
    fn test_codec_skips_blank_lines() {
        let mut codec = ServerCodec::new();
        let mut buf = BytesMut::from(&b"\n  \n{\"type\":\"disconnect\"}\n"[..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::Event(ClientEvent::Disconnect));
    }

    #[test]
    fn test_codec_invalid_json_is_not_fatal() {
        let mut codec = ServerCodec::new();
        let mut buf = BytesMut::from(&b"not json\n{\"type\":\"ping\"}\n"[..]);

        match codec.decode(&mut buf).unwrap().unwrap() {
            Frame::Invalid { reason } => assert!(!reason.is_empty()),
            other => panic!("Expected invalid frame, got {:?}", other),
        }
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::Event(ClientEvent::Ping));
    }

    #[test]
    fn test_codec_rejects_oversized_line() {
        let mut codec = ServerCodec::with_max_length(16);
        let mut buf = BytesMut::from(&b"{\"type\":\"command\",\"text\":\"way too long\"}\n"[..]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { max: 16 }));
    }

    #[test]
    fn test_codec_encodes_one_line_per_event() {
        let mut codec = ServerCodec::new();
        let mut buf = BytesMut::new();

        codec.encode(ServerEvent::Pong, &mut buf).unwrap();
        codec
            .encode(ServerEvent::error(ErrorKind::Auth, "bad token"), &mut buf)
            .unwrap();

        let text = std::str::from_utf8(&buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"type":"pong"}"#);
        assert!(lines[1].contains(r#""kind":"auth""#));
    }

    #[test]
    fn test_codec_eof_without_newline() {
        let mut codec = ServerCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"list_servers\"}"[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        let frame = codec.decode_eof(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::Event(ClientEvent::ListServers));
    }
}
