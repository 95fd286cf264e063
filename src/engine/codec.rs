//! Async framing front-end: a `tokio_util::codec::Decoder` that frames
//! whole documents out of a byte stream, retrying as more octets arrive.

use crate::{engine::Engine, error::Error, value::Value};
use bytes::{Buf, BytesMut};
use std::io::Cursor;
use tokio_util::codec::Decoder;
use tracing::trace;

/// Decodes one value of a fixed record type per frame.
///
/// The decoder speculatively deserializes from the buffered octets; an
/// incomplete-input failure (`Error::is_incomplete`) yields `None` so the
/// framed reader fetches more data, any other failure is surfaced.
#[derive(Clone, Debug)]
pub struct DocumentDecoder {
    engine: Engine,
    type_name: String,
}

impl DocumentDecoder {
    pub(crate) fn new(engine: Engine, type_name: String) -> Self {
        Self { engine, type_name }
    }
}

impl Decoder for DocumentDecoder {
    type Item = Value;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let mut cursor = Cursor::new(&src[..]);
        match self.engine.deserialize(&self.type_name, &mut cursor) {
            Ok(value) => {
                let consumed = cursor.position() as usize;
                trace!(consumed, "Decoded document frame");
                src.advance(consumed);
                Ok(Some(value))
            }
            Err(e) if e.is_incomplete() => {
                trace!(buffered = src.len(), "Partial document, awaiting more data");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
