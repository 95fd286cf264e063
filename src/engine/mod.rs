//! The engine façade plus the per-operation walk machinery.

use crate::{
    error::Error,
    graph::GraphCache,
    registry::{EventSink, MemberEvent, Registry},
    schema::{Encoding, Schema},
    value::Value,
};
use byteordered::Endianness;
use std::{
    io::{Read, Seek, Write},
    sync::{Arc, RwLock},
};

pub(crate) mod binding;
pub(crate) mod codec;
pub(crate) mod de;
pub(crate) mod scalar;
pub(crate) mod ser;
pub(crate) mod subtype;
pub(crate) mod value_graph;

pub use codec::DocumentDecoder;

/// Shared, read-only context of one serialize/deserialize call.
pub(crate) struct WalkEnv<'e> {
    pub schema: &'e Schema,
    pub registry: &'e Registry,
    pub cache: &'e GraphCache,
    pub sinks: &'e [Arc<dyn EventSink>],
    pub default_endianness: Endianness,
    pub default_encoding: Encoding,
}

impl WalkEnv<'_> {
    pub fn emit_serializing(&self, event: &MemberEvent<'_>) {
        for sink in self.sinks {
            sink.member_serializing(event);
        }
    }

    pub fn emit_serialized(&self, event: &MemberEvent<'_>) {
        for sink in self.sinks {
            sink.member_serialized(event);
        }
    }

    pub fn emit_deserializing(&self, event: &MemberEvent<'_>) {
        for sink in self.sinks {
            sink.member_deserializing(event);
        }
    }

    pub fn emit_deserialized(&self, event: &MemberEvent<'_>) {
        for sink in self.sinks {
            sink.member_deserialized(event);
        }
    }
}

/// Attributes inherited top-down through the walk.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Inherited {
    pub endianness: Endianness,
    pub encoding: Encoding,
}

struct EngineInner {
    schema: Schema,
    registry: Registry,
    cache: GraphCache,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

/// The serialization engine: a schema plus its compiled type-graph
/// cache.
///
/// Cloning is cheap and clones share the cache; an engine may be used
/// from many threads concurrently, each call owning its own value graph
/// and stream context.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("records", &self.inner.schema.records.len())
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(schema: Schema) -> Self {
        Self::with_registry(schema, Registry::new())
    }

    pub fn with_registry(schema: Schema, registry: Registry) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                schema,
                registry,
                cache: GraphCache::new(),
                sinks: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Subscribe to member lifecycle events.
    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.inner.sinks.write().unwrap().push(sink);
    }

    /// Serialize a record value to the stream. The value's record type
    /// must be declared in the schema.
    pub fn serialize<W: Write + Seek>(&self, value: &Value, writer: &mut W) -> Result<(), Error> {
        let sinks = self.inner.sinks.read().unwrap().clone();
        ser::run(&self.env(&sinks), value, writer)
    }

    /// Deserialize one value of the named record type from the stream.
    pub fn deserialize<R: Read + Seek>(
        &self,
        type_name: &str,
        reader: &mut R,
    ) -> Result<Value, Error> {
        let sinks = self.inner.sinks.read().unwrap().clone();
        de::run(&self.env(&sinks), type_name, reader)
    }

    /// Async framing front-end: a `tokio_util::codec::Decoder` producing
    /// one value of the named type per frame.
    pub fn into_document_decoder<S: Into<String>>(self, type_name: S) -> DocumentDecoder {
        DocumentDecoder::new(self, type_name.into())
    }

    fn env<'e>(&'e self, sinks: &'e [Arc<dyn EventSink>]) -> WalkEnv<'e> {
        WalkEnv {
            schema: &self.inner.schema,
            registry: &self.inner.registry,
            cache: &self.inner.cache,
            sinks,
            default_endianness: self.inner.schema.byte_order.into(),
            default_encoding: self.inner.schema.encoding,
        }
    }
}
