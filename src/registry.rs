//! User extension points: value converters, subtype factories, custom
//! codecs, and lifecycle event sinks, all registered by name and looked
//! up from schema attributes at walk time.

use crate::{
    error::Error,
    framer::{FramedReader, FramedWriter},
    value::Value,
};
use byteordered::Endianness;
use fxhash::FxHashMap;
use internment::Intern;
use std::sync::Arc;

/// Snapshot of the ancestry of the field being converted, nearest first.
/// Records may be partial: fields that have not been resolved yet appear
/// as [`Value::Null`].
#[derive(Clone, Debug, Default)]
pub struct ConvertContext {
    ancestors: Vec<Value>,
}

impl ConvertContext {
    pub(crate) fn new(ancestors: Vec<Value>) -> Self {
        Self { ancestors }
    }

    /// Nearest ancestor record of the given type.
    pub fn ancestor(&self, type_name: &str) -> Option<&Value> {
        self.ancestors
            .iter()
            .find(|v| v.as_record().is_some_and(|r| r.type_name.as_str() == type_name))
    }

    /// All ancestor records, nearest first.
    pub fn ancestors(&self) -> &[Value] {
        &self.ancestors
    }
}

/// Two-way conversion applied when a binding references a field whose
/// stored form differs from the attribute's expected form.
///
/// Returning `Ok(None)` signals that the direction is not supported,
/// which gates direction-limited bindings; returning an error rejects
/// the value outright.
pub trait ValueConverter: Send + Sync {
    fn convert(
        &self,
        value: &Value,
        parameter: Option<&Value>,
        ctx: &ConvertContext,
    ) -> Result<Option<Value>, Error>;

    fn convert_back(
        &self,
        value: &Value,
        parameter: Option<&Value>,
        ctx: &ConvertContext,
    ) -> Result<Option<Value>, Error>;
}

/// Fallback consulted when a polymorphic field's static subtype table has
/// no entry for a key (deserialize) or a runtime type (serialize).
pub trait SubtypeFactory: Send + Sync {
    /// Concrete type name for a key read from the stream.
    fn try_get_type(&self, key: &Value) -> Option<String>;

    /// Key to write for a runtime type name.
    fn try_get_key(&self, type_name: &str) -> Option<Value>;
}

/// User-supplied codec for members the engine does not interpret.
///
/// When the member declaration carries a length, the framer passed in is
/// already inside the bounded overlay; the codec cannot read or write
/// past it.
pub trait CustomCodec: Send + Sync {
    fn serialize(
        &self,
        value: &Value,
        writer: &mut FramedWriter<'_>,
        endianness: Endianness,
        ctx: &ConvertContext,
    ) -> Result<(), Error>;

    fn deserialize(
        &self,
        reader: &mut FramedReader<'_>,
        endianness: Endianness,
        ctx: &ConvertContext,
    ) -> Result<Value, Error>;
}

/// Lifecycle event payload published around each member.
#[derive(Clone, Debug)]
pub struct MemberEvent<'a> {
    pub member_name: &'a str,
    pub offset: u64,
    pub depth: usize,
    pub value: Option<&'a Value>,
}

/// Synchronous subscriber for member lifecycle events. Callbacks run on
/// the walking thread and must not block.
pub trait EventSink: Send + Sync {
    fn member_serializing(&self, _event: &MemberEvent<'_>) {}
    fn member_serialized(&self, _event: &MemberEvent<'_>) {}
    fn member_deserializing(&self, _event: &MemberEvent<'_>) {}
    fn member_deserialized(&self, _event: &MemberEvent<'_>) {}
}

/// Named registries for the user extension contracts.
#[derive(Clone, Default)]
pub struct Registry {
    converters: FxHashMap<Intern<String>, Arc<dyn ValueConverter>>,
    factories: FxHashMap<Intern<String>, Arc<dyn SubtypeFactory>>,
    codecs: FxHashMap<Intern<String>, Arc<dyn CustomCodec>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_converter<S: AsRef<str>>(
        &mut self,
        name: S,
        converter: Arc<dyn ValueConverter>,
    ) {
        self.converters
            .insert(Intern::from_ref(name.as_ref()), converter);
    }

    pub fn register_factory<S: AsRef<str>>(&mut self, name: S, factory: Arc<dyn SubtypeFactory>) {
        self.factories
            .insert(Intern::from_ref(name.as_ref()), factory);
    }

    pub fn register_codec<S: AsRef<str>>(&mut self, name: S, codec: Arc<dyn CustomCodec>) {
        self.codecs.insert(Intern::from_ref(name.as_ref()), codec);
    }

    pub(crate) fn converter(&self, name: &Intern<String>) -> Result<&Arc<dyn ValueConverter>, Error> {
        self.converters
            .get(name)
            .ok_or_else(|| Error::ConverterRejected(name.as_str().to_owned()))
    }

    pub(crate) fn factory(&self, name: &Intern<String>) -> Option<&Arc<dyn SubtypeFactory>> {
        self.factories.get(name)
    }

    pub(crate) fn codec(&self, name: &Intern<String>) -> Result<&Arc<dyn CustomCodec>, Error> {
        self.codecs
            .get(name)
            .ok_or_else(|| Error::UndefinedType(name.as_str().to_owned()))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("converters", &self.converters.keys().collect::<Vec<_>>())
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .field("codecs", &self.codecs.keys().collect::<Vec<_>>())
            .finish()
    }
}
