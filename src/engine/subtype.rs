//! Polymorphic subtype resolution: static table, factory fallback,
//! default, honoring binding directions per operation.

use crate::{
    engine::WalkEnv,
    error::Error,
    graph::node::{RecordShape, SubtypeTable},
    value::Value,
};
use std::sync::Arc;
use tracing::debug;

/// Shape to use when serializing a value whose runtime type is
/// `runtime`. Consults write-direction mappings, then the factory, then
/// the default.
pub(crate) fn shape_for_runtime(
    env: &WalkEnv<'_>,
    table: Option<&SubtypeTable>,
    declared: &Arc<RecordShape>,
    runtime: &str,
) -> Result<Arc<RecordShape>, Error> {
    if runtime == declared.type_name.as_str() {
        return Ok(declared.clone());
    }
    let Some(table) = table else {
        return Err(Error::UnmappedSubtype(runtime.to_owned()));
    };
    if let Some(entry) = table.entry_for_type(runtime) {
        return Ok(entry.shape.clone());
    }
    if let Some((name, shape)) = table.default.as_ref() {
        if name.as_str() == runtime {
            return Ok(shape.clone());
        }
    }
    if let Some(factory) = table.factory.as_ref().and_then(|f| env.registry.factory(f)) {
        if factory.try_get_key(runtime).is_some() {
            return env.cache.record_shape(env.schema, runtime);
        }
    }
    Err(Error::UnmappedSubtype(runtime.to_owned()))
}

/// Key to write back into the bound source for a runtime type. `None`
/// means no key is written (the default type honors the caller-set key).
pub(crate) fn key_for_runtime(
    env: &WalkEnv<'_>,
    table: &SubtypeTable,
    runtime: &str,
) -> Result<Option<Value>, Error> {
    if let Some(entry) = table.entry_for_type(runtime) {
        return Ok(Some(entry.key.clone()));
    }
    if let Some(factory) = table.factory.as_ref().and_then(|f| env.registry.factory(f)) {
        if let Some(key) = factory.try_get_key(runtime) {
            return Ok(Some(key));
        }
    }
    if let Some((name, _)) = table.default.as_ref() {
        if name.as_str() == runtime {
            return Ok(None);
        }
    }
    Err(Error::UnmappedSubtype(runtime.to_owned()))
}

/// Shape to use when deserializing a field whose bound key read as
/// `key`. Consults read-direction mappings, then the factory, then the
/// default.
pub(crate) fn shape_for_key(
    env: &WalkEnv<'_>,
    table: &SubtypeTable,
    key: &Value,
) -> Result<Arc<RecordShape>, Error> {
    if let Some(entry) = table.entry_for_key(key) {
        return Ok(entry.shape.clone());
    }
    if let Some(factory) = table.factory.as_ref().and_then(|f| env.registry.factory(f)) {
        if let Some(type_name) = factory.try_get_type(key) {
            return env.cache.record_shape(env.schema, &type_name);
        }
    }
    if let Some((name, shape)) = table.default.as_ref() {
        debug!(key = ?key, default = %name, "Unknown subtype key, using default");
        return Ok(shape.clone());
    }
    Err(Error::UnknownSubtype(format!("{key:?}")))
}
