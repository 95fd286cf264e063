#![doc = include_str!("../README.md")]

pub use crate::engine::{DocumentDecoder, Engine};
pub use crate::error::Error;
pub use crate::framer::NoSeek;
pub use crate::registry::{
    ConvertContext, CustomCodec, EventSink, MemberEvent, Registry, SubtypeFactory, ValueConverter,
};
pub use crate::schema::*;
pub use crate::value::{Record, Value};

pub mod compute;
pub mod engine;
pub mod error;
pub mod framer;
pub(crate) mod graph;
pub mod registry;
pub mod schema;
pub mod value;
