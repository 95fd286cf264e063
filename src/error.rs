use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Schema build-time failures
    #[error("Members '{first}' and '{second}' of '{record}' declare the same field order ({order})")]
    DuplicateOrder {
        record: String,
        first: String,
        second: String,
        order: i32,
    },

    #[error("More than one member of '{record}' is missing an explicit field order")]
    MissingOrder { record: String },

    #[error("No constructor of '{record}' accepts the record's serializable members")]
    UnresolvedConstructor { record: String },

    #[error("Type '{0}' contains itself via composition")]
    CyclicType(String),

    #[error("Subtype key {key} on '{member}' maps to more than one readable type")]
    SubtypeKeyAmbiguous { member: String, key: String },

    #[error("Invalid binding path '{0}'")]
    BindingPathInvalid(String),

    #[error("Schema references an undefined type '{0}'")]
    UndefinedType(String),

    // Bind-time failures
    #[error("Binding path '{0}' does not resolve to a field")]
    BindingNotFound(String),

    #[error("Forward reference through '{0}' cannot be deferred")]
    NonDeferrableForwardReference(String),

    #[error("Converter '{0}' rejected the value")]
    ConverterRejected(String),

    // Walk-time failures
    #[error("Serialized length {natural} exceeds the bound length {bound}")]
    Overflow { natural: u64, bound: u64 },

    #[error("Stream ran out at offset {offset}")]
    Underflow { offset: u64 },

    #[error("No subtype is mapped to key {0}")]
    UnknownSubtype(String),

    #[error("No subtype key is mapped to type '{0}'")]
    UnmappedSubtype(String),

    #[error("Item length source has {expected} entries but the collection has {actual} items")]
    ItemLengthMismatch { expected: usize, actual: usize },

    #[error("'{0}' requires a seekable stream")]
    NotSeekable(&'static str),

    #[error("The underlying stream is closed")]
    StreamClosed,

    #[error("Expected {expected}, found {found}")]
    ValueMismatch {
        expected: &'static str,
        found: String,
    },

    #[error("Encountered an IO error ({})", .0.kind())]
    Io(#[from] io::Error),

    #[error("{path} @ offset {offset}: {source}")]
    Walk {
        path: String,
        offset: u64,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap an error with one more ancestor's breadcrumb. Nested walk
    /// contexts extend the path instead of stacking; the innermost offset
    /// is kept since it is the most precise.
    pub(crate) fn context<S: AsRef<str>>(self, segment: S, offset: u64) -> Self {
        match self {
            Error::Walk {
                path,
                offset: inner,
                source,
            } => Error::Walk {
                path: format!("{}.{}", segment.as_ref(), path),
                offset: inner,
                source,
            },
            other => Error::Walk {
                path: segment.as_ref().to_owned(),
                offset,
                source: Box::new(other),
            },
        }
    }

    pub(crate) fn value_mismatch<V: std::fmt::Debug>(expected: &'static str, found: &V) -> Self {
        Error::ValueMismatch {
            expected,
            found: format!("{found:?}"),
        }
    }

    pub(crate) fn from_io(e: io::Error, offset: u64) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::Underflow { offset },
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotConnected
            | io::ErrorKind::WriteZero => Error::StreamClosed,
            _ => Error::Io(e),
        }
    }

    /// True when more input could turn the failure into a success.
    /// Used by the codec front-end to signal "need more bytes".
    pub fn is_incomplete(&self) -> bool {
        match self {
            Error::Underflow { .. } => true,
            Error::Walk { source, .. } => source.is_incomplete(),
            _ => false,
        }
    }
}
