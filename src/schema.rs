use byteordered::Endianness;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Byte order of a serialized field.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Default,
    Display,
    Deserialize,
    Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ByteOrder {
    #[default]
    #[serde(alias = "little")]
    #[serde(alias = "le")]
    #[display("little-endian")]
    LittleEndian,
    #[serde(alias = "big")]
    #[serde(alias = "be")]
    #[display("big-endian")]
    BigEndian,
}

impl From<ByteOrder> for Endianness {
    fn from(value: ByteOrder) -> Self {
        match value {
            ByteOrder::LittleEndian => Endianness::Little,
            ByteOrder::BigEndian => Endianness::Big,
        }
    }
}

/// String encoding of a serialized field. Inherited by descendants unless
/// overridden.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Default,
    Display,
    Deserialize,
    Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    #[default]
    #[display("utf-8")]
    Utf8,
    #[display("ascii")]
    Ascii,
    #[display("utf-16le")]
    Utf16Le,
    #[display("utf-16be")]
    Utf16Be,
}

impl Encoding {
    /// Width of one code unit (octets); also the width of the implied
    /// terminator for null-terminated strings.
    pub(crate) fn unit_width(self) -> usize {
        match self {
            Encoding::Utf8 | Encoding::Ascii => 1,
            Encoding::Utf16Le | Encoding::Utf16Be => 2,
        }
    }
}

/// Where alignment padding is applied relative to the field.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Deserialize, Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum AlignmentMode {
    #[default]
    Both,
    Left,
    Right,
}

/// Direction in which a binding or subtype mapping participates.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Deserialize, Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum BindingDirection {
    #[default]
    Both,
    ReadOnly,
    WriteOnly,
}

impl BindingDirection {
    pub(crate) fn readable(self) -> bool {
        matches!(self, BindingDirection::Both | BindingDirection::ReadOnly)
    }

    pub(crate) fn writable(self) -> bool {
        matches!(self, BindingDirection::Both | BindingDirection::WriteOnly)
    }
}

/// What to do with the sentinel item of an item-terminated collection.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Deserialize, Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum LastItemMode {
    /// The sentinel item is part of the collection.
    #[default]
    Include,
    /// The sentinel item is consumed but discarded.
    Exclude,
    /// The stream is rewound past the sentinel item so the enclosing
    /// context can consume it.
    Defer,
}

/// A scalar literal used for subtype keys, conditions, and sentinels.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    UInt(u64),
    Int(i64),
    Str(String),
}

/// A reference to another field: a path, an optional converter, and the
/// direction in which the binding participates.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BindingRef {
    /// Path to the source field. Segments are separated by `/`; leading
    /// `..` segments ascend a fixed number of levels, a leading `@Type`
    /// segment ascends to the nearest ancestor of that type, and a bare
    /// name resolves against the nearest ancestor that has a child of
    /// that name.
    pub path: String,
    #[serde(default)]
    pub converter: Option<String>,
    #[serde(default)]
    pub converter_parameter: Option<Literal>,
    #[serde(default)]
    pub direction: BindingDirection,
}

impl BindingRef {
    pub fn new<S: Into<String>>(path: S) -> Self {
        Self {
            path: path.into(),
            converter: None,
            converter_parameter: None,
            direction: BindingDirection::default(),
        }
    }

    pub fn converted<S: Into<String>, C: Into<String>>(path: S, converter: C) -> Self {
        Self {
            path: path.into(),
            converter: Some(converter.into()),
            converter_parameter: None,
            direction: BindingDirection::default(),
        }
    }

    pub fn direction(mut self, direction: BindingDirection) -> Self {
        self.direction = direction;
        self
    }
}

/// A length/count/offset specification: either a constant or a binding to
/// another field.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BindingSpec {
    Constant(u64),
    Bound(BindingRef),
}

impl From<u64> for BindingSpec {
    fn from(value: u64) -> Self {
        BindingSpec::Constant(value)
    }
}

impl From<BindingRef> for BindingSpec {
    fn from(value: BindingRef) -> Self {
        BindingSpec::Bound(value)
    }
}

impl From<&str> for BindingSpec {
    fn from(path: &str) -> Self {
        BindingSpec::Bound(BindingRef::new(path))
    }
}

/// Accumulator function for computed-value fields.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Default,
    Display,
    Deserialize,
    Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ComputedFunction {
    /// Additive checksum, truncated to the target's width.
    #[display("checksum")]
    Checksum,
    /// XOR of all covered octets.
    #[display("xor")]
    Xor,
    /// CRC16/CCITT-FALSE (poly 0x1021, init 0xFFFF).
    #[default]
    #[display("crc16")]
    Crc16,
    /// CRC32 (IEEE).
    #[display("crc32")]
    Crc32,
    /// SHA-256 digest; the target must be a 32-octet byte field.
    #[display("sha256")]
    Sha256,
}

/// Declared type of a member.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
#[serde(tag = "class")]
pub enum DeclaredType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    Str,
    Bytes,
    Enum { name: String },
    List { element: Box<DeclaredType> },
    Record { name: String },
    /// Raw byte-stream region passed through untouched.
    Stream,
    /// User-supplied codec registered under `codec`.
    Custom { codec: String },
}

impl DeclaredType {
    pub fn list(element: DeclaredType) -> Self {
        DeclaredType::List {
            element: Box::new(element),
        }
    }

    pub fn record<S: Into<String>>(name: S) -> Self {
        DeclaredType::Record { name: name.into() }
    }
}

/// An attribute attached to a member declaration.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
#[serde(tag = "kind")]
pub enum AttributeSpec {
    /// The member does not take part in serialization.
    Ignore,
    /// Relative order of the member among the siblings declared on the
    /// same type.
    FieldOrder { value: i32 },
    /// Serialized length (octets) of the member.
    FieldLength { length: BindingSpec },
    /// Item count of a collection member.
    FieldCount { count: BindingSpec },
    /// Pad until the member's start (left) and/or end (right) offset is a
    /// multiple of `multiple`.
    FieldAlignment {
        multiple: u64,
        #[serde(default)]
        mode: AlignmentMode,
    },
    /// Rational scale applied to a numeric member on the wire.
    FieldScale { numerator: i64, denominator: i64 },
    /// Byte order of the member and its descendants; either a fixed value
    /// or a binding (typically through a converter).
    FieldEndianness {
        #[serde(default)]
        value: Option<ByteOrder>,
        #[serde(default)]
        binding: Option<BindingRef>,
    },
    /// String encoding of the member and its descendants.
    FieldEncoding { encoding: Encoding },
    /// Absolute stream offset at which the member is serialized.
    FieldOffset { offset: BindingSpec },
    /// The member named by `path` receives a value computed over this
    /// member's serialized octets.
    FieldValue {
        path: String,
        #[serde(default)]
        function: ComputedFunction,
    },
    /// Maps a key value to a concrete record type for a polymorphic
    /// member. `path` names the field holding the key.
    Subtype {
        path: String,
        key: Literal,
        #[serde(rename = "type")]
        type_name: String,
        #[serde(default)]
        direction: BindingDirection,
    },
    /// Fallback type when no subtype key matches during deserialization.
    SubtypeDefault {
        #[serde(rename = "type")]
        type_name: String,
    },
    /// Registered factory consulted when the static subtype table misses.
    SubtypeFactory { path: String, factory: String },
    /// Serialize the member with an explicit primitive representation.
    SerializeAs {
        #[serde(rename = "as")]
        repr: DeclaredType,
        #[serde(default)]
        byte_order: Option<ByteOrder>,
    },
    /// Serialize the member only when the field at `path` equals `value`.
    SerializeWhen { path: String, value: Literal },
    /// Serialize the member only when the field at `path` differs from
    /// `value`.
    SerializeWhenNot { path: String, value: Literal },
    /// Collection terminator: items end when `value` is encountered.
    SerializeUntil { value: Literal },
    /// Serialized length (octets) of each collection item; a binding may
    /// resolve to a scalar (uniform) or to a sequence (jagged).
    ItemLength { length: BindingSpec },
    /// Subtype mapping applied to each collection item.
    ItemSubtype {
        path: String,
        key: Literal,
        #[serde(rename = "type")]
        type_name: String,
        #[serde(default)]
        direction: BindingDirection,
    },
    ItemSubtypeDefault {
        #[serde(rename = "type")]
        type_name: String,
    },
    ItemSubtypeFactory { path: String, factory: String },
    /// Collection terminator: items end when the field at `path` of a
    /// freshly deserialized item equals `value`.
    ItemSerializeUntil {
        path: String,
        value: Literal,
        #[serde(default)]
        last_item: LastItemMode,
    },
}

/// A member of a record type.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MemberDescriptor {
    pub name: String,
    pub field_type: DeclaredType,
    /// Relative order among siblings; [`AttributeSpec::FieldOrder`] takes
    /// precedence when both are given.
    #[serde(default)]
    pub order: Option<i32>,
    #[serde(default)]
    pub attributes: Vec<AttributeSpec>,
}

impl MemberDescriptor {
    pub fn new<S: Into<String>>(name: S, field_type: DeclaredType) -> Self {
        Self {
            name: name.into(),
            field_type,
            order: None,
            attributes: Vec::new(),
        }
    }

    pub fn order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn attribute(mut self, attribute: AttributeSpec) -> Self {
        self.attributes.push(attribute);
        self
    }
}

/// A record type: its members, its optional base type, and the parameter
/// lists of its constructors.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TypeDescriptor {
    /// Base type whose members serialize before this type's own.
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub members: Vec<MemberDescriptor>,
    /// Constructor parameter-name lists; an empty inner list is the
    /// default constructor. When omitted a default constructor is
    /// assumed.
    #[serde(default)]
    pub constructors: Vec<Vec<String>>,
}

impl TypeDescriptor {
    pub fn new(members: Vec<MemberDescriptor>) -> Self {
        Self {
            base: None,
            members,
            constructors: Vec::new(),
        }
    }

    pub fn with_base<S: Into<String>>(mut self, base: S) -> Self {
        self.base = Some(base.into());
        self
    }
}

/// One literal of an enum type.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EnumLiteral {
    pub name: String,
    /// Underlying integer value; defaults to the literal's index.
    #[serde(default)]
    pub value: Option<i64>,
    /// Alternate string mapping; when any literal of the enum carries one,
    /// the whole enum serializes as a string.
    #[serde(default)]
    pub text: Option<String>,
}

impl EnumLiteral {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            value: None,
            text: None,
        }
    }
}

/// An enum type: an underlying integer representation plus literals.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EnumDescriptor {
    /// Wire representation when the enum serializes as an integer.
    #[serde(default = "default_enum_repr")]
    pub repr: DeclaredType,
    pub literals: Vec<EnumLiteral>,
}

fn default_enum_repr() -> DeclaredType {
    DeclaredType::U32
}

/// The schema document: the full set of record and enum types plus the
/// root defaults inherited by every member that does not override them.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Schema {
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default)]
    pub enums: BTreeMap<String, EnumDescriptor>,
    pub records: BTreeMap<String, TypeDescriptor>,
}

impl Schema {
    pub fn new(records: BTreeMap<String, TypeDescriptor>) -> Self {
        Self {
            byte_order: ByteOrder::default(),
            encoding: Encoding::default(),
            enums: BTreeMap::new(),
            records,
        }
    }

    /// Load a schema document from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }
}
