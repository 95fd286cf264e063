//! Compiled, immutable type-graph nodes.
//!
//! A [`TypeNode`] describes one member position: its wire kind plus the
//! member-local attribute and binding set. Record shapes are shared
//! (`Arc<RecordShape>`) so every member of a given record type points at
//! the same compiled children.

use crate::{
    graph::path::BindingPath,
    schema::{AlignmentMode, BindingDirection, ComputedFunction, DeclaredType, Encoding, LastItemMode},
    value::{Record, Value},
};
use byteordered::Endianness;
use internment::Intern;
use std::sync::Arc;

/// Fixed-width primitive wire representations.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub(crate) enum PrimKind {
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
}

impl PrimKind {
    pub fn from_declared(ty: &DeclaredType) -> Option<Self> {
        Some(match ty {
            DeclaredType::U8 => Self::U8,
            DeclaredType::U16 => Self::U16,
            DeclaredType::U32 => Self::U32,
            DeclaredType::U64 => Self::U64,
            DeclaredType::I8 => Self::I8,
            DeclaredType::I16 => Self::I16,
            DeclaredType::I32 => Self::I32,
            DeclaredType::I64 => Self::I64,
            DeclaredType::F32 => Self::F32,
            DeclaredType::F64 => Self::F64,
            DeclaredType::Bool => Self::Bool,
            _ => return None,
        })
    }

    /// Serialized width (octets).
    pub fn width(self) -> u64 {
        match self {
            Self::U8 | Self::I8 | Self::Bool => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

/// A binding to another field, as compiled into the graph.
#[derive(Clone, Debug)]
pub(crate) struct BoundBinding {
    pub path: BindingPath,
    pub converter: Option<Intern<String>>,
    pub parameter: Option<Value>,
    pub direction: BindingDirection,
}

/// A length/count/offset attribute: constant or bound.
#[derive(Clone, Debug)]
pub(crate) enum CompiledBinding {
    Const(u64),
    Bound(BoundBinding),
}

/// Effective endianness of a member: fixed, or derived from another
/// field (typically through a converter).
#[derive(Clone, Debug)]
pub(crate) enum EndianSource {
    Fixed(Endianness),
    Bound(BoundBinding),
}

/// A serialize-when(/-not) condition.
#[derive(Clone, Debug)]
pub(crate) struct Condition {
    pub path: BindingPath,
    pub value: Value,
    pub negate: bool,
}

/// A computed-value attribute: accumulate this member's octets, write the
/// result to the target field.
#[derive(Clone, Debug)]
pub(crate) struct ComputedSpec {
    pub target: BindingPath,
    pub function: ComputedFunction,
}

/// One static subtype mapping.
#[derive(Clone, Debug)]
pub(crate) struct SubtypeEntry {
    pub key: Value,
    pub type_name: Intern<String>,
    pub shape: Arc<RecordShape>,
    pub direction: BindingDirection,
}

/// Subtype dispatch table of a polymorphic member.
#[derive(Clone, Debug)]
pub(crate) struct SubtypeTable {
    /// Path to the field holding the subtype key.
    pub key_path: BindingPath,
    pub entries: Vec<SubtypeEntry>,
    pub factory: Option<Intern<String>>,
    pub default: Option<(Intern<String>, Arc<RecordShape>)>,
}

impl SubtypeTable {
    pub fn entry_for_key(&self, key: &Value) -> Option<&SubtypeEntry> {
        self.entries
            .iter()
            .find(|e| e.direction.readable() && e.key.matches(key))
    }

    pub fn entry_for_type(&self, type_name: &str) -> Option<&SubtypeEntry> {
        self.entries
            .iter()
            .find(|e| e.direction.writable() && e.type_name.as_str() == type_name)
    }
}

/// One literal of a compiled enum shape.
#[derive(Clone, Debug)]
pub(crate) struct EnumLiteralShape {
    pub name: Intern<String>,
    pub value: i64,
    pub text: Intern<String>,
}

/// Compiled enum type.
#[derive(Clone, Debug)]
pub(crate) struct EnumShape {
    pub name: Intern<String>,
    pub repr: PrimKind,
    /// When true the enum serializes as a string (the literal's alternate
    /// text, or its name).
    pub text_mapped: bool,
    pub literals: Vec<EnumLiteralShape>,
}

impl EnumShape {
    pub fn literal_by_name(&self, name: &str) -> Option<&EnumLiteralShape> {
        self.literals.iter().find(|l| l.name.as_str() == name)
    }

    pub fn literal_by_value(&self, value: i64) -> Option<&EnumLiteralShape> {
        self.literals.iter().find(|l| l.value == value)
    }

    pub fn literal_by_text(&self, text: &str) -> Option<&EnumLiteralShape> {
        self.literals.iter().find(|l| l.text.as_str() == text)
    }
}

/// Compiled constructor: the member names supplied at construction time.
#[derive(Clone, Debug, Default)]
pub(crate) struct CompiledConstructor {
    pub params: Vec<Intern<String>>,
}

impl CompiledConstructor {
    /// Build an instance from the collected member values.
    pub fn construct(
        &self,
        type_name: Intern<String>,
        fields: Vec<(Intern<String>, Value)>,
    ) -> Record {
        Record { type_name, fields }
    }
}

/// Shared, immutable shape of a record type.
#[derive(Clone, Debug)]
pub(crate) struct RecordShape {
    pub type_name: Intern<String>,
    /// Own type name followed by base types, nearest first.
    pub lineage: Vec<Intern<String>>,
    pub children: Vec<Arc<TypeNode>>,
    pub constructor: CompiledConstructor,
}

impl RecordShape {
    pub fn child_index(&self, name: &str) -> Option<usize> {
        self.children
            .iter()
            .position(|c| c.member_name.as_str() == name)
    }

    pub fn derives_from(&self, type_name: &str) -> bool {
        self.lineage.iter().any(|t| t.as_str() == type_name)
    }
}

/// Wire kind of a scalar member.
#[derive(Clone, Debug)]
pub(crate) enum ValueShape {
    Prim(PrimKind),
    Str,
    Bytes,
    Enum(Arc<EnumShape>),
}

/// Item-terminated collection specification.
#[derive(Clone, Debug)]
pub(crate) struct ItemUntil {
    pub path: BindingPath,
    pub value: Value,
    pub mode: LastItemMode,
}

#[derive(Clone, Debug)]
pub(crate) enum NodeKind {
    Value(ValueShape),
    /// Homogeneous array of fixed-width primitives; bulk-transferred.
    PrimitiveArray { elem: PrimKind },
    Collection { item: Arc<TypeNode> },
    Object { shape: Arc<RecordShape> },
    Custom { codec: Intern<String> },
    /// Raw byte-stream region.
    Passthrough,
}

/// Compiled description of one member position.
#[derive(Clone, Debug)]
pub(crate) struct TypeNode {
    pub member_name: Intern<String>,
    pub kind: NodeKind,
    /// None inherits from the enclosing context.
    pub endianness: Option<EndianSource>,
    pub encoding: Option<Encoding>,
    pub alignment: Option<(u64, AlignmentMode)>,
    pub scale: Option<(i64, i64)>,
    pub serialize_as: Option<(PrimKind, Option<Endianness>)>,
    pub length: Option<CompiledBinding>,
    pub count: Option<CompiledBinding>,
    pub offset: Option<CompiledBinding>,
    /// Per-item length of a collection; scalar source = uniform, sequence
    /// source = jagged.
    pub item_length: Option<CompiledBinding>,
    pub conditions: Vec<Condition>,
    pub computed: Vec<ComputedSpec>,
    /// Value-terminated collection sentinel.
    pub until: Option<Value>,
    pub item_until: Option<ItemUntil>,
    pub subtypes: Option<SubtypeTable>,
}

impl TypeNode {
    /// Blank node of the given kind; attributes are filled in by the
    /// builder.
    pub fn bare(member_name: Intern<String>, kind: NodeKind) -> Self {
        Self {
            member_name,
            kind,
            endianness: None,
            encoding: None,
            alignment: None,
            scale: None,
            serialize_as: None,
            length: None,
            count: None,
            offset: None,
            item_length: None,
            conditions: Vec::new(),
            computed: Vec::new(),
            until: None,
            item_until: None,
            subtypes: None,
        }
    }

    pub fn align_left(&self) -> Option<u64> {
        match self.alignment {
            Some((m, AlignmentMode::Left | AlignmentMode::Both)) => Some(m),
            _ => None,
        }
    }

    pub fn align_right(&self) -> Option<u64> {
        match self.alignment {
            Some((m, AlignmentMode::Right | AlignmentMode::Both)) => Some(m),
            _ => None,
        }
    }

    /// Wire representation of a scalar member, honoring `serialize-as`.
    pub fn wire_prim(&self) -> Option<PrimKind> {
        if let Some((repr, _)) = self.serialize_as {
            return Some(repr);
        }
        match &self.kind {
            NodeKind::Value(ValueShape::Prim(p)) => Some(*p),
            _ => None,
        }
    }
}
