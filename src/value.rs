use crate::schema::Literal;
use internment::Intern;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// A dynamically typed instance value. Serialization reads these;
/// deserialization produces them.
#[derive(Clone, PartialEq, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub enum Value {
    UInt(u64),
    Int(i64),
    F32(OrderedFloat<f32>),
    F64(OrderedFloat<f64>),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    /// An enum literal, by name.
    Enum(Intern<String>),
    List(Vec<Value>),
    Record(Record),
    /// An absent optional value.
    Null,
}

/// A record instance: its type name plus its fields in declared order.
#[derive(Clone, PartialEq, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct Record {
    pub type_name: Intern<String>,
    pub fields: Vec<(Intern<String>, Value)>,
}

impl Record {
    pub fn new<S: AsRef<str>>(type_name: S) -> Self {
        Self {
            type_name: Intern::from_ref(type_name.as_ref()),
            fields: Vec::new(),
        }
    }

    /// Builder-style field append.
    pub fn with<S: AsRef<str>, V: Into<Value>>(mut self, name: S, value: V) -> Self {
        self.set(name, value);
        self
    }

    pub fn set<S: AsRef<str>, V: Into<Value>>(&mut self, name: S, value: V) {
        let name = Intern::from_ref(name.as_ref());
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.fields.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, v)| v)
    }
}

impl Value {
    pub fn record<S: AsRef<str>>(type_name: S) -> Record {
        Record::new(type_name)
    }

    /// An enum literal value, by name.
    pub fn enum_value<S: AsRef<str>>(name: S) -> Value {
        Value::Enum(Intern::from_ref(name.as_ref()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Numeric coercion used when a binding source drives a length, count,
    /// or offset.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            Value::Bool(v) => Some(u64::from(*v)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::UInt(v) => i64::try_from(*v).ok(),
            Value::Int(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::UInt(v) => Some(*v as f64),
            Value::Int(v) => Some(*v as f64),
            Value::F32(v) => Some(f64::from(v.into_inner())),
            Value::F64(v) => Some(v.into_inner()),
            _ => None,
        }
    }

    /// Loose equality used for conditions, sentinels, and subtype keys:
    /// integers compare across signedness.
    pub(crate) fn matches(&self, other: &Value) -> bool {
        if self == other {
            return true;
        }
        match (self.as_i64(), other.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => match (self.as_u64(), other.as_u64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl From<Literal> for Value {
    fn from(value: Literal) -> Self {
        match value {
            Literal::Bool(v) => Value::Bool(v),
            Literal::UInt(v) => Value::UInt(v),
            Literal::Int(v) => Value::Int(v),
            Literal::Str(v) => Value::Str(v),
        }
    }
}

impl From<&Literal> for Value {
    fn from(value: &Literal) -> Self {
        value.clone().into()
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Value::Record(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::UInt(v.into())
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::UInt(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Int(v.into())
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int(v.into())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(OrderedFloat(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(OrderedFloat(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}
