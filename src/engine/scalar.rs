//! Primitive and string wire codecs: fixed-width integers and floats,
//! rational scaling, explicit wire representations, and string encodings.

use crate::{
    error::Error,
    graph::node::{PrimKind, TypeNode, ValueShape},
    schema::Encoding,
    value::Value,
};
use byteordered::{Endian, Endianness};

/// Encode one primitive into its wire octets.
pub(crate) fn prim_to_bytes(
    kind: PrimKind,
    e: Endianness,
    value: &Value,
) -> Result<([u8; 8], usize), Error> {
    let mut buf = [0_u8; 8];
    let width = kind.width() as usize;
    match kind {
        PrimKind::U8 => buf[0] = uint_in_range(value, u64::from(u8::MAX))? as u8,
        PrimKind::U16 => {
            e.write_u16(&mut buf[..2], uint_in_range(value, u64::from(u16::MAX))? as u16)
                .map_err(Error::Io)?;
        }
        PrimKind::U32 => {
            e.write_u32(&mut buf[..4], uint_in_range(value, u64::from(u32::MAX))? as u32)
                .map_err(Error::Io)?;
        }
        PrimKind::U64 => {
            e.write_u64(&mut buf[..8], uint_in_range(value, u64::MAX)?)
                .map_err(Error::Io)?;
        }
        PrimKind::I8 => buf[0] = int_in_range(value, i64::from(i8::MIN), i64::from(i8::MAX))? as u8,
        PrimKind::I16 => {
            e.write_i16(
                &mut buf[..2],
                int_in_range(value, i64::from(i16::MIN), i64::from(i16::MAX))? as i16,
            )
            .map_err(Error::Io)?;
        }
        PrimKind::I32 => {
            e.write_i32(
                &mut buf[..4],
                int_in_range(value, i64::from(i32::MIN), i64::from(i32::MAX))? as i32,
            )
            .map_err(Error::Io)?;
        }
        PrimKind::I64 => {
            e.write_i64(&mut buf[..8], int_in_range(value, i64::MIN, i64::MAX)?)
                .map_err(Error::Io)?;
        }
        PrimKind::F32 => {
            let v = value
                .as_f64()
                .ok_or_else(|| Error::value_mismatch("a numeric value", value))?;
            e.write_f32(&mut buf[..4], v as f32).map_err(Error::Io)?;
        }
        PrimKind::F64 => {
            let v = value
                .as_f64()
                .ok_or_else(|| Error::value_mismatch("a numeric value", value))?;
            e.write_f64(&mut buf[..8], v).map_err(Error::Io)?;
        }
        PrimKind::Bool => {
            buf[0] = match value {
                Value::Bool(b) => u8::from(*b),
                other => u8::from(
                    other
                        .as_u64()
                        .ok_or_else(|| Error::value_mismatch("a boolean value", value))?
                        != 0,
                ),
            };
        }
    }
    Ok((buf, width))
}

/// Decode one primitive from its wire octets.
pub(crate) fn prim_from_bytes(kind: PrimKind, e: Endianness, raw: &[u8]) -> Result<Value, Error> {
    Ok(match kind {
        PrimKind::U8 => Value::UInt(raw[0].into()),
        PrimKind::U16 => Value::UInt(e.read_u16(raw).map_err(Error::Io)?.into()),
        PrimKind::U32 => Value::UInt(e.read_u32(raw).map_err(Error::Io)?.into()),
        PrimKind::U64 => Value::UInt(e.read_u64(raw).map_err(Error::Io)?),
        PrimKind::I8 => Value::Int((raw[0] as i8).into()),
        PrimKind::I16 => Value::Int(e.read_i16(raw).map_err(Error::Io)?.into()),
        PrimKind::I32 => Value::Int(e.read_i32(raw).map_err(Error::Io)?.into()),
        PrimKind::I64 => Value::Int(e.read_i64(raw).map_err(Error::Io)?),
        PrimKind::F32 => Value::from(e.read_f32(raw).map_err(Error::Io)?),
        PrimKind::F64 => Value::from(e.read_f64(raw).map_err(Error::Io)?),
        PrimKind::Bool => Value::Bool(raw[0] != 0),
    })
}

fn uint_in_range(value: &Value, max: u64) -> Result<u64, Error> {
    let v = match value {
        // Scaled floats land here; round to the nearest integer.
        Value::F32(_) | Value::F64(_) => {
            let f = value.as_f64().unwrap_or_default();
            if f < 0.0 {
                return Err(Error::value_mismatch("an unsigned value", value));
            }
            f.round() as u64
        }
        other => other
            .as_u64()
            .ok_or_else(|| Error::value_mismatch("an unsigned value", value))?,
    };
    if v > max {
        return Err(Error::value_mismatch("an in-range unsigned value", value));
    }
    Ok(v)
}

fn int_in_range(value: &Value, min: i64, max: i64) -> Result<i64, Error> {
    let v = match value {
        Value::F32(_) | Value::F64(_) => value.as_f64().unwrap_or_default().round() as i64,
        other => other
            .as_i64()
            .ok_or_else(|| Error::value_mismatch("an integer value", value))?,
    };
    if v < min || v > max {
        return Err(Error::value_mismatch("an in-range integer value", value));
    }
    Ok(v)
}

/// Apply a member's rational scale on the way to the wire.
pub(crate) fn scale_out(value: &Value, scale: Option<(i64, i64)>) -> Result<Value, Error> {
    let Some((n, d)) = scale else {
        return Ok(value.clone());
    };
    match value {
        Value::F32(_) | Value::F64(_) => {
            let v = value.as_f64().unwrap_or_default();
            Ok(Value::from(v * n as f64 / d as f64))
        }
        other => {
            let v = other
                .as_i64()
                .ok_or_else(|| Error::value_mismatch("a numeric value", value))?;
            let scaled = (i128::from(v) * i128::from(n)) / i128::from(d);
            Ok(Value::Int(
                i64::try_from(scaled)
                    .map_err(|_| Error::value_mismatch("an in-range scaled value", value))?,
            ))
        }
    }
}

/// Undo a member's rational scale on the way from the wire, producing the
/// declared representation.
pub(crate) fn scale_in(wire: Value, scale: Option<(i64, i64)>, declared: PrimKind) -> Value {
    let Some((n, d)) = scale else {
        return cast_to_declared(wire, declared);
    };
    if declared.is_float() {
        let v = wire.as_f64().unwrap_or_default() * d as f64 / n as f64;
        cast_to_declared(Value::from(v), declared)
    } else {
        let v = wire.as_f64().unwrap_or_default() * d as f64 / n as f64;
        cast_to_declared(Value::from(v.round()), declared)
    }
}

/// Coerce a decoded wire value into the member's declared primitive
/// variant.
pub(crate) fn cast_to_declared(value: Value, declared: PrimKind) -> Value {
    match declared {
        PrimKind::U8 | PrimKind::U16 | PrimKind::U32 | PrimKind::U64 => match value.as_u64() {
            Some(v) => Value::UInt(v),
            None => match value.as_f64() {
                Some(f) => Value::UInt(f.round() as u64),
                None => value,
            },
        },
        PrimKind::I8 | PrimKind::I16 | PrimKind::I32 | PrimKind::I64 => match value.as_i64() {
            Some(v) => Value::Int(v),
            None => match value.as_f64() {
                Some(f) => Value::Int(f.round() as i64),
                None => value,
            },
        },
        PrimKind::F32 => match value.as_f64() {
            Some(f) => Value::from(f as f32),
            None => value,
        },
        PrimKind::F64 => match value.as_f64() {
            Some(f) => Value::from(f),
            None => value,
        },
        PrimKind::Bool => match value {
            Value::Bool(_) => value,
            other => match other.as_u64() {
                Some(v) => Value::Bool(v != 0),
                None => other,
            },
        },
    }
}

/// Decode a scalar member from raw octets, honoring serialize-as, scale,
/// and the declared representation. Used both by the read walk and by
/// deferred re-interpretation.
pub(crate) fn decode_scalar(ty: &TypeNode, e: Endianness, raw: &[u8]) -> Result<Value, Error> {
    let wire_kind = ty
        .wire_prim()
        .ok_or_else(|| Error::value_mismatch("a primitive member", &ty.member_name))?;
    let declared = match &ty.kind {
        crate::graph::node::NodeKind::Value(ValueShape::Prim(p)) => *p,
        _ => wire_kind,
    };
    let e = ty
        .serialize_as
        .and_then(|(_, override_e)| override_e)
        .unwrap_or(e);
    let wire = prim_from_bytes(wire_kind, e, raw)?;
    Ok(scale_in(wire, ty.scale, declared))
}

/// Encode a scalar member into its wire octets, honoring scale and
/// serialize-as.
pub(crate) fn encode_scalar(
    ty: &TypeNode,
    e: Endianness,
    value: &Value,
) -> Result<([u8; 8], usize), Error> {
    let wire_kind = ty
        .wire_prim()
        .ok_or_else(|| Error::value_mismatch("a primitive member", &ty.member_name))?;
    let e = ty
        .serialize_as
        .and_then(|(_, override_e)| override_e)
        .unwrap_or(e);
    let scaled = scale_out(value, ty.scale)?;
    prim_to_bytes(wire_kind, e, &scaled)
}

/// Encode a string per the effective encoding.
pub(crate) fn encode_str(s: &str, encoding: Encoding) -> Result<Vec<u8>, Error> {
    Ok(match encoding {
        Encoding::Utf8 => s.as_bytes().to_vec(),
        Encoding::Ascii => {
            if !s.is_ascii() {
                return Err(Error::value_mismatch("an ASCII string", &s));
            }
            s.as_bytes().to_vec()
        }
        Encoding::Utf16Le => s
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect(),
        Encoding::Utf16Be => s
            .encode_utf16()
            .flat_map(|u| u.to_be_bytes())
            .collect(),
    })
}

/// Decode a string per the effective encoding; invalid sequences are
/// replaced rather than rejected.
pub(crate) fn decode_str(bytes: &[u8], encoding: Encoding) -> String {
    match encoding {
        Encoding::Utf8 | Encoding::Ascii => String::from_utf8_lossy(bytes).to_string(),
        Encoding::Utf16Le => {
            let units = bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect::<Vec<_>>();
            String::from_utf16_lossy(&units)
        }
        Encoding::Utf16Be => {
            let units = bytes
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect::<Vec<_>>();
            String::from_utf16_lossy(&units)
        }
    }
}

/// Cut a padded or terminated string buffer at its first all-zero code
/// unit.
pub(crate) fn trim_terminated(bytes: &[u8], encoding: Encoding) -> &[u8] {
    let unit = encoding.unit_width();
    let mut end = bytes.len() - bytes.len() % unit;
    for (idx, chunk) in bytes.chunks_exact(unit).enumerate() {
        if chunk.iter().all(|b| *b == 0) {
            end = idx * unit;
            break;
        }
    }
    &bytes[..end]
}
