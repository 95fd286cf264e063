//! Runtime binding resolution against the value graph: ancestor walk,
//! named descent, converter invocation, and forcing of deferred slots.

use crate::{
    engine::{
        scalar,
        value_graph::{NodeId, Slot, ValueGraph},
        WalkEnv,
    },
    error::Error,
    graph::{
        node::{BoundBinding, CompiledBinding, EndianSource},
        path::{Ascent, BindingPath},
    },
    registry::ConvertContext,
    value::Value,
};
use byteordered::Endianness;
use internment::Intern;

/// Outcome of locating a binding source node.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) enum Resolved {
    Node(NodeId),
    /// The type graph knows the member but the walk has not materialized
    /// it yet (a forward reference).
    Pending,
}

/// Outcome of reading a binding source value.
#[derive(Clone, Debug)]
pub(crate) enum SourceValue {
    Value(Value),
    /// The binding does not participate in this direction (converter
    /// signalled unsupported).
    Gated,
    /// Forward reference: the source is not resolved yet.
    Pending,
}

/// Locate the node a path resolves to, relative to `from`.
pub(crate) fn resolve_source(
    graph: &ValueGraph,
    from: NodeId,
    path: &BindingPath,
) -> Result<Resolved, Error> {
    let not_found = || Error::BindingNotFound(path.text().to_owned());

    let start = match &path.ascent {
        Ascent::Levels(k) => {
            let mut cur = from;
            for _ in 0..*k {
                cur = graph.node(cur).parent.ok_or_else(not_found)?;
            }
            cur
        }
        Ascent::ByType(ty_name) => {
            let mut cand = graph.node(from).parent;
            loop {
                let Some(c) = cand else {
                    return Err(not_found());
                };
                if graph
                    .node(c)
                    .shape()
                    .is_some_and(|s| s.derives_from(ty_name.as_str()))
                {
                    break c;
                }
                cand = graph.node(c).parent;
            }
        }
        Ascent::Auto => {
            // Nearest ancestor whose shape names the first segment.
            let first = path.segments[0];
            let mut cand = graph.node(from).parent;
            loop {
                let Some(c) = cand else {
                    return Err(not_found());
                };
                if graph
                    .node(c)
                    .shape()
                    .is_some_and(|s| s.child_index(first.as_str()).is_some())
                {
                    break c;
                }
                cand = graph.node(c).parent;
            }
        }
    };

    descend(graph, start, &path.segments, not_found)
}

/// Descend from `start` by name only; used for item-relative paths.
pub(crate) fn resolve_within(
    graph: &ValueGraph,
    start: NodeId,
    path: &BindingPath,
) -> Result<Resolved, Error> {
    let not_found = || Error::BindingNotFound(path.text().to_owned());
    descend(graph, start, &path.segments, not_found)
}

fn descend(
    graph: &ValueGraph,
    start: NodeId,
    segments: &[Intern<String>],
    not_found: impl Fn() -> Error,
) -> Result<Resolved, Error> {
    let mut cur = start;
    for seg in segments.iter() {
        match graph.child_named(cur, seg.as_str()) {
            Some(c) => cur = c,
            None => {
                // Known to the shape but not materialized yet?
                if graph
                    .node(cur)
                    .shape()
                    .is_some_and(|s| s.child_index(seg.as_str()).is_some())
                {
                    return Ok(Resolved::Pending);
                }
                return Err(not_found());
            }
        }
    }
    Ok(Resolved::Node(cur))
}

/// Force a deferred slot into a concrete value, re-resolving its
/// forward-referenced endianness. Returns whether the slot is now set.
pub(crate) fn force_slot(
    env: &WalkEnv<'_>,
    graph: &mut ValueGraph,
    id: NodeId,
    forcing: &mut Vec<NodeId>,
) -> Result<bool, Error> {
    match &graph.node(id).slot {
        Slot::Set(_) => return Ok(true),
        Slot::Unset => return Ok(false),
        Slot::Deferred { .. } => {}
    }

    if forcing.contains(&id) {
        return Err(Error::NonDeferrableForwardReference(graph.path_of(id)));
    }
    forcing.push(id);
    let resolved = force_deferred(env, graph, id, forcing);
    forcing.pop();
    resolved
}

fn force_deferred(
    env: &WalkEnv<'_>,
    graph: &mut ValueGraph,
    id: NodeId,
    forcing: &mut Vec<NodeId>,
) -> Result<bool, Error> {
    let ty = graph.node(id).ty.clone();
    let Some(EndianSource::Bound(b)) = ty.endianness.clone() else {
        return Err(Error::NonDeferrableForwardReference(graph.path_of(id)));
    };
    let endianness = match bound_value(env, graph, id, &b, forcing)? {
        SourceValue::Value(v) => endianness_from_value(&v)?,
        SourceValue::Gated | SourceValue::Pending => return Ok(false),
    };
    let raw = match &graph.node(id).slot {
        Slot::Deferred { raw } => raw.clone(),
        // A recursive force may have settled the slot already.
        Slot::Set(_) => return Ok(true),
        Slot::Unset => return Ok(false),
    };
    let decoded = scalar::decode_scalar(&ty, endianness, &raw)?;
    tracing::debug!(member = %ty.member_name, "Resolved deferred field");
    graph.node_mut(id).slot = Slot::Set(decoded);
    Ok(true)
}

/// Read the value a bound binding resolves to, invoking its converter.
pub(crate) fn bound_value(
    env: &WalkEnv<'_>,
    graph: &mut ValueGraph,
    from: NodeId,
    binding: &BoundBinding,
    forcing: &mut Vec<NodeId>,
) -> Result<SourceValue, Error> {
    let source = match resolve_source(graph, from, &binding.path)? {
        Resolved::Pending => return Ok(SourceValue::Pending),
        Resolved::Node(s) => s,
    };

    if !force_slot(env, graph, source, forcing)? {
        // Objects have no scalar slot; materialize a partial record.
        if let Some(v) = graph.materialize_record(source) {
            return convert_forward(env, graph, from, binding, v);
        }
        return Ok(SourceValue::Pending);
    }
    let value = match &graph.node(source).slot {
        Slot::Set(v) => v.clone(),
        _ => return Ok(SourceValue::Pending),
    };
    convert_forward(env, graph, from, binding, value)
}

fn convert_forward(
    env: &WalkEnv<'_>,
    graph: &ValueGraph,
    from: NodeId,
    binding: &BoundBinding,
    value: Value,
) -> Result<SourceValue, Error> {
    let Some(name) = &binding.converter else {
        return Ok(SourceValue::Value(value));
    };
    let converter = env.registry.converter(name)?;
    let ctx = ConvertContext::new(graph.ancestor_values(from));
    match converter.convert(&value, binding.parameter.as_ref(), &ctx)? {
        Some(v) => Ok(SourceValue::Value(v)),
        None => Ok(SourceValue::Gated),
    }
}

/// Back-convert a measured value before writing it into a bound source.
pub(crate) fn convert_back(
    env: &WalkEnv<'_>,
    graph: &ValueGraph,
    from: NodeId,
    converter: &Intern<String>,
    parameter: Option<&Value>,
    value: &Value,
) -> Result<Option<Value>, Error> {
    let converter = env.registry.converter(converter)?;
    let ctx = ConvertContext::new(graph.ancestor_values(from));
    converter.convert_back(value, parameter, &ctx)
}

/// Resolution of a length/count/offset attribute.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) enum LenOutcome {
    Len(u64),
    /// The binding does not participate in this direction.
    Gated,
    Pending,
}

pub(crate) fn resolve_len(
    env: &WalkEnv<'_>,
    graph: &mut ValueGraph,
    from: NodeId,
    binding: &CompiledBinding,
    forcing: &mut Vec<NodeId>,
) -> Result<LenOutcome, Error> {
    match binding {
        CompiledBinding::Const(v) => Ok(LenOutcome::Len(*v)),
        CompiledBinding::Bound(b) => match bound_value(env, graph, from, b, forcing)? {
            SourceValue::Gated => Ok(LenOutcome::Gated),
            SourceValue::Pending => Ok(LenOutcome::Pending),
            SourceValue::Value(v) => v
                .as_u64()
                .map(LenOutcome::Len)
                .ok_or_else(|| Error::value_mismatch("a numeric binding source", &v)),
        },
    }
}

/// Effective endianness of a member; `None` means the bound source is not
/// resolved yet.
pub(crate) fn effective_endianness(
    env: &WalkEnv<'_>,
    graph: &mut ValueGraph,
    id: NodeId,
    inherited: Endianness,
    forcing: &mut Vec<NodeId>,
) -> Result<Option<Endianness>, Error> {
    let ty = graph.node(id).ty.clone();
    match &ty.endianness {
        None => Ok(Some(inherited)),
        Some(EndianSource::Fixed(e)) => Ok(Some(*e)),
        Some(EndianSource::Bound(b)) => match bound_value(env, graph, id, b, forcing)? {
            SourceValue::Value(v) => endianness_from_value(&v).map(Some),
            SourceValue::Gated => Ok(Some(inherited)),
            SourceValue::Pending => Ok(None),
        },
    }
}

pub(crate) fn endianness_from_value(value: &Value) -> Result<Endianness, Error> {
    let by_name = |s: &str| match s.to_ascii_lowercase().as_str() {
        "little" | "little-endian" | "le" => Some(Endianness::Little),
        "big" | "big-endian" | "be" => Some(Endianness::Big),
        _ => None,
    };
    match value {
        Value::Str(s) => by_name(s),
        Value::Enum(name) => by_name(name.as_str()),
        other => match other.as_u64() {
            Some(0) => Some(Endianness::Little),
            Some(1) => Some(Endianness::Big),
            _ => None,
        },
    }
    .ok_or_else(|| Error::value_mismatch("a byte-order value", value))
}

/// Evaluate serialize-when(/-not) conditions. Multiple positive
/// conditions are OR'd; every negated condition must hold.
pub(crate) fn conditions_pass(
    env: &WalkEnv<'_>,
    graph: &mut ValueGraph,
    id: NodeId,
    forcing: &mut Vec<NodeId>,
) -> Result<bool, Error> {
    let ty = graph.node(id).ty.clone();
    if ty.conditions.is_empty() {
        return Ok(true);
    }

    let mut any_when = false;
    let mut when_met = false;
    for cond in ty.conditions.iter() {
        let observed = match resolve_source(graph, id, &cond.path)? {
            Resolved::Pending => None,
            Resolved::Node(s) => {
                force_slot(env, graph, s, forcing)?;
                match &graph.node(s).slot {
                    Slot::Set(v) => Some(v.clone()),
                    _ => None,
                }
            }
        };
        let matched = observed.map(|v| v.matches(&cond.value)).unwrap_or(false);
        if cond.negate {
            if matched {
                return Ok(false);
            }
        } else {
            any_when = true;
            if matched {
                when_met = true;
            }
        }
    }
    Ok(!any_when || when_met)
}
