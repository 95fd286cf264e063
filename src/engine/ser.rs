//! The serialize walk: depth-first, field-order traversal emitting octets
//! through the framer, resolving bindings, keeping bound sources coherent
//! with the measured state of their targets, and accumulating computed
//! values.

use crate::{
    compute::Accumulator,
    engine::{
        binding::{self, LenOutcome, Resolved},
        scalar, subtype,
        value_graph::{Feed, NodeId, Slot, ValueGraph},
        Inherited, WalkEnv,
    },
    error::Error,
    framer::{CountingSink, FramedWriter, NoSeek, WriteSeek},
    graph::node::{CompiledBinding, EnumShape, NodeKind, TypeNode, ValueShape},
    registry::{ConvertContext, MemberEvent},
    schema::BindingDirection,
    value::Value,
};
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) struct SerState<'e> {
    pub env: &'e WalkEnv<'e>,
    pub measuring: bool,
    pub measure_stack: Vec<NodeId>,
    pub forcing: Vec<NodeId>,
    pub depth: usize,
}

/// Serialize `value` (a record) to the stream.
pub(crate) fn run<W: WriteSeek>(env: &WalkEnv<'_>, value: &Value, writer: &mut W) -> Result<(), Error> {
    let Value::Record(rec) = value else {
        return Err(Error::value_mismatch("a record value", value));
    };
    let root_ty = env.cache.root_node(env.schema, rec.type_name.as_str())?;

    let mut graph = ValueGraph::default();
    let root = build_value_graph(env, &mut graph, root_ty, None, value)?;
    wire_feeds(env, &mut graph)?;

    let mut st = SerState {
        env,
        measuring: false,
        measure_stack: Vec::new(),
        forcing: Vec::new(),
        depth: 0,
    };
    let mut w = FramedWriter::new(writer)?;
    let inherited = Inherited {
        endianness: env.default_endianness,
        encoding: env.default_encoding,
    };
    serialize_node(&mut st, &mut graph, root, &mut w, inherited, None)?;
    w.flush()
}

/// Mirror the input value into a value graph, resolving polymorphic
/// members to their runtime shapes.
fn build_value_graph(
    env: &WalkEnv<'_>,
    graph: &mut ValueGraph,
    ty: Arc<TypeNode>,
    parent: Option<NodeId>,
    value: &Value,
) -> Result<NodeId, Error> {
    let id = graph.add(ty.clone(), parent);
    match &ty.kind {
        NodeKind::Object { shape } => match value {
            Value::Null => graph.node_mut(id).slot = Slot::Set(Value::Null),
            Value::Record(rec) => {
                let chosen = subtype::shape_for_runtime(
                    env,
                    ty.subtypes.as_ref(),
                    shape,
                    rec.type_name.as_str(),
                )
                .map_err(|e| e.context(ty.member_name.as_str(), 0))?;
                graph.node_mut(id).chosen_shape = Some(chosen.clone());
                for child_ty in chosen.children.iter() {
                    let v = rec
                        .get(child_ty.member_name.as_str())
                        .cloned()
                        .unwrap_or(Value::Null);
                    build_value_graph(env, graph, child_ty.clone(), Some(id), &v)?;
                }
            }
            other => {
                return Err(
                    Error::value_mismatch("a record value", other)
                        .context(ty.member_name.as_str(), 0),
                )
            }
        },
        NodeKind::Collection { item } => match value {
            Value::Null => graph.node_mut(id).slot = Slot::Set(Value::Null),
            Value::List(items) => {
                for item_value in items.iter() {
                    build_value_graph(env, graph, item.clone(), Some(id), item_value)?;
                }
            }
            other => {
                return Err(
                    Error::value_mismatch("a list value", other)
                        .context(ty.member_name.as_str(), 0),
                )
            }
        },
        _ => graph.node_mut(id).slot = Slot::Set(value.clone()),
    }
    Ok(id)
}

fn is_active(graph: &ValueGraph, id: NodeId) -> bool {
    let mut cur = Some(id);
    while let Some(c) = cur {
        if graph.node(c).skipped {
            return false;
        }
        cur = graph.node(c).parent;
    }
    true
}

/// Register reverse bindings: every writable bound length/count/offset
/// and subtype key becomes a feed on its source node, so the source's
/// wire value is derived from the target when it is emitted.
fn wire_feeds(env: &WalkEnv<'_>, graph: &mut ValueGraph) -> Result<(), Error> {
    let mut forcing = Vec::new();
    for id in 0..graph.nodes.len() {
        if !is_active(graph, id) {
            continue;
        }
        let ty = graph.node(id).ty.clone();
        if !binding::conditions_pass(env, graph, id, &mut forcing)? {
            graph.node_mut(id).skipped = true;
            continue;
        }

        if let Some(CompiledBinding::Bound(b)) = &ty.length {
            if b.direction.writable() {
                if let Resolved::Node(s) = binding::resolve_source(graph, id, &b.path)? {
                    graph.node_mut(s).feeds.push(Feed::Length {
                        target: id,
                        converter: b.converter,
                        parameter: b.parameter.clone(),
                    });
                }
            }
        }
        if let Some(CompiledBinding::Bound(b)) = &ty.count {
            if b.direction.writable() {
                if let Resolved::Node(s) = binding::resolve_source(graph, id, &b.path)? {
                    graph.node_mut(s).feeds.push(Feed::Count {
                        target: id,
                        converter: b.converter,
                        parameter: b.parameter.clone(),
                    });
                }
            }
        }
        if let Some(CompiledBinding::Bound(b)) = &ty.offset {
            if b.direction.writable() {
                if let Resolved::Node(s) = binding::resolve_source(graph, id, &b.path)? {
                    graph.node_mut(s).feeds.push(Feed::Offset { target: id });
                }
            }
        }
        if let Some(table) = &ty.subtypes {
            if let Resolved::Node(s) = binding::resolve_source(graph, id, &table.key_path)? {
                graph.node_mut(s).feeds.push(Feed::SubtypeKey { target: id });
            }
        }
    }
    Ok(())
}

pub(crate) fn serialize_node(
    st: &mut SerState<'_>,
    graph: &mut ValueGraph,
    id: NodeId,
    w: &mut FramedWriter<'_>,
    inherited: Inherited,
    external_frame: Option<u64>,
) -> Result<(), Error> {
    if graph.node(id).skipped {
        return Ok(());
    }
    let ty = graph.node(id).ty.clone();
    let entry_offset = w.position();
    serialize_inner(st, graph, id, &ty, w, inherited, external_frame)
        .map_err(|e| e.context(ty.member_name.as_str(), entry_offset))
}

#[allow(clippy::too_many_arguments)]
fn serialize_inner(
    st: &mut SerState<'_>,
    graph: &mut ValueGraph,
    id: NodeId,
    ty: &Arc<TypeNode>,
    w: &mut FramedWriter<'_>,
    inherited: Inherited,
    external_frame: Option<u64>,
) -> Result<(), Error> {
    // A null slot with no reverse bindings emits nothing.
    if matches!(&graph.node(id).slot, Slot::Set(Value::Null)) && graph.node(id).feeds.is_empty() {
        return Ok(());
    }

    if !st.measuring {
        st.env.emit_serializing(&MemberEvent {
            member_name: ty.member_name.as_str(),
            offset: w.position(),
            depth: st.depth,
            value: None,
        });
    }

    // Field offset: jump, then write the observed offset back to a
    // not-yet-emitted writable source.
    if let Some(offset_binding) = &ty.offset {
        match binding::resolve_len(st.env, graph, id, offset_binding, &mut st.forcing)? {
            LenOutcome::Len(off) => w.seek_to(off, "field-offset")?,
            LenOutcome::Gated | LenOutcome::Pending => {}
        }
        if let CompiledBinding::Bound(b) = offset_binding {
            if b.direction.writable() {
                if let Resolved::Node(s) = binding::resolve_source(graph, id, &b.path)? {
                    if graph.node(s).offset.is_none() {
                        graph.node_mut(s).slot = Slot::Set(Value::UInt(w.position()));
                    }
                }
            }
        }
    }

    let endianness =
        binding::effective_endianness(st.env, graph, id, inherited.endianness, &mut st.forcing)?
            .ok_or_else(|| Error::NonDeferrableForwardReference(graph.path_of(id)))?;
    let encoding = ty.encoding.unwrap_or(inherited.encoding);
    let inner_inherited = Inherited {
        endianness,
        encoding,
    };

    // A constant or read-only bound length frames (and pads) the node; a
    // writable bound length leaves the natural length in charge and the
    // source receives the measured value instead.
    let own_frame = match &ty.length {
        None => None,
        Some(CompiledBinding::Const(l)) => Some(*l),
        Some(length @ CompiledBinding::Bound(b)) if b.direction == BindingDirection::ReadOnly => {
            match binding::resolve_len(st.env, graph, id, length, &mut st.forcing)? {
                LenOutcome::Len(l) => Some(l),
                LenOutcome::Gated | LenOutcome::Pending => None,
            }
        }
        Some(CompiledBinding::Bound(_)) => None,
    };
    let frame = external_frame.or(own_frame);

    if let Some(m) = ty.align_left() {
        w.align(m)?;
    }

    let tapped = !ty.computed.is_empty() && !st.measuring;
    if tapped {
        w.push_taps(
            ty.computed
                .iter()
                .map(|c| Accumulator::new(c.function))
                .collect(),
        );
    }

    let start = w.position();
    graph.node_mut(id).offset = Some(start);
    if let Some(l) = frame {
        w.push_limit(l);
    }

    st.depth += 1;
    let emitted = emit_kind(
        st,
        graph,
        id,
        ty,
        w,
        inner_inherited,
        frame.is_some() || ty.length.is_some(),
    );
    st.depth -= 1;
    emitted?;

    if frame.is_some() {
        w.pop_limit()?;
    }
    if tapped {
        finalize_computed(st, graph, id, ty, w)?;
    }
    if let Some(m) = ty.align_right() {
        w.align(m)?;
    }

    graph.node_mut(id).observed_len = Some(w.position() - start);
    if !st.measuring {
        let value = match &graph.node(id).slot {
            Slot::Set(v) => Some(v.clone()),
            _ => None,
        };
        debug!(member = %ty.member_name, offset = start, len = w.position() - start, "Serialized member");
        st.env.emit_serialized(&MemberEvent {
            member_name: ty.member_name.as_str(),
            offset: start,
            depth: st.depth,
            value: value.as_ref(),
        });
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn emit_kind(
    st: &mut SerState<'_>,
    graph: &mut ValueGraph,
    id: NodeId,
    ty: &Arc<TypeNode>,
    w: &mut FramedWriter<'_>,
    inherited: Inherited,
    sized: bool,
) -> Result<(), Error> {
    match &ty.kind {
        NodeKind::Value(shape) => {
            if !graph.node(id).feeds.is_empty() {
                if let Some(v) = compute_feeds(st, graph, id)? {
                    graph.node_mut(id).slot = Slot::Set(v);
                }
            }
            let value = match &graph.node(id).slot {
                Slot::Set(v) => v.clone(),
                _ => Value::Null,
            };
            if value.is_null() {
                return Ok(());
            }
            match shape {
                ValueShape::Prim(_) => {
                    let (buf, n) = scalar::encode_scalar(ty, inherited.endianness, &value)?;
                    w.write_all(&buf[..n])
                }
                ValueShape::Str => emit_string(w, inherited, &value, sized),
                ValueShape::Bytes => match &value {
                    Value::Bytes(b) => w.write_all(b),
                    other => Err(Error::value_mismatch("a byte value", other)),
                },
                ValueShape::Enum(es) => emit_enum(ty, es, w, inherited, &value, sized),
            }
        }
        NodeKind::PrimitiveArray { elem } => {
            let value = match &graph.node(id).slot {
                Slot::Set(v) => v.clone(),
                _ => Value::Null,
            };
            let Value::List(items) = &value else {
                return Err(Error::value_mismatch("a list value", &value));
            };
            let count = match &ty.count {
                Some(CompiledBinding::Const(c)) => Some(*c),
                Some(b @ CompiledBinding::Bound(bb))
                    if bb.direction == BindingDirection::ReadOnly =>
                {
                    match binding::resolve_len(st.env, graph, id, b, &mut st.forcing)? {
                        LenOutcome::Len(c) => Some(c),
                        _ => None,
                    }
                }
                _ => None,
            };
            if let Some(c) = count {
                if items.len() as u64 > c {
                    return Err(Error::Overflow {
                        natural: items.len() as u64,
                        bound: c,
                    });
                }
                if (items.len() as u64) < c {
                    warn!(member = %ty.member_name, have = items.len(), want = c, "Padding primitive array with default items");
                }
            }
            let total = count.unwrap_or(items.len() as u64);
            let mut buf = Vec::with_capacity((total * elem.width()) as usize);
            for i in 0..total {
                let item = items.get(i as usize).cloned().unwrap_or(Value::UInt(0));
                let (b, n) = scalar::prim_to_bytes(*elem, inherited.endianness, &item)?;
                buf.extend_from_slice(&b[..n]);
            }
            w.write_all(&buf)
        }
        NodeKind::Collection { item } => {
            emit_collection(st, graph, id, ty, item, w, inherited)
        }
        NodeKind::Object { .. } => {
            let children = graph.node(id).children.clone();
            for child in children {
                serialize_node(st, graph, child, w, inherited, None)?;
            }
            Ok(())
        }
        NodeKind::Custom { codec } => {
            let value = match &graph.node(id).slot {
                Slot::Set(v) => v.clone(),
                _ => Value::Null,
            };
            let codec = st.env.registry.codec(codec)?;
            let ctx = ConvertContext::new(graph.ancestor_values(id));
            codec.serialize(&value, w, inherited.endianness, &ctx)
        }
        NodeKind::Passthrough => {
            let value = match &graph.node(id).slot {
                Slot::Set(v) => v.clone(),
                _ => Value::Null,
            };
            match &value {
                Value::Bytes(b) => w.write_all(b),
                other => Err(Error::value_mismatch("a byte stream", other)),
            }
        }
    }
}

fn emit_string(
    w: &mut FramedWriter<'_>,
    inherited: Inherited,
    value: &Value,
    sized: bool,
) -> Result<(), Error> {
    let Value::Str(s) = value else {
        return Err(Error::value_mismatch("a string value", value));
    };
    let bytes = scalar::encode_str(s, inherited.encoding)?;
    if let Some(remaining) = w.remaining() {
        if bytes.len() as u64 > remaining {
            return Err(Error::Overflow {
                natural: bytes.len() as u64,
                bound: remaining,
            });
        }
    }
    w.write_all(&bytes)?;
    // Null-terminated is implied when nothing else delimits the string.
    if !sized {
        w.write_all(&vec![0_u8; inherited.encoding.unit_width()])?;
    }
    Ok(())
}

fn emit_enum(
    ty: &TypeNode,
    es: &EnumShape,
    w: &mut FramedWriter<'_>,
    inherited: Inherited,
    value: &Value,
    sized: bool,
) -> Result<(), Error> {
    let literal = match value {
        Value::Enum(name) => es
            .literal_by_name(name.as_str())
            .ok_or_else(|| Error::value_mismatch("a declared enum literal", value))?,
        Value::Str(name) => es
            .literal_by_name(name)
            .ok_or_else(|| Error::value_mismatch("a declared enum literal", value))?,
        other => {
            let v = other
                .as_i64()
                .ok_or_else(|| Error::value_mismatch("an enum literal", other))?;
            es.literal_by_value(v)
                .ok_or_else(|| Error::value_mismatch("a declared enum literal", other))?
        }
    };
    if es.text_mapped {
        emit_string(
            w,
            inherited,
            &Value::Str(literal.text.as_str().to_owned()),
            sized,
        )
    } else {
        let kind = ty.serialize_as.map(|(p, _)| p).unwrap_or(es.repr);
        let e = ty
            .serialize_as
            .and_then(|(_, override_e)| override_e)
            .unwrap_or(inherited.endianness);
        let (buf, n) = scalar::prim_to_bytes(kind, e, &Value::Int(literal.value))?;
        w.write_all(&buf[..n])
    }
}

fn emit_collection(
    st: &mut SerState<'_>,
    graph: &mut ValueGraph,
    id: NodeId,
    ty: &Arc<TypeNode>,
    item_ty: &Arc<TypeNode>,
    w: &mut FramedWriter<'_>,
    inherited: Inherited,
) -> Result<(), Error> {
    let children = graph.node(id).children.clone();

    // Per-item frames: a scalar source is uniform, a sequence is jagged.
    let item_frames = match &ty.item_length {
        None => None,
        Some(CompiledBinding::Const(l)) => Some(vec![*l; children.len()]),
        Some(b @ CompiledBinding::Bound(_)) => {
            match item_length_values(st, graph, id, b, children.len())? {
                Some(lens) => Some(lens),
                None => None,
            }
        }
    };

    if let Some(CompiledBinding::Const(c)) = &ty.count {
        if children.len() as u64 > *c {
            return Err(Error::Overflow {
                natural: children.len() as u64,
                bound: *c,
            });
        }
        if (children.len() as u64) < *c {
            warn!(member = %ty.member_name, have = children.len(), want = c, "Collection shorter than its declared count");
        }
    }

    for (idx, child) in children.iter().enumerate() {
        let frame = item_frames.as_ref().map(|lens| lens[idx]);
        serialize_node(st, graph, *child, w, inherited, frame)?;
    }

    // Value-terminated collections emit their sentinel after the items.
    if let Some(sentinel) = &ty.until {
        let kind = item_ty
            .wire_prim()
            .ok_or_else(|| Error::value_mismatch("a primitive item type", sentinel))?;
        let (buf, n) = scalar::prim_to_bytes(kind, inherited.endianness, sentinel)?;
        w.write_all(&buf[..n])?;
    }
    Ok(())
}

fn item_length_values(
    st: &mut SerState<'_>,
    graph: &mut ValueGraph,
    id: NodeId,
    binding: &CompiledBinding,
    items: usize,
) -> Result<Option<Vec<u64>>, Error> {
    let CompiledBinding::Bound(b) = binding else {
        return Ok(None);
    };
    match binding::bound_value(st.env, graph, id, b, &mut st.forcing)? {
        binding::SourceValue::Value(Value::List(lens)) => {
            if lens.len() < items {
                return Err(Error::ItemLengthMismatch {
                    expected: lens.len(),
                    actual: items,
                });
            }
            let lens = lens
                .iter()
                .map(|v| {
                    v.as_u64()
                        .ok_or_else(|| Error::value_mismatch("a numeric item length", v))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(lens))
        }
        binding::SourceValue::Value(v) => {
            let l = v
                .as_u64()
                .ok_or_else(|| Error::value_mismatch("a numeric item length", &v))?;
            Ok(Some(vec![l; items]))
        }
        binding::SourceValue::Gated | binding::SourceValue::Pending => Ok(None),
    }
}

/// Derive a bound source's wire value from the observed state of its
/// targets. The first applicable feed wins.
fn compute_feeds(
    st: &mut SerState<'_>,
    graph: &mut ValueGraph,
    id: NodeId,
) -> Result<Option<Value>, Error> {
    let feeds = graph.node(id).feeds.clone();
    for feed in feeds {
        match feed {
            Feed::Length {
                target,
                converter,
                parameter,
            } => {
                // A target that already serialized has an observed length;
                // otherwise measure it against a counting sink.
                let n = match graph.node(target).observed_len {
                    Some(n) => n,
                    None => measure(st, graph, target)?,
                };
                let v = Value::UInt(n);
                let v = match converter {
                    Some(c) => {
                        match binding::convert_back(st.env, graph, id, &c, parameter.as_ref(), &v)? {
                            Some(cv) => cv,
                            None => continue,
                        }
                    }
                    None => v,
                };
                return Ok(Some(v));
            }
            Feed::Count {
                target,
                converter,
                parameter,
            } => {
                let n = match &graph.node(target).ty.kind {
                    NodeKind::Collection { .. } => graph.node(target).children.len() as u64,
                    NodeKind::PrimitiveArray { .. } => match &graph.node(target).slot {
                        Slot::Set(Value::List(items)) => items.len() as u64,
                        _ => continue,
                    },
                    _ => continue,
                };
                let v = Value::UInt(n);
                let v = match converter {
                    Some(c) => {
                        match binding::convert_back(st.env, graph, id, &c, parameter.as_ref(), &v)? {
                            Some(cv) => cv,
                            None => continue,
                        }
                    }
                    None => v,
                };
                return Ok(Some(v));
            }
            Feed::SubtypeKey { target } => {
                let target_node = graph.node(target);
                let Some(table) = target_node.ty.subtypes.clone() else {
                    continue;
                };
                let Some(runtime) = target_node.chosen_shape.as_ref().map(|s| s.type_name) else {
                    continue;
                };
                match subtype::key_for_runtime(st.env, &table, runtime.as_str())? {
                    Some(key) => return Ok(Some(key)),
                    // The default type honors the caller-set key.
                    None => continue,
                }
            }
            Feed::Offset { target } => match graph.node(target).offset {
                Some(off) => return Ok(Some(Value::UInt(off))),
                None => continue,
            },
        }
    }
    Ok(None)
}

/// Measure the natural serialized length of a subtree without emitting
/// it: the walk runs against a counting sink on a clone of the graph.
fn measure(st: &mut SerState<'_>, graph: &ValueGraph, target: NodeId) -> Result<u64, Error> {
    if st.measure_stack.contains(&target) {
        return Err(Error::NonDeferrableForwardReference(graph.path_of(target)));
    }
    st.measure_stack.push(target);
    let result = measure_inner(st, graph, target);
    st.measure_stack.pop();
    result
}

fn measure_inner(st: &mut SerState<'_>, graph: &ValueGraph, target: NodeId) -> Result<u64, Error> {
    let mut sub = graph.clone();
    let inherited = inherited_for(st.env, &mut sub, target)?;
    let mut sink = NoSeek::new(CountingSink::default());
    let mut w = FramedWriter::new(&mut sink)?;
    let was_measuring = st.measuring;
    st.measuring = true;
    let walked = serialize_node(st, &mut sub, target, &mut w, inherited, None);
    st.measuring = was_measuring;
    walked?;
    Ok(w.position())
}

/// Effective inherited attributes at a node, folded root-down.
fn inherited_for(
    env: &WalkEnv<'_>,
    graph: &mut ValueGraph,
    id: NodeId,
) -> Result<Inherited, Error> {
    let mut chain = Vec::new();
    let mut cur = graph.node(id).parent;
    while let Some(c) = cur {
        chain.push(c);
        cur = graph.node(c).parent;
    }
    chain.reverse();

    let mut inherited = Inherited {
        endianness: env.default_endianness,
        encoding: env.default_encoding,
    };
    let mut forcing = Vec::new();
    for c in chain {
        if let Some(e) =
            binding::effective_endianness(env, graph, c, inherited.endianness, &mut forcing)?
        {
            inherited.endianness = e;
        }
        if let Some(enc) = graph.node(c).ty.encoding {
            inherited.encoding = enc;
        }
    }
    Ok(inherited)
}

/// Finalize the node's accumulators: write each result into its target's
/// slot, patching the stream when the target was already emitted.
fn finalize_computed(
    st: &mut SerState<'_>,
    graph: &mut ValueGraph,
    id: NodeId,
    ty: &Arc<TypeNode>,
    w: &mut FramedWriter<'_>,
) -> Result<(), Error> {
    let accumulators = w.pop_taps();
    for (spec, acc) in ty.computed.iter().zip(accumulators.iter()) {
        let mut value = acc.finalize();
        let target = match binding::resolve_source(graph, id, &spec.target)? {
            Resolved::Node(t) => t,
            Resolved::Pending => {
                return Err(Error::BindingNotFound(spec.target.text().to_owned()))
            }
        };
        let target_ty = graph.node(target).ty.clone();
        // Additive checksums truncate to the target's wire width.
        if let (Value::UInt(v), Some(prim)) = (&value, target_ty.wire_prim()) {
            let bits = prim.width() * 8;
            if bits < 64 {
                value = Value::UInt(v & ((1_u64 << bits) - 1));
            }
        }
        debug!(member = %ty.member_name, target = %spec.target, ?value, "Computed field value");
        graph.node_mut(target).slot = Slot::Set(value.clone());

        if let Some(target_offset) = graph.node(target).offset {
            // The target serialized before the covered range; patch it in
            // place.
            let inherited = inherited_for(st.env, graph, target)?;
            let endianness = binding::effective_endianness(
                st.env,
                graph,
                target,
                inherited.endianness,
                &mut st.forcing,
            )?
            .unwrap_or(inherited.endianness);
            match &value {
                Value::Bytes(b) => w.patch(target_offset, b, "computed write-back")?,
                scalar_value => {
                    let (buf, n) = scalar::encode_scalar(&target_ty, endianness, scalar_value)?;
                    w.patch(target_offset, &buf[..n], "computed write-back")?;
                }
            }
        }
    }
    Ok(())
}
