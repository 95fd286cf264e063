//! The deserialize walk: depth-first, field-order traversal consuming
//! octets through the framer, materializing value nodes, deferring
//! forward-referenced interpretations, and assembling the result value.

use crate::{
    engine::{
        binding::{self, LenOutcome, Resolved, SourceValue},
        scalar, subtype,
        value_graph::{NodeId, Slot, ValueGraph},
        Inherited, WalkEnv,
    },
    error::Error,
    framer::{FramedReader, ReadSeek},
    graph::node::{
        BoundBinding, CompiledBinding, EnumShape, NodeKind, RecordShape, TypeNode, ValueShape,
    },
    registry::{ConvertContext, MemberEvent},
    schema::{BindingDirection, Encoding, LastItemMode},
    value::Value,
};
use std::sync::Arc;
use tracing::debug;

pub(crate) struct DeState<'e> {
    pub env: &'e WalkEnv<'e>,
    pub forcing: Vec<NodeId>,
    pub deferred: Vec<NodeId>,
    pub depth: usize,
}

/// Deserialize one value of the named type from the stream.
pub(crate) fn run<R: ReadSeek>(
    env: &WalkEnv<'_>,
    type_name: &str,
    reader: &mut R,
) -> Result<Value, Error> {
    let root_ty = env.cache.root_node(env.schema, type_name)?;
    let mut graph = ValueGraph::default();
    let root = graph.add(root_ty, None);

    let mut st = DeState {
        env,
        forcing: Vec::new(),
        deferred: Vec::new(),
        depth: 0,
    };
    let mut r = FramedReader::new(reader)?;
    let inherited = Inherited {
        endianness: env.default_endianness,
        encoding: env.default_encoding,
    };
    deserialize_node(&mut st, &mut graph, root, &mut r, inherited, None)?;

    // Second pass over anything still deferred, in discovery order.
    let deferred = std::mem::take(&mut st.deferred);
    for id in deferred {
        if matches!(graph.node(id).slot, Slot::Deferred { .. })
            && !binding::force_slot(env, &mut graph, id, &mut st.forcing)?
        {
            return Err(Error::NonDeferrableForwardReference(graph.path_of(id)));
        }
    }

    assemble(&graph, root)
}

/// Materialize the result value from the finished graph.
fn assemble(graph: &ValueGraph, id: NodeId) -> Result<Value, Error> {
    let node = graph.node(id);
    if node.skipped {
        return Ok(Value::Null);
    }
    match &node.ty.kind {
        NodeKind::Object { .. } => {
            if matches!(&node.slot, Slot::Set(Value::Null)) {
                return Ok(Value::Null);
            }
            let Some(shape) = node.shape() else {
                return Ok(Value::Null);
            };
            let mut fields = Vec::with_capacity(node.children.len());
            for &child in node.children.iter() {
                let name = graph.node(child).ty.member_name;
                fields.push((name, assemble(graph, child)?));
            }
            Ok(Value::Record(
                shape.constructor.construct(shape.type_name, fields),
            ))
        }
        NodeKind::Collection { .. } => {
            let mut items = Vec::new();
            for &child in node.children.iter() {
                if graph.node(child).skipped {
                    continue;
                }
                items.push(assemble(graph, child)?);
            }
            Ok(Value::List(items))
        }
        _ => match &node.slot {
            Slot::Set(v) => Ok(v.clone()),
            Slot::Unset => Ok(Value::Null),
            Slot::Deferred { .. } => Err(Error::NonDeferrableForwardReference(graph.path_of(id))),
        },
    }
}

pub(crate) fn deserialize_node(
    st: &mut DeState<'_>,
    graph: &mut ValueGraph,
    id: NodeId,
    r: &mut FramedReader<'_>,
    inherited: Inherited,
    external_frame: Option<u64>,
) -> Result<(), Error> {
    let ty = graph.node(id).ty.clone();
    let entry_offset = r.position();
    deserialize_inner(st, graph, id, &ty, r, inherited, external_frame)
        .map_err(|e| e.context(ty.member_name.as_str(), entry_offset))
}

#[allow(clippy::too_many_arguments)]
fn deserialize_inner(
    st: &mut DeState<'_>,
    graph: &mut ValueGraph,
    id: NodeId,
    ty: &Arc<TypeNode>,
    r: &mut FramedReader<'_>,
    inherited: Inherited,
    external_frame: Option<u64>,
) -> Result<(), Error> {
    if !binding::conditions_pass(st.env, graph, id, &mut st.forcing)? {
        graph.node_mut(id).slot = Slot::Set(Value::Null);
        graph.node_mut(id).skipped = true;
        return Ok(());
    }

    st.env.emit_deserializing(&MemberEvent {
        member_name: ty.member_name.as_str(),
        offset: r.position(),
        depth: st.depth,
        value: None,
    });

    if let Some(offset_binding) = &ty.offset {
        match binding::resolve_len(st.env, graph, id, offset_binding, &mut st.forcing)? {
            LenOutcome::Len(off) => r.seek_to(off, "field-offset")?,
            LenOutcome::Gated => {}
            LenOutcome::Pending => {
                return Err(Error::NonDeferrableForwardReference(graph.path_of(id)))
            }
        }
    }

    let own_frame = resolve_own_frame(st, graph, id, ty)?;
    let frame = external_frame.or(own_frame);

    if let Some(m) = ty.align_left() {
        r.align(m)?;
    }
    let start = r.position();
    graph.node_mut(id).offset = Some(start);
    if let Some(l) = frame {
        r.push_limit(l);
    }

    let mut deferred = false;
    match binding::effective_endianness(st.env, graph, id, inherited.endianness, &mut st.forcing)? {
        Some(endianness) => {
            let inner = Inherited {
                endianness,
                encoding: ty.encoding.unwrap_or(inherited.encoding),
            };
            st.depth += 1;
            let walked = read_kind(st, graph, id, ty, r, inner, frame.is_some());
            st.depth -= 1;
            walked?;
        }
        None => {
            // Forward-referenced endianness: buffer the octets of a
            // fixed-width scalar and re-interpret once the source
            // resolves.
            let width = match &ty.kind {
                NodeKind::Value(ValueShape::Prim(_)) => ty.wire_prim().map(|p| p.width()),
                _ => None,
            }
            .ok_or_else(|| Error::NonDeferrableForwardReference(graph.path_of(id)))?;
            let mut raw = vec![0_u8; width as usize];
            r.read_exact(&mut raw)?;
            debug!(member = %ty.member_name, width, "Deferred field interpretation");
            graph.node_mut(id).slot = Slot::Deferred { raw };
            st.deferred.push(id);
            deferred = true;
        }
    }

    if frame.is_some() {
        r.pop_limit()?;
    }
    if let Some(m) = ty.align_right() {
        r.align(m)?;
    }
    graph.node_mut(id).observed_len = Some(r.position() - start);

    if !deferred {
        let value = match &graph.node(id).slot {
            Slot::Set(v) => Some(v.clone()),
            _ => None,
        };
        debug!(member = %ty.member_name, offset = start, len = r.position() - start, "Deserialized member");
        st.env.emit_deserialized(&MemberEvent {
            member_name: ty.member_name.as_str(),
            offset: start,
            depth: st.depth,
            value: value.as_ref(),
        });
    }
    Ok(())
}

/// Resolve the node's own length frame. Write-only bindings do not
/// participate in reads; an unresolved forward length cannot be deferred
/// because the byte range would be unknown.
fn resolve_own_frame(
    st: &mut DeState<'_>,
    graph: &mut ValueGraph,
    id: NodeId,
    ty: &TypeNode,
) -> Result<Option<u64>, Error> {
    let Some(length) = &ty.length else {
        return Ok(None);
    };
    if let CompiledBinding::Bound(b) = length {
        if b.direction == BindingDirection::WriteOnly {
            return Ok(None);
        }
    }
    match binding::resolve_len(st.env, graph, id, length, &mut st.forcing)? {
        LenOutcome::Len(l) => Ok(Some(l)),
        LenOutcome::Gated => Ok(None),
        LenOutcome::Pending => Err(Error::NonDeferrableForwardReference(graph.path_of(id))),
    }
}

fn read_kind(
    st: &mut DeState<'_>,
    graph: &mut ValueGraph,
    id: NodeId,
    ty: &Arc<TypeNode>,
    r: &mut FramedReader<'_>,
    inherited: Inherited,
    framed: bool,
) -> Result<(), Error> {
    match &ty.kind {
        NodeKind::Value(shape) => {
            let value = match shape {
                ValueShape::Prim(declared) => {
                    let width = ty.serialize_as.map(|(p, _)| p).unwrap_or(*declared).width();
                    let mut raw = vec![0_u8; width as usize];
                    r.read_exact(&mut raw)?;
                    scalar::decode_scalar(ty, inherited.endianness, &raw)?
                }
                ValueShape::Str => {
                    Value::Str(read_string(r, inherited.encoding, framed)?)
                }
                ValueShape::Bytes => Value::Bytes(r.read_to_limit()?),
                ValueShape::Enum(es) => read_enum(ty, es, r, inherited, framed)?,
            };
            graph.node_mut(id).slot = Slot::Set(value);
            Ok(())
        }
        NodeKind::PrimitiveArray { elem } => {
            let width = elem.width() as usize;
            let count = match &ty.count {
                None => None,
                Some(CompiledBinding::Bound(b)) if b.direction == BindingDirection::WriteOnly => {
                    None
                }
                Some(binding) => {
                    match binding::resolve_len(st.env, graph, id, binding, &mut st.forcing)? {
                        LenOutcome::Len(n) => Some(n),
                        LenOutcome::Gated => None,
                        LenOutcome::Pending => {
                            return Err(Error::NonDeferrableForwardReference(graph.path_of(id)))
                        }
                    }
                }
            };
            let bytes = match count {
                Some(n) => {
                    let mut b = vec![0_u8; n as usize * width];
                    r.read_exact(&mut b)?;
                    b
                }
                None => r.read_to_limit()?,
            };
            if bytes.len() % width != 0 {
                return Err(Error::Underflow {
                    offset: r.position(),
                });
            }
            let items = bytes
                .chunks_exact(width)
                .map(|c| scalar::prim_from_bytes(*elem, inherited.endianness, c))
                .collect::<Result<Vec<_>, _>>()?;
            graph.node_mut(id).slot = Slot::Set(Value::List(items));
            Ok(())
        }
        NodeKind::Collection { item } => read_collection(st, graph, id, ty, item, r, inherited),
        NodeKind::Object { shape } => read_object(st, graph, id, ty, shape, r, inherited),
        NodeKind::Custom { codec } => {
            let codec = st.env.registry.codec(codec)?;
            let ctx = ConvertContext::new(graph.ancestor_values(id));
            let value = codec.deserialize(r, inherited.endianness, &ctx)?;
            graph.node_mut(id).slot = Slot::Set(value);
            Ok(())
        }
        NodeKind::Passthrough => {
            graph.node_mut(id).slot = Slot::Set(Value::Bytes(r.read_to_limit()?));
            Ok(())
        }
    }
}

fn read_string(
    r: &mut FramedReader<'_>,
    encoding: Encoding,
    framed: bool,
) -> Result<String, Error> {
    if framed {
        let bytes = r.read_to_limit()?;
        let trimmed = scalar::trim_terminated(&bytes, encoding);
        Ok(scalar::decode_str(trimmed, encoding))
    } else {
        let unit = encoding.unit_width();
        let mut bytes = Vec::new();
        loop {
            let mut u = [0_u8; 2];
            r.read_exact(&mut u[..unit])?;
            if u[..unit].iter().all(|b| *b == 0) {
                break;
            }
            bytes.extend_from_slice(&u[..unit]);
        }
        Ok(scalar::decode_str(&bytes, encoding))
    }
}

fn read_enum(
    ty: &TypeNode,
    es: &EnumShape,
    r: &mut FramedReader<'_>,
    inherited: Inherited,
    framed: bool,
) -> Result<Value, Error> {
    if es.text_mapped {
        let text = read_string(r, inherited.encoding, framed)?;
        let literal = es
            .literal_by_text(&text)
            .or_else(|| es.literal_by_name(&text))
            .ok_or_else(|| Error::value_mismatch("a declared enum literal", &text))?;
        Ok(Value::Enum(literal.name))
    } else {
        let kind = ty.serialize_as.map(|(p, _)| p).unwrap_or(es.repr);
        let e = ty
            .serialize_as
            .and_then(|(_, override_e)| override_e)
            .unwrap_or(inherited.endianness);
        let mut raw = vec![0_u8; kind.width() as usize];
        r.read_exact(&mut raw)?;
        let v = scalar::prim_from_bytes(kind, e, &raw)?
            .as_i64()
            .ok_or_else(|| Error::value_mismatch("an integer enum value", &raw))?;
        let literal = es
            .literal_by_value(v)
            .ok_or_else(|| Error::value_mismatch("a declared enum literal", &v))?;
        Ok(Value::Enum(literal.name))
    }
}

fn read_object(
    st: &mut DeState<'_>,
    graph: &mut ValueGraph,
    id: NodeId,
    ty: &Arc<TypeNode>,
    declared: &Arc<RecordShape>,
    r: &mut FramedReader<'_>,
    inherited: Inherited,
) -> Result<(), Error> {
    let shape = match &ty.subtypes {
        None => declared.clone(),
        Some(table) => {
            let key_binding = BoundBinding {
                path: table.key_path.clone(),
                converter: None,
                parameter: None,
                direction: BindingDirection::Both,
            };
            match binding::bound_value(st.env, graph, id, &key_binding, &mut st.forcing)? {
                SourceValue::Value(key) => subtype::shape_for_key(st.env, table, &key)?,
                SourceValue::Pending => {
                    return Err(Error::NonDeferrableForwardReference(
                        table.key_path.text().to_owned(),
                    ))
                }
                SourceValue::Gated => declared.clone(),
            }
        }
    };
    graph.node_mut(id).chosen_shape = Some(shape.clone());

    for child_ty in shape.children.iter() {
        // A member is absent when the enclosing bound length excludes it.
        if r.remaining() == Some(0) {
            let child = graph.add(child_ty.clone(), Some(id));
            graph.node_mut(child).slot = Slot::Set(Value::Null);
            continue;
        }
        let child = graph.add(child_ty.clone(), Some(id));
        deserialize_node(st, graph, child, r, inherited, None)?;
    }

    // Settle deferred children whose governing sources are now known.
    let children = graph.node(id).children.clone();
    for child in children {
        if matches!(graph.node(child).slot, Slot::Deferred { .. }) {
            binding::force_slot(st.env, graph, child, &mut st.forcing)?;
        }
    }
    Ok(())
}

#[derive(Clone, Debug)]
enum ItemFrames {
    None,
    Uniform(u64),
    Jagged(Vec<u64>),
}

fn jagged_exhausted(frames: &ItemFrames, idx: usize) -> bool {
    matches!(frames, ItemFrames::Jagged(lens) if idx >= lens.len())
}

fn frame_at(frames: &ItemFrames, idx: usize) -> Result<Option<u64>, Error> {
    match frames {
        ItemFrames::None => Ok(None),
        ItemFrames::Uniform(l) => Ok(Some(*l)),
        ItemFrames::Jagged(lens) => lens
            .get(idx)
            .map(|l| Some(*l))
            .ok_or(Error::ItemLengthMismatch {
                expected: lens.len(),
                actual: idx + 1,
            }),
    }
}

fn read_collection(
    st: &mut DeState<'_>,
    graph: &mut ValueGraph,
    id: NodeId,
    ty: &Arc<TypeNode>,
    item_ty: &Arc<TypeNode>,
    r: &mut FramedReader<'_>,
    inherited: Inherited,
) -> Result<(), Error> {
    let frames = match &ty.item_length {
        None => ItemFrames::None,
        Some(CompiledBinding::Const(l)) => ItemFrames::Uniform(*l),
        Some(CompiledBinding::Bound(b)) => {
            if b.direction == BindingDirection::WriteOnly {
                ItemFrames::None
            } else {
                match binding::bound_value(st.env, graph, id, b, &mut st.forcing)? {
                    SourceValue::Value(Value::List(lens)) => ItemFrames::Jagged(
                        lens.iter()
                            .map(|v| {
                                v.as_u64().ok_or_else(|| {
                                    Error::value_mismatch("a numeric item length", v)
                                })
                            })
                            .collect::<Result<Vec<_>, _>>()?,
                    ),
                    SourceValue::Value(v) => ItemFrames::Uniform(v.as_u64().ok_or_else(|| {
                        Error::value_mismatch("a numeric item length", &v)
                    })?),
                    SourceValue::Gated => ItemFrames::None,
                    SourceValue::Pending => {
                        return Err(Error::NonDeferrableForwardReference(graph.path_of(id)))
                    }
                }
            }
        }
    };

    let count = match &ty.count {
        None => None,
        Some(CompiledBinding::Bound(b)) if b.direction == BindingDirection::WriteOnly => None,
        Some(binding) => {
            match binding::resolve_len(st.env, graph, id, binding, &mut st.forcing)? {
                LenOutcome::Len(n) => Some(n),
                LenOutcome::Gated => None,
                LenOutcome::Pending => {
                    return Err(Error::NonDeferrableForwardReference(graph.path_of(id)))
                }
            }
        }
    };

    if let Some(n) = count {
        for idx in 0..n as usize {
            let frame = frame_at(&frames, idx)?;
            let child = graph.add(item_ty.clone(), Some(id));
            deserialize_node(st, graph, child, r, inherited, frame)?;
        }
        return Ok(());
    }

    if let Some(item_until) = ty.item_until.clone() {
        let mut idx = 0;
        loop {
            if r.remaining() == Some(0) || jagged_exhausted(&frames, idx) {
                break;
            }
            let frame = frame_at(&frames, idx)?;
            let mark = r.mark();
            let rollback_len = graph.nodes.len();
            let child = graph.add(item_ty.clone(), Some(id));
            deserialize_node(st, graph, child, r, inherited, frame)?;

            let observed = match binding::resolve_within(graph, child, &item_until.path)? {
                Resolved::Node(member) => {
                    binding::force_slot(st.env, graph, member, &mut st.forcing)?;
                    match &graph.node(member).slot {
                        Slot::Set(v) => Some(v.clone()),
                        _ => None,
                    }
                }
                Resolved::Pending => None,
            };
            if observed.map(|v| v.matches(&item_until.value)).unwrap_or(false) {
                match item_until.mode {
                    LastItemMode::Include => {}
                    LastItemMode::Exclude => rollback(st, graph, id, rollback_len),
                    LastItemMode::Defer => {
                        rollback(st, graph, id, rollback_len);
                        r.rewind_to(mark, "item-terminated collection")?;
                    }
                }
                break;
            }
            if r.position() == mark {
                break;
            }
            idx += 1;
        }
        return Ok(());
    }

    if let Some(sentinel) = ty.until.clone() {
        let kind = item_ty
            .wire_prim()
            .ok_or_else(|| Error::value_mismatch("a primitive item type", &sentinel))?;
        let mut idx = 0;
        loop {
            if r.remaining() == Some(0) || jagged_exhausted(&frames, idx) {
                break;
            }
            // Peek one item-width value; a sentinel match consumes it.
            let mark = r.mark();
            let mut raw = vec![0_u8; kind.width() as usize];
            r.read_exact(&mut raw)?;
            let peeked = scalar::prim_from_bytes(kind, inherited.endianness, &raw)?;
            if peeked.matches(&sentinel) {
                break;
            }
            r.rewind_to(mark, "value-terminated collection")?;

            let frame = frame_at(&frames, idx)?;
            let child = graph.add(item_ty.clone(), Some(id));
            deserialize_node(st, graph, child, r, inherited, frame)?;
            idx += 1;
        }
        return Ok(());
    }

    // Greedy: to the end of the innermost bound, or to end-of-stream. A
    // jagged length sequence bounds the collection as well.
    let mut idx = 0;
    loop {
        if jagged_exhausted(&frames, idx) {
            break;
        }
        match r.remaining() {
            Some(0) => break,
            Some(_) => {
                let frame = frame_at(&frames, idx)?;
                let before = r.position();
                let child = graph.add(item_ty.clone(), Some(id));
                deserialize_node(st, graph, child, r, inherited, frame)?;
                // An item that consumed nothing would never drain the
                // bound.
                if r.position() == before {
                    break;
                }
            }
            None => {
                let frame = frame_at(&frames, idx)?;
                let mark = r.position();
                let rollback_len = graph.nodes.len();
                let child = graph.add(item_ty.clone(), Some(id));
                match deserialize_node(st, graph, child, r, inherited, frame) {
                    Ok(()) => {}
                    Err(e) if e.is_incomplete() && r.position() == mark => {
                        rollback(st, graph, id, rollback_len);
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        idx += 1;
    }
    Ok(())
}

/// Drop nodes added after `len`, detaching them from `parent` and from
/// the deferral list. Used to discard sentinel items and failed
/// end-of-stream probes.
fn rollback(st: &mut DeState<'_>, graph: &mut ValueGraph, parent: NodeId, len: usize) {
    graph.nodes.truncate(len);
    graph.node_mut(parent).children.retain(|c| *c < len);
    st.deferred.retain(|c| *c < len);
}
