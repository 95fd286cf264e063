//! Type graph construction and caching.
//!
//! Descriptors compile into immutable [`RecordShape`]s, memoized per type
//! name for the lifetime of the engine. Construction takes the writer
//! lock only to publish; readers share `Arc`s and never block each other
//! after publication.

use crate::{
    error::Error,
    graph::{
        node::{
            BoundBinding, CompiledBinding, CompiledConstructor, ComputedSpec, Condition,
            EndianSource, EnumLiteralShape, EnumShape, ItemUntil, NodeKind, PrimKind, RecordShape,
            SubtypeEntry, SubtypeTable, TypeNode, ValueShape,
        },
        path::BindingPath,
    },
    schema::{
        AttributeSpec, BindingDirection, BindingRef, BindingSpec, DeclaredType, Literal,
        MemberDescriptor, Schema,
    },
    value::Value,
};
use fxhash::FxHashMap;
use internment::Intern;
use itertools::Itertools;
use std::sync::{Arc, RwLock};
use tracing::debug;

pub(crate) mod node;
pub(crate) mod path;

#[derive(Debug, Default)]
pub(crate) struct GraphCache {
    shapes: RwLock<FxHashMap<Intern<String>, Arc<RecordShape>>>,
    enums: RwLock<FxHashMap<Intern<String>, Arc<EnumShape>>>,
}

impl GraphCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shape of a record type, building and publishing it on first use.
    pub fn record_shape(&self, schema: &Schema, name: &str) -> Result<Arc<RecordShape>, Error> {
        let mut in_progress = Vec::new();
        self.shape(schema, Intern::from_ref(name), &mut in_progress)
    }

    /// A synthetic root member node for a serialize/deserialize entry
    /// point.
    pub fn root_node(&self, schema: &Schema, type_name: &str) -> Result<Arc<TypeNode>, Error> {
        let shape = self.record_shape(schema, type_name)?;
        Ok(Arc::new(TypeNode::bare(
            shape.type_name,
            NodeKind::Object { shape },
        )))
    }

    fn shape(
        &self,
        schema: &Schema,
        name: Intern<String>,
        in_progress: &mut Vec<Intern<String>>,
    ) -> Result<Arc<RecordShape>, Error> {
        if let Some(shape) = self.shapes.read().unwrap().get(&name) {
            return Ok(shape.clone());
        }
        if in_progress.contains(&name) {
            return Err(Error::CyclicType(name.as_str().to_owned()));
        }

        in_progress.push(name);
        let built = self.build_shape(schema, name, in_progress);
        in_progress.pop();
        let shape = built?;

        // Double-checked publication: a racing builder may have published
        // first, in which case its shape wins so every reader observes
        // the same identity.
        let mut shapes = self.shapes.write().unwrap();
        Ok(shapes.entry(name).or_insert(shape).clone())
    }

    fn build_shape(
        &self,
        schema: &Schema,
        name: Intern<String>,
        in_progress: &mut Vec<Intern<String>>,
    ) -> Result<Arc<RecordShape>, Error> {
        // Walk the base chain, most-derived first.
        let mut chain = Vec::new();
        let mut cursor = Some(name);
        while let Some(n) = cursor {
            if chain.iter().any(|(c, _)| *c == n) {
                return Err(Error::CyclicType(n.as_str().to_owned()));
            }
            let desc = schema
                .records
                .get(n.as_str())
                .ok_or_else(|| Error::UndefinedType(n.as_str().to_owned()))?;
            cursor = desc.base.as_deref().map(Intern::from_ref);
            chain.push((n, desc));
        }

        // Base-class members order before derived members; within a group
        // the explicit field order governs.
        let mut children = Vec::new();
        for (group_name, desc) in chain.iter().rev() {
            let mut group: Vec<(Option<i32>, Arc<TypeNode>)> = Vec::new();
            let mut unordered = 0_usize;
            for member in desc.members.iter() {
                let Some((order, node)) = self.build_member(schema, member, in_progress)? else {
                    continue;
                };
                if order.is_none() {
                    unordered += 1;
                }
                if let Some(o) = order {
                    if let Some((_, first)) = group.iter().find(|(existing, _)| *existing == Some(o))
                    {
                        return Err(Error::DuplicateOrder {
                            record: group_name.as_str().to_owned(),
                            first: first.member_name.as_str().to_owned(),
                            second: node.member_name.as_str().to_owned(),
                            order: o,
                        });
                    }
                }
                group.push((order, node));
            }
            if group.len() > 1 && unordered > 1 {
                return Err(Error::MissingOrder {
                    record: group_name.as_str().to_owned(),
                });
            }
            children.extend(
                group
                    .into_iter()
                    .sorted_by_key(|(order, _)| order.unwrap_or(i32::MAX))
                    .map(|(_, node)| node),
            );
        }

        let constructor = select_constructor(name.as_str(), &chain[0].1.constructors, &children)?;
        let lineage = chain.iter().map(|(n, _)| *n).collect();

        debug!(
            type_name = %name,
            members = children.len(),
            constructor_params = constructor.params.len(),
            "Built record shape"
        );
        Ok(Arc::new(RecordShape {
            type_name: name,
            lineage,
            children,
            constructor,
        }))
    }

    #[allow(clippy::type_complexity)]
    fn build_member(
        &self,
        schema: &Schema,
        member: &MemberDescriptor,
        in_progress: &mut Vec<Intern<String>>,
    ) -> Result<Option<(Option<i32>, Arc<TypeNode>)>, Error> {
        let mut order = member.order;
        let mut node = TypeNode::bare(
            Intern::from_ref(member.name.as_str()),
            NodeKind::Passthrough, // replaced below
        );

        let mut subtype_entries = Vec::new();
        let mut subtype_default = None;
        let mut subtype_factory = None;
        let mut item_subtype_entries = Vec::new();
        let mut item_subtype_default = None;
        let mut item_subtype_factory = None;

        for attr in member.attributes.iter() {
            match attr {
                AttributeSpec::Ignore => return Ok(None),
                AttributeSpec::FieldOrder { value } => order = Some(*value),
                AttributeSpec::FieldLength { length } => {
                    node.length = Some(compile_binding(length)?);
                }
                AttributeSpec::FieldCount { count } => {
                    node.count = Some(compile_binding(count)?);
                }
                AttributeSpec::FieldAlignment { multiple, mode } => {
                    node.alignment = Some((*multiple, *mode));
                }
                AttributeSpec::FieldScale {
                    numerator,
                    denominator,
                } => {
                    node.scale = Some((*numerator, *denominator));
                }
                AttributeSpec::FieldEndianness { value, binding } => {
                    node.endianness = Some(match (value, binding) {
                        (Some(bo), None) => EndianSource::Fixed((*bo).into()),
                        (None, Some(b)) => EndianSource::Bound(compile_bound(b)?),
                        _ => {
                            return Err(Error::BindingPathInvalid(format!(
                                "field-endianness on '{}'",
                                member.name
                            )))
                        }
                    });
                }
                AttributeSpec::FieldEncoding { encoding } => node.encoding = Some(*encoding),
                AttributeSpec::FieldOffset { offset } => {
                    node.offset = Some(compile_binding(offset)?);
                }
                AttributeSpec::FieldValue { path, function } => {
                    node.computed.push(ComputedSpec {
                        target: BindingPath::parse(path)?,
                        function: *function,
                    });
                }
                AttributeSpec::Subtype {
                    path,
                    key,
                    type_name,
                    direction,
                } => subtype_entries.push((path.clone(), key.clone(), type_name.clone(), *direction)),
                AttributeSpec::SubtypeDefault { type_name } => {
                    subtype_default = Some(type_name.clone());
                }
                AttributeSpec::SubtypeFactory { path, factory } => {
                    subtype_factory = Some((path.clone(), factory.clone()));
                }
                AttributeSpec::SerializeAs { repr, byte_order } => {
                    let prim = PrimKind::from_declared(repr).ok_or_else(|| {
                        Error::value_mismatch("a primitive wire representation", repr)
                    })?;
                    node.serialize_as = Some((prim, byte_order.map(Into::into)));
                }
                AttributeSpec::SerializeWhen { path, value } => node.conditions.push(Condition {
                    path: BindingPath::parse(path)?,
                    value: Value::from(value),
                    negate: false,
                }),
                AttributeSpec::SerializeWhenNot { path, value } => node.conditions.push(Condition {
                    path: BindingPath::parse(path)?,
                    value: Value::from(value),
                    negate: true,
                }),
                AttributeSpec::SerializeUntil { value } => node.until = Some(Value::from(value)),
                AttributeSpec::ItemLength { length } => {
                    node.item_length = Some(compile_binding(length)?);
                }
                AttributeSpec::ItemSubtype {
                    path,
                    key,
                    type_name,
                    direction,
                } => item_subtype_entries
                    .push((path.clone(), key.clone(), type_name.clone(), *direction)),
                AttributeSpec::ItemSubtypeDefault { type_name } => {
                    item_subtype_default = Some(type_name.clone());
                }
                AttributeSpec::ItemSubtypeFactory { path, factory } => {
                    item_subtype_factory = Some((path.clone(), factory.clone()));
                }
                AttributeSpec::ItemSerializeUntil {
                    path,
                    value,
                    last_item,
                } => {
                    node.item_until = Some(ItemUntil {
                        path: BindingPath::parse(path)?,
                        value: Value::from(value),
                        mode: *last_item,
                    });
                }
            }
        }

        node.subtypes = self.build_subtype_table(
            schema,
            &member.name,
            subtype_entries,
            subtype_default,
            subtype_factory,
            in_progress,
        )?;

        node.kind = match &member.field_type {
            DeclaredType::List { element } => {
                let item_table = self.build_subtype_table(
                    schema,
                    &member.name,
                    item_subtype_entries,
                    item_subtype_default,
                    item_subtype_factory,
                    in_progress,
                )?;
                let plain_items = item_table.is_none()
                    && node.item_length.is_none()
                    && node.item_until.is_none()
                    && node.until.is_none();
                match PrimKind::from_declared(element) {
                    Some(elem) if plain_items => NodeKind::PrimitiveArray { elem },
                    _ => {
                        let mut item = TypeNode::bare(
                            node.member_name,
                            self.classify(schema, element, in_progress)?,
                        );
                        item.subtypes = item_table;
                        NodeKind::Collection {
                            item: Arc::new(item),
                        }
                    }
                }
            }
            other => self.classify(schema, other, in_progress)?,
        };

        Ok(Some((order, Arc::new(node))))
    }

    /// Wire kind of a declared type carrying no member-level attributes.
    fn classify(
        &self,
        schema: &Schema,
        ty: &DeclaredType,
        in_progress: &mut Vec<Intern<String>>,
    ) -> Result<NodeKind, Error> {
        Ok(match ty {
            DeclaredType::Str => NodeKind::Value(ValueShape::Str),
            DeclaredType::Bytes => NodeKind::Value(ValueShape::Bytes),
            DeclaredType::Enum { name } => {
                NodeKind::Value(ValueShape::Enum(self.enum_shape(schema, name)?))
            }
            DeclaredType::Record { name } => NodeKind::Object {
                shape: self.shape(schema, Intern::from_ref(name.as_str()), in_progress)?,
            },
            DeclaredType::List { element } => match PrimKind::from_declared(element) {
                Some(elem) => NodeKind::PrimitiveArray { elem },
                None => NodeKind::Collection {
                    item: Arc::new(TypeNode::bare(
                        Intern::from_ref("item"),
                        self.classify(schema, element, in_progress)?,
                    )),
                },
            },
            DeclaredType::Stream => NodeKind::Passthrough,
            DeclaredType::Custom { codec } => NodeKind::Custom {
                codec: Intern::from_ref(codec.as_str()),
            },
            prim => NodeKind::Value(ValueShape::Prim(
                PrimKind::from_declared(prim)
                    .ok_or_else(|| Error::value_mismatch("a primitive type", prim))?,
            )),
        })
    }

    #[allow(clippy::type_complexity)]
    fn build_subtype_table(
        &self,
        schema: &Schema,
        member_name: &str,
        entries: Vec<(String, Literal, String, BindingDirection)>,
        default: Option<String>,
        factory: Option<(String, String)>,
        in_progress: &mut Vec<Intern<String>>,
    ) -> Result<Option<SubtypeTable>, Error> {
        if entries.is_empty() && default.is_none() && factory.is_none() {
            return Ok(None);
        }

        let key_path = entries
            .first()
            .map(|(p, _, _, _)| p.as_str())
            .or(factory.as_ref().map(|(p, _)| p.as_str()))
            .ok_or_else(|| {
                Error::BindingPathInvalid(format!("subtype key binding on '{member_name}'"))
            })?;
        let key_path = BindingPath::parse(key_path)?;

        let mut compiled = Vec::new();
        for (_, key, type_name, direction) in entries.iter() {
            let key = Value::from(key);
            // At most one readable mapping may claim a key.
            if direction.readable()
                && compiled
                    .iter()
                    .any(|e: &SubtypeEntry| e.direction.readable() && e.key.matches(&key))
            {
                return Err(Error::SubtypeKeyAmbiguous {
                    member: member_name.to_owned(),
                    key: format!("{key:?}"),
                });
            }
            compiled.push(SubtypeEntry {
                key,
                type_name: Intern::from_ref(type_name.as_str()),
                shape: self.shape(schema, Intern::from_ref(type_name.as_str()), in_progress)?,
                direction: *direction,
            });
        }

        let default = default
            .map(|type_name| {
                let name = Intern::from_ref(type_name.as_str());
                self.shape(schema, name, in_progress).map(|s| (name, s))
            })
            .transpose()?;

        Ok(Some(SubtypeTable {
            key_path,
            entries: compiled,
            factory: factory.map(|(_, f)| Intern::from_ref(f.as_str())),
            default,
        }))
    }

    fn enum_shape(&self, schema: &Schema, name: &str) -> Result<Arc<EnumShape>, Error> {
        let name = Intern::from_ref(name);
        if let Some(shape) = self.enums.read().unwrap().get(&name) {
            return Ok(shape.clone());
        }

        let desc = schema
            .enums
            .get(name.as_str())
            .ok_or_else(|| Error::UndefinedType(name.as_str().to_owned()))?;
        let repr = PrimKind::from_declared(&desc.repr)
            .filter(|p| !p.is_float())
            .ok_or_else(|| Error::value_mismatch("an integer representation", &desc.repr))?;
        let text_mapped = desc.literals.iter().any(|l| l.text.is_some());
        let literals = desc
            .literals
            .iter()
            .enumerate()
            .map(|(idx, l)| EnumLiteralShape {
                name: Intern::from_ref(l.name.as_str()),
                value: l.value.unwrap_or(idx as i64),
                text: Intern::from_ref(l.text.as_deref().unwrap_or(l.name.as_str())),
            })
            .collect();
        let shape = Arc::new(EnumShape {
            name,
            repr,
            text_mapped,
            literals,
        });

        let mut enums = self.enums.write().unwrap();
        Ok(enums.entry(name).or_insert(shape).clone())
    }
}

fn compile_binding(spec: &BindingSpec) -> Result<CompiledBinding, Error> {
    Ok(match spec {
        BindingSpec::Constant(v) => CompiledBinding::Const(*v),
        BindingSpec::Bound(b) => CompiledBinding::Bound(compile_bound(b)?),
    })
}

fn compile_bound(b: &BindingRef) -> Result<BoundBinding, Error> {
    Ok(BoundBinding {
        path: BindingPath::parse(&b.path)?,
        converter: b.converter.as_deref().map(Intern::from_ref),
        parameter: b.converter_parameter.as_ref().map(Value::from),
        direction: b.direction,
    })
}

/// Greedy best-fit constructor selection: most matching member names,
/// ties broken by fewest non-matching parameters.
fn select_constructor(
    record: &str,
    constructors: &[Vec<String>],
    children: &[Arc<TypeNode>],
) -> Result<CompiledConstructor, Error> {
    if constructors.is_empty() {
        return Ok(CompiledConstructor::default());
    }

    let best = constructors
        .iter()
        .map(|params| {
            let matches = params
                .iter()
                .filter(|p| children.iter().any(|c| c.member_name.as_str() == *p))
                .count();
            (matches, params.len() - matches, params)
        })
        .sorted_by_key(|(matches, extra, _)| (std::cmp::Reverse(*matches), *extra))
        .next()
        .unwrap(); // SAFETY: always non-empty

    if best.0 == 0 && !best.2.is_empty() {
        if constructors.iter().any(|p| p.is_empty()) {
            return Ok(CompiledConstructor::default());
        }
        return Err(Error::UnresolvedConstructor {
            record: record.to_owned(),
        });
    }

    Ok(CompiledConstructor {
        params: best.2.iter().map(|p| Intern::from_ref(p.as_str())).collect(),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema::{AttributeSpec, TypeDescriptor};
    use std::collections::BTreeMap;

    fn schema_of(records: Vec<(&str, TypeDescriptor)>) -> Schema {
        Schema::new(
            records
                .into_iter()
                .map(|(n, d)| (n.to_owned(), d))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn cached_shapes_share_identity() {
        let schema = schema_of(vec![(
            "point",
            TypeDescriptor::new(vec![
                MemberDescriptor::new("x", DeclaredType::U8).order(0),
                MemberDescriptor::new("y", DeclaredType::U8).order(1),
            ]),
        )]);
        let cache = GraphCache::new();
        let a = cache.record_shape(&schema, "point").unwrap();
        let b = cache.record_shape(&schema, "point").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn duplicate_order_is_rejected() {
        let schema = schema_of(vec![(
            "point",
            TypeDescriptor::new(vec![
                MemberDescriptor::new("x", DeclaredType::U8).order(0),
                MemberDescriptor::new("y", DeclaredType::U8).order(0),
            ]),
        )]);
        let err = GraphCache::new().record_shape(&schema, "point").unwrap_err();
        assert!(matches!(err, Error::DuplicateOrder { order: 0, .. }));
    }

    #[test]
    fn more_than_one_unordered_member_is_rejected() {
        let schema = schema_of(vec![(
            "point",
            TypeDescriptor::new(vec![
                MemberDescriptor::new("x", DeclaredType::U8),
                MemberDescriptor::new("y", DeclaredType::U8),
            ]),
        )]);
        let err = GraphCache::new().record_shape(&schema, "point").unwrap_err();
        assert!(matches!(err, Error::MissingOrder { .. }));
    }

    #[test]
    fn single_member_needs_no_order() {
        let schema = schema_of(vec![(
            "wrapper",
            TypeDescriptor::new(vec![MemberDescriptor::new("inner", DeclaredType::U32)]),
        )]);
        assert!(GraphCache::new().record_shape(&schema, "wrapper").is_ok());
    }

    #[test]
    fn base_members_come_first() {
        let schema = schema_of(vec![
            (
                "base",
                TypeDescriptor::new(vec![MemberDescriptor::new("tag", DeclaredType::U8)]),
            ),
            (
                "derived",
                TypeDescriptor::new(vec![MemberDescriptor::new("payload", DeclaredType::U16)])
                    .with_base("base"),
            ),
        ]);
        let shape = GraphCache::new().record_shape(&schema, "derived").unwrap();
        let names = shape
            .children
            .iter()
            .map(|c| c.member_name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["tag", "payload"]);
        assert!(shape.derives_from("base"));
    }

    #[test]
    fn composition_cycles_are_reported() {
        let schema = schema_of(vec![(
            "knot",
            TypeDescriptor::new(vec![MemberDescriptor::new(
                "inner",
                DeclaredType::record("knot"),
            )]),
        )]);
        let err = GraphCache::new().record_shape(&schema, "knot").unwrap_err();
        assert!(matches!(err, Error::CyclicType(_)));
    }

    #[test]
    fn ambiguous_subtype_keys_are_rejected() {
        let schema = schema_of(vec![
            ("a", TypeDescriptor::new(vec![])),
            ("b", TypeDescriptor::new(vec![])),
            (
                "holder",
                TypeDescriptor::new(vec![
                    MemberDescriptor::new("tag", DeclaredType::U8).order(0),
                    MemberDescriptor::new("body", DeclaredType::record("a"))
                        .order(1)
                        .attribute(AttributeSpec::Subtype {
                            path: "tag".to_owned(),
                            key: Literal::UInt(1),
                            type_name: "a".to_owned(),
                            direction: BindingDirection::Both,
                        })
                        .attribute(AttributeSpec::Subtype {
                            path: "tag".to_owned(),
                            key: Literal::UInt(1),
                            type_name: "b".to_owned(),
                            direction: BindingDirection::ReadOnly,
                        }),
                ]),
            ),
        ]);
        let err = GraphCache::new().record_shape(&schema, "holder").unwrap_err();
        assert!(matches!(err, Error::SubtypeKeyAmbiguous { .. }));
    }

    #[test]
    fn write_only_duplicate_keys_are_allowed() {
        let schema = schema_of(vec![
            ("a", TypeDescriptor::new(vec![])),
            ("b", TypeDescriptor::new(vec![])),
            (
                "holder",
                TypeDescriptor::new(vec![
                    MemberDescriptor::new("tag", DeclaredType::U8).order(0),
                    MemberDescriptor::new("body", DeclaredType::record("a"))
                        .order(1)
                        .attribute(AttributeSpec::Subtype {
                            path: "tag".to_owned(),
                            key: Literal::UInt(1),
                            type_name: "a".to_owned(),
                            direction: BindingDirection::Both,
                        })
                        .attribute(AttributeSpec::Subtype {
                            path: "tag".to_owned(),
                            key: Literal::UInt(1),
                            type_name: "b".to_owned(),
                            direction: BindingDirection::WriteOnly,
                        }),
                ]),
            ),
        ]);
        assert!(GraphCache::new().record_shape(&schema, "holder").is_ok());
    }

    #[test]
    fn constructor_best_fit() {
        let mut desc = TypeDescriptor::new(vec![
            MemberDescriptor::new("x", DeclaredType::U8).order(0),
            MemberDescriptor::new("y", DeclaredType::U8).order(1),
        ]);
        desc.constructors = vec![vec!["x".to_owned()], vec!["x".to_owned(), "y".to_owned()]];
        let schema = schema_of(vec![("point", desc)]);
        let shape = GraphCache::new().record_shape(&schema, "point").unwrap();
        assert_eq!(shape.constructor.params.len(), 2);
    }

    #[test]
    fn unresolved_constructor_is_reported() {
        let mut desc = TypeDescriptor::new(vec![MemberDescriptor::new("x", DeclaredType::U8)]);
        desc.constructors = vec![vec!["unrelated".to_owned()]];
        let schema = schema_of(vec![("point", desc)]);
        let err = GraphCache::new().record_shape(&schema, "point").unwrap_err();
        assert!(matches!(err, Error::UnresolvedConstructor { .. }));
    }
}
