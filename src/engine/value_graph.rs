//! Per-operation value graph: a mutable mirror of the type graph bound to
//! concrete instance data. Nodes live in an arena and carry the slot,
//! offsets, and binding bookkeeping for one serialize/deserialize call.

use crate::{
    graph::node::{NodeKind, RecordShape, TypeNode},
    value::{Record, Value},
};
use internment::Intern;
use std::sync::Arc;

pub(crate) type NodeId = usize;

/// The live data of one node.
#[derive(Clone, Debug, Default)]
pub(crate) enum Slot {
    #[default]
    Unset,
    Set(Value),
    /// Raw octets of a fixed-width field whose interpretation awaits a
    /// forward-referenced attribute.
    Deferred { raw: Vec<u8> },
}

/// A reverse binding: this node's wire value derives from the observed
/// state of `target` rather than from its own slot.
#[derive(Clone, Debug)]
pub(crate) enum Feed {
    /// Measured serialized length of the target.
    Length {
        target: NodeId,
        converter: Option<Intern<String>>,
        parameter: Option<Value>,
    },
    /// Item count of the target collection.
    Count {
        target: NodeId,
        converter: Option<Intern<String>>,
        parameter: Option<Value>,
    },
    /// Subtype key of the target's runtime type.
    SubtypeKey { target: NodeId },
    /// Observed offset of the target.
    Offset { target: NodeId },
}

#[derive(Clone, Debug)]
pub(crate) struct ValueNode {
    pub ty: Arc<TypeNode>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub slot: Slot,
    /// Stream offset where the node started.
    pub offset: Option<u64>,
    pub observed_len: Option<u64>,
    pub feeds: Vec<Feed>,
    pub skipped: bool,
    /// Shape actually chosen for a polymorphic object; `None` keeps the
    /// declared shape.
    pub chosen_shape: Option<Arc<RecordShape>>,
}

impl ValueNode {
    pub fn shape(&self) -> Option<&Arc<RecordShape>> {
        if let Some(shape) = self.chosen_shape.as_ref() {
            return Some(shape);
        }
        match &self.ty.kind {
            NodeKind::Object { shape } => Some(shape),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct ValueGraph {
    pub nodes: Vec<ValueNode>,
}

impl ValueGraph {
    pub fn add(&mut self, ty: Arc<TypeNode>, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(ValueNode {
            ty,
            parent,
            children: Vec::new(),
            slot: Slot::Unset,
            offset: None,
            observed_len: None,
            feeds: Vec::new(),
            skipped: false,
            chosen_shape: None,
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(id);
        }
        id
    }

    pub fn node(&self, id: NodeId) -> &ValueNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut ValueNode {
        &mut self.nodes[id]
    }

    pub fn child_named(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[id]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].ty.member_name.as_str() == name)
    }

    /// Dotted member path from the root, for breadcrumbs and logs.
    pub fn path_of(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            segments.push(self.nodes[c].ty.member_name.as_str());
            cur = self.nodes[c].parent;
        }
        segments.reverse();
        segments.join(".")
    }

    /// Partial record materialized from the current slots; fields not yet
    /// resolved appear as [`Value::Null`].
    pub fn materialize_record(&self, id: NodeId) -> Option<Value> {
        let node = self.node(id);
        let shape = node.shape()?;
        let mut rec = Record::new(shape.type_name.as_str());
        for &child in node.children.iter() {
            let child_node = self.node(child);
            let value = match &child_node.slot {
                Slot::Set(v) => v.clone(),
                _ => Value::Null,
            };
            rec.fields.push((child_node.ty.member_name, value));
        }
        Some(Value::Record(rec))
    }

    /// Ancestor records, nearest first, for converter contexts.
    pub fn ancestor_values(&self, from: NodeId) -> Vec<Value> {
        let mut out = Vec::new();
        let mut cur = self.nodes[from].parent;
        while let Some(c) = cur {
            if let Some(v) = self.materialize_record(c) {
                out.push(v);
            }
            cur = self.nodes[c].parent;
        }
        out
    }
}
