//! Lazily explored view of a decoded object graph.
//!
//! Nodes live in an arena (`Forest`) and refer to each other by `NodeId`.
//! Children are created once, on the first successful `explore`, and are
//! never dropped afterwards: closing a node only hides them.

use crate::error::ParseError;
use crate::value::{Buffer, Composite, Span, Value};
use std::collections::BTreeSet;
use std::rc::Rc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Number,
    Text,
    Bool,
    Symbol,
    Bytes,
    Array,
    Composite,
    Deferred,
}

/// How a child came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Root,
    Seq,
    Instance,
    Element,
}

/// What happens to a computed field whose first computation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExplorePolicy {
    /// Leave it unexplored; the next open computes it again.
    #[default]
    Retry,
    /// Mark it unexplorable; later opens are no-ops.
    GiveUp,
}

#[derive(Debug)]
pub struct Node {
    value: Option<Value>,
    level: usize,
    label: String,
    origin: Origin,
    span: Option<Span>,
    explored: bool,
    failed: bool,
    open: bool,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    fn new(value: Option<Value>, level: usize, label: String, origin: Origin, span: Option<Span>) -> Self {
        Self {
            value,
            level,
            label,
            origin,
            span,
            explored: false,
            failed: false,
            open: false,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn span(&self) -> Option<Span> {
        self.span
    }

    pub fn is_explored(&self) -> bool {
        self.explored
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// True when a failed computation marked this node unexplorable.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn kind(&self) -> Kind {
        match &self.value {
            None => Kind::Deferred,
            Some(Value::Int(_) | Value::UInt(_) | Value::Float(_)) => Kind::Number,
            Some(Value::Str(_)) => Kind::Text,
            Some(Value::Bool(_)) => Kind::Bool,
            Some(Value::Enum(_)) => Kind::Symbol,
            Some(Value::Bytes(_)) => Kind::Bytes,
            Some(Value::Array(_)) => Kind::Array,
            Some(Value::Struct(_)) => Kind::Composite,
        }
    }

    /// Arrays, composites and not yet computed fields can be opened in the tree.
    pub fn is_expandable(&self) -> bool {
        !self.failed && matches!(self.kind(), Kind::Array | Kind::Composite | Kind::Deferred)
    }

    /// Byte buffers open in a standalone hex viewer instead.
    pub fn is_hex(&self) -> bool {
        self.kind() == Kind::Bytes
    }

    /// Renders the node's tree line, at most `width` columns wide.
    pub fn line(&self, width: usize) -> String {
        let marker = if self.value.is_none() {
            "[?]"
        } else if self.open {
            "[-]"
        } else if self.is_expandable() {
            "[+]"
        } else {
            "[.]"
        };

        let mut s = format!("{}{} {}", "  ".repeat(self.level), marker, self.label);
        let used = s.chars().count();

        match &self.value {
            Some(Value::Int(v)) => s.push_str(&format!(" = {v}")),
            Some(Value::UInt(v)) => s.push_str(&format!(" = {v}")),
            Some(Value::Float(v)) => s.push_str(&format!(" = {v}")),
            Some(Value::Bool(v)) => s.push_str(&format!(" = {v}")),
            Some(Value::Enum(v)) => s.push_str(&format!(" = {v}")),
            Some(Value::Str(v)) => s.push_str(&format!(" = {v:?}")),
            Some(Value::Bytes(b)) => {
                let room = width.saturating_sub(used + 3);
                s.push_str(" = ");
                s.push_str(&first_n_bytes_dump(b, room / 3 + 1));
            }
            Some(Value::Array(a)) => s.push_str(&format!(" ({} = 0x{:x} entries)", a.len(), a.len())),
            Some(Value::Struct(_)) | None => {}
        }

        truncate_to(s, width)
    }
}

fn first_n_bytes_dump(b: &[u8], n: usize) -> String {
    b.iter().take(n).map(|x| format!("{x:02x} ")).collect()
}

fn truncate_to(s: String, width: usize) -> String {
    if s.chars().count() <= width {
        return s;
    }
    if width == 0 {
        return String::new();
    }
    let mut out: String = s.chars().take(width - 1).collect();
    out.push('…');
    out
}

/// Arena owning every node of one tree.
#[derive(Debug)]
pub struct Forest {
    nodes: Vec<Node>,
    policy: ExplorePolicy,
}

impl Forest {
    pub fn new(root: Value, policy: ExplorePolicy) -> Self {
        Self {
            nodes: vec![Node::new(Some(root), 0, "[root]".to_string(), Origin::Root, None)],
            policy,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn policy(&self) -> ExplorePolicy {
        self.policy
    }

    /// Child of `id` with the given label, if `id` has been explored.
    pub fn child(&self, id: NodeId, label: &str) -> Option<NodeId> {
        self.node(id)
            .children
            .iter()
            .copied()
            .find(|&c| self.node(c).label == label)
    }

    /// Opens `id` when it is expandable, exploring it first if needed. The
    /// node only becomes open once exploration has succeeded.
    pub fn open(&mut self, id: NodeId) -> Result<(), ParseError> {
        if !self.node(id).is_expandable() {
            return Ok(());
        }
        self.explore(id)?;
        let n = &mut self.nodes[id.0];
        if n.explored {
            n.open = true;
        }
        Ok(())
    }

    pub fn close(&mut self, id: NodeId) {
        self.nodes[id.0].open = false;
    }

    pub fn toggle(&mut self, id: NodeId) -> Result<(), ParseError> {
        if self.node(id).open {
            self.close(id);
            Ok(())
        } else {
            self.open(id)
        }
    }

    /// Computes a deferred value and enumerates children. Idempotent once
    /// it has succeeded; scalars and byte buffers never become explored.
    pub fn explore(&mut self, id: NodeId) -> Result<(), ParseError> {
        if self.node(id).explored || self.node(id).failed {
            return Ok(());
        }

        if self.node(id).value.is_none() {
            self.compute_deferred(id)?;
        }

        let value = match self.node(id).value.clone() {
            Some(v) => v,
            None => return Ok(()),
        };
        let level = self.node(id).level + 1;

        match value {
            Value::Array(items) => {
                let spans = self.element_spans(id);
                let digits = items.len().saturating_sub(1).to_string().len();
                for (i, el) in items.iter().enumerate() {
                    let span = spans.as_ref().and_then(|s| s.get(i).copied());
                    let label = format!("{i:0digits$}");
                    self.add(id, Node::new(Some(el.clone()), level, label, Origin::Element, span));
                }
            }
            Value::Struct(c) => {
                let seq: BTreeSet<&str> = c.seq_fields().iter().map(String::as_str).collect();
                for name in c.seq_fields() {
                    let Some(v) = c.seq_value(name) else { continue };
                    let span = c.position(name).map(|d| d.span);
                    self.add(id, Node::new(Some(v), level, name.clone(), Origin::Seq, span));
                }
                for name in c.instance_fields() {
                    if name.starts_with('_') || seq.contains(name.as_str()) {
                        continue;
                    }
                    self.add(id, Node::new(None, level, name.clone(), Origin::Instance, None));
                }
            }
            _ => return Ok(()),
        }

        debug!(node = id.0, label = %self.node(id).label, children = self.node(id).children.len(), "explored");
        self.nodes[id.0].explored = true;
        Ok(())
    }

    fn compute_deferred(&mut self, id: NodeId) -> Result<(), ParseError> {
        let label = self.node(id).label.clone();
        let owner = self
            .node(id)
            .parent
            .and_then(|p| self.composite(p))
            .ok_or_else(|| ParseError::Decode(format!("no owner to compute `{label}`")))?;

        match owner.instance(&label) {
            Ok(v) => {
                let n = &mut self.nodes[id.0];
                n.value = Some(v);
                n.span = owner.position(&label).map(|d| d.span);
                Ok(())
            }
            Err(e) => {
                warn!(field = %label, error = %e, "computing field failed");
                if self.policy == ExplorePolicy::GiveUp {
                    self.nodes[id.0].failed = true;
                }
                Err(e)
            }
        }
    }

    fn element_spans(&self, array: NodeId) -> Option<Vec<Span>> {
        let parent = self.node(array).parent?;
        let owner = self.composite(parent)?;
        owner.position(&self.node(array).label)?.arr
    }

    fn composite(&self, id: NodeId) -> Option<Rc<dyn Composite>> {
        match &self.node(id).value {
            Some(Value::Struct(c)) => Some(c.clone()),
            _ => None,
        }
    }

    fn add(&mut self, parent: NodeId, mut child: Node) {
        child.parent = Some(parent);
        let cid = NodeId(self.nodes.len());
        self.nodes.push(child);
        self.nodes[parent.0].children.push(cid);
    }

    /// Number of screen lines `id` occupies with its visible descendants.
    pub fn height(&self, id: NodeId) -> usize {
        let n = self.node(id);
        if !n.open {
            return 1;
        }
        1 + n.children.iter().map(|&c| self.height(c)).sum::<usize>()
    }

    /// Deepest visible descendant along last children.
    pub fn last_descendant(&self, id: NodeId) -> NodeId {
        let mut cur = id;
        while self.node(cur).open {
            match self.node(cur).children.last() {
                Some(&c) => cur = c,
                None => break,
            }
        }
        cur
    }

    /// Dotted label path from the root's first level down to `id`.
    pub fn path(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            let n = self.node(c);
            if n.parent.is_some() {
                parts.push(n.label.as_str());
            }
            cur = n.parent;
        }
        if parts.is_empty() {
            return self.node(id).label.clone();
        }
        parts.reverse();
        parts.join(".")
    }

    /// Backing buffer of the nearest composite at or above `id`.
    pub fn io(&self, id: NodeId) -> Option<Buffer> {
        let mut cur = Some(id);
        while let Some(c) = cur {
            if let Some(comp) = self.composite(c) {
                // A nested record in a substream only owns that buffer for its
                // children; the record node itself was read from the parent's.
                if c != id || self.node(c).parent.is_none() {
                    return Some(comp.io());
                }
            }
            cur = self.node(c).parent;
        }
        None
    }
}
