use std::fmt;

use crate::collector::Collector;
use crate::splitter::Splitter;

/// Index into a `Vec<Node>` arena, identifying a specific node in a tree.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct NodeIndex(usize);

impl NodeIndex {
    /// The root of every tree.
    pub const ROOT: NodeIndex = NodeIndex(0);

    /// Create a new node index from a zero-based arena position.
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node in a tree arena.
///
/// Children are owned through [`NodeIndex`] references held by their parent;
/// the `parent` field is a back-reference used only for navigation during
/// fallback search.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Node {
    /// Interior decision node.
    Inner {
        /// Rule routing records to children.
        splitter: Splitter,
        /// One entry per splitter child.
        children: Vec<NodeIndex>,
        /// Parent node, `None` for the root.
        parent: Option<NodeIndex>,
    },
    /// Terminal node holding one collector per learning task.
    Leaf {
        /// Statistics, one per collector slot of the tree.
        collectors: Vec<Collector>,
        /// Parent node, `None` for the root.
        parent: Option<NodeIndex>,
    },
}

impl Node {
    /// Return `true` if this node is a leaf.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    #[must_use]
    pub fn parent(&self) -> Option<NodeIndex> {
        match self {
            Node::Inner { parent, .. } | Node::Leaf { parent, .. } => *parent,
        }
    }

    /// Children of an inner node; empty for leaves.
    #[must_use]
    pub fn children(&self) -> &[NodeIndex] {
        match self {
            Node::Inner { children, .. } => children,
            Node::Leaf { .. } => &[],
        }
    }

    #[must_use]
    pub fn splitter(&self) -> Option<&Splitter> {
        match self {
            Node::Inner { splitter, .. } => Some(splitter),
            Node::Leaf { .. } => None,
        }
    }

    #[must_use]
    pub fn collectors(&self) -> Option<&[Collector]> {
        match self {
            Node::Leaf { collectors, .. } => Some(collectors),
            Node::Inner { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_data::AttributeId;

    #[test]
    fn node_index_roundtrip() {
        let idx = NodeIndex::new(42);
        assert_eq!(idx.index(), 42);
        assert_eq!(format!("{idx}"), "42");
        assert_eq!(NodeIndex::ROOT.index(), 0);
    }

    #[test]
    fn accessors_by_kind() {
        let leaf = Node::Leaf {
            collectors: Vec::new(),
            parent: Some(NodeIndex::ROOT),
        };
        assert!(leaf.is_leaf());
        assert_eq!(leaf.parent(), Some(NodeIndex::ROOT));
        assert!(leaf.children().is_empty());
        assert!(leaf.splitter().is_none());

        let inner = Node::Inner {
            splitter: Splitter::Sparse {
                attribute: AttributeId::new(0),
            },
            children: vec![NodeIndex::new(1), NodeIndex::new(2)],
            parent: None,
        };
        assert!(!inner.is_leaf());
        assert_eq!(inner.children().len(), 2);
        assert!(inner.collectors().is_none());
        assert_eq!(inner.parent(), None);
    }
}
