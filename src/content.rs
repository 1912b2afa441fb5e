use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Index of a node inside its [`ContentTree`] arena.
pub type NodeId = usize;

/// A block of parsed document content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Block {
    Text(String),
    Link {
        reference: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    Image {
        reference: String,
    },
    Macro {
        name: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        params: BTreeMap<String, String>,
        /// Raw nested content; parsed separately when the macro accepts markup.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Node {
    block: Block,
    children: Vec<NodeId>,
}

/// Parsed document content as an arena of nodes.
///
/// The tree is exclusively owned by the rewriter for the duration of one
/// document's processing. "Replace this block" is an index substitution, so
/// visitors never hold aliasing references into the tree while mutating it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTree {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
}

impl ContentTree {
    pub fn new() -> Self {
        ContentTree::default()
    }

    pub fn push_root(&mut self, block: Block) -> NodeId {
        let id = self.alloc(block);
        self.roots.push(id);
        id
    }

    pub fn push_child(&mut self, parent: NodeId, block: Block) -> NodeId {
        let id = self.alloc(block);
        self.nodes[parent].children.push(id);
        id
    }

    fn alloc(&mut self, block: Block) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            block,
            children: Vec::new(),
        });
        id
    }

    pub fn block(&self, id: NodeId) -> &Block {
        &self.nodes[id].block
    }

    /// Replaces the block at `id`, keeping its children.
    pub fn replace(&mut self, id: NodeId, block: Block) {
        self.nodes[id].block = block;
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids in document order (depth-first, parents before children).
    pub fn walk(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            for child in self.nodes[id].children.iter().rev() {
                stack.push(*child);
            }
        }
        order
    }
}
