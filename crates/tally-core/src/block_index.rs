//! Block index records and the in-memory block DAG.
//!
//! [`BlockIndexRecord`] is the persisted form of one header's metadata.
//! [`BlockIndexMap`] is an arena of [`BlockIndex`] nodes addressed by
//! [`NodeId`], with a hash table from block hash to node. Parent links are
//! node ids; children are derived on demand by scanning for nodes whose
//! parent matches.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Index;

use serde::{Deserialize, Serialize};

use crate::types::{BlockHeader, Hash256};

/// Validation progress levels stored in the low bits of [`BlockStatus`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum BlockValidity {
    /// Nothing checked yet.
    Unknown = 0,
    /// Header parsed, proof of work and timestamp checked.
    Header = 1,
    /// All parent headers found and contextually valid.
    Tree = 2,
    /// Transactions are structurally valid.
    Transactions = 3,
    /// Outputs do not overspend, coinbase and sigop limits checked.
    Chain = 4,
    /// Scripts and signatures verified.
    Scripts = 5,
}

/// Status bitmask: a validity level plus data/undo availability and failure marks.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct BlockStatus(u32);

impl BlockStatus {
    pub const VALID_MASK: u32 = 0x07;
    pub const HAVE_DATA: u32 = 0x08;
    pub const HAVE_UNDO: u32 = 0x10;
    pub const FAILED_VALID: u32 = 0x20;
    pub const FAILED_CHILD: u32 = 0x40;
    pub const FAILED_MASK: u32 = Self::FAILED_VALID | Self::FAILED_CHILD;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Return a copy with `flags` set.
    pub const fn with(self, flags: u32) -> Self {
        Self(self.0 | flags)
    }

    pub fn has_data(&self) -> bool {
        self.0 & Self::HAVE_DATA != 0
    }

    pub fn has_undo(&self) -> bool {
        self.0 & Self::HAVE_UNDO != 0
    }

    /// Whether this block or one of its ancestors failed validation.
    pub fn is_invalid(&self) -> bool {
        self.0 & Self::FAILED_MASK != 0
    }

    /// Whether validation reached at least `level` and nothing failed.
    pub fn is_valid(&self, level: BlockValidity) -> bool {
        !self.is_invalid() && self.0 & Self::VALID_MASK >= level as u32
    }

    /// Raise the validity level to `level`. Returns whether anything changed.
    ///
    /// Failed blocks are never raised.
    pub fn raise_validity(&mut self, level: BlockValidity) -> bool {
        if self.is_invalid() {
            return false;
        }
        if self.0 & Self::VALID_MASK < level as u32 {
            self.0 = (self.0 & !Self::VALID_MASK) | level as u32;
            return true;
        }
        false
    }
}

/// Persisted metadata for one block header.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BlockIndexRecord {
    /// Block hash. Always equal to `header.hash()` for well-formed records.
    pub hash: Hash256,
    pub height: i32,
    /// Block file holding the block data.
    pub file: i32,
    /// Offset of the block within its block file.
    pub data_pos: u32,
    /// Offset of the undo data within its undo file.
    pub undo_pos: u32,
    pub header: BlockHeader,
    pub status: BlockStatus,
    /// Number of transactions. Zero marks an incomplete record.
    pub tx_count: u32,
}

impl BlockIndexRecord {
    /// Size of the encoded value (see [`crate::codec`]).
    pub const ENCODED_SIZE: usize = 24 + BlockHeader::SIZE;

    /// A record for `header` at `height`, with every other field zeroed.
    pub fn new(header: BlockHeader, height: i32) -> Self {
        Self {
            hash: header.hash(),
            height,
            header,
            ..Self::default()
        }
    }

    pub fn prev_hash(&self) -> &Hash256 {
        &self.header.prev_hash
    }
}

/// Stable handle to a node inside one [`BlockIndexMap`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// In-memory block index node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockIndex {
    pub hash: Hash256,
    /// Node for `header.prev_hash`, or `None` for a root.
    pub parent: Option<NodeId>,
    pub height: i32,
    pub file: i32,
    pub data_pos: u32,
    pub undo_pos: u32,
    pub header: BlockHeader,
    pub status: BlockStatus,
    pub tx_count: u32,
}

impl BlockIndex {
    /// A node that so far only has an identity.
    fn stub(hash: Hash256) -> Self {
        Self {
            hash,
            parent: None,
            height: 0,
            file: 0,
            data_pos: 0,
            undo_pos: 0,
            header: BlockHeader::default(),
            status: BlockStatus::default(),
            tx_count: 0,
        }
    }

    /// Copy every persisted field of `record` into this node.
    pub fn apply_record(&mut self, record: &BlockIndexRecord) {
        self.height = record.height;
        self.file = record.file;
        self.data_pos = record.data_pos;
        self.undo_pos = record.undo_pos;
        self.header = record.header;
        self.status = record.status;
        self.tx_count = record.tx_count;
    }

    /// The persisted form of this node.
    pub fn to_record(&self) -> BlockIndexRecord {
        BlockIndexRecord {
            hash: self.hash,
            height: self.height,
            file: self.file,
            data_pos: self.data_pos,
            undo_pos: self.undo_pos,
            header: self.header,
            status: self.status,
            tx_count: self.tx_count,
        }
    }

    fn state_mut(&mut self) -> NodeStateMut<'_> {
        NodeStateMut {
            status: &mut self.status,
            tx_count: &mut self.tx_count,
            file: &mut self.file,
            data_pos: &mut self.data_pos,
            undo_pos: &mut self.undo_pos,
        }
    }
}

/// Writable view of the fields a node gains as its block is stored and
/// validated.
///
/// Hash, header, parent, and height fix a node's place in the DAG and are
/// not reachable through this view.
#[derive(Debug)]
pub struct NodeStateMut<'a> {
    pub status: &'a mut BlockStatus,
    pub tx_count: &'a mut u32,
    pub file: &'a mut i32,
    pub data_pos: &'a mut u32,
    pub undo_pos: &'a mut u32,
}

/// Status of a chain tip as reported to query clients.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TipStatus {
    /// Part of the active chain.
    Active,
    /// This block or an ancestor is invalid.
    Invalid,
    /// Block data for this block or an ancestor is missing.
    HeadersOnly,
    /// Fully validated but not on the active chain.
    ValidFork,
    /// Headers valid, block not fully validated.
    ValidHeaders,
    Unknown,
}

impl TipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Invalid => "invalid",
            Self::HeadersOnly => "headers-only",
            Self::ValidFork => "valid-fork",
            Self::ValidHeaders => "valid-headers",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of [`BlockIndexMap::chain_tips`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChainTip {
    pub height: i32,
    pub hash: Hash256,
    /// Blocks between the tip and its fork point with the active chain.
    pub branch_len: i32,
    pub status: TipStatus,
}

/// Arena of block index nodes keyed by hash.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockIndexMap {
    nodes: Vec<BlockIndex>,
    by_hash: HashMap<Hash256, NodeId>,
}

impl BlockIndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up the node for `hash`, creating an empty stub if absent.
    ///
    /// The zero hash means "no block" and yields `None` without inserting.
    /// A hash never gets two nodes.
    pub fn insert_block_index(&mut self, hash: Hash256) -> Option<NodeId> {
        if let Some(id) = self.by_hash.get(&hash) {
            return Some(*id);
        }
        if hash.is_zero() {
            return None;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(BlockIndex::stub(hash));
        self.by_hash.insert(hash, id);
        Some(id)
    }

    /// Attach `record` to the DAG and return its node.
    ///
    /// The node for the record's hash and the node for its previous hash are
    /// obtained with [`insert_block_index`](Self::insert_block_index), the
    /// parent link is set, and every persisted field is copied over whatever
    /// a stub left behind. Node identity is preserved, so children linked to
    /// an earlier stub stay linked.
    pub fn upsert_record(&mut self, record: &BlockIndexRecord) -> Option<NodeId> {
        let id = self.insert_block_index(record.hash)?;
        let parent = self.insert_block_index(*record.prev_hash());
        let node = &mut self.nodes[id.0];
        node.parent = parent;
        node.apply_record(record);
        Some(id)
    }

    pub fn lookup(&self, hash: &Hash256) -> Option<NodeId> {
        self.by_hash.get(hash).copied()
    }

    pub fn get(&self, id: NodeId) -> Option<&BlockIndex> {
        self.nodes.get(id.0)
    }

    /// Storage and validation state of `id`, for in-place updates.
    pub fn state_mut(&mut self, id: NodeId) -> Option<NodeStateMut<'_>> {
        self.nodes.get_mut(id.0).map(BlockIndex::state_mut)
    }

    pub fn by_hash(&self, hash: &Hash256) -> Option<&BlockIndex> {
        self.lookup(hash).and_then(|id| self.get(id))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|node| node.parent)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &BlockIndex)> {
        self.nodes.iter().enumerate().map(|(i, node)| (NodeId(i), node))
    }

    /// Nodes whose parent is `id`.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, node)| node.parent == Some(id))
            .map(|(child, _)| child)
            .collect()
    }

    /// Nodes without children.
    pub fn tips(&self) -> Vec<NodeId> {
        let parents: HashSet<NodeId> = self.nodes.iter().filter_map(|node| node.parent).collect();
        self.iter()
            .map(|(id, _)| id)
            .filter(|id| !parents.contains(id))
            .collect()
    }

    /// The ancestor of `id` at `height`, following parent links.
    pub fn ancestor(&self, id: NodeId, height: i32) -> Option<NodeId> {
        let mut current = id;
        loop {
            let node = self.get(current)?;
            if node.height == height {
                return Some(current);
            }
            if node.height < height {
                return None;
            }
            current = node.parent?;
        }
    }

    /// The last common ancestor of `a` and `b`.
    pub fn find_fork(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let height_a = self.get(a)?.height;
        let height_b = self.get(b)?.height;
        let common = height_a.min(height_b);
        let mut a = self.ancestor(a, common)?;
        let mut b = self.ancestor(b, common)?;
        while a != b {
            a = self.parent(a)?;
            b = self.parent(b)?;
        }
        Some(a)
    }

    /// The highest node, ties broken by the lowest hash.
    pub fn best_header(&self) -> Option<NodeId> {
        self.iter()
            .max_by(|(_, x), (_, y)| x.height.cmp(&y.height).then_with(|| y.hash.cmp(&x.hash)))
            .map(|(id, _)| id)
    }

    /// Whether `id` lies on the chain ending at `tip`.
    pub fn contains(&self, tip: NodeId, id: NodeId) -> bool {
        match self.get(id) {
            Some(node) => self.ancestor(tip, node.height) == Some(id),
            None => false,
        }
    }

    /// Whether block data is present for `id` and all of its ancestors.
    fn chain_has_data(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(cur) = current {
            let Some(node) = self.get(cur) else {
                return false;
            };
            if !node.status.has_data() || node.tx_count == 0 {
                return false;
            }
            current = node.parent;
        }
        true
    }

    /// Every tip plus `active`, classified and sorted by height descending.
    pub fn chain_tips(&self, active: Option<NodeId>) -> Vec<ChainTip> {
        let mut ids = self.tips();
        if let Some(active) = active {
            if !ids.contains(&active) {
                ids.push(active);
            }
        }

        let mut tips: Vec<ChainTip> = ids
            .into_iter()
            .filter_map(|id| {
                let node = self.get(id)?;
                let fork_height = active
                    .and_then(|a| self.find_fork(id, a))
                    .and_then(|fork| self.get(fork))
                    .map_or(-1, |fork| fork.height);
                let status = if active.is_some_and(|a| self.contains(a, id)) {
                    TipStatus::Active
                } else if node.status.is_invalid() {
                    TipStatus::Invalid
                } else if !self.chain_has_data(id) {
                    TipStatus::HeadersOnly
                } else if node.status.is_valid(BlockValidity::Scripts) {
                    TipStatus::ValidFork
                } else if node.status.is_valid(BlockValidity::Tree) {
                    TipStatus::ValidHeaders
                } else {
                    TipStatus::Unknown
                };
                Some(ChainTip {
                    height: node.height,
                    hash: node.hash,
                    branch_len: node.height - fork_height,
                    status,
                })
            })
            .collect();

        tips.sort_by(|a, b| b.height.cmp(&a.height));
        tips
    }
}

impl Index<NodeId> for BlockIndexMap {
    type Output = BlockIndex;

    fn index(&self, id: NodeId) -> &BlockIndex {
        &self.nodes[id.0]
    }
}
