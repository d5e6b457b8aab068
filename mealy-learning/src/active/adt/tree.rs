use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Debug,
};

use itertools::Itertools;
use mealy::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{Ads, AdtError, LeafSplitter, StateId};
use crate::active::SymbolOracle;

/// Index of a node in the arena of an [`Adt`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl Show for NodeId {
    fn show(&self) -> String {
        format!("N{}", self.0)
    }
}

/// A node of an adaptive distinguishing tree. Every node knows its parent, the root and nodes
/// that are not (yet) part of the tree have none.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdtNode<S: Symbol, O: Color> {
    /// Queries `symbol` and continues with the child for the observed output.
    Symbol {
        /// The parent node.
        parent: Option<NodeId>,
        /// The symbol that is posed.
        symbol: S,
        /// Children indexed by the output produced on `symbol`.
        children: BTreeMap<O, NodeId>,
    },
    /// Resets the system, replays the word that is sifted and continues with `child`.
    Reset {
        /// The parent node.
        parent: Option<NodeId>,
        /// The single child.
        child: NodeId,
    },
    /// A leaf which identifies a state of the hypothesis.
    Leaf {
        /// The parent node.
        parent: Option<NodeId>,
        /// The state that is represented by the leaf.
        state: StateId,
    },
}

impl<S: Symbol, O: Color> AdtNode<S, O> {
    /// Returns the parent of the node.
    pub fn parent(&self) -> Option<NodeId> {
        match self {
            AdtNode::Symbol { parent, .. }
            | AdtNode::Reset { parent, .. }
            | AdtNode::Leaf { parent, .. } => *parent,
        }
    }

    fn parent_mut(&mut self) -> &mut Option<NodeId> {
        match self {
            AdtNode::Symbol { parent, .. }
            | AdtNode::Reset { parent, .. }
            | AdtNode::Leaf { parent, .. } => parent,
        }
    }

    /// Returns true if the node is a leaf.
    pub fn is_leaf(&self) -> bool {
        matches!(self, AdtNode::Leaf { .. })
    }

    /// Returns true if the node is a reset node.
    pub fn is_reset(&self) -> bool {
        matches!(self, AdtNode::Reset { .. })
    }

    /// Returns true if the node poses a symbol.
    pub fn is_symbol(&self) -> bool {
        matches!(self, AdtNode::Symbol { .. })
    }

    /// The symbol of a symbol node.
    pub fn symbol(&self) -> Option<S> {
        match self {
            AdtNode::Symbol { symbol, .. } => Some(*symbol),
            _ => None,
        }
    }

    /// The state of a leaf.
    pub fn state(&self) -> Option<StateId> {
        match self {
            AdtNode::Leaf { state, .. } => Some(*state),
            _ => None,
        }
    }

    /// The child of a symbol node for the given output.
    pub fn child(&self, output: &O) -> Option<NodeId> {
        match self {
            AdtNode::Symbol { children, .. } => children.get(output).copied(),
            _ => None,
        }
    }

    /// All children of the node, ordered by output.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            AdtNode::Symbol { children, .. } => children.values().copied().collect(),
            AdtNode::Reset { child, .. } => vec![*child],
            AdtNode::Leaf { .. } => vec![],
        }
    }
}

/// Result of sifting a word through the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sift<O> {
    /// Output of the system on the last symbol of the sifted word, `None` if the word was empty.
    pub output: Option<O>,
    /// Where sifting ended.
    pub outcome: SiftOutcome<O>,
}

/// Where sifting a word ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiftOutcome<O> {
    /// A leaf was reached.
    Leaf(NodeId),
    /// The symbol node `node` has no child for `output`.
    Unmapped {
        /// The last symbol node that was visited.
        node: NodeId,
        /// The output for which no child exists.
        output: O,
    },
}

/// Information about the lowest common ancestor of two nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LcaInfo<O> {
    /// The lowest common ancestor, always a symbol node.
    pub node: NodeId,
    /// The output under which the first node is found.
    pub first_output: O,
    /// The output under which the second node is found.
    pub second_output: O,
}

/// An adaptive distinguishing tree, stored as an arena of [`AdtNode`]s. Nodes are never removed
/// from the arena, subtrees that are cut out of the tree simply become unreachable. The same
/// holds for subtrees that are built for a replacement but never attached.
///
/// For every state of the hypothesis, the tree keeps track of the leaf that currently represents
/// it. This ownership is updated whenever leaves are attached to the tree.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adt<S: Symbol, O: Color> {
    nodes: Vec<AdtNode<S, O>>,
    root: Option<NodeId>,
    owners: math::Bijection<StateId, NodeId>,
}

impl<S: Symbol, O: Color> Default for Adt<S, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Symbol, O: Color> Adt<S, O> {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self {
            nodes: vec![],
            root: None,
            owners: math::Bijection::new(),
        }
    }

    /// Clears the tree and makes a single leaf for `state` its root.
    pub fn initialize(&mut self, state: StateId) -> NodeId {
        self.nodes.clear();
        self.owners = math::Bijection::new();
        let leaf = self.push(AdtNode::Leaf {
            parent: None,
            state,
        });
        self.root = Some(leaf);
        self.owners.insert(state, leaf);
        leaf
    }

    /// Returns the root of the tree, if it has been initialized.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    fn root_or_err(&self) -> Result<NodeId, AdtError> {
        self.root.ok_or(AdtError::NotStarted)
    }

    /// Returns the node with the given id.
    ///
    /// # Panics
    /// If the node does not exist, node ids are only handed out by the tree itself.
    pub fn node(&self, id: NodeId) -> &AdtNode<S, O> {
        &self.nodes[id.0]
    }

    /// The parent of `node`.
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).parent()
    }

    /// The leaf that currently represents `state`.
    pub fn leaf_of(&self, state: StateId) -> Option<NodeId> {
        self.owners.get_by_left(&state).copied()
    }

    /// The state represented by `leaf`.
    pub fn state_of(&self, leaf: NodeId) -> Option<StateId> {
        self.node(leaf).state()
    }

    /// Returns true if `node` can be reached from the root.
    pub fn is_attached(&self, node: NodeId) -> bool {
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        self.root == Some(current)
    }

    fn push(&mut self, node: AdtNode<S, O>) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    fn set_parent(&mut self, node: NodeId, parent: Option<NodeId>) {
        *self.nodes[node.0].parent_mut() = parent;
    }

    fn register_leaves(&mut self, subtree: NodeId) {
        for leaf in self.collect_leaves(subtree) {
            if let Some(state) = self.state_of(leaf) {
                self.owners.insert(state, leaf);
            }
        }
    }

    /// Makes `new` the child of `parent` in place of `old`, which is detached afterwards.
    fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) -> Result<(), AdtError> {
        match &mut self.nodes[parent.0] {
            AdtNode::Symbol { children, .. } => {
                let slot = children
                    .values_mut()
                    .find(|child| **child == old)
                    .ok_or_else(|| {
                        AdtError::MalformedTree(format!(
                            "{} is not a child of {}",
                            old.show(),
                            parent.show()
                        ))
                    })?;
                *slot = new;
            }
            AdtNode::Reset { child, .. } if *child == old => *child = new,
            _ => {
                return Err(AdtError::MalformedTree(format!(
                    "{} is not a child of {}",
                    old.show(),
                    parent.show()
                )))
            }
        }
        self.set_parent(new, Some(parent));
        self.set_parent(old, None);
        Ok(())
    }

    /// Attaches a new leaf for `state` below the symbol node `parent` for the given output.
    pub fn add_leaf(
        &mut self,
        parent: NodeId,
        output: O,
        state: StateId,
    ) -> Result<NodeId, AdtError> {
        if !self.node(parent).is_symbol() {
            return Err(AdtError::MalformedTree(format!(
                "cannot attach leaf to {}",
                parent.show()
            )));
        }
        let leaf = self.push(AdtNode::Leaf {
            parent: Some(parent),
            state,
        });
        if let AdtNode::Symbol { children, .. } = &mut self.nodes[parent.0] {
            if children.insert(output, leaf).is_some() {
                return Err(AdtError::MalformedTree(format!(
                    "{} already has a child for this output",
                    parent.show()
                )));
            }
        }
        if self.is_attached(leaf) {
            self.owners.insert(state, leaf);
        }
        Ok(leaf)
    }

    /// Resets `oracle`, feeds `word` and then walks through the tree starting from `start`. At a
    /// symbol node the symbol is queried and the child for the observed output is visited, at a
    /// reset node the oracle is reset and `word` is fed again. Sifting stops at a leaf or at a
    /// symbol node which has no child for the observed output.
    pub fn sift<Q>(&self, oracle: &mut Q, word: &[S], start: NodeId) -> Result<Sift<O>, AdtError>
    where
        Q: SymbolOracle<Symbol = S, Output = O>,
    {
        self.sift_after(oracle, word, &[], start)
    }

    /// Like [`Adt::sift`], but `lead_in` is fed after `word` before the walk through the tree
    /// begins. Reset nodes only replay `word`.
    pub fn sift_after<Q>(
        &self,
        oracle: &mut Q,
        word: &[S],
        lead_in: &[S],
        start: NodeId,
    ) -> Result<Sift<O>, AdtError>
    where
        Q: SymbolOracle<Symbol = S, Output = O>,
    {
        oracle.reset();
        let mut output = None;
        for &sym in word.iter().chain(lead_in) {
            output = Some(oracle.query(sym));
        }

        let mut current = start;
        loop {
            match self.nodes.get(current.0) {
                None => {
                    return Err(AdtError::MalformedTree(format!(
                        "{} does not exist",
                        current.show()
                    )))
                }
                Some(AdtNode::Leaf { .. }) => {
                    trace!("sifting {} reached {}", word.as_string(), current.show());
                    return Ok(Sift {
                        output,
                        outcome: SiftOutcome::Leaf(current),
                    });
                }
                Some(AdtNode::Reset { child, .. }) => {
                    oracle.reset();
                    for &sym in word {
                        oracle.query(sym);
                    }
                    current = *child;
                }
                Some(AdtNode::Symbol {
                    symbol, children, ..
                }) => {
                    let out = oracle.query(*symbol);
                    match children.get(&out) {
                        Some(child) => current = *child,
                        None => {
                            trace!(
                                "sifting {} found new output {} at {}",
                                word.as_string(),
                                out.show(),
                                current.show()
                            );
                            return Ok(Sift {
                                output,
                                outcome: SiftOutcome::Unmapped {
                                    node: current,
                                    output: out,
                                },
                            });
                        }
                    }
                }
            }
        }
    }

    /// Returns the first node of the ADS that `node` belongs to, i.e. the highest ancestor that
    /// can be reached without passing a reset node.
    pub fn start_of_ads(&self, node: NodeId) -> NodeId {
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            if self.node(parent).is_reset() {
                break;
            }
            current = parent;
        }
        current
    }

    /// Returns the output under which `successor` is found below the symbol node `node`.
    pub fn output_for_successor(&self, node: NodeId, successor: NodeId) -> Result<O, AdtError> {
        if self.parent(successor) != Some(node) {
            return Err(AdtError::MalformedTree(format!(
                "{} is not the parent of {}",
                node.show(),
                successor.show()
            )));
        }
        match self.node(node) {
            AdtNode::Symbol { children, .. } => children
                .iter()
                .find(|(_, child)| **child == successor)
                .map(|(out, _)| out.clone())
                .ok_or_else(|| {
                    AdtError::MalformedTree(format!(
                        "{} is not a child of {}",
                        successor.show(),
                        node.show()
                    ))
                }),
            _ => Err(AdtError::MalformedTree(format!(
                "{} is not a symbol node",
                node.show()
            ))),
        }
    }

    /// Computes the input and output trace that leads from the start of the ADS containing
    /// `node` to `node`.
    pub fn trace_for_node(&self, node: NodeId) -> Result<(Vec<S>, Vec<O>), AdtError> {
        let mut input = vec![];
        let mut output = vec![];
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            let AdtNode::Symbol { symbol, .. } = self.node(parent) else {
                break;
            };
            input.push(*symbol);
            output.push(self.output_for_successor(parent, current)?);
            current = parent;
        }
        input.reverse();
        output.reverse();
        Ok((input, output))
    }

    /// Finds the lowest common ancestor of `first` and `second`, which has to be a symbol node.
    pub fn find_lca(&self, first: NodeId, second: NodeId) -> Result<LcaInfo<O>, AdtError> {
        let mut ancestors = math::Map::default();
        let mut child = first;
        while let Some(parent) = self.parent(child) {
            ancestors.insert(parent, child);
            child = parent;
        }

        let mut child = second;
        while let Some(parent) = self.parent(child) {
            if let Some(&towards_first) = ancestors.get(&parent) {
                if !self.node(parent).is_symbol() {
                    return Err(AdtError::MalformedTree(format!(
                        "lowest common ancestor {} is not a symbol node",
                        parent.show()
                    )));
                }
                return Ok(LcaInfo {
                    node: parent,
                    first_output: self.output_for_successor(parent, towards_first)?,
                    second_output: self.output_for_successor(parent, child)?,
                });
            }
            child = parent;
        }
        Err(AdtError::NoCommonAncestor(first, second))
    }

    fn validate_split(
        &self,
        leaf: NodeId,
        suffix: &[S],
        old_output: &[O],
        new_output: &[O],
    ) -> Result<(), AdtError> {
        if !self.node(leaf).is_leaf() {
            return Err(AdtError::NotALeaf(leaf));
        }
        if suffix.len() != old_output.len() || old_output.len() != new_output.len() {
            return Err(AdtError::OutputLengthMismatch {
                suffix: suffix.len(),
                old: old_output.len(),
                new: new_output.len(),
            });
        }
        if old_output == new_output {
            return Err(AdtError::EqualOutputs);
        }
        Ok(())
    }

    /// Splits `leaf` by extending the ADS it belongs to with `suffix`, which has to continue the
    /// trace leading to the leaf. The new leaf, which represents `new_state`, is returned. If the
    /// leaf is the root of the tree, this is the same as [`Adt::split_leaf`].
    pub fn extend_leaf(
        &mut self,
        leaf: NodeId,
        suffix: &[S],
        old_output: &[O],
        new_output: &[O],
        splitter: &dyn LeafSplitter<S, O>,
        new_state: StateId,
    ) -> Result<NodeId, AdtError> {
        self.validate_split(leaf, suffix, old_output, new_output)?;
        if self.root == Some(leaf) {
            return self.split_leaf(leaf, suffix, old_output, new_output, splitter, new_state);
        }
        let new_leaf = self.split_parent(leaf, suffix, old_output, new_output, new_state)?;
        self.owners.insert(new_state, new_leaf);
        Ok(new_leaf)
    }

    /// Splits `leaf` with the given distinguishing suffix, the structural change is made by
    /// `splitter`. Returns the new leaf, which represents `new_state`.
    pub fn split_leaf(
        &mut self,
        leaf: NodeId,
        suffix: &[S],
        old_output: &[O],
        new_output: &[O],
        splitter: &dyn LeafSplitter<S, O>,
        new_state: StateId,
    ) -> Result<NodeId, AdtError> {
        self.validate_split(leaf, suffix, old_output, new_output)?;
        let was_root = self.root == Some(leaf);
        let new_leaf = splitter.split(self, leaf, suffix, old_output, new_output, new_state)?;
        if was_root {
            self.root = Some(self.start_of_ads(leaf));
        }
        self.owners.insert(new_state, new_leaf);
        trace!(
            "split {} with {}, new leaf {}",
            leaf.show(),
            suffix.as_string(),
            new_leaf.show()
        );
        Ok(new_leaf)
    }

    /// Returns the position of the first output in `offset..` on which both outputs differ.
    fn first_divergence(old_output: &[O], new_output: &[O], offset: usize) -> Result<usize, AdtError> {
        old_output
            .iter()
            .zip(new_output)
            .skip(offset)
            .position(|(o, n)| o != n)
            .map(|pos| pos + offset)
            .ok_or(AdtError::EqualOutputs)
    }

    /// Replaces `leaf` by a new ADS that is built from `suffix`. Unless the leaf is the root, the
    /// new ADS is placed behind a reset node.
    pub fn split_into_new_ads(
        &mut self,
        leaf: NodeId,
        suffix: &[S],
        old_output: &[O],
        new_output: &[O],
        new_state: StateId,
    ) -> Result<NodeId, AdtError> {
        self.validate_split(leaf, suffix, old_output, new_output)?;
        let divergence = Self::first_divergence(old_output, new_output, 0)?;
        let ads = self.push(AdtNode::Symbol {
            parent: None,
            symbol: suffix[0],
            children: BTreeMap::new(),
        });
        if let Some(parent) = self.parent(leaf) {
            let reset = self.push(AdtNode::Reset {
                parent: None,
                child: ads,
            });
            self.set_parent(ads, Some(reset));
            self.replace_child(parent, leaf, reset)?;
        }
        self.finalize_split(leaf, ads, suffix, old_output, new_output, 0, divergence, new_state)
    }

    /// Returns true if the trace leading to `leaf` is a prefix of `suffix` and both outputs, so
    /// that the ADS containing the leaf can be extended.
    pub fn can_split_parent(
        &self,
        leaf: NodeId,
        suffix: &[S],
        old_output: &[O],
        new_output: &[O],
    ) -> bool {
        if self.parent(leaf).is_none() {
            return false;
        }
        let Ok((input, output)) = self.trace_for_node(leaf) else {
            return false;
        };
        input.len() < suffix.len()
            && input.is_prefix_of(suffix)
            && output.len() <= old_output.len()
            && old_output.starts_with(&output)
            && new_output.starts_with(&output)
    }

    /// Continues the ADS that contains `leaf` with the part of `suffix` that follows the trace of
    /// the leaf.
    pub fn split_parent(
        &mut self,
        leaf: NodeId,
        suffix: &[S],
        old_output: &[O],
        new_output: &[O],
        new_state: StateId,
    ) -> Result<NodeId, AdtError> {
        self.validate_split(leaf, suffix, old_output, new_output)?;
        if !self.can_split_parent(leaf, suffix, old_output, new_output) {
            return Err(AdtError::MalformedTree(format!(
                "trace of {} does not continue into {}",
                leaf.show(),
                suffix.as_string()
            )));
        }
        let offset = self.trace_for_node(leaf)?.0.len();
        let divergence = Self::first_divergence(old_output, new_output, offset)?;
        let parent = self
            .parent(leaf)
            .ok_or_else(|| AdtError::MalformedTree(format!("{} has no parent", leaf.show())))?;
        let continued = self.push(AdtNode::Symbol {
            parent: None,
            symbol: suffix[offset],
            children: BTreeMap::new(),
        });
        self.replace_child(parent, leaf, continued)?;
        self.finalize_split(
            leaf,
            continued,
            suffix,
            old_output,
            new_output,
            offset,
            divergence,
            new_state,
        )
    }

    /// Adds symbol nodes below `ads` for the symbols of `suffix` starting at `offset` as long as
    /// both outputs agree, and finally places the old leaf and a new one for `new_state` below the
    /// last of them.
    #[allow(clippy::too_many_arguments)]
    fn finalize_split(
        &mut self,
        leaf: NodeId,
        ads: NodeId,
        suffix: &[S],
        old_output: &[O],
        new_output: &[O],
        offset: usize,
        divergence: usize,
        new_state: StateId,
    ) -> Result<NodeId, AdtError> {
        let mut previous = ads;
        for i in offset..divergence {
            let next = self.push(AdtNode::Symbol {
                parent: Some(previous),
                symbol: suffix[i + 1],
                children: BTreeMap::new(),
            });
            self.children_mut(previous)?
                .insert(old_output[i].clone(), next);
            previous = next;
        }

        let new_leaf = self.push(AdtNode::Leaf {
            parent: Some(previous),
            state: new_state,
        });
        self.set_parent(leaf, Some(previous));
        let children = self.children_mut(previous)?;
        children.insert(old_output[divergence].clone(), leaf);
        children.insert(new_output[divergence].clone(), new_leaf);
        Ok(new_leaf)
    }

    fn children_mut(&mut self, node: NodeId) -> Result<&mut BTreeMap<O, NodeId>, AdtError> {
        match &mut self.nodes[node.0] {
            AdtNode::Symbol { children, .. } => Ok(children),
            _ => Err(AdtError::MalformedTree(format!(
                "{} is not a symbol node",
                node.show()
            ))),
        }
    }

    /// Replaces the subtree rooted in `old` by the subtree rooted in `new`:
    /// - if `old` is the root, `new` becomes the root,
    /// - if `old` is a reset node, `new` continues the ADS that ends in the reset node,
    /// - otherwise `old` starts an ADS and `new` is placed behind a fresh reset node.
    ///
    /// All leaves below `new` become the owners of their states.
    pub fn replace_node(&mut self, old: NodeId, new: NodeId) -> Result<(), AdtError> {
        if self.root == Some(old) {
            self.set_parent(new, None);
            self.root = Some(new);
        } else if self.node(old).is_reset() {
            let end_of_previous = self.parent(old).ok_or_else(|| {
                AdtError::MalformedTree(format!("reset node {} has no parent", old.show()))
            })?;
            self.replace_child(end_of_previous, old, new)?;
        } else {
            let old_reset = self
                .parent(old)
                .filter(|p| self.node(*p).is_reset())
                .ok_or_else(|| {
                    AdtError::MalformedTree(format!("{} does not start an ADS", old.show()))
                })?;
            let end_of_previous = self.parent(old_reset).ok_or_else(|| {
                AdtError::MalformedTree(format!("reset node {} has no parent", old_reset.show()))
            })?;
            let reset = self.push(AdtNode::Reset {
                parent: None,
                child: new,
            });
            self.set_parent(new, Some(reset));
            self.replace_child(end_of_previous, old_reset, reset)?;
        }
        self.register_leaves(new);
        Ok(())
    }

    /// Replaces `leaf`, which must have a parent, by a reset node that leads into `ads`.
    pub fn wrap_in_reset(&mut self, leaf: NodeId, ads: NodeId) -> Result<NodeId, AdtError> {
        let parent = self
            .parent(leaf)
            .ok_or_else(|| AdtError::MalformedTree(format!("{} has no parent", leaf.show())))?;
        let reset = self.push(AdtNode::Reset {
            parent: None,
            child: ads,
        });
        self.set_parent(ads, Some(reset));
        self.replace_child(parent, leaf, reset)?;
        if self.is_attached(reset) {
            self.register_leaves(reset);
        }
        Ok(reset)
    }

    /// Builds a detached chain of symbol nodes for `input`, where each node continues under the
    /// corresponding output, ending in a leaf for `state`. If `input` is empty, the result is
    /// just a leaf.
    pub fn build_ads_from_observation(
        &mut self,
        input: &[S],
        output: &[O],
        state: StateId,
    ) -> Result<NodeId, AdtError> {
        if input.len() != output.len() {
            return Err(AdtError::OutputLengthMismatch {
                suffix: input.len(),
                old: output.len(),
                new: output.len(),
            });
        }
        let leaf = self.push(AdtNode::Leaf {
            parent: None,
            state,
        });
        let mut head = leaf;
        for (sym, out) in input.iter().zip(output).rev() {
            let node = self.push(AdtNode::Symbol {
                parent: None,
                symbol: *sym,
                children: BTreeMap::from([(out.clone(), head)]),
            });
            self.set_parent(head, Some(node));
            head = node;
        }
        Ok(head)
    }

    /// Merges the single trace ADS `child` into `parent`. Both are followed as long as they pose
    /// the same symbols and `parent` has a child for the output of `child`. At the first output
    /// that `parent` does not know, the rest of `child` is grafted into `parent` and true is
    /// returned. If the symbols differ or a leaf or reset node is reached first, nothing changes
    /// and false is returned.
    pub fn merge_ads(&mut self, parent: NodeId, child: NodeId) -> Result<bool, AdtError> {
        let (mut parent_iter, mut child_iter) = (parent, child);
        loop {
            let (parent_symbol, child_node) = (self.node(parent_iter).symbol(), self.node(child_iter));
            let Some(parent_symbol) = parent_symbol else {
                return Ok(false);
            };
            let AdtNode::Symbol {
                symbol: child_symbol,
                children: child_children,
                ..
            } = child_node
            else {
                return Ok(false);
            };
            if *child_symbol != parent_symbol {
                return Ok(false);
            }
            let Some((child_output, child_successor)) = child_children
                .iter()
                .exactly_one()
                .ok()
                .map(|(o, c)| (o.clone(), *c))
            else {
                return Err(AdtError::MalformedTree(format!(
                    "{} is not a single trace",
                    child.show()
                )));
            };

            match self.node(parent_iter).child(&child_output) {
                Some(next) => {
                    parent_iter = next;
                    child_iter = child_successor;
                }
                None => {
                    self.children_mut(parent_iter)?
                        .insert(child_output, child_successor);
                    self.set_parent(child_successor, Some(parent_iter));
                    if self.is_attached(parent_iter) {
                        self.register_leaves(child_successor);
                    }
                    return Ok(true);
                }
            }
        }
    }

    /// Materializes `ads` as a detached subtree and returns its root.
    pub fn insert_ads(&mut self, ads: &Ads<S, O, StateId>) -> NodeId {
        match ads {
            Ads::Leaf(state) => self.push(AdtNode::Leaf {
                parent: None,
                state: *state,
            }),
            Ads::Symbol { symbol, children } => {
                let node = self.push(AdtNode::Symbol {
                    parent: None,
                    symbol: *symbol,
                    children: BTreeMap::new(),
                });
                for (output, child) in children {
                    let child = self.insert_ads(child);
                    self.set_parent(child, Some(node));
                    if let AdtNode::Symbol { children, .. } = &mut self.nodes[node.0] {
                        children.insert(output.clone(), child);
                    }
                }
                node
            }
        }
    }

    fn collect(&self, node: NodeId, out: &mut Vec<NodeId>, filter: &impl Fn(&AdtNode<S, O>) -> bool) {
        if filter(self.node(node)) {
            out.push(node);
        }
        for child in self.node(node).children() {
            self.collect(child, out, filter);
        }
    }

    /// All leaves of the subtree rooted in `node`, ordered by output.
    pub fn collect_leaves(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = vec![];
        self.collect(node, &mut out, &AdtNode::<S, O>::is_leaf);
        out
    }

    /// The states represented in the subtree rooted in `node`.
    pub fn collect_states(&self, node: NodeId) -> Vec<StateId> {
        self.collect_leaves(node)
            .into_iter()
            .filter_map(|leaf| self.state_of(leaf))
            .collect()
    }

    /// All reset nodes in the subtree rooted in `node`, including `node` itself.
    pub fn collect_reset_nodes(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = vec![];
        self.collect(node, &mut out, &AdtNode::<S, O>::is_reset);
        out
    }

    /// The nodes that start an ADS in the subtree rooted in `node`, that is `node` itself and every
    /// child of a reset node.
    pub fn collect_ads_nodes(&self, node: NodeId) -> Vec<NodeId> {
        std::iter::once(node)
            .chain(
                self.collect_reset_nodes(node)
                    .into_iter()
                    .flat_map(|reset| self.node(reset).children()),
            )
            .unique()
            .collect()
    }

    /// The states that own a leaf in the tree.
    pub fn states(&self) -> BTreeSet<StateId> {
        self.root
            .map(|root| self.collect_states(root).into_iter().collect())
            .unwrap_or_default()
    }

    /// The number of resets that are needed to identify every leaf below `node`, summed up over
    /// all leaves.
    pub fn effective_resets(&self, node: NodeId) -> usize {
        self.effective_resets_from(node, 0)
    }

    fn effective_resets_from(&self, node: NodeId, accumulated: usize) -> usize {
        match self.node(node) {
            AdtNode::Leaf { .. } => accumulated,
            AdtNode::Reset { child, .. } => self.effective_resets_from(*child, accumulated + 1),
            AdtNode::Symbol { children, .. } => children
                .values()
                .map(|child| self.effective_resets_from(*child, accumulated))
                .sum(),
        }
    }

    /// Sifts the access sequence of every state that owns a leaf from the root and checks that it
    /// ends in that leaf.
    pub fn self_sift<Q>(&self, oracle: &mut Q, access: impl Fn(StateId) -> Option<Vec<S>>) -> Result<bool, AdtError>
    where
        Q: SymbolOracle<Symbol = S, Output = O>,
    {
        let root = self.root_or_err()?;
        for (state, leaf) in self.owners.iter() {
            let word = access(*state).ok_or(AdtError::UnknownState(*state))?;
            let sift = self.sift(oracle, &word, root)?;
            if sift.outcome != SiftOutcome::Leaf(*leaf) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn fmt_node(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        node: NodeId,
        label: String,
        depth: usize,
    ) -> std::fmt::Result {
        let indent = "  ".repeat(depth);
        match self.node(node) {
            AdtNode::Leaf { state, .. } => writeln!(f, "{indent}{label}{}", state.show()),
            AdtNode::Reset { child, .. } => {
                writeln!(f, "{indent}{label}reset")?;
                self.fmt_node(f, *child, String::new(), depth + 1)
            }
            AdtNode::Symbol {
                symbol, children, ..
            } => {
                writeln!(f, "{indent}{label}{}", symbol.show())?;
                for (output, child) in children {
                    self.fmt_node(f, *child, format!("{} -> ", output.show()), depth + 1)?;
                }
                Ok(())
            }
        }
    }
}

impl<S: Symbol, O: Color> Debug for Adt<S, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.root {
            None => write!(f, "empty tree"),
            Some(root) => self.fmt_node(f, root, String::new(), 0),
        }
    }
}
