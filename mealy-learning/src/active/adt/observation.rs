use std::collections::{BTreeMap, VecDeque};

use mealy::prelude::*;
use tracing::{trace, warn};

use super::{Adt, AdtError, NodeId, StateId};
use crate::active::SymbolOracle;

const ROOT: usize = 0;

#[derive(Debug, Clone)]
struct ObservationNode<S, O> {
    parent: Option<(usize, S)>,
    successors: BTreeMap<S, (O, usize)>,
}

impl<S, O> ObservationNode<S, O> {
    fn new(parent: Option<(usize, S)>) -> Self {
        Self {
            parent,
            successors: BTreeMap::new(),
        }
    }
}

/// A prefix tree of everything that has been observed on the system under learning. Every state
/// of the hypothesis is associated with the node of its access sequence, which makes it possible
/// to look up traces of states and to search for words that separate them without posing any
/// queries.
///
/// The tree wraps the actual oracle and is itself a [`SymbolOracle`]. Symbol queries are answered
/// from the tree whenever possible. The wrapped oracle is only reset and brought into the
/// right configuration once a query cannot be answered from what is known, and every answer it
/// gives is recorded. If caching is disabled, all queries are forwarded but still recorded.
#[derive(Debug, Clone)]
pub struct ObservationTree<Q: SymbolOracle> {
    nodes: Vec<ObservationNode<Q::Symbol, Q::Output>>,
    states: math::Map<StateId, usize>,
    sul: Q,
    cursor: usize,
    sul_at: Option<usize>,
    use_cache: bool,
}

impl<Q: SymbolOracle> ObservationTree<Q> {
    /// Wraps `sul` in a new, empty observation tree.
    pub fn new(sul: Q, use_cache: bool) -> Self {
        Self {
            nodes: vec![ObservationNode::new(None)],
            states: math::Map::default(),
            sul,
            cursor: ROOT,
            sul_at: None,
            use_cache,
        }
    }

    /// Returns a reference to the wrapped oracle.
    pub fn oracle(&self) -> &Q {
        &self.sul
    }

    /// Returns the number of nodes in the tree.
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// Associates `state` with the root, i.e. the empty access sequence.
    pub fn initialize(&mut self, state: StateId) {
        self.states.insert(state, ROOT);
    }

    /// Associates each state with its access sequence, recording the given outputs on the way.
    pub fn initialize_states<I>(&mut self, states: I)
    where
        I: IntoIterator<Item = (StateId, Vec<Q::Symbol>, Vec<Q::Output>)>,
    {
        for (state, access, output) in states {
            let node = self.insert(ROOT, &access, &output);
            self.states.insert(state, node);
        }
    }

    fn node_of(&self, state: StateId) -> Result<usize, AdtError> {
        self.states
            .get(&state)
            .copied()
            .ok_or(AdtError::MissingObservation(state))
    }

    fn successor(&self, node: usize, word: &[Q::Symbol]) -> Option<usize> {
        word.iter()
            .try_fold(node, |current, sym| {
                self.nodes[current].successors.get(sym).map(|(_, next)| *next)
            })
    }

    fn path(&self, node: usize) -> Vec<Q::Symbol> {
        let mut word = vec![];
        let mut current = node;
        while let Some((parent, sym)) = self.nodes[current].parent {
            word.push(sym);
            current = parent;
        }
        word.reverse();
        word
    }

    fn insert_step(&mut self, node: usize, symbol: Q::Symbol, output: Q::Output) -> usize {
        if let Some((known, next)) = self.nodes[node].successors.get(&symbol).cloned() {
            if known != output {
                warn!(
                    "conflicting observation after {}: {} was {}, now {}",
                    self.path(node).with_symbol(symbol).as_string(),
                    symbol.show(),
                    known.show(),
                    output.show()
                );
                self.nodes[node].successors.insert(symbol, (output, next));
            }
            return next;
        }
        self.nodes.push(ObservationNode::new(Some((node, symbol))));
        let next = self.nodes.len() - 1;
        self.nodes[node].successors.insert(symbol, (output, next));
        next
    }

    fn insert(&mut self, node: usize, input: &[Q::Symbol], output: &[Q::Output]) -> usize {
        assert_eq!(input.len(), output.len(), "input and output differ in length");
        input
            .iter()
            .zip(output)
            .fold(node, |current, (sym, out)| {
                self.insert_step(current, *sym, out.clone())
            })
    }

    /// Records `output` as the output on `input` after the access sequence of `state`.
    pub fn add_trace(
        &mut self,
        state: StateId,
        input: &[Q::Symbol],
        output: &[Q::Output],
    ) -> Result<(), AdtError> {
        if input.len() != output.len() {
            return Err(AdtError::OutputLengthMismatch {
                suffix: input.len(),
                old: output.len(),
                new: output.len(),
            });
        }
        let node = self.node_of(state)?;
        self.insert(node, input, output);
        Ok(())
    }

    /// Records the traces along the path from the root of `adt` to `node` for `state`, one for
    /// each ADS on the path.
    pub fn add_trace_for_node(
        &mut self,
        state: StateId,
        adt: &Adt<Q::Symbol, Q::Output>,
        node: NodeId,
    ) -> Result<(), AdtError> {
        let mut current = node;
        loop {
            let (input, output) = adt.trace_for_node(current)?;
            self.add_trace(state, &input, &output)?;
            match adt.parent(adt.start_of_ads(current)) {
                Some(reset) => current = reset,
                None => return Ok(()),
            }
        }
    }

    /// Registers the newly discovered `state`, whose access sequence is the one of an existing
    /// state extended by one symbol. `output` is the output on that last symbol.
    pub fn add_state(
        &mut self,
        state: StateId,
        access_sequence: &[Q::Symbol],
        output: Q::Output,
    ) -> Result<(), AdtError> {
        let Some((last, prefix)) = access_sequence.split_last() else {
            self.states.insert(state, ROOT);
            return Ok(());
        };
        let predecessor = self
            .successor(ROOT, prefix)
            .ok_or(AdtError::MissingObservation(state))?;
        let node = self.insert_step(predecessor, *last, output);
        self.states.insert(state, node);
        Ok(())
    }

    /// Looks up the outputs of `state` on `input`, `None` if they have not been observed.
    pub fn trace(
        &self,
        state: StateId,
        input: &[Q::Symbol],
    ) -> Result<Option<Vec<Q::Output>>, AdtError> {
        let mut current = self.node_of(state)?;
        let mut out = Vec::with_capacity(input.len());
        for sym in input {
            let Some((output, next)) = self.nodes[current].successors.get(sym) else {
                return Ok(None);
            };
            out.push(output.clone());
            current = *next;
        }
        Ok(Some(out))
    }

    /// Searches for a shortest word that separates `first` and `second` after both have read
    /// `prefix`, using only what has been observed so far.
    pub fn find_separating_word(
        &self,
        first: StateId,
        second: StateId,
        prefix: &[Q::Symbol],
    ) -> Result<Option<Vec<Q::Symbol>>, AdtError> {
        let (Some(p), Some(q)) = (
            self.successor(self.node_of(first)?, prefix),
            self.successor(self.node_of(second)?, prefix),
        ) else {
            return Ok(None);
        };

        let mut queue: VecDeque<(Vec<Q::Symbol>, usize, usize)> =
            VecDeque::from([(vec![], p, q)]);
        while let Some((word, p, q)) = queue.pop_front() {
            for (sym, (p_out, p_next)) in &self.nodes[p].successors {
                let Some((q_out, q_next)) = self.nodes[q].successors.get(sym) else {
                    continue;
                };
                if p_out != q_out {
                    return Ok(Some(word.with_symbol(*sym)));
                }
                queue.push_back((word.with_symbol(*sym), *p_next, *q_next));
            }
        }
        Ok(None)
    }

    /// Poses `prefix` followed by `suffix` to the wrapped oracle, bypassing the cache. The
    /// observations are recorded nevertheless. Returns the outputs on `suffix`.
    pub fn query_uncached(
        &mut self,
        prefix: &[Q::Symbol],
        suffix: &[Q::Symbol],
    ) -> Vec<Q::Output> {
        self.sul.reset();
        let mut node = ROOT;
        let mut out = Vec::with_capacity(suffix.len());
        for (i, sym) in prefix.iter().chain(suffix).enumerate() {
            let output = self.sul.query(*sym);
            node = self.insert_step(node, *sym, output.clone());
            if i >= prefix.len() {
                out.push(output);
            }
        }
        self.sul_at = Some(node);
        self.cursor = node;
        out
    }
}

impl<Q: SymbolOracle> SymbolOracle for ObservationTree<Q> {
    type Symbol = Q::Symbol;
    type Output = Q::Output;

    fn reset(&mut self) {
        self.cursor = ROOT;
        if !self.use_cache {
            self.sul.reset();
            self.sul_at = Some(ROOT);
        }
    }

    fn query(&mut self, symbol: Q::Symbol) -> Q::Output {
        if self.use_cache {
            if let Some((output, next)) = self.nodes[self.cursor].successors.get(&symbol) {
                self.cursor = *next;
                return output.clone();
            }
        }
        if self.sul_at != Some(self.cursor) {
            trace!("replaying {} on the system", self.path(self.cursor).as_string());
            self.sul.reset();
            for sym in self.path(self.cursor) {
                self.sul.query(sym);
            }
        }
        let output = self.sul.query(symbol);
        self.cursor = self.insert_step(self.cursor, symbol, output.clone());
        self.sul_at = Some(self.cursor);
        output
    }
}
