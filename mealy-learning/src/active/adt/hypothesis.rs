use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Debug,
};

use mealy::prelude::*;
use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};

use super::{AdtError, NodeId};
use crate::active::Hypothesis;

/// Identifies a state of an [`AdtHypothesis`]. States are numbered densely in the order in which
/// they are created and never removed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct StateId(pub usize);

/// Identifies a transition of an [`AdtHypothesis`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct TransitionId(pub usize);

impl Show for StateId {
    fn show(&self) -> String {
        format!("q{}", self.0)
    }
}

impl Show for TransitionId {
    fn show(&self) -> String {
        format!("t{}", self.0)
    }
}

/// A state of the hypothesis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdtState<S: Symbol> {
    access_sequence: Option<Vec<S>>,
    incoming: BTreeSet<TransitionId>,
    transitions: BTreeMap<S, TransitionId>,
}

impl<S: Symbol> AdtState<S> {
    fn new() -> Self {
        Self {
            access_sequence: None,
            incoming: BTreeSet::new(),
            transitions: BTreeMap::new(),
        }
    }

    /// The transitions that currently lead into this state.
    pub fn incoming(&self) -> &BTreeSet<TransitionId> {
        &self.incoming
    }
}

/// A transition of the hypothesis. As long as its target is unknown, the transition is called
/// open and it remembers the node of the tree from which sifting should continue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdtTransition<S, O> {
    source: StateId,
    input: S,
    output: Option<O>,
    target: Option<StateId>,
    spanning_tree_edge: bool,
    sift_node: NodeId,
}

impl<S: Symbol, O: Color> AdtTransition<S, O> {
    /// The state in which the transition starts.
    pub fn source(&self) -> StateId {
        self.source
    }

    /// The symbol on which the transition is taken.
    pub fn input(&self) -> S {
        self.input
    }

    /// The last output that was observed on this transition.
    pub fn output(&self) -> Option<&O> {
        self.output.as_ref()
    }

    /// The target state, if it is known.
    pub fn target(&self) -> Option<StateId> {
        self.target
    }

    /// Whether the transition is used by the access sequence of its target.
    pub fn is_spanning_tree_edge(&self) -> bool {
        self.spanning_tree_edge
    }

    /// The node of the tree from which sifting continues.
    pub fn sift_node(&self) -> NodeId {
        self.sift_node
    }

    /// A transition needs sifting as long as its target is unknown.
    pub fn needs_sifting(&self) -> bool {
        self.target.is_none()
    }
}

/// The hypothesis that an [`super::AdtLearner`] maintains. This is a deterministic Mealy machine
/// which may be partial while transitions are still open. Every state knows its access sequence
/// and the transitions leading into it, which allows the learner to invalidate exactly those
/// transitions whose target might change when a state is split.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "A: Serialize, A::Symbol: Serialize, O: Serialize",
    deserialize = "A: Deserialize<'de>, A::Symbol: Deserialize<'de>, O: Deserialize<'de>"
))]
pub struct AdtHypothesis<A: Alphabet, O: Color> {
    alphabet: A,
    states: Vec<AdtState<A::Symbol>>,
    transitions: Vec<AdtTransition<A::Symbol, O>>,
    initial: Option<StateId>,
}

impl<A: Alphabet, O: Color> AdtHypothesis<A, O> {
    /// Creates an empty hypothesis over the given alphabet.
    pub fn new(alphabet: A) -> Self {
        Self {
            alphabet,
            states: vec![],
            transitions: vec![],
            initial: None,
        }
    }

    /// Adds the initial state, whose access sequence is the empty word.
    pub fn add_initial_state(&mut self) -> StateId {
        let state = self.add_state();
        self.states[state.0].access_sequence = Some(vec![]);
        self.initial = Some(state);
        state
    }

    /// Adds a new state. Its access sequence has to be assigned with
    /// [`AdtHypothesis::set_access_sequence`].
    pub fn add_state(&mut self) -> StateId {
        self.states.push(AdtState::new());
        StateId(self.states.len() - 1)
    }

    /// Returns an iterator over all states.
    pub fn states(&self) -> impl Iterator<Item = StateId> + '_ {
        (0..self.states.len()).map(StateId)
    }

    /// Returns the data of `state`.
    pub fn state(&self, state: StateId) -> Option<&AdtState<A::Symbol>> {
        self.states.get(state.0)
    }

    /// Sets the access sequence of `state`, which can only happen once.
    pub fn set_access_sequence(
        &mut self,
        state: StateId,
        access_sequence: Vec<A::Symbol>,
    ) -> Result<(), AdtError> {
        let data = self
            .states
            .get_mut(state.0)
            .ok_or(AdtError::UnknownState(state))?;
        assert!(
            data.access_sequence.is_none(),
            "access sequence of {} is already set",
            state.show()
        );
        data.access_sequence = Some(access_sequence);
        Ok(())
    }

    /// Creates the transition from `state` on `symbol` with unknown target. Sifting will start at
    /// `sift_node`. The transition is not scheduled for sifting, that is up to the caller. If
    /// the transition exists already, it is reset to be open.
    pub fn create_open_transition(
        &mut self,
        state: StateId,
        symbol: A::Symbol,
        sift_node: NodeId,
    ) -> Result<TransitionId, AdtError> {
        if !self.alphabet.contains(symbol) {
            return Err(AdtError::UnknownSymbol(symbol.show()));
        }
        let data = self
            .states
            .get(state.0)
            .ok_or(AdtError::UnknownState(state))?;
        if let Some(&existing) = data.transitions.get(&symbol) {
            self.set_target(existing, None);
            self.set_sift_node(existing, sift_node);
            self.transitions[existing.0].output = None;
            self.transitions[existing.0].spanning_tree_edge = false;
            return Ok(existing);
        }

        let id = TransitionId(self.transitions.len());
        self.transitions.push(AdtTransition {
            source: state,
            input: symbol,
            output: None,
            target: None,
            spanning_tree_edge: false,
            sift_node,
        });
        self.states[state.0].transitions.insert(symbol, id);
        Ok(id)
    }

    /// Returns the transition from `state` on `symbol`.
    pub fn transition(&self, state: StateId, symbol: A::Symbol) -> Option<TransitionId> {
        self.states.get(state.0)?.transitions.get(&symbol).copied()
    }

    /// Returns the data of the transition with the given id.
    ///
    /// # Panics
    /// If no such transition exists, transition ids are only handed out by the hypothesis itself.
    pub fn transition_data(&self, id: TransitionId) -> &AdtTransition<A::Symbol, O> {
        &self.transitions[id.0]
    }

    /// Sets (or clears) the target of a transition, keeping the incoming transitions of the
    /// involved states up to date.
    pub fn set_target(&mut self, id: TransitionId, target: Option<StateId>) {
        if let Some(previous) = self.transitions[id.0].target.take() {
            self.states[previous.0].incoming.remove(&id);
        }
        if let Some(target) = target {
            self.states[target.0].incoming.insert(id);
        }
        self.transitions[id.0].target = target;
    }

    /// Sets the output of a transition.
    pub fn set_output(&mut self, id: TransitionId, output: O) {
        self.transitions[id.0].output = Some(output);
    }

    /// Marks a transition as being part of the spanning tree of access sequences.
    pub fn set_spanning_tree_edge(&mut self, id: TransitionId, spanning: bool) {
        self.transitions[id.0].spanning_tree_edge = spanning;
    }

    /// Sets the node from which sifting the transition continues.
    pub fn set_sift_node(&mut self, id: TransitionId, node: NodeId) {
        self.transitions[id.0].sift_node = node;
    }

    /// Returns true if the transition still has to be sifted.
    pub fn needs_sifting(&self, id: TransitionId) -> bool {
        self.transitions[id.0].needs_sifting()
    }

    /// The transitions leading into `state` which are not used by any access sequence. Their
    /// targets have to be recomputed whenever `state` is split.
    pub fn incoming_non_spanning_tree_transitions(&self, state: StateId) -> Vec<TransitionId> {
        self.states
            .get(state.0)
            .map(|data| {
                data.incoming
                    .iter()
                    .filter(|t| !self.transitions[t.0].spanning_tree_edge)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Iterates over all transitions that still need sifting.
    pub fn open_transitions(&self) -> impl Iterator<Item = TransitionId> + '_ {
        self.transitions
            .iter()
            .enumerate()
            .filter(|(_, t)| t.needs_sifting())
            .map(|(i, _)| TransitionId(i))
    }

    /// Appends `symbol` to the alphabet of the hypothesis. Returns false if it was present.
    pub fn add_alphabet_symbol(&mut self, symbol: A::Symbol) -> bool
    where
        A: GrowingAlphabet,
    {
        self.alphabet.add_symbol(symbol)
    }
}

#[cfg(test)]
impl AdtHypothesis<CharAlphabet, usize> {
    /// Copies `mm` with all transitions closed, the access sequences are its minimal
    /// representatives.
    pub(crate) fn from_machine(mm: &MealyMachine) -> Self {
        let mut hyp = AdtHypothesis::new(mm.alphabet().clone());
        hyp.add_initial_state();
        for _ in 1..mm.size() {
            hyp.add_state();
        }
        for (access, q) in mm.minimal_representatives() {
            if q != 0 {
                hyp.set_access_sequence(StateId(q), access)
                    .expect("every state has one representative");
            }
        }
        for q in mm.state_indices() {
            for sym in mm.alphabet().universe() {
                let t = hyp
                    .create_open_transition(StateId(q), sym, NodeId(0))
                    .expect("state exists");
                hyp.set_output(t, mm.transition_output(q, sym).expect("machine is complete"));
                hyp.set_target(t, mm.successor(q, sym).map(StateId));
            }
        }
        hyp
    }
}

impl<A: Alphabet, O: Color> Mealy for AdtHypothesis<A, O> {
    type Alphabet = A;
    type Output = O;
    type StateIndex = StateId;

    fn alphabet(&self) -> &A {
        &self.alphabet
    }

    fn initial(&self) -> Option<StateId> {
        self.initial
    }

    fn state_indices(&self) -> Vec<StateId> {
        self.states().collect()
    }

    fn size(&self) -> usize {
        self.states.len()
    }

    fn successor(&self, state: StateId, symbol: A::Symbol) -> Option<StateId> {
        let id = self.transition(state, symbol)?;
        self.transitions[id.0].target
    }

    fn transition_output(&self, state: StateId, symbol: A::Symbol) -> Option<O> {
        let id = self.transition(state, symbol)?;
        self.transitions[id.0].output.clone()
    }
}

impl<A: Alphabet, O: Color> Hypothesis for AdtHypothesis<A, O> {
    fn access_sequence(&self, state: StateId) -> Option<&[A::Symbol]> {
        self.states.get(state.0)?.access_sequence.as_deref()
    }
}

impl<A: Alphabet, O: Color> Debug for AdtHypothesis<A, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut builder = tabled::builder::Builder::default();
        builder.push_record(
            ["State".to_string(), "Access".to_string()]
                .into_iter()
                .chain(self.alphabet.universe().map(|s| s.show())),
        );
        for state in self.states() {
            let name = if Some(state) == self.initial {
                format!("{}", state.show().bold())
            } else {
                state.show()
            };
            let access = self
                .access_sequence(state)
                .map_or("?".to_string(), |w| w.as_string());
            let mut row = vec![name, access];
            for sym in self.alphabet.universe() {
                row.push(match self.transition(state, sym) {
                    None => "-".to_string(),
                    Some(id) => {
                        let t = &self.transitions[id.0];
                        let output = t.output.as_ref().map_or("?".to_string(), |o| o.show());
                        let target = t.target.map_or("?".to_string(), |q| q.show());
                        format!("{target}|{}", output.blue())
                    }
                });
            }
            builder.push_record(row);
        }
        write!(
            f,
            "{}",
            builder.build().with(tabled::settings::Style::rounded())
        )
    }
}
