use std::{collections::VecDeque, fmt::Debug, hash::Hash};

use itertools::Itertools;
use owo_colors::OwoColorize;

use crate::{math, prelude::*};

/// Helper type that gives the symbol type of a [`Mealy`] machine.
pub type SymbolOf<M> = <<M as Mealy>::Alphabet as Alphabet>::Symbol;
/// Helper type that gives the state index type of a [`Mealy`] machine.
pub type StateIndexOf<M> = <M as Mealy>::StateIndex;

/// A Mealy machine is a deterministic transition system where each transition has an output.
/// Running a Mealy machine on a word produces a sequence of outputs, one for each transition
/// that is taken. Since the empty word does not take any transitions, it does not produce any
/// output. For a word of length `n`, there are `n` outputs.
///
/// Implementors may be partial, i.e. some transitions can be missing. This is for example the case
/// for hypotheses of a learning algorithm whose transitions are still being closed. All provided
/// methods return `None` whenever a run leaves the defined part of the machine.
pub trait Mealy {
    /// The alphabet of input symbols.
    type Alphabet: Alphabet;
    /// The type of output that a transition produces.
    type Output: Color;
    /// The type that is used to index the states.
    type StateIndex: Copy + Eq + Hash + Ord + Debug;

    /// Returns a reference to the input alphabet.
    fn alphabet(&self) -> &Self::Alphabet;

    /// Returns the initial state or `None` if the machine does not have any states yet.
    fn initial(&self) -> Option<Self::StateIndex>;

    /// Returns all state indices, in ascending order.
    fn state_indices(&self) -> Vec<Self::StateIndex>;

    /// Returns the state that is reached from `state` on `symbol`, if that transition exists.
    fn successor(&self, state: Self::StateIndex, symbol: SymbolOf<Self>)
        -> Option<Self::StateIndex>;

    /// Returns the output that is produced when reading `symbol` in `state`.
    fn transition_output(
        &self,
        state: Self::StateIndex,
        symbol: SymbolOf<Self>,
    ) -> Option<Self::Output>;

    /// Returns the number of states.
    fn size(&self) -> usize {
        self.state_indices().len()
    }

    /// Runs `word` from `state` and returns the reached state.
    fn reached_state_from(
        &self,
        state: Self::StateIndex,
        word: &[SymbolOf<Self>],
    ) -> Option<Self::StateIndex> {
        word.iter()
            .try_fold(state, |current, &sym| self.successor(current, sym))
    }

    /// Runs `word` from the initial state and returns the reached state.
    fn reached_state(&self, word: &[SymbolOf<Self>]) -> Option<Self::StateIndex> {
        self.reached_state_from(self.initial()?, word)
    }

    /// Computes the outputs that are produced when reading `word` from `state`.
    fn compute_state_output(
        &self,
        state: Self::StateIndex,
        word: &[SymbolOf<Self>],
    ) -> Option<Vec<Self::Output>> {
        let mut current = state;
        let mut out = Vec::with_capacity(word.len());
        for &sym in word {
            out.push(self.transition_output(current, sym)?);
            current = self.successor(current, sym)?;
        }
        Some(out)
    }

    /// Computes the outputs that are produced when reading `word` from the initial state.
    fn compute_output(&self, word: &[SymbolOf<Self>]) -> Option<Vec<Self::Output>> {
        self.compute_state_output(self.initial()?, word)
    }

    /// Reads `prefix` silently and returns only the outputs produced on `suffix` afterwards.
    fn compute_suffix_output(
        &self,
        prefix: &[SymbolOf<Self>],
        suffix: &[SymbolOf<Self>],
    ) -> Option<Vec<Self::Output>> {
        self.compute_state_output(self.reached_state(prefix)?, suffix)
    }

    /// Returns the reachable states together with a length-lexicographically minimal word
    /// reaching them, in breadth-first order.
    fn minimal_representatives(&self) -> Vec<(Vec<SymbolOf<Self>>, Self::StateIndex)> {
        let Some(initial) = self.initial() else {
            return vec![];
        };
        let mut seen = math::Set::default();
        seen.insert(initial);
        let mut queue: VecDeque<(Vec<SymbolOf<Self>>, _)> = VecDeque::from([(vec![], initial)]);
        let mut out = vec![];
        while let Some((word, state)) = queue.pop_front() {
            for sym in self.alphabet().universe() {
                if let Some(target) = self.successor(state, sym) {
                    if seen.insert(target) {
                        queue.push_back((word.with_symbol(sym), target));
                    }
                }
            }
            out.push((word, state));
        }
        out
    }

    /// Returns all states that can be reached from the initial state.
    fn reachable_states(&self) -> Vec<Self::StateIndex> {
        self.minimal_representatives()
            .into_iter()
            .map(|(_, q)| q)
            .collect()
    }

    /// Computes a shortest word on which `left` and `right` produce different outputs. A word
    /// that can be read from one of the states but not from the other also counts as separating.
    fn find_separating_word(
        &self,
        left: Self::StateIndex,
        right: Self::StateIndex,
    ) -> Option<Vec<SymbolOf<Self>>> {
        separate(self, left, self, right)
    }

    /// Attempts to construct a word that separates the two machines, meaning it produces
    /// different outputs when run in both of them. Missing transitions on one side are used
    /// as witnesses as well. If no such word exists, `None` is returned.
    fn witness_inequivalence<M>(&self, other: &M) -> Option<Vec<SymbolOf<Self>>>
    where
        M: Mealy<Alphabet = Self::Alphabet, Output = Self::Output>,
    {
        match (self.initial(), other.initial()) {
            (Some(l), Some(r)) => separate(self, l, other, r),
            (None, None) => None,
            _ => Some(vec![]),
        }
    }

    /// Returns true if and only if both machines produce the same output on every input.
    fn bisimilar<M>(&self, other: &M) -> bool
    where
        M: Mealy<Alphabet = Self::Alphabet, Output = Self::Output>,
    {
        self.witness_inequivalence(other).is_none()
    }

    /// Collects the reachable part of `self` into a [`MealyMachine`]. States are renumbered in
    /// breadth-first order, so the initial state is always `0`. Undefined transitions stay
    /// undefined. Returns `None` if there is no initial state.
    fn collect_mealy(&self) -> Option<MealyMachine<Self::Alphabet, Self::Output>> {
        let reachable = self.reachable_states();
        if reachable.is_empty() {
            return None;
        }
        let index: math::Map<_, _> = reachable
            .iter()
            .enumerate()
            .map(|(i, q)| (*q, i))
            .collect();
        let mut out = MealyMachine::for_alphabet(self.alphabet().clone());
        for _ in 0..reachable.len() {
            out.add_state();
        }
        for (i, &q) in reachable.iter().enumerate() {
            for sym in self.alphabet().universe() {
                if let (Some(target), Some(output)) =
                    (self.successor(q, sym), self.transition_output(q, sym))
                {
                    out.add_transition(i, sym, output, index[&target]);
                }
            }
        }
        Some(out)
    }
}

/// Breadth-first search through the pairs of states of `left` and `right`.
fn separate<L, R>(
    left: &L,
    l: L::StateIndex,
    right: &R,
    r: R::StateIndex,
) -> Option<Vec<SymbolOf<L>>>
where
    L: Mealy + ?Sized,
    R: Mealy<Alphabet = L::Alphabet, Output = L::Output> + ?Sized,
{
    let mut seen = math::Set::default();
    seen.insert((l, r));
    let mut queue: VecDeque<(Vec<SymbolOf<L>>, _, _)> = VecDeque::from([(vec![], l, r)]);
    while let Some((word, p, q)) = queue.pop_front() {
        for sym in left.alphabet().universe() {
            let lo = left.transition_output(p, sym);
            let ro = right.transition_output(q, sym);
            if lo != ro {
                return Some(word.with_symbol(sym));
            }
            if let (Some(ls), Some(rs)) = (left.successor(p, sym), right.successor(q, sym)) {
                if seen.insert((ls, rs)) {
                    queue.push_back((word.with_symbol(sym), ls, rs));
                }
            }
        }
    }
    None
}

/// A concrete, possibly partial, deterministic Mealy machine whose states are indexed by
/// `usize`. The transitions of each state are stored in a map from symbol to target and output.
#[derive(Clone, PartialEq, Eq)]
pub struct MealyMachine<A: Alphabet = CharAlphabet, O = usize> {
    alphabet: A,
    initial: usize,
    transitions: Vec<math::Map<A::Symbol, (usize, O)>>,
}

impl<A: Alphabet, O: Color> MealyMachine<A, O> {
    /// Creates an empty machine over `alphabet`. The first state that is added is initial.
    pub fn for_alphabet(alphabet: A) -> Self {
        Self {
            alphabet,
            initial: 0,
            transitions: vec![],
        }
    }

    /// Builds a machine from a list of transitions `(source, symbol, output, target)`. The
    /// number of states is one more than the largest index that is mentioned.
    ///
    /// # Example
    /// ```
    /// use mealy::prelude::*;
    ///
    /// let mm = MealyMachine::from_transitions(
    ///     CharAlphabet::of_size(2),
    ///     0,
    ///     [(0, 'a', 0, 1), (0, 'b', 1, 0), (1, 'a', 1, 0), (1, 'b', 0, 1)],
    /// );
    /// assert_eq!(mm.compute_output(&['a', 'a', 'b']), Some(vec![0, 1, 1]));
    /// ```
    pub fn from_transitions<I>(alphabet: A, initial: usize, transitions: I) -> Self
    where
        I: IntoIterator<Item = (usize, A::Symbol, O, usize)>,
    {
        let transitions = transitions.into_iter().collect_vec();
        let states = transitions
            .iter()
            .flat_map(|(p, _, _, q)| [*p, *q])
            .chain(std::iter::once(initial))
            .max()
            .map_or(0, |m| m + 1);
        let mut out = Self::for_alphabet(alphabet);
        out.transitions = vec![math::Map::default(); states];
        out.initial = initial;
        for (p, sym, o, q) in transitions {
            out.add_transition(p, sym, o, q);
        }
        out
    }

    /// Adds a new state without transitions and returns its index.
    pub fn add_state(&mut self) -> usize {
        self.transitions.push(math::Map::default());
        self.transitions.len() - 1
    }

    /// Sets the initial state.
    pub fn set_initial(&mut self, state: usize) {
        assert!(state < self.transitions.len(), "state does not exist");
        self.initial = state;
    }

    /// Adds (or overwrites) the transition from `source` on `symbol`. Returns the previous
    /// target and output, if there was one.
    pub fn add_transition(
        &mut self,
        source: usize,
        symbol: A::Symbol,
        output: O,
        target: usize,
    ) -> Option<(usize, O)> {
        assert!(
            source < self.transitions.len() && target < self.transitions.len(),
            "transition between states that do not exist"
        );
        self.transitions[source].insert(symbol, (target, output))
    }

    /// Returns true if every state has a transition on every symbol.
    pub fn is_complete(&self) -> bool {
        self.transitions
            .iter()
            .all(|edges| self.alphabet.universe().all(|sym| edges.contains_key(&sym)))
    }

    /// Returns an iterator over all outputs that occur on some transition, without duplicates.
    pub fn output_range(&self) -> impl Iterator<Item = &O> + '_ {
        self.transitions
            .iter()
            .flat_map(|edges| edges.values().map(|(_, o)| o))
            .unique()
    }
}

impl<A: Alphabet, O: Color> Mealy for MealyMachine<A, O> {
    type Alphabet = A;
    type Output = O;
    type StateIndex = usize;

    fn alphabet(&self) -> &A {
        &self.alphabet
    }

    fn initial(&self) -> Option<usize> {
        (!self.transitions.is_empty()).then_some(self.initial)
    }

    fn state_indices(&self) -> Vec<usize> {
        (0..self.transitions.len()).collect()
    }

    fn size(&self) -> usize {
        self.transitions.len()
    }

    fn successor(&self, state: usize, symbol: A::Symbol) -> Option<usize> {
        self.transitions.get(state)?.get(&symbol).map(|(q, _)| *q)
    }

    fn transition_output(&self, state: usize, symbol: A::Symbol) -> Option<O> {
        self.transitions
            .get(state)?
            .get(&symbol)
            .map(|(_, o)| o.clone())
    }
}

impl<A: Alphabet, O: Color> Debug for MealyMachine<A, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut builder = tabled::builder::Builder::default();
        builder.push_record(
            std::iter::once("State".to_string())
                .chain(self.alphabet.universe().map(|s| s.show())),
        );
        for (id, edges) in self.transitions.iter().enumerate() {
            let name = if id == self.initial {
                format!("{}", format!("q{id}").bold())
            } else {
                format!("q{id}")
            };
            let mut row = vec![name];
            for sym in self.alphabet.universe() {
                row.push(match edges.get(&sym) {
                    Some((q, o)) => format!("q{q}|{}", o.show().blue()),
                    None => "-".to_string(),
                });
            }
            builder.push_record(row);
        }
        write!(
            f,
            "{}",
            builder
                .build()
                .with(tabled::settings::Style::rounded())
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    fn three_cycle(last: usize) -> MealyMachine {
        MealyMachine::from_transitions(
            CharAlphabet::of_size(2),
            0,
            [
                (0, 'a', 1, 0),
                (0, 'b', 0, 1),
                (1, 'a', 1, 0),
                (1, 'b', 0, 2),
                (2, 'a', 1, 0),
                (2, 'b', last, 0),
            ],
        )
    }

    #[test]
    fn mealy_equivalence() {
        let mm1 = three_cycle(0);
        let mm2 = three_cycle(1);
        assert_eq!(mm1.witness_inequivalence(&mm2), Some(vec!['b', 'b', 'b']));
        assert!(mm1.bisimilar(&mm1.clone()));
        assert_eq!(mm1.find_separating_word(0, 2), None);
        assert_eq!(mm2.find_separating_word(0, 2), Some(vec!['b']));
        assert_eq!(mm2.find_separating_word(0, 1), Some(vec!['b', 'b']));
    }

    #[test]
    fn mealy_outputs() {
        let mm = three_cycle(1);
        assert_eq!(mm.compute_output(&[]), Some(vec![]));
        assert_eq!(mm.compute_output(&['b', 'b', 'b']), Some(vec![0, 0, 1]));
        assert_eq!(mm.compute_suffix_output(&['b'], &['b', 'b']), Some(vec![0, 1]));
        assert_eq!(mm.reached_state(&['b', 'b']), Some(2));
        assert_eq!(mm.output_range().count(), 2);
        assert!(mm.is_complete());
    }

    #[test]
    fn partial_machines_are_separated_by_missing_transitions() {
        let alphabet = CharAlphabet::of_size(2);
        let full = MealyMachine::from_transitions(
            alphabet.clone(),
            0,
            [(0, 'a', 1, 0), (0, 'b', 0, 0)],
        );
        let partial = MealyMachine::from_transitions(alphabet, 0, [(0, 'a', 1, 0)]);
        assert!(!partial.is_complete());
        assert_eq!(partial.compute_output(&['a', 'b']), None);
        assert_eq!(full.witness_inequivalence(&partial), Some(vec!['b']));
    }

    #[test]
    fn collect_drops_unreachable_states() {
        let mm = MealyMachine::from_transitions(
            CharAlphabet::of_size(1),
            1,
            [(0, 'a', 0, 1), (1, 'a', 1, 2), (2, 'a', 2, 1)],
        );
        let collected = mm.collect_mealy().unwrap();
        assert_eq!(collected.size(), 2);
        assert_eq!(collected.initial(), Some(0));
        assert!(collected.bisimilar(&mm));
    }
}
