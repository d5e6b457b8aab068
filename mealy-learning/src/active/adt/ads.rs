use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    fmt::Debug,
};

use mealy::prelude::*;
use tracing::trace;

use super::AdtError;

/// Upper bound on the number of (prefix, symbol) combinations that a single call to
/// [`compute_ads`] examines before giving up.
const MAX_EXPLORED: usize = 1 << 14;

/// An adaptive distinguishing sequence, i.e. a decision tree without reset nodes whose leaves
/// are labelled with states. This is the owned counterpart to a subtree of an
/// [`super::Adt`], which can be materialized with [`super::Adt::insert_ads`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ads<S, O, St> {
    /// Identifies a single state.
    Leaf(St),
    /// Queries `symbol` and continues depending on the output.
    Symbol {
        /// The symbol that is posed.
        symbol: S,
        /// The continuation for each output.
        children: BTreeMap<O, Ads<S, O, St>>,
    },
}

impl<S: Symbol, O: Color, St: Copy> Ads<S, O, St> {
    /// The states at the leaves, ordered by output.
    pub fn states(&self) -> Vec<St> {
        match self {
            Ads::Leaf(state) => vec![*state],
            Ads::Symbol { children, .. } => children.values().flat_map(Ads::states).collect(),
        }
    }

    /// Number of symbols that are posed on the longest path.
    pub fn depth(&self) -> usize {
        match self {
            Ads::Leaf(_) => 0,
            Ads::Symbol { children, .. } => {
                1 + children.values().map(Ads::depth).max().unwrap_or(0)
            }
        }
    }

    /// For every leaf, its state together with the input and output trace leading to it.
    pub fn traces(&self) -> Vec<(St, Vec<S>, Vec<O>)> {
        match self {
            Ads::Leaf(state) => vec![(*state, vec![], vec![])],
            Ads::Symbol { symbol, children } => children
                .iter()
                .flat_map(|(output, child)| {
                    child.traces().into_iter().map(|(state, input, out)| {
                        let input = std::iter::once(*symbol).chain(input).collect();
                        let out = std::iter::once(output.clone()).chain(out).collect();
                        (state, input, out)
                    })
                })
                .collect(),
        }
    }

    /// Relabels every leaf.
    pub fn map_states<T, F: Fn(St) -> T>(&self, f: &F) -> Ads<S, O, T> {
        match self {
            Ads::Leaf(state) => Ads::Leaf(f(*state)),
            Ads::Symbol { symbol, children } => Ads::Symbol {
                symbol: *symbol,
                children: children
                    .iter()
                    .map(|(o, child)| (o.clone(), child.map_states(f)))
                    .collect(),
            },
        }
    }

    /// Prepends a chain of symbol nodes that follows `outputs` on `inputs`.
    fn behind(self, inputs: &[S], outputs: &[O]) -> Self {
        inputs
            .iter()
            .zip(outputs)
            .rev()
            .fold(self, |ads, (symbol, output)| Ads::Symbol {
                symbol: *symbol,
                children: BTreeMap::from([(output.clone(), ads)]),
            })
    }
}

struct Search<'a, S, St, F> {
    symbols: &'a [S],
    max_length: usize,
    step: F,
    failed: BTreeSet<BTreeSet<St>>,
    explored: usize,
}

impl<S, St, F> Search<'_, S, St, F>
where
    S: Symbol,
    St: Copy + Ord + Debug,
{
    /// `mapping` goes from the state that is currently reached to the state it originated in.
    fn compute<O: Color>(
        &mut self,
        mapping: BTreeMap<St, St>,
    ) -> Result<Option<Ads<S, O, St>>, AdtError>
    where
        F: FnMut(St, S) -> Result<Option<(St, O)>, AdtError>,
    {
        if mapping.len() == 1 {
            return Ok(mapping.values().next().map(|origin| Ads::Leaf(*origin)));
        }
        let key: BTreeSet<St> = mapping.keys().copied().collect();
        if self.failed.contains(&key) {
            return Ok(None);
        }

        let mut seen = BTreeSet::from([key.clone()]);
        let mut queue: VecDeque<(Vec<S>, Vec<O>, BTreeMap<St, St>)> =
            VecDeque::from([(vec![], vec![], mapping)]);

        while let Some((inputs, outputs, current)) = queue.pop_front() {
            'symbols: for &sym in self.symbols {
                self.explored += 1;
                if self.explored > MAX_EXPLORED {
                    trace!("giving up ADS search after {MAX_EXPLORED} steps");
                    return Ok(None);
                }

                let mut blocks: BTreeMap<O, BTreeMap<St, St>> = BTreeMap::new();
                for (&state, &origin) in &current {
                    let Some((next, output)) = (self.step)(state, sym)? else {
                        continue 'symbols;
                    };
                    if blocks
                        .entry(output)
                        .or_default()
                        .insert(next, origin)
                        .is_some()
                    {
                        // two states converge without being told apart
                        continue 'symbols;
                    }
                }

                if blocks.len() > 1 {
                    let mut children = BTreeMap::new();
                    for (output, block) in blocks {
                        match self.compute(block)? {
                            Some(ads) => {
                                children.insert(output, ads);
                            }
                            None => continue 'symbols,
                        }
                    }
                    let ads = Ads::Symbol {
                        symbol: sym,
                        children,
                    };
                    return Ok(Some(ads.behind(&inputs, &outputs)));
                }

                let Some((output, next)) = blocks.into_iter().next() else {
                    continue;
                };
                if inputs.len() + 1 < self.max_length && seen.insert(next.keys().copied().collect())
                {
                    let mut outputs = outputs.clone();
                    outputs.push(output);
                    queue.push_back((inputs.with_symbol(sym), outputs, next));
                }
            }
        }

        self.failed.insert(key);
        Ok(None)
    }
}

/// Computes an adaptive distinguishing sequence for `states`, which has to separate all of them
/// without two of them ever reaching the same state before they are told apart. Candidate words
/// are explored breadth first over `symbols` up to length `max_length`, so splitting words are as
/// short as possible.
///
/// `step` gives the successor and output of a state on a symbol. It may return `None` if the
/// symbol should not be used in the given state, and errors are passed on unchanged.
///
/// Returns `Ok(None)` if no such sequence could be found. The leaves of the result are labelled
/// with the given states.
pub fn compute_ads<S, O, St, F>(
    states: &[St],
    symbols: &[S],
    max_length: usize,
    step: F,
) -> Result<Option<Ads<S, O, St>>, AdtError>
where
    S: Symbol,
    O: Color,
    St: Copy + Ord + Debug,
    F: FnMut(St, S) -> Result<Option<(St, O)>, AdtError>,
{
    if states.is_empty() {
        return Ok(None);
    }
    let mut search = Search {
        symbols,
        max_length,
        step,
        failed: BTreeSet::new(),
        explored: 0,
    };
    search.compute(states.iter().map(|q| (*q, *q)).collect())
}

#[cfg(test)]
mod tests {
    use mealy::prelude::*;

    use super::{compute_ads, Ads};
    use crate::active::adt::AdtError;

    fn ads_for(mm: &MealyMachine, states: &[usize]) -> Option<Ads<char, usize, usize>> {
        let symbols: Vec<_> = mm.alphabet().universe().collect();
        compute_ads(states, &symbols, mm.size(), |q, sym| {
            Ok(mm.successor(q, sym).zip(mm.transition_output(q, sym)))
        })
        .unwrap()
    }

    #[test_log::test]
    fn adaptive_sequences() {
        let mm = MealyMachine::from_transitions(
            CharAlphabet::of_size(2),
            0,
            [
                (0, 'a', 0, 0),
                (0, 'b', 0, 1),
                (1, 'a', 0, 1),
                (1, 'b', 0, 2),
                (2, 'a', 1, 2),
                (2, 'b', 0, 0),
            ],
        );
        let ads = ads_for(&mm, &[0, 1, 2]).unwrap();
        let Ads::Symbol { symbol, children } = &ads else {
            panic!("expected a symbol node");
        };
        assert_eq!(*symbol, 'a');
        assert_eq!(children[&1], Ads::Leaf(2));
        assert_eq!(ads.depth(), 3);
        assert_eq!(ads.states(), vec![0, 1, 2]);
        assert_eq!(
            ads.traces(),
            vec![
                (0, vec!['a', 'b', 'a'], vec![0, 0, 0]),
                (1, vec!['a', 'b', 'a'], vec![0, 0, 1]),
                (2, vec!['a'], vec![1]),
            ]
        );

        // 'b' leads into states 1 and 2, which 'a' tells apart
        let pair = ads_for(&mm, &[0, 1]).unwrap();
        assert_eq!(pair.depth(), 2);
        assert_eq!(pair.map_states(&|q| q + 10).states(), vec![10, 11]);

        assert_eq!(ads_for(&mm, &[1]), Some(Ads::Leaf(1)));
    }

    #[test_log::test]
    fn converging_states_have_no_sequence() {
        let mm = MealyMachine::from_transitions(
            CharAlphabet::of_size(2),
            0,
            [
                (0, 'a', 0, 2),
                (0, 'b', 0, 2),
                (1, 'a', 0, 2),
                (1, 'b', 0, 2),
                (2, 'a', 0, 2),
                (2, 'b', 1, 2),
            ],
        );
        assert_eq!(ads_for(&mm, &[0, 1]), None);
        assert!(ads_for(&mm, &[0, 2]).is_some());
    }

    #[test]
    fn errors_of_the_step_function_are_passed_on() {
        let result: Result<Option<Ads<char, usize, usize>>, _> =
            compute_ads(&[0, 1], &['a'], 3, |_, _| Err(AdtError::HypothesisModified));
        assert_eq!(result, Err(AdtError::HypothesisModified));
    }
}
