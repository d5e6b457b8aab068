use mealy::prelude::*;
use tracing::trace;

use super::{Counterexample, Hypothesis, SymbolOracle};

/// Strategies for decomposing a counterexample `w` into `u · a · v`, such that replacing `u · a` by the
/// access sequence of the state it reaches in the hypothesis changes the outcome, while replacing
/// only `u` does not. Consequently `v` separates the access sequence of that state from
/// the access sequence of the state that `u` reaches, extended by `a`.
///
/// For an index `i` consider the experiment that runs the access sequence of the state reached by
/// `w[..i]` followed by `w[i..]` on the system and compares it with what the hypothesis predicts.
/// For `i = 0` this is the counterexample itself, so the comparison fails, and for `i = |w|` it
/// trivially succeeds. Both strategies look for a position where failure turns into success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalSuffixFinder {
    /// Binary search over the positions, needs a logarithmic number of queries.
    #[default]
    RivestSchapire,
    /// Scans the positions from left to right.
    Linear,
}

impl LocalSuffixFinder {
    /// Returns the index of the symbol `a` in the input of `counterexample`, or `None` if it is not a
    /// counterexample for `hypothesis` at all (or the hypothesis is missing transitions along it).
    pub fn find_suffix_index<H, Q>(
        &self,
        counterexample: &Counterexample<SymbolOf<H>, H::Output>,
        hypothesis: &H,
        oracle: &mut Q,
    ) -> Option<usize>
    where
        H: Hypothesis,
        Q: SymbolOracle<Symbol = SymbolOf<H>, Output = H::Output>,
    {
        let input = &counterexample.input;
        if input.is_empty() || !counterexample.is_counterexample_for(hypothesis) {
            return None;
        }

        let index = match self {
            LocalSuffixFinder::RivestSchapire => {
                // invariant: position lo fails, position hi succeeds
                let (mut lo, mut hi) = (0, input.len());
                while hi - lo > 1 {
                    let mid = (lo + hi) / 2;
                    if agrees(hypothesis, oracle, input, mid)? {
                        hi = mid;
                    } else {
                        lo = mid;
                    }
                }
                lo
            }
            LocalSuffixFinder::Linear => {
                let mut found = input.len() - 1;
                for i in 0..input.len() - 1 {
                    if agrees(hypothesis, oracle, input, i + 1)? {
                        found = i;
                        break;
                    }
                }
                found
            }
        };
        trace!(
            "decomposed {} at position {index}",
            input.as_string()
        );
        Some(index)
    }
}

/// Checks whether the hypothesis predicts the output of the system when the prefix of length
/// `position` is replaced by the access sequence of the state it leads to.
fn agrees<H, Q>(hypothesis: &H, oracle: &mut Q, input: &[SymbolOf<H>], position: usize) -> Option<bool>
where
    H: Hypothesis,
    Q: SymbolOracle<Symbol = SymbolOf<H>, Output = H::Output>,
{
    let state = hypothesis.reached_state(&input[..position])?;
    let access = hypothesis.access_sequence(state)?;
    let expected = hypothesis.compute_state_output(state, &input[position..])?;
    Some(oracle.answer(access, &input[position..]) == expected)
}

#[cfg(test)]
mod tests {
    use mealy::prelude::*;

    use super::LocalSuffixFinder;
    use crate::active::{Counterexample, Hypothesis, MealyOracle};

    /// A machine whose access sequences are given explicitly.
    struct WithAccess(MealyMachine, Vec<Vec<char>>);

    impl Mealy for WithAccess {
        type Alphabet = CharAlphabet;
        type Output = usize;
        type StateIndex = usize;

        fn alphabet(&self) -> &CharAlphabet {
            self.0.alphabet()
        }
        fn initial(&self) -> Option<usize> {
            self.0.initial()
        }
        fn state_indices(&self) -> Vec<usize> {
            self.0.state_indices()
        }
        fn successor(&self, state: usize, symbol: char) -> Option<usize> {
            self.0.successor(state, symbol)
        }
        fn transition_output(&self, state: usize, symbol: char) -> Option<usize> {
            self.0.transition_output(state, symbol)
        }
    }

    impl Hypothesis for WithAccess {
        fn access_sequence(&self, state: usize) -> Option<&[char]> {
            self.1.get(state).map(|w| w.as_slice())
        }
    }

    fn counter(modulus: usize) -> MealyMachine {
        // outputs 1 on 'a' whenever the number of 'a's read so far is congruent to modulus - 1
        MealyMachine::from_transitions(
            CharAlphabet::of_size(1),
            0,
            (0..modulus).map(|i| (i, 'a', usize::from(i + 1 == modulus), (i + 1) % modulus)),
        )
    }

    #[test_log::test]
    fn decomposition_strategies_agree_on_position() {
        let target = counter(4);
        // a two state hypothesis that believes the counter is modulo 2
        let hypothesis = WithAccess(counter(2), vec![vec![], vec!['a']]);

        let ce = Counterexample::new(vec!['a'; 4], vec![0, 0, 0, 1]);
        assert!(ce.is_counterexample_for(&hypothesis));

        for finder in [LocalSuffixFinder::RivestSchapire, LocalSuffixFinder::Linear] {
            let mut oracle = MealyOracle::new(target.clone(), None);
            let index = finder
                .find_suffix_index(&ce, &hypothesis, &mut oracle)
                .unwrap();
            // only the very last symbol can be blamed, all earlier positions still disagree
            assert_eq!(index, 3, "{finder:?}");
        }
    }

    #[test]
    fn no_decomposition_for_explained_words() {
        let target = counter(2);
        let hypothesis = WithAccess(counter(2), vec![vec![], vec!['a']]);
        let mut oracle = MealyOracle::new(target, None);
        let ce = Counterexample::new(vec!['a', 'a'], vec![0, 1]);
        assert_eq!(
            LocalSuffixFinder::default().find_suffix_index(&ce, &hypothesis, &mut oracle),
            None
        );
    }
}
