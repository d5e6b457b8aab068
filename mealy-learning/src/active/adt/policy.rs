use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    fmt::Debug,
};

use itertools::Itertools;
use mealy::prelude::*;
use tracing::{debug, trace};

use super::{compute_ads, Adt, AdtError, AdtHypothesis, Ads, NodeId, StateId};
use crate::active::{Counterexample, Hypothesis};

/// Decides how a leaf of the tree is split once a new state has been discovered.
pub trait LeafSplitter<S: Symbol, O: Color>: Debug {
    /// Chooses the word that separates the old and the new state, given a separating word that was
    /// found among the cached observations and the suffix of the counterexample. By default the
    /// shorter word is used, ties are won by the counterexample suffix.
    fn select<'a>(&self, cached: &'a [S], ce_suffix: &'a [S]) -> &'a [S] {
        if cached.len() < ce_suffix.len() {
            cached
        } else {
            ce_suffix
        }
    }

    /// Changes the structure of `tree` such that `leaf` is separated from a new leaf for
    /// `new_state` by `suffix`, on which the state of `leaf` produces `old_output` and the new
    /// state produces `new_output`. Returns the new leaf.
    fn split(
        &self,
        tree: &mut Adt<S, O>,
        leaf: NodeId,
        suffix: &[S],
        old_output: &[O],
        new_output: &[O],
        new_state: StateId,
    ) -> Result<NodeId, AdtError>;
}

/// Always replaces the leaf by a new ADS behind a reset node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultSplitter;

impl<S: Symbol, O: Color> LeafSplitter<S, O> for DefaultSplitter {
    fn split(
        &self,
        tree: &mut Adt<S, O>,
        leaf: NodeId,
        suffix: &[S],
        old_output: &[O],
        new_output: &[O],
        new_state: StateId,
    ) -> Result<NodeId, AdtError> {
        tree.split_into_new_ads(leaf, suffix, old_output, new_output, new_state)
    }
}

/// Continues the ADS that the leaf belongs to if the trace leading to the leaf is a prefix of the
/// separating word, which saves a reset. Otherwise behaves like [`DefaultSplitter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtendParentSplitter;

impl<S: Symbol, O: Color> LeafSplitter<S, O> for ExtendParentSplitter {
    fn split(
        &self,
        tree: &mut Adt<S, O>,
        leaf: NodeId,
        suffix: &[S],
        old_output: &[O],
        new_output: &[O],
        new_state: StateId,
    ) -> Result<NodeId, AdtError> {
        if tree.can_split_parent(leaf, suffix, old_output, new_output) {
            trace!("extending parent ADS of {}", leaf.show());
            tree.split_parent(leaf, suffix, old_output, new_output, new_state)
        } else {
            tree.split_into_new_ads(leaf, suffix, old_output, new_output, new_state)
        }
    }
}

/// Gives access to a hypothesis that may still have open transitions, which can be closed on
/// demand. Closing a transition can discover a new state, in which case
/// [`AdtError::HypothesisModified`] is returned and everything that was derived from the
/// hypothesis before should be considered stale.
pub trait PartialTransitionAnalyzer<A: Alphabet, O: Color> {
    /// The current hypothesis.
    fn hypothesis(&self) -> &AdtHypothesis<A, O>;
    /// The current tree.
    fn adt(&self) -> &Adt<A::Symbol, O>;
    /// Returns true if the target of the transition is known.
    fn is_transition_defined(&self, state: StateId, symbol: A::Symbol) -> bool;
    /// Determines the target of the transition by sifting it into the tree.
    fn close_transition(&mut self, state: StateId, symbol: A::Symbol) -> Result<(), AdtError>;
}

/// What an [`AdtExtender`] came up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionResult<S, O> {
    /// No improvement was found.
    Empty,
    /// While looking for an improvement, the hypothesis turned out to be wrong.
    Counterexample(Counterexample<S, O>),
    /// An ADS which continues the ADS that ends in the parent reset node of the analyzed node.
    Replacement(Ads<S, O, StateId>),
}

/// Tries to get rid of the reset node in front of a freshly split ADS.
pub trait AdtExtender<A: Alphabet, O: Color>: Debug {
    /// Computes an extension for the ADS starting in `ads`.
    fn compute_extension(
        &self,
        analyzer: &mut dyn PartialTransitionAnalyzer<A, O>,
        ads: NodeId,
    ) -> Result<ExtensionResult<A::Symbol, O>, AdtError>;
}

/// Never extends anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NopExtender;

impl<A: Alphabet, O: Color> AdtExtender<A, O> for NopExtender {
    fn compute_extension(
        &self,
        _analyzer: &mut dyn PartialTransitionAnalyzer<A, O>,
        _ads: NodeId,
    ) -> Result<ExtensionResult<A::Symbol, O>, AdtError> {
        Ok(ExtensionResult::Empty)
    }
}

/// Applies the trace that leads into the reset node in front of an ADS with at most two leaves to
/// the states of these leaves and computes an ADS for the states that are reached. If that
/// works, the reset node can be replaced by it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BestEffortExtender;

impl BestEffortExtender {
    fn attempt<A: Alphabet, O: Color>(
        analyzer: &mut dyn PartialTransitionAnalyzer<A, O>,
        states: &[StateId],
        input: &[A::Symbol],
        output: &[O],
    ) -> Result<ExtensionResult<A::Symbol, O>, AdtError> {
        // current state -> state it started in
        let mut mapping: BTreeMap<StateId, StateId> = states.iter().map(|q| (*q, *q)).collect();
        for (idx, (&sym, expected)) in input.iter().zip(output).enumerate() {
            let mut next_mapping = BTreeMap::new();
            for (&state, &initial) in &mapping {
                if !analyzer.is_transition_defined(state, sym) {
                    analyzer.close_transition(state, sym)?;
                }
                let hyp = analyzer.hypothesis();
                if hyp.transition_output(state, sym).as_ref() != Some(expected) {
                    let access = hyp
                        .access_sequence(initial)
                        .ok_or(AdtError::UnknownState(initial))?;
                    let access_output = hyp
                        .compute_output(access)
                        .ok_or(AdtError::UnknownState(initial))?;
                    let ce = Counterexample::new(
                        access.followed_by(&input[..=idx]),
                        access_output
                            .into_iter()
                            .chain(output[..=idx].iter().cloned())
                            .collect(),
                    );
                    debug!("parent trace contradicts hypothesis, found {}", ce.show());
                    return Ok(ExtensionResult::Counterexample(ce));
                }
                let successor = hyp
                    .successor(state, sym)
                    .ok_or_else(|| AdtError::UnknownTransition(state, sym.show()))?;
                if next_mapping.insert(successor, initial).is_some() {
                    trace!("states converge on parent trace");
                    return Ok(ExtensionResult::Empty);
                }
            }
            mapping = next_mapping;
        }

        let current = mapping.keys().copied().collect_vec();
        let symbols = analyzer.hypothesis().alphabet().universe().collect_vec();
        let max_length = analyzer.hypothesis().size();
        let ads = compute_ads(&current, &symbols, max_length, |state, sym| {
            if !analyzer.is_transition_defined(state, sym) {
                analyzer.close_transition(state, sym)?;
            }
            let hyp = analyzer.hypothesis();
            Ok(hyp
                .successor(state, sym)
                .zip(hyp.transition_output(state, sym)))
        })?;

        Ok(match ads {
            None => ExtensionResult::Empty,
            Some(ads) => ExtensionResult::Replacement(ads.map_states(&|q| mapping[&q])),
        })
    }
}

impl<A: Alphabet, O: Color> AdtExtender<A, O> for BestEffortExtender {
    fn compute_extension(
        &self,
        analyzer: &mut dyn PartialTransitionAnalyzer<A, O>,
        ads: NodeId,
    ) -> Result<ExtensionResult<A::Symbol, O>, AdtError> {
        let Some(parent) = analyzer.adt().parent(ads) else {
            return Ok(ExtensionResult::Empty);
        };
        let states = analyzer.adt().collect_states(ads);
        if states.len() > 2 {
            return Ok(ExtensionResult::Empty);
        }
        let (input, output) = analyzer.adt().trace_for_node(parent)?;

        loop {
            match Self::attempt(&mut *analyzer, &states, &input, &output) {
                Err(AdtError::HypothesisModified) => {
                    trace!("hypothesis changed while extending {}, retrying", ads.show());
                }
                result => return result,
            }
        }
    }
}

/// A proposal to replace the subtree rooted in `node` by `replacement`. The states in `cutout`
/// are covered by `node` but not by `replacement`, they have to be sifted into the replacement
/// once it is in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementResult<S, O> {
    /// The root of the subtree that is replaced, either a reset node or the start of an ADS.
    pub node: NodeId,
    /// The new subtree.
    pub replacement: Ads<S, O, StateId>,
    /// States that are not covered by the replacement.
    pub cutout: BTreeSet<StateId>,
}

/// Proposes subtrees of the tree that could be replaced by cheaper ones.
pub trait SubtreeReplacer<A: Alphabet, O: Color>: Debug {
    /// Computes proposals for the current `hypothesis` over the symbols of `alphabet`.
    fn compute_replacements(
        &self,
        hypothesis: &AdtHypothesis<A, O>,
        alphabet: &A,
        adt: &Adt<A::Symbol, O>,
    ) -> Result<Vec<ReplacementResult<A::Symbol, O>>, AdtError>;
}

/// Never proposes a replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NeverReplace;

impl<A: Alphabet, O: Color> SubtreeReplacer<A, O> for NeverReplace {
    fn compute_replacements(
        &self,
        _hypothesis: &AdtHypothesis<A, O>,
        _alphabet: &A,
        _adt: &Adt<A::Symbol, O>,
    ) -> Result<Vec<ReplacementResult<A::Symbol, O>>, AdtError> {
        Ok(vec![])
    }
}

/// Proposes at most one replacement. The ADSs behind reset nodes are ranked by the number of
/// resets per leaf, and for the first one that admits it, either the ADS in front of it is
/// continued or, if it contains resets itself, it is replaced by a single ADS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SingleReplacer;

fn hypothesis_ads<A: Alphabet, O: Color>(
    hypothesis: &AdtHypothesis<A, O>,
    states: &[StateId],
    symbols: &[A::Symbol],
) -> Result<Option<Ads<A::Symbol, O, StateId>>, AdtError> {
    compute_ads(states, symbols, hypothesis.size(), |state, sym| {
        Ok(hypothesis
            .successor(state, sym)
            .zip(hypothesis.transition_output(state, sym)))
    })
}

/// Applies the input that leads into the reset node in front of `node` to `targets` and computes
/// an ADS for the states that are reached, so that the reset node can be replaced by it.
fn parent_extension<A: Alphabet, O: Color>(
    hypothesis: &AdtHypothesis<A, O>,
    symbols: &[A::Symbol],
    adt: &Adt<A::Symbol, O>,
    node: NodeId,
    targets: &[StateId],
) -> Result<Option<ReplacementResult<A::Symbol, O>>, AdtError> {
    let Some(parent_reset) = adt.parent(node).filter(|p| adt.node(*p).is_reset()) else {
        return Ok(None);
    };
    let (input, _) = adt.trace_for_node(parent_reset)?;

    let mut mapping: BTreeMap<StateId, StateId> = targets.iter().map(|q| (*q, *q)).collect();
    for sym in input {
        let mut next_mapping = BTreeMap::new();
        for (&state, &initial) in &mapping {
            let Some(successor) = hypothesis.successor(state, sym) else {
                return Ok(None);
            };
            if next_mapping.insert(successor, initial).is_some() {
                return Ok(None);
            }
        }
        mapping = next_mapping;
    }

    let current = mapping.keys().copied().collect_vec();
    Ok(
        hypothesis_ads(hypothesis, &current, symbols)?.map(|ads| ReplacementResult {
            node: parent_reset,
            replacement: ads.map_states(&|q| mapping[&q]),
            cutout: BTreeSet::new(),
        }),
    )
}

impl<A: Alphabet, O: Color> SubtreeReplacer<A, O> for SingleReplacer {
    fn compute_replacements(
        &self,
        hypothesis: &AdtHypothesis<A, O>,
        alphabet: &A,
        adt: &Adt<A::Symbol, O>,
    ) -> Result<Vec<ReplacementResult<A::Symbol, O>>, AdtError> {
        let Some(root) = adt.root() else {
            return Ok(vec![]);
        };
        let symbols = alphabet.universe().collect_vec();

        let mut candidates = adt
            .collect_ads_nodes(root)
            .into_iter()
            .filter(|node| *node != root)
            .map(|node| {
                let resets = 1 + adt.collect_reset_nodes(node).len();
                let leaves = adt.collect_leaves(node).len();
                (node, resets, leaves)
            })
            .collect_vec();
        // ascending by resets per leaf
        candidates.sort_by(|(_, r1, l1), (_, r2, l2)| (r1 * l2).cmp(&(r2 * l1)));

        for (node, _, _) in candidates {
            let targets = adt.collect_states(node);
            if let Some(result) =
                parent_extension(hypothesis, &symbols, adt, node, &targets)?
            {
                debug!("proposing to continue the ADS in front of {}", node.show());
                return Ok(vec![result]);
            }
            if adt.collect_reset_nodes(node).is_empty() {
                continue;
            }
            if let Some(ads) = hypothesis_ads(hypothesis, &targets, &symbols)? {
                debug!("proposing a single ADS for {}", node.show());
                return Ok(vec![ReplacementResult {
                    node,
                    replacement: ads,
                    cutout: BTreeSet::new(),
                }]);
            }
        }
        Ok(vec![])
    }
}

/// Tries to replace the whole tree by a single ADS. If the hypothesis does not admit one, the
/// states of an ADS behind a reset node are cut out and an ADS for the remaining states is
/// proposed instead, smaller subtrees are tried first. The cut out states are placed in the new
/// tree once it is verified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExhaustiveReplacer;

impl<A: Alphabet, O: Color> SubtreeReplacer<A, O> for ExhaustiveReplacer {
    fn compute_replacements(
        &self,
        hypothesis: &AdtHypothesis<A, O>,
        alphabet: &A,
        adt: &Adt<A::Symbol, O>,
    ) -> Result<Vec<ReplacementResult<A::Symbol, O>>, AdtError> {
        let Some(root) = adt.root() else {
            return Ok(vec![]);
        };
        if adt.collect_reset_nodes(root).is_empty() {
            return Ok(vec![]);
        }
        let symbols = alphabet.universe().collect_vec();
        let states = hypothesis.states().collect_vec();

        if let Some(ads) = hypothesis_ads(hypothesis, &states, &symbols)? {
            debug!("proposing a single ADS for all {} states", states.len());
            return Ok(vec![ReplacementResult {
                node: root,
                replacement: ads,
                cutout: BTreeSet::new(),
            }]);
        }

        let candidates = adt
            .collect_ads_nodes(root)
            .into_iter()
            .filter(|node| *node != root)
            .map(|node| adt.collect_states(node).into_iter().collect::<BTreeSet<_>>())
            .sorted_by_key(|cutout| cutout.len());

        for cutout in candidates {
            let targets = states
                .iter()
                .copied()
                .filter(|q| !cutout.contains(q))
                .collect_vec();
            if targets.len() < 2 {
                continue;
            }
            if let Some(ads) = hypothesis_ads(hypothesis, &targets, &symbols)? {
                debug!(
                    "proposing an ADS for {} states, cutting out {}",
                    targets.len(),
                    cutout.len()
                );
                return Ok(vec![ReplacementResult {
                    node: root,
                    replacement: ads,
                    cutout,
                }]);
            }
        }
        Ok(vec![])
    }
}

/// Visits the ADSs of the tree in level order. For each of them, the ADS in front of it is
/// continued if possible, otherwise the whole subtree is replaced by a single ADS if it contains
/// resets. Only if neither works, the ADSs behind the reset nodes of the subtree are visited.
/// Several disjoint subtrees may be proposed at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelOrderReplacer;

impl LevelOrderReplacer {
    /// The ADSs that directly follow a reset node of the ADS starting in `node`.
    fn direct_sub_ads<S: Symbol, O: Color>(adt: &Adt<S, O>, node: NodeId) -> Vec<NodeId> {
        let mut out = vec![];
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            for child in adt.node(current).children() {
                if adt.node(current).is_reset() {
                    out.push(child);
                } else {
                    stack.push(child);
                }
            }
        }
        out
    }
}

impl<A: Alphabet, O: Color> SubtreeReplacer<A, O> for LevelOrderReplacer {
    fn compute_replacements(
        &self,
        hypothesis: &AdtHypothesis<A, O>,
        alphabet: &A,
        adt: &Adt<A::Symbol, O>,
    ) -> Result<Vec<ReplacementResult<A::Symbol, O>>, AdtError> {
        let Some(root) = adt.root() else {
            return Ok(vec![]);
        };
        if adt.collect_reset_nodes(root).is_empty() {
            return Ok(vec![]);
        }
        let symbols = alphabet.universe().collect_vec();

        let mut out = vec![];
        let mut queue = VecDeque::from([root]);
        while let Some(node) = queue.pop_front() {
            let targets = adt.collect_states(node);
            if let Some(result) = parent_extension(hypothesis, &symbols, adt, node, &targets)? {
                trace!("proposing to continue the ADS in front of {}", node.show());
                out.push(result);
                continue;
            }
            if adt.collect_reset_nodes(node).is_empty() {
                continue;
            }
            if let Some(ads) = hypothesis_ads(hypothesis, &targets, &symbols)? {
                trace!("proposing a single ADS for {}", node.show());
                out.push(ReplacementResult {
                    node,
                    replacement: ads,
                    cutout: BTreeSet::new(),
                });
                continue;
            }
            queue.extend(Self::direct_sub_ads(adt, node));
        }
        debug!("level order search proposes {} replacements", out.len());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use mealy::prelude::*;

    use super::*;

    fn target() -> MealyMachine {
        MealyMachine::from_transitions(
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
        )
    }

    fn hypothesis_of(mm: &MealyMachine) -> AdtHypothesis<CharAlphabet, usize> {
        AdtHypothesis::from_machine(mm)
    }

    /// The tree separates state 2 with 'a' and states 0 and 1 with "ba" behind a reset.
    fn tree() -> (Adt<char, usize>, NodeId) {
        let mut adt = Adt::new();
        let root = adt.initialize(StateId(0));
        adt.split_leaf(root, &['a'], &[0], &[1], &DefaultSplitter, StateId(2))
            .unwrap();
        adt.split_leaf(root, &['b', 'a'], &[0, 0], &[0, 1], &DefaultSplitter, StateId(1))
            .unwrap();
        let reset = adt.collect_reset_nodes(adt.root().unwrap())[0];
        (adt, reset)
    }

    /// 'a' merges states 0 and 1 and 'b' merges states 1, 2 and 3 without telling them apart, so
    /// there is no ADS for all states. States 2 and 3 are separated by "ab".
    fn without_full_ads() -> MealyMachine {
        MealyMachine::from_transitions(
            CharAlphabet::of_size(2),
            0,
            [
                (0, 'a', 0, 1),
                (0, 'b', 1, 2),
                (1, 'a', 0, 1),
                (1, 'b', 0, 0),
                (2, 'a', 1, 3),
                (2, 'b', 0, 0),
                (3, 'a', 1, 0),
                (3, 'b', 0, 0),
            ],
        )
    }

    /// 'b' separates state 0, the others follow behind a reset node, where 'a' separates 1 and
    /// then "ab" separates 2 and 3 behind another reset node.
    fn nested_tree() -> (Adt<char, usize>, NodeId, NodeId) {
        let mut adt = Adt::new();
        let zero = adt.initialize(StateId(0));
        let one = adt
            .split_leaf(zero, &['b'], &[1], &[0], &DefaultSplitter, StateId(1))
            .unwrap();
        let two = adt
            .split_leaf(one, &['a'], &[0], &[1], &DefaultSplitter, StateId(2))
            .unwrap();
        adt.split_leaf(two, &['a', 'b'], &[1, 0], &[1, 1], &DefaultSplitter, StateId(3))
            .unwrap();
        let outer = adt.start_of_ads(one);
        let inner = adt.start_of_ads(two);
        (adt, outer, inner)
    }

    struct Complete {
        hypothesis: AdtHypothesis<CharAlphabet, usize>,
        adt: Adt<char, usize>,
    }

    impl PartialTransitionAnalyzer<CharAlphabet, usize> for Complete {
        fn hypothesis(&self) -> &AdtHypothesis<CharAlphabet, usize> {
            &self.hypothesis
        }
        fn adt(&self) -> &Adt<char, usize> {
            &self.adt
        }
        fn is_transition_defined(&self, state: StateId, symbol: char) -> bool {
            self.hypothesis.successor(state, symbol).is_some()
        }
        fn close_transition(&mut self, state: StateId, symbol: char) -> Result<(), AdtError> {
            Err(AdtError::UnknownTransition(state, symbol.show()))
        }
    }

    #[test]
    fn splitters_prefer_short_words() {
        let cached = ['a', 'b'];
        assert_eq!(
            LeafSplitter::<char, usize>::select(&DefaultSplitter, &cached, &['b']),
            &['b']
        );
        assert_eq!(
            LeafSplitter::<char, usize>::select(&ExtendParentSplitter, &cached, &['b', 'b']),
            &['b', 'b']
        );
        assert_eq!(
            LeafSplitter::<char, usize>::select(&DefaultSplitter, &['a'], &['b', 'b']),
            &['a']
        );
    }

    #[test_log::test]
    fn single_replacer_continues_the_parent_ads() {
        let hypothesis = hypothesis_of(&target());
        let (mut adt, reset) = tree();
        let alphabet = CharAlphabet::of_size(2);

        let proposals = SingleReplacer
            .compute_replacements(&hypothesis, &alphabet, &adt)
            .unwrap();
        assert_eq!(proposals.len(), 1);
        let proposal = &proposals[0];
        assert_eq!(proposal.node, reset);
        assert!(proposal.cutout.is_empty());
        assert_eq!(proposal.replacement.states(), vec![StateId(0), StateId(1)]);
        assert_eq!(proposal.replacement.depth(), 2);

        let replacement = adt.insert_ads(&proposal.replacement);
        adt.replace_node(reset, replacement).unwrap();
        let root = adt.root().unwrap();
        assert!(adt.collect_reset_nodes(root).is_empty());
        assert!(SingleReplacer
            .compute_replacements(&hypothesis, &alphabet, &adt)
            .unwrap()
            .is_empty());
        assert!(NeverReplace
            .compute_replacements(&hypothesis, &alphabet, &adt)
            .unwrap()
            .is_empty());
    }

    #[test_log::test]
    fn exhaustive_replacer_cuts_out_the_smallest_subtree() {
        let alphabet = CharAlphabet::of_size(2);
        let hypothesis = hypothesis_of(&target());
        let (adt, _) = tree();
        let root = adt.root().unwrap();
        let proposals = ExhaustiveReplacer
            .compute_replacements(&hypothesis, &alphabet, &adt)
            .unwrap();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].node, root);
        assert!(proposals[0].cutout.is_empty());
        assert_eq!(
            proposals[0].replacement.states(),
            vec![StateId(0), StateId(1), StateId(2)]
        );

        let hypothesis = hypothesis_of(&without_full_ads());
        let (adt, outer, inner) = nested_tree();
        let root = adt.root().unwrap();
        assert_eq!(adt.collect_ads_nodes(root), vec![root, outer, inner]);
        let proposals = ExhaustiveReplacer
            .compute_replacements(&hypothesis, &alphabet, &adt)
            .unwrap();
        assert_eq!(proposals.len(), 1);
        let proposal = &proposals[0];
        assert_eq!(proposal.node, root);
        assert_eq!(proposal.cutout, BTreeSet::from([StateId(2), StateId(3)]));
        assert_eq!(
            proposal.replacement.traces(),
            vec![
                (StateId(1), vec!['b'], vec![0]),
                (StateId(0), vec!['b'], vec![1]),
            ]
        );

        // without resets there is nothing to save
        let mut flat = Adt::new();
        let zero = flat.initialize(StateId(0));
        flat.split_leaf(zero, &['a'], &[0], &[1], &DefaultSplitter, StateId(2))
            .unwrap();
        assert!(ExhaustiveReplacer
            .compute_replacements(&hypothesis, &alphabet, &flat)
            .unwrap()
            .is_empty());
    }

    #[test_log::test]
    fn level_order_replacer_descends_into_subtrees() {
        let alphabet = CharAlphabet::of_size(2);
        let hypothesis = hypothesis_of(&target());
        let (adt, _) = tree();
        let root = adt.root().unwrap();
        let proposals = LevelOrderReplacer
            .compute_replacements(&hypothesis, &alphabet, &adt)
            .unwrap();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].node, root);
        assert_eq!(proposals[0].replacement.depth(), 3);

        // no single ADS for the whole tree, and 'b' merges the states behind the outer reset,
        // so the outer subtree is replaced as a whole
        let hypothesis = hypothesis_of(&without_full_ads());
        let (adt, outer, inner) = nested_tree();
        assert_eq!(LevelOrderReplacer::direct_sub_ads(&adt, adt.root().unwrap()), vec![outer]);
        assert_eq!(LevelOrderReplacer::direct_sub_ads(&adt, outer), vec![inner]);
        let proposals = LevelOrderReplacer
            .compute_replacements(&hypothesis, &alphabet, &adt)
            .unwrap();
        assert_eq!(proposals.len(), 1);
        let proposal = &proposals[0];
        assert_eq!(proposal.node, outer);
        assert!(proposal.cutout.is_empty());
        assert_eq!(
            proposal.replacement.states(),
            vec![StateId(1), StateId(2), StateId(3)]
        );
        assert_eq!(proposal.replacement.depth(), 2);
    }

    #[test_log::test]
    fn best_effort_extension() {
        let (adt, reset) = tree();
        let ads = adt.node(reset).children()[0];
        let mut analyzer = Complete {
            hypothesis: hypothesis_of(&target()),
            adt,
        };

        let Ok(ExtensionResult::Replacement(extension)) =
            BestEffortExtender.compute_extension(&mut analyzer, ads)
        else {
            panic!("expected a replacement");
        };
        assert_eq!(extension.states(), vec![StateId(0), StateId(1)]);
        assert_eq!(
            NopExtender.compute_extension(&mut analyzer, ads),
            Ok(ExtensionResult::Empty)
        );
        let root = analyzer.adt.root().unwrap();
        assert_eq!(
            BestEffortExtender.compute_extension(&mut analyzer, root),
            Ok(ExtensionResult::Empty)
        );

        // the hypothesis now claims that state 1 produces 5 on 'a', contradicting the tree
        let t = analyzer.hypothesis.transition(StateId(1), 'a').unwrap();
        analyzer.hypothesis.set_output(t, 5);
        assert_eq!(
            BestEffortExtender.compute_extension(&mut analyzer, ads),
            Ok(ExtensionResult::Counterexample(Counterexample::new(
                vec!['b', 'a'],
                vec![0, 0]
            )))
        );
    }
}
