use std::{
    collections::{BTreeSet, VecDeque},
    fmt::Debug,
};

use indexmap::IndexSet;
use itertools::Itertools;
use mealy::prelude::*;
use tracing::{debug, info, trace, warn};

use super::{
    tree::SiftOutcome, Adt, AdtError, AdtExtender, AdtHypothesis, AdtSnapshot,
    BestEffortExtender, DefaultSplitter, ExtensionResult, LeafSplitter, NodeId, ObservationTree,
    PartialTransitionAnalyzer, ReplacementResult, SingleReplacer, StateId, SubtreeReplacer,
    TransitionId,
};
use crate::active::{Counterexample, EquivalenceOracle, Hypothesis, LocalSuffixFinder, SymbolOracle};

const ITERATION_THRESHOLD: usize = if cfg!(debug_assertions) { 300 } else { 200000 };

/// Everything that the learner shares with its extension policy: the hypothesis, the tree,
/// the observations and the queue of transitions that still have to be sifted.
struct Core<A: Alphabet, O: Color, Q: SymbolOracle<Symbol = A::Symbol, Output = O>> {
    hypothesis: AdtHypothesis<A, O>,
    adt: Adt<A::Symbol, O>,
    observations: ObservationTree<Q>,
    open_transitions: VecDeque<TransitionId>,
}

impl<A, O, Q> Core<A, O, Q>
where
    A: Alphabet,
    O: Color,
    Q: SymbolOracle<Symbol = A::Symbol, Output = O>,
{
    fn root(&self) -> Result<NodeId, AdtError> {
        self.adt.root().ok_or(AdtError::NotStarted)
    }

    fn access_sequence(&self, state: StateId) -> Result<Vec<A::Symbol>, AdtError> {
        self.hypothesis
            .access_sequence(state)
            .map(|w| w.to_vec())
            .ok_or(AdtError::UnknownState(state))
    }

    /// Creates open transitions for every symbol from `state` and schedules them.
    fn open_all_transitions(&mut self, state: StateId, sift_node: NodeId) -> Result<(), AdtError> {
        let symbols = self.hypothesis.alphabet().universe().collect_vec();
        for sym in symbols {
            let t = self.hypothesis.create_open_transition(state, sym, sift_node)?;
            self.open_transitions.push_back(t);
        }
        Ok(())
    }

    /// Creates an open transition on `symbol` for every state and schedules them.
    fn open_symbol(&mut self, symbol: A::Symbol) -> Result<(), AdtError> {
        let root = self.root()?;
        let states = self.hypothesis.states().collect_vec();
        for state in states {
            let t = self.hypothesis.create_open_transition(state, symbol, root)?;
            self.open_transitions.push_back(t);
        }
        Ok(())
    }

    /// Invalidates the transitions into `states` that are not part of the spanning tree, so that
    /// they are sifted again starting from `sift_node`.
    fn resift_incoming<I: IntoIterator<Item = StateId>>(&mut self, states: I, sift_node: NodeId) {
        for state in states {
            for t in self.hypothesis.incoming_non_spanning_tree_transitions(state) {
                self.hypothesis.set_target(t, None);
                self.hypothesis.set_sift_node(t, sift_node);
                self.open_transitions.push_back(t);
            }
        }
    }

    /// Sifts the transition into the tree. If a new output is found, a new state is created and
    /// true is returned.
    fn sift_transition(&mut self, t: TransitionId) -> Result<bool, AdtError> {
        let data = self.hypothesis.transition_data(t);
        let (source, input, sift_node) = (data.source(), data.input(), data.sift_node());
        let word = self.access_sequence(source)?.with_symbol(input);

        let sift = self.adt.sift(&mut self.observations, &word, sift_node)?;
        let output = sift
            .output
            .ok_or_else(|| AdtError::UnknownTransition(source, input.show()))?;
        self.hypothesis.set_output(t, output.clone());

        match sift.outcome {
            SiftOutcome::Leaf(leaf) => {
                let target = self
                    .adt
                    .state_of(leaf)
                    .ok_or(AdtError::NotALeaf(leaf))?;
                self.hypothesis.set_target(t, Some(target));
                Ok(false)
            }
            SiftOutcome::Unmapped {
                node,
                output: distinguishing,
            } => {
                let state = self.hypothesis.add_state();
                self.hypothesis.set_access_sequence(state, word.clone())?;
                self.hypothesis.set_target(t, Some(state));
                self.hypothesis.set_spanning_tree_edge(t, true);
                self.adt.add_leaf(node, distinguishing, state)?;
                self.observations.add_state(state, &word, output)?;
                debug!(
                    "sifting {} discovered new state {}",
                    word.as_string(),
                    state.show()
                );
                let root = self.root()?;
                self.open_all_transitions(state, root)?;
                Ok(true)
            }
        }
    }

    /// Sifts all scheduled transitions until none is left.
    fn close_transitions(&mut self) -> Result<(), AdtError> {
        while let Some(t) = self.open_transitions.pop_front() {
            if !self.hypothesis.needs_sifting(t) {
                continue;
            }
            trace!("closing {}", t.show());
            self.sift_transition(t)?;
        }
        Ok(())
    }
}

impl<A, O, Q> PartialTransitionAnalyzer<A, O> for Core<A, O, Q>
where
    A: Alphabet,
    O: Color,
    Q: SymbolOracle<Symbol = A::Symbol, Output = O>,
{
    fn hypothesis(&self) -> &AdtHypothesis<A, O> {
        &self.hypothesis
    }

    fn adt(&self) -> &Adt<A::Symbol, O> {
        &self.adt
    }

    fn is_transition_defined(&self, state: StateId, symbol: A::Symbol) -> bool {
        self.hypothesis.successor(state, symbol).is_some()
    }

    fn close_transition(&mut self, state: StateId, symbol: A::Symbol) -> Result<(), AdtError> {
        let t = self
            .hypothesis
            .transition(state, symbol)
            .ok_or_else(|| AdtError::UnknownTransition(state, symbol.show()))?;
        if !self.hypothesis.needs_sifting(t) {
            return Ok(());
        }
        let sift_node = self.hypothesis.transition_data(t).sift_node();
        let before = self.adt.collect_leaves(sift_node).len();
        self.sift_transition(t)?;
        if self.adt.collect_leaves(sift_node).len() > before {
            return Err(AdtError::HypothesisModified);
        }
        Ok(())
    }
}

/// Active learner for Mealy machines that organizes the states of its hypothesis in an
/// adaptive distinguishing tree ([`Adt`]).
///
/// New states are discovered by sifting transitions into the tree and by analyzing
/// counterexamples. Whenever a leaf is split, the tree may grow a reset node. The configured
/// [`LeafSplitter`], [`AdtExtender`] and [`SubtreeReplacer`] try to keep the number of these
/// resets low, since every reset corresponds to a reset of the system under learning when
/// transitions are sifted.
///
/// All membership queries go through an [`ObservationTree`] which caches the answers of the
/// oracle `Q`.
pub struct AdtLearner<A, O, Q>
where
    A: Alphabet,
    O: Color,
    Q: SymbolOracle<Symbol = A::Symbol, Output = O>,
{
    core: Core<A, O, Q>,
    leaf_splitter: Box<dyn LeafSplitter<A::Symbol, O>>,
    extender: Box<dyn AdtExtender<A, O>>,
    replacer: Box<dyn SubtreeReplacer<A, O>>,
    suffix_finder: LocalSuffixFinder,
    counterexamples: VecDeque<Counterexample<A::Symbol, O>>,
    all_counterexamples: IndexSet<Counterexample<A::Symbol, O>>,
    iteration_threshold: Option<usize>,
}

/// Configures an [`AdtLearner`], see [`AdtLearner::builder`].
pub struct AdtLearnerBuilder<A, O, Q>
where
    A: Alphabet,
    O: Color,
    Q: SymbolOracle<Symbol = A::Symbol, Output = O>,
{
    alphabet: A,
    oracle: Q,
    leaf_splitter: Box<dyn LeafSplitter<A::Symbol, O>>,
    extender: Box<dyn AdtExtender<A, O>>,
    replacer: Box<dyn SubtreeReplacer<A, O>>,
    suffix_finder: LocalSuffixFinder,
    use_cache: bool,
    iteration_threshold: Option<usize>,
}

impl<A, O, Q> AdtLearnerBuilder<A, O, Q>
where
    A: Alphabet,
    O: Color,
    Q: SymbolOracle<Symbol = A::Symbol, Output = O>,
{
    /// Sets the policy that splits leaves, defaults to [`DefaultSplitter`].
    pub fn with_leaf_splitter<L: LeafSplitter<A::Symbol, O> + 'static>(mut self, splitter: L) -> Self {
        self.leaf_splitter = Box::new(splitter);
        self
    }

    /// Sets the policy that extends freshly split ADSs, defaults to [`BestEffortExtender`].
    pub fn with_extender<E: AdtExtender<A, O> + 'static>(mut self, extender: E) -> Self {
        self.extender = Box::new(extender);
        self
    }

    /// Sets the policy that proposes subtree replacements, defaults to [`SingleReplacer`].
    pub fn with_replacer<R: SubtreeReplacer<A, O> + 'static>(mut self, replacer: R) -> Self {
        self.replacer = Box::new(replacer);
        self
    }

    /// Sets the counterexample decomposition, defaults to [`LocalSuffixFinder::RivestSchapire`].
    pub fn with_suffix_finder(mut self, suffix_finder: LocalSuffixFinder) -> Self {
        self.suffix_finder = suffix_finder;
        self
    }

    /// Whether membership queries may be answered from earlier observations, on by default.
    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Bounds the number of equivalence queries in [`AdtLearner::infer`]. If this is not set,
    /// the `MAX_ITERATIONS` environment variable is consulted.
    pub fn with_iteration_threshold(mut self, threshold: usize) -> Self {
        self.iteration_threshold = Some(threshold);
        self
    }

    /// Builds the learner.
    pub fn build(self) -> AdtLearner<A, O, Q> {
        AdtLearner {
            core: Core {
                hypothesis: AdtHypothesis::new(self.alphabet),
                adt: Adt::new(),
                observations: ObservationTree::new(self.oracle, self.use_cache),
                open_transitions: VecDeque::new(),
            },
            leaf_splitter: self.leaf_splitter,
            extender: self.extender,
            replacer: self.replacer,
            suffix_finder: self.suffix_finder,
            counterexamples: VecDeque::new(),
            all_counterexamples: IndexSet::new(),
            iteration_threshold: self.iteration_threshold,
        }
    }
}

impl<A, O, Q> AdtLearner<A, O, Q>
where
    A: Alphabet,
    O: Color,
    Q: SymbolOracle<Symbol = A::Symbol, Output = O>,
{
    /// Creates a learner with the default configuration.
    pub fn new(alphabet: A, oracle: Q) -> Self {
        Self::builder(alphabet, oracle).build()
    }

    /// Returns a builder for a learner over `alphabet` that poses its queries to `oracle`.
    pub fn builder(alphabet: A, oracle: Q) -> AdtLearnerBuilder<A, O, Q> {
        AdtLearnerBuilder {
            alphabet,
            oracle,
            leaf_splitter: Box::new(DefaultSplitter),
            extender: Box::new(BestEffortExtender),
            replacer: Box::new(SingleReplacer),
            suffix_finder: LocalSuffixFinder::default(),
            use_cache: true,
            iteration_threshold: None,
        }
    }

    /// The current hypothesis.
    pub fn hypothesis_model(&self) -> &AdtHypothesis<A, O> {
        &self.core.hypothesis
    }

    /// The current tree.
    pub fn adt(&self) -> &Adt<A::Symbol, O> {
        &self.core.adt
    }

    /// The cache of all observations, which also gives access to the oracle.
    pub fn observations(&self) -> &ObservationTree<Q> {
        &self.core.observations
    }

    /// Returns true if the target of the transition from `state` on `symbol` is known.
    pub fn is_transition_defined(&self, state: StateId, symbol: A::Symbol) -> bool {
        self.core.is_transition_defined(state, symbol)
    }

    /// Sifts the transition from `state` on `symbol` if its target is unknown. Returns
    /// [`AdtError::HypothesisModified`] if this discovered a new state.
    pub fn close_transition(&mut self, state: StateId, symbol: A::Symbol) -> Result<(), AdtError> {
        self.core.close_transition(state, symbol)
    }

    /// Sifts all transitions whose target is unknown.
    pub fn close_transitions(&mut self) -> Result<(), AdtError> {
        self.core.close_transitions()
    }

    /// Creates the initial hypothesis, which has a single state whose transitions are then
    /// determined by sifting. Does nothing if learning was started already.
    pub fn start_learning(&mut self) -> Result<(), AdtError> {
        if self.core.hypothesis.initial().is_some() {
            debug!("learning was started already");
            return Ok(());
        }
        let initial = self.core.hypothesis.add_initial_state();
        let root = self.core.adt.initialize(initial);
        self.core.observations.initialize(initial);
        self.core.open_all_transitions(initial, root)?;
        self.core.close_transitions()?;
        info!(
            "initial hypothesis has {} states",
            self.core.hypothesis.size()
        );
        Ok(())
    }

    /// Refines the hypothesis with `counterexample` until it produces the same output as the
    /// system on it and on every counterexample seen before. Returns false and leaves the
    /// learner untouched if the hypothesis already agrees with the counterexample.
    pub fn refine_hypothesis(
        &mut self,
        counterexample: Counterexample<A::Symbol, O>,
    ) -> Result<bool, AdtError> {
        if self.core.hypothesis.initial().is_none() {
            return Err(AdtError::NotStarted);
        }
        if counterexample.input.len() != counterexample.output.len() {
            return Err(AdtError::OutputLengthMismatch {
                suffix: counterexample.input.len(),
                old: counterexample.output.len(),
                new: counterexample.output.len(),
            });
        }
        if !counterexample.is_counterexample_for(&self.core.hypothesis) {
            return Ok(false);
        }
        let start = std::time::Instant::now();
        let size = self.core.hypothesis.size();

        self.evaluate_subtree_replacement()?;

        self.counterexamples.push_back(counterexample);
        while let Some(ce) = self.counterexamples.pop_front() {
            self.all_counterexamples.insert(ce.clone());
            while ce.is_counterexample_for(&self.core.hypothesis) {
                self.refine_with(&ce)?;
                self.core.close_transitions()?;
            }

            for ce in &self.all_counterexamples {
                if ce.is_counterexample_for(&self.core.hypothesis) {
                    trace!("counterexample {} needs another look", ce.show());
                    self.counterexamples.push_back(ce.clone());
                }
            }
            self.ensure_consistency()?;
        }

        info!(
            "refinement took {}ms, hypothesis grew from {size} to {} states",
            start.elapsed().as_millis(),
            self.core.hypothesis.size()
        );
        Ok(true)
    }

    /// A single refinement step, which adds exactly one state for the prefix of `ce` that leads
    /// into the wrong state. The transitions that have to be sifted afterwards are only
    /// scheduled, closing them may discover further states.
    fn refine_with(&mut self, ce: &Counterexample<A::Symbol, O>) -> Result<(), AdtError> {
        let core = &mut self.core;
        let idx = self
            .suffix_finder
            .find_suffix_index(ce, &core.hypothesis, &mut core.observations)
            .ok_or(AdtError::DecompositionFailed)?;
        let (u, a, v) = (&ce.input[..idx], ce.input[idx], &ce.input[idx + 1..]);

        let u_state = core
            .hypothesis
            .reached_state(u)
            .ok_or(AdtError::DecompositionFailed)?;
        let old_transition = core
            .hypothesis
            .transition(u_state, a)
            .ok_or_else(|| AdtError::UnknownTransition(u_state, a.show()))?;
        let ua_state = core
            .hypothesis
            .transition_data(old_transition)
            .target()
            .ok_or_else(|| AdtError::UnknownTransition(u_state, a.show()))?;
        let old_output = core
            .hypothesis
            .transition_data(old_transition)
            .output()
            .cloned()
            .ok_or_else(|| AdtError::UnknownTransition(u_state, a.show()))?;
        let ua_access = core.access_sequence(ua_state)?;
        let new_access = core.access_sequence(u_state)?.with_symbol(a);

        let new_state = core.hypothesis.add_state();
        core.hypothesis
            .set_access_sequence(new_state, new_access.clone())?;
        core.hypothesis.set_target(old_transition, Some(new_state));
        core.hypothesis.set_spanning_tree_edge(old_transition, true);
        debug!(
            "decomposed {} into {} {} {}, {} splits from {}",
            ce.show(),
            u.as_string(),
            a.show(),
            v.as_string(),
            new_state.show(),
            ua_state.show()
        );

        let node_to_split = core
            .adt
            .leaf_of(ua_state)
            .ok_or(AdtError::UnknownState(ua_state))?;
        core.observations.add_state(new_state, &new_access, old_output)?;
        core.observations
            .add_trace_for_node(new_state, &core.adt, node_to_split)?;

        let (previous_trace, _) = core.adt.trace_for_node(node_to_split)?;
        match core
            .observations
            .find_separating_word(ua_state, new_state, &previous_trace)?
        {
            Some(extension) => {
                let suffix = previous_trace.followed_by(&extension);
                let (old, new) = Self::traces(core, ua_state, new_state, &suffix)?;
                trace!("extending {} with {}", node_to_split.show(), suffix.as_string());
                core.adt.extend_leaf(
                    node_to_split,
                    &suffix,
                    &old,
                    &new,
                    &*self.leaf_splitter,
                    new_state,
                )?;
            }
            None => {
                let ua_output = core.observations.answer(&ua_access, v);
                core.observations.add_trace(ua_state, v, &ua_output)?;
                let new_output = core.observations.answer(&new_access, v);
                core.observations.add_trace(new_state, v, &new_output)?;

                let cached = core
                    .observations
                    .find_separating_word(ua_state, new_state, &[])?;
                let splitter = match &cached {
                    Some(word) => self.leaf_splitter.select(word, v).to_vec(),
                    None => v.to_vec(),
                };
                let (old, new) = Self::traces(core, ua_state, new_state, &splitter)?;
                trace!("splitting {} with {}", node_to_split.show(), splitter.as_string());
                core.adt.split_leaf(
                    node_to_split,
                    &splitter,
                    &old,
                    &new,
                    &*self.leaf_splitter,
                    new_state,
                )?;
            }
        }

        let temporary_splitter = core.adt.start_of_ads(node_to_split);
        let root = core.root()?;
        let mut new_transitions = vec![];
        let symbols = core.hypothesis.alphabet().universe().collect_vec();
        for sym in symbols {
            new_transitions.push(core.hypothesis.create_open_transition(new_state, sym, root)?);
        }

        let invalidated = core.hypothesis.incoming_non_spanning_tree_transitions(ua_state);
        for &t in &invalidated {
            core.hypothesis.set_target(t, None);
            core.hypothesis.set_sift_node(t, temporary_splitter);
        }

        let finalized = self.evaluate_adt_extension(temporary_splitter)?;

        let core = &mut self.core;
        for t in invalidated {
            if core.hypothesis.needs_sifting(t) {
                core.hypothesis.set_sift_node(t, finalized);
                core.open_transitions.push_back(t);
            }
        }
        core.open_transitions.extend(new_transitions);
        Ok(())
    }

    /// Looks up the outputs of both states on `word` in the observations.
    fn traces(
        core: &Core<A, O, Q>,
        first: StateId,
        second: StateId,
        word: &[A::Symbol],
    ) -> Result<(Vec<O>, Vec<O>), AdtError> {
        let first = core
            .observations
            .trace(first, word)?
            .ok_or(AdtError::MissingObservation(first))?;
        let second = core
            .observations
            .trace(second, word)?
            .ok_or(AdtError::MissingObservation(second))?;
        Ok((first, second))
    }

    /// The input that leads into `node` if it is a reset node, the empty word otherwise.
    fn parent_input(&self, node: NodeId) -> Result<Vec<A::Symbol>, AdtError> {
        if self.core.adt.node(node).is_reset() {
            Ok(self.core.adt.trace_for_node(node)?.0)
        } else {
            Ok(vec![])
        }
    }

    /// Asks the extender to improve the ADS starting in `ads`, which was just created by a
    /// split. Returns the node from which transitions into the states of the ADS have to be
    /// sifted afterwards.
    fn evaluate_adt_extension(&mut self, ads: NodeId) -> Result<NodeId, AdtError> {
        let extension = match self.extender.compute_extension(&mut self.core, ads)? {
            ExtensionResult::Empty => return Ok(ads),
            ExtensionResult::Counterexample(ce) => {
                debug!("extension of {} yielded {}", ads.show(), ce.show());
                self.counterexamples.push_back(ce);
                return Ok(ads);
            }
            ExtensionResult::Replacement(extension) => extension,
        };

        let Some(node_to_replace) = self.core.adt.parent(ads) else {
            return Err(AdtError::MalformedTree(format!(
                "extended ADS {} has no parent",
                ads.show()
            )));
        };
        let proposal = ReplacementResult {
            node: node_to_replace,
            replacement: extension,
            cutout: BTreeSet::new(),
        };
        if !self.validate(&proposal)? {
            debug!("rejected invalid extension of {}", ads.show());
            return Ok(ads);
        }
        let replacement = self.verify(&proposal)?;

        let old_cost = self.core.adt.effective_resets(node_to_replace);
        let new_cost = self.core.adt.effective_resets(replacement);
        if new_cost >= old_cost {
            debug!("extension of {} does not save resets ({new_cost} >= {old_cost})", ads.show());
            return Ok(ads);
        }

        debug!("extending {}, resets {old_cost} -> {new_cost}", ads.show());
        self.core.adt.replace_node(node_to_replace, replacement)?;
        let finalized = self.core.adt.start_of_ads(replacement);
        let states = self.core.adt.collect_states(replacement);
        self.core.resift_incoming(states, finalized);
        Ok(finalized)
    }

    /// Asks the replacer for proposals and applies those that are valid and cheaper.
    fn evaluate_subtree_replacement(&mut self) -> Result<(), AdtError> {
        if self.core.hypothesis.size() == 1 {
            return Ok(());
        }
        let proposals = self.replacer.compute_replacements(
            &self.core.hypothesis,
            self.core.hypothesis.alphabet(),
            &self.core.adt,
        )?;

        let mut accepted = vec![];
        for proposal in proposals {
            if !self.validate(&proposal)? {
                debug!("rejected invalid replacement of {}", proposal.node.show());
                continue;
            }
            let replacement = self.verify(&proposal)?;
            let old_cost = self.core.adt.effective_resets(proposal.node);
            let new_cost = self.core.adt.effective_resets(replacement);
            if new_cost < old_cost {
                debug!(
                    "replacing {}, resets {old_cost} -> {new_cost}",
                    proposal.node.show()
                );
                accepted.push((proposal.node, replacement));
            } else {
                debug!(
                    "replacement of {} does not save resets ({new_cost} >= {old_cost})",
                    proposal.node.show()
                );
            }
        }

        for (node, replacement) in accepted {
            if !self.core.adt.is_attached(node) {
                continue;
            }
            self.core.adt.replace_node(node, replacement)?;
            let finalized = self.core.adt.start_of_ads(replacement);
            let states = self.core.adt.collect_states(replacement);
            self.core.resift_incoming(states, finalized);
        }
        self.core.close_transitions()
    }

    /// Checks that the proposal replaces a node of the tree, covers the same states and agrees
    /// with the hypothesis.
    fn validate(
        &self,
        proposal: &ReplacementResult<A::Symbol, O>,
    ) -> Result<bool, AdtError> {
        let adt = &self.core.adt;
        let root = self.core.root()?;
        let node = proposal.node;
        let known = if adt.node(node).is_reset() {
            adt.collect_reset_nodes(root).contains(&node)
        } else {
            adt.collect_ads_nodes(root).contains(&node)
        };
        if !known {
            return Ok(false);
        }

        let old_states: BTreeSet<_> = adt.collect_states(node).into_iter().collect();
        let new_states: BTreeSet<_> = proposal
            .replacement
            .states()
            .into_iter()
            .chain(proposal.cutout.iter().copied())
            .collect();
        if old_states != new_states {
            return Ok(false);
        }

        let parent_input = self.parent_input(node)?;
        for (state, input, output) in proposal.replacement.traces() {
            let prefix = self.core.access_sequence(state)?.followed_by(&parent_input);
            if self
                .core
                .hypothesis
                .compute_suffix_output(&prefix, &input)
                .as_ref()
                != Some(&output)
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Runs the traces of the proposed replacement on the system and builds a detached subtree
    /// from what is actually observed. Disagreements are queued as counterexamples. Returns the
    /// root of the new subtree.
    fn verify(&mut self, proposal: &ReplacementResult<A::Symbol, O>) -> Result<NodeId, AdtError> {
        let parent_input = self.parent_input(proposal.node)?;
        let mut result: Option<NodeId> = None;
        let mut ambiguous = vec![];

        for (state, input, expected) in proposal.replacement.traces() {
            let prefix = self.core.access_sequence(state)?.followed_by(&parent_input);
            let observed = self.core.observations.query_uncached(&prefix, &input);

            let trace = match observed.iter().zip(&expected).position(|(o, e)| o != e) {
                Some(divergence) => {
                    let ce_input = prefix.followed_by(&input[..=divergence]);
                    let ce_output = self.core.observations.answer(&[], &ce_input);
                    let ce = Counterexample::new(ce_input, ce_output);
                    debug!("verification of {} found {}", state.show(), ce.show());
                    self.counterexamples.push_back(ce);
                    self.core.adt.build_ads_from_observation(
                        &input[..=divergence],
                        &observed[..=divergence],
                        state,
                    )?
                }
                None => self
                    .core
                    .adt
                    .build_ads_from_observation(&input, &expected, state)?,
            };

            match result {
                None => result = Some(trace),
                Some(ads) => {
                    if !self.core.adt.merge_ads(ads, trace)? {
                        ambiguous.push(state);
                    }
                }
            }
        }

        let result = result.ok_or_else(|| {
            AdtError::InvalidReplacement(format!("replacement of {} is empty", proposal.node.show()))
        })?;
        for state in ambiguous.into_iter().chain(proposal.cutout.iter().copied()) {
            self.resolve_ambiguity(proposal.node, result, state)?;
        }
        Ok(result)
    }

    /// Places `state` in the detached subtree `ads`, which is supposed to replace `node`. If it
    /// cannot be told apart from another state there, a reset node with a word that separates
    /// both in the current tree is grafted into `ads`.
    fn resolve_ambiguity(
        &mut self,
        node: NodeId,
        ads: NodeId,
        state: StateId,
    ) -> Result<(), AdtError> {
        let parent_input = self.parent_input(node)?;
        let access = self.core.access_sequence(state)?;
        let core = &mut self.core;
        let sift = core
            .adt
            .sift_after(&mut core.observations, &access, &parent_input, ads)?;

        match sift.outcome {
            SiftOutcome::Unmapped { node: parent, output } => {
                trace!("placing {} below {}", state.show(), parent.show());
                core.adt.add_leaf(parent, output, state)?;
            }
            SiftOutcome::Leaf(leaf) => {
                let other = core.adt.state_of(leaf).ok_or(AdtError::NotALeaf(leaf))?;
                let first = core
                    .adt
                    .leaf_of(state)
                    .ok_or(AdtError::UnknownState(state))?;
                let second = core
                    .adt
                    .leaf_of(other)
                    .ok_or(AdtError::UnknownState(other))?;
                let lca = core.adt.find_lca(first, second)?;
                let symbol = core
                    .adt
                    .node(lca.node)
                    .symbol()
                    .ok_or_else(|| AdtError::MalformedTree(format!("{} is no symbol node", lca.node.show())))?;
                let (mut separator, output) = core.adt.trace_for_node(lca.node)?;
                separator.push(symbol);
                let mut first_output = output.clone();
                first_output.push(lca.first_output);
                let mut second_output = output;
                second_output.push(lca.second_output);

                let merged = core
                    .adt
                    .build_ads_from_observation(&separator, &first_output, state)?;
                let second_trace =
                    core.adt
                        .build_ads_from_observation(&separator, &second_output, other)?;
                if !core.adt.merge_ads(merged, second_trace)? {
                    return Err(AdtError::AmbiguityUnresolved(state, other));
                }
                trace!(
                    "separating {} and {} with {}",
                    state.show(),
                    other.show(),
                    separator.as_string()
                );
                core.adt.wrap_in_reset(leaf, merged)?;
            }
        }
        Ok(())
    }

    /// Compares the hypothesis with the traces that lead to every leaf of the tree and queues a
    /// counterexample for every disagreement.
    fn ensure_consistency(&mut self) -> Result<(), AdtError> {
        let root = self.core.root()?;
        for leaf in self.core.adt.collect_leaves(root) {
            let state = self.core.adt.state_of(leaf).ok_or(AdtError::NotALeaf(leaf))?;
            let access = self.core.access_sequence(state)?;
            let mut current = leaf;
            loop {
                let (input, output) = self.core.adt.trace_for_node(current)?;
                let hypothesis_output = self.core.hypothesis.compute_state_output(state, &input);
                if hypothesis_output.as_ref() != Some(&output) {
                    let access_output = self
                        .core
                        .hypothesis
                        .compute_output(&access)
                        .ok_or(AdtError::UnknownState(state))?;
                    let ce = Counterexample::new(
                        access.followed_by(&input),
                        access_output.into_iter().chain(output).collect(),
                    );
                    debug!("tree and hypothesis disagree on {}", ce.show());
                    self.counterexamples.push_back(ce);
                }
                match self.core.adt.parent(self.core.adt.start_of_ads(current)) {
                    Some(reset) => current = reset,
                    None => break,
                }
            }
        }
        Ok(())
    }

    /// Extends the alphabet by `symbol` and determines the targets of the new transitions.
    /// Returns false if the symbol was known already.
    pub fn add_alphabet_symbol(&mut self, symbol: A::Symbol) -> Result<bool, AdtError>
    where
        A: GrowingAlphabet,
    {
        if !self.core.hypothesis.add_alphabet_symbol(symbol) {
            return Ok(false);
        }
        let Some(initial) = self.core.hypothesis.initial() else {
            return Ok(true);
        };
        if self.core.hypothesis.transition(initial, symbol).is_none() {
            self.core.open_symbol(symbol)?;
            self.core.close_transitions()?;
        }
        info!(
            "added {}, hypothesis has {} states",
            symbol.show(),
            self.core.hypothesis.size()
        );
        Ok(true)
    }

    /// Captures the hypothesis and the tree, such that learning can be continued later with
    /// [`AdtLearner::resume`].
    pub fn suspend(&self) -> AdtSnapshot<A, O> {
        AdtSnapshot {
            hypothesis: self.core.hypothesis.clone(),
            tree: self.core.adt.clone(),
        }
    }

    /// Continues learning from `snapshot`. The observations are rebuilt from the access
    /// sequences of the hypothesis.
    pub fn resume(&mut self, snapshot: AdtSnapshot<A, O>) {
        let AdtSnapshot { hypothesis, tree } = snapshot;
        let ours = self.core.hypothesis.alphabet().universe().collect_vec();
        let theirs = hypothesis.alphabet().universe().collect_vec();
        if ours != theirs {
            warn!(
                "resuming with alphabet {} instead of {}",
                theirs.as_string(),
                ours.as_string()
            );
        }

        self.core.hypothesis = hypothesis;
        self.core.adt = tree;
        self.core.open_transitions = self.core.hypothesis.open_transitions().collect();
        self.counterexamples.clear();
        self.all_counterexamples.clear();

        if self.core.hypothesis.size() > 0 {
            let hypothesis = &self.core.hypothesis;
            let states = hypothesis
                .states()
                .filter_map(|state| {
                    let access = hypothesis.access_sequence(state)?.to_vec();
                    let output = hypothesis.compute_output(&access)?;
                    Some((state, access, output))
                })
                .collect_vec();
            self.core.observations.initialize_states(states);
        }
    }

    /// Runs the learner until `oracle` does not find a counterexample anymore and returns the
    /// final hypothesis as a [`MealyMachine`].
    pub fn infer<E>(&mut self, oracle: &mut E) -> Result<MealyMachine<A, O>, AdtError>
    where
        E: EquivalenceOracle<AdtHypothesis<A, O>>,
    {
        let start = std::time::Instant::now();
        let threshold = self.iteration_threshold.unwrap_or_else(|| {
            std::env::var("MAX_ITERATIONS")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(ITERATION_THRESHOLD)
        });
        self.start_learning()?;

        for iteration in 0..threshold {
            let Some(ce) = oracle.find_counterexample(&self.core.hypothesis) else {
                info!(
                    "ADT learning took {}ms and {iteration} equivalence queries, {} states",
                    start.elapsed().as_millis(),
                    self.core.hypothesis.size()
                );
                return self
                    .core
                    .hypothesis
                    .collect_mealy()
                    .ok_or(AdtError::NotStarted);
            };
            if !self.refine_hypothesis(ce.clone())? {
                warn!("{} is not a counterexample", ce.show());
            }
        }
        Err(AdtError::IterationLimit(threshold))
    }
}

impl<A, O, Q> Debug for AdtLearner<A, O, Q>
where
    A: Alphabet,
    O: Color,
    Q: SymbolOracle<Symbol = A::Symbol, Output = O>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:?}", self.core.hypothesis)?;
        write!(f, "{:?}", self.core.adt)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use mealy::prelude::*;

    use super::AdtLearner;
    use crate::active::hypothesis::Hypothesis;
    use crate::active::{
        adt::{
            Adt, AdtError, AdtHypothesis, AdtNode, AdtSnapshot, DefaultSplitter,
            ExhaustiveReplacer, ExtendParentSplitter, NeverReplace, NopExtender, StateId,
            SubtreeReplacer,
        },
        Counterexample, MealyOracle,
    };

    fn two_states() -> MealyMachine {
        MealyMachine::from_transitions(
            CharAlphabet::of_size(2),
            0,
            [(0, 'a', 0, 1), (0, 'b', 0, 0), (1, 'a', 1, 0), (1, 'b', 1, 1)],
        )
    }

    #[test_log::test]
    fn refinement_with_a_single_counterexample() {
        let mut learner = AdtLearner::new(
            CharAlphabet::of_size(2),
            MealyOracle::new(two_states(), None),
        );
        let ce = Counterexample::new(vec!['a', 'b'], vec![0, 1]);
        assert_eq!(learner.refine_hypothesis(ce.clone()), Err(AdtError::NotStarted));

        learner.start_learning().unwrap();
        assert_eq!(learner.hypothesis_model().size(), 1);
        assert!(learner.is_transition_defined(StateId(0), 'a'));

        assert!(learner.refine_hypothesis(ce.clone()).unwrap());
        let hypothesis = learner.hypothesis_model();
        assert_eq!(hypothesis.size(), 2);
        assert!(hypothesis.bisimilar(&two_states()));

        let root = learner.adt().root().unwrap();
        assert!(matches!(learner.adt().node(root), AdtNode::Symbol { symbol: 'b', .. }));
        assert_eq!(learner.adt().collect_leaves(root).len(), 2);

        let before = learner.adt().clone();
        assert!(!learner.refine_hypothesis(ce).unwrap());
        assert_eq!(learner.adt(), &before);
    }

    #[test_log::test]
    fn closing_transitions_is_idempotent() {
        let mut learner = AdtLearner::builder(
            CharAlphabet::of_size(2),
            MealyOracle::new(two_states(), None),
        )
        .with_leaf_splitter(ExtendParentSplitter)
        .with_extender(NopExtender)
        .build();
        learner.start_learning().unwrap();
        let queries = learner.observations().oracle().queries();
        learner.close_transitions().unwrap();
        learner.close_transition(StateId(0), 'b').unwrap();
        assert_eq!(learner.observations().oracle().queries(), queries);
        assert!(learner.close_transition(StateId(3), 'b').is_err());
    }

    #[test_log::test]
    fn a_new_symbol_opens_one_transition_per_state() {
        let target = MealyMachine::from_transitions(
            CharAlphabet::of_size(2),
            0,
            [
                (0, 'a', 0, 1),
                (0, 'b', 0, 0),
                (1, 'a', 0, 2),
                (1, 'b', 1, 0),
                (2, 'a', 1, 0),
                (2, 'b', 2, 0),
            ],
        );
        let only_a = MealyMachine::from_transitions(
            CharAlphabet::new(vec!['a']),
            0,
            [(0, 'a', 0, 1), (1, 'a', 0, 2), (2, 'a', 1, 0)],
        );
        let mut learner = AdtLearner::new(
            CharAlphabet::new(vec!['a']),
            MealyOracle::new(target.clone(), None),
        );
        learner.infer(&mut MealyOracle::new(only_a, None)).unwrap();
        let size = learner.hypothesis_model().size();
        assert_eq!(size, 3);

        assert!(learner.core.hypothesis.add_alphabet_symbol('b'));
        learner.core.open_symbol('b').unwrap();
        assert_eq!(learner.core.open_transitions.len(), size);
        let hypothesis = &learner.core.hypothesis;
        let sources: BTreeSet<_> = hypothesis
            .open_transitions()
            .map(|t| hypothesis.transition_data(t).source())
            .collect();
        assert_eq!(sources, hypothesis.states().collect::<BTreeSet<_>>());

        learner.close_transitions().unwrap();
        assert_eq!(learner.hypothesis_model().open_transitions().count(), 0);
        assert_eq!(learner.hypothesis_model().size(), size);
        assert!(learner.hypothesis_model().bisimilar(&target));
    }

    #[test_log::test]
    fn every_refinement_step_adds_one_state() {
        let target = MealyMachine::from_transitions(
            CharAlphabet::of_size(2),
            0,
            (0..5).flat_map(|q| [(q, 'a', usize::from(q == 4), (q + 1) % 5), (q, 'b', 0, q)]),
        );
        let mut learner = AdtLearner::builder(
            CharAlphabet::of_size(2),
            MealyOracle::new(target.clone(), None),
        )
        .with_extender(NopExtender)
        .with_replacer(NeverReplace)
        .build();
        learner.start_learning().unwrap();

        let ce = Counterexample::new(vec!['a'; 5], vec![0, 0, 0, 0, 1]);
        let mut steps = 0;
        while ce.is_counterexample_for(learner.hypothesis_model()) {
            let size = learner.hypothesis_model().size();
            learner.refine_with(&ce).unwrap();
            assert_eq!(learner.hypothesis_model().size(), size + 1);
            learner.close_transitions().unwrap();
            steps += 1;
        }
        assert!(steps > 0);
        assert!(learner.hypothesis_model().size() <= 5);
    }

    #[test_log::test]
    fn cut_out_states_with_new_outputs_get_their_own_leaf() {
        // 'a' merges 0 and 1, 'b' merges 2 and 3, so only {0, 1} has an ADS
        let target = MealyMachine::from_transitions(
            CharAlphabet::of_size(2),
            0,
            [
                (0, 'a', 0, 1),
                (0, 'b', 1, 2),
                (1, 'a', 0, 1),
                (1, 'b', 0, 0),
                (2, 'a', 1, 3),
                (2, 'b', 2, 0),
                (3, 'a', 2, 0),
                (3, 'b', 2, 0),
            ],
        );
        let mut tree = Adt::new();
        let zero = tree.initialize(StateId(0));
        tree.split_leaf(zero, &['b'], &[1], &[0], &DefaultSplitter, StateId(1))
            .unwrap();
        let root = tree.root().unwrap();
        let two = tree.add_leaf(root, 2, StateId(2)).unwrap();
        tree.split_leaf(two, &['a'], &[1], &[2], &DefaultSplitter, StateId(3))
            .unwrap();

        let mut learner = AdtLearner::builder(
            CharAlphabet::of_size(2),
            MealyOracle::new(target.clone(), None),
        )
        .with_replacer(ExhaustiveReplacer)
        .build();
        learner.resume(AdtSnapshot {
            hypothesis: AdtHypothesis::from_machine(&target),
            tree,
        });
        let hypothesis = learner.hypothesis_model();
        let mut oracle = MealyOracle::new(target.clone(), None);
        assert!(learner
            .adt()
            .self_sift(&mut oracle, |q| hypothesis.access_sequence(q).map(|w| w.to_vec()))
            .unwrap());
        assert_eq!(learner.adt().effective_resets(root), 2);

        let proposals = ExhaustiveReplacer
            .compute_replacements(
                &learner.core.hypothesis,
                learner.core.hypothesis.alphabet(),
                &learner.core.adt,
            )
            .unwrap();
        assert_eq!(proposals.len(), 1);
        let proposal = &proposals[0];
        assert_eq!(proposal.cutout, BTreeSet::from([StateId(2), StateId(3)]));
        assert!(learner.validate(proposal).unwrap());

        let replacement = learner.verify(proposal).unwrap();
        assert!(learner.counterexamples.is_empty());
        let adt = learner.adt();
        assert!(!adt.is_attached(replacement));
        assert_eq!(
            adt.collect_states(replacement)
                .into_iter()
                .collect::<BTreeSet<_>>(),
            BTreeSet::from([StateId(0), StateId(1), StateId(2), StateId(3)])
        );
        // 2 produced a new output on 'b', 3 then had to be told apart from it behind a reset
        let behind_two = adt.node(replacement).child(&2).unwrap();
        assert!(adt.node(behind_two).is_reset());
        assert_eq!(adt.effective_resets(replacement), 2);

        // the result is not cheaper, so the tree stays
        learner.evaluate_subtree_replacement().unwrap();
        assert_eq!(learner.adt().root(), Some(root));
        assert_eq!(learner.adt().leaf_of(StateId(0)), Some(zero));
        assert!(matches!(
            learner.adt().node(root),
            AdtNode::Symbol { symbol: 'b', .. }
        ));
    }
}
