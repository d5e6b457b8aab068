use mealy::prelude::*;
use tracing::trace;

/// A system under learning that is queried one symbol at a time. After a [`SymbolOracle::reset`] the
/// system is in its initial configuration, every call to [`SymbolOracle::query`] feeds one input symbol
/// and returns the output that the system produced for it.
///
/// This is the adaptive flavour of a membership oracle: learners that decide on the next input based on
/// the outputs they have seen so far (like sifting through a distinguishing tree) need this, whereas
/// learners that only ever ask for complete words can use [`SymbolOracle::answer`].
pub trait SymbolOracle {
    /// The type of input symbols.
    type Symbol: Symbol;
    /// The type of outputs that the system produces.
    type Output: Color;

    /// Brings the system back into its initial configuration.
    fn reset(&mut self);

    /// Feeds `symbol` to the system and returns the produced output.
    fn query(&mut self, symbol: Self::Symbol) -> Self::Output;

    /// Resets the system, feeds `prefix` and returns the outputs that are produced on `suffix`.
    fn answer(&mut self, prefix: &[Self::Symbol], suffix: &[Self::Symbol]) -> Vec<Self::Output> {
        self.reset();
        for sym in prefix {
            self.query(*sym);
        }
        suffix.iter().map(|sym| self.query(*sym)).collect()
    }
}

/// Answers equivalence queries for hypotheses of type `H`.
pub trait EquivalenceOracle<H: Mealy> {
    /// Returns a word on which `hypothesis` and the system under learning behave differently,
    /// together with the output of the system on it. If no such word exists, `None` is returned.
    fn find_counterexample(
        &mut self,
        hypothesis: &H,
    ) -> Option<Counterexample<SymbolOf<H>, H::Output>>;
}

/// An input word together with the output that the system under learning produces on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Counterexample<S, O> {
    /// The input word.
    pub input: Vec<S>,
    /// The output that is produced on [`Counterexample::input`], one output per symbol.
    pub output: Vec<O>,
}

impl<S: Symbol, O: Color> Counterexample<S, O> {
    /// Creates a new counterexample.
    ///
    /// # Panics
    /// If `input` and `output` differ in length, see [`Counterexample::try_new`] for a variant
    /// that does not panic.
    pub fn new(input: Vec<S>, output: Vec<O>) -> Self {
        assert_eq!(
            input.len(),
            output.len(),
            "Counterexample input and output must be of equal length"
        );
        Self { input, output }
    }

    /// Creates a new counterexample, `None` if `input` and `output` differ in length.
    pub fn try_new(input: Vec<S>, output: Vec<O>) -> Option<Self> {
        (input.len() == output.len()).then_some(Self { input, output })
    }

    /// Returns true if `hypothesis` does not produce [`Counterexample::output`] on the input.
    pub fn is_counterexample_for<H>(&self, hypothesis: &H) -> bool
    where
        H: Mealy<Output = O> + ?Sized,
        H::Alphabet: Alphabet<Symbol = S>,
    {
        hypothesis.compute_output(&self.input).as_deref() != Some(self.output.as_slice())
    }
}

impl<S: Symbol, O: Color> Show for Counterexample<S, O> {
    fn show(&self) -> String {
        format!("{}/{}", self.input.show(), self.output.show())
    }
}

/// An oracle based on a [`MealyMachine`]. It simulates the machine symbol by symbol and keeps track of
/// how many resets and symbol queries were posed. If the machine is not complete, a default output can
/// be given which is produced on missing transitions (the machine then stays in its state).
#[derive(Debug, Clone)]
pub struct MealyOracle<A: Alphabet = CharAlphabet, O: Color = usize> {
    automaton: MealyMachine<A, O>,
    default: Option<O>,
    initial: usize,
    current: usize,
    resets: usize,
    queries: usize,
}

impl<A: Alphabet, O: Color> MealyOracle<A, O> {
    /// Creates a new [`MealyOracle`] based on an instance of [`MealyMachine`].
    pub fn new(automaton: MealyMachine<A, O>, default: Option<O>) -> Self {
        let initial = automaton
            .initial()
            .expect("Mealy oracle needs a machine with at least one state");
        Self {
            automaton,
            default,
            initial,
            current: initial,
            resets: 0,
            queries: 0,
        }
    }

    /// Returns a reference to the alphabet of the underlying machine.
    pub fn alphabet(&self) -> &A {
        self.automaton.alphabet()
    }

    /// Returns a reference to the underlying machine.
    pub fn automaton(&self) -> &MealyMachine<A, O> {
        &self.automaton
    }

    /// The number of resets that were performed so far.
    pub fn resets(&self) -> usize {
        self.resets
    }

    /// The number of symbols that were queried so far.
    pub fn queries(&self) -> usize {
        self.queries
    }

    fn step(&self, state: usize, symbol: A::Symbol) -> (usize, O) {
        match (
            self.automaton.successor(state, symbol),
            self.automaton.transition_output(state, symbol),
        ) {
            (Some(target), Some(output)) => (target, output),
            _ => (
                state,
                self.default
                    .clone()
                    .expect("The oracle must be total or provide a default!"),
            ),
        }
    }

    /// Computes the output on `word` without counting it as a query.
    pub fn output_of(&self, word: &[A::Symbol]) -> Vec<O> {
        let mut state = self.initial;
        word.iter()
            .map(|sym| {
                let (next, output) = self.step(state, *sym);
                state = next;
                output
            })
            .collect()
    }
}

impl<A: Alphabet, O: Color> SymbolOracle for MealyOracle<A, O> {
    type Symbol = A::Symbol;
    type Output = O;

    fn reset(&mut self) {
        self.resets += 1;
        self.current = self.initial;
    }

    fn query(&mut self, symbol: A::Symbol) -> O {
        self.queries += 1;
        let (next, output) = self.step(self.current, symbol);
        self.current = next;
        output
    }
}

impl<A, O, H> EquivalenceOracle<H> for MealyOracle<A, O>
where
    A: Alphabet,
    O: Color,
    H: Mealy<Alphabet = A, Output = O>,
{
    fn find_counterexample(
        &mut self,
        hypothesis: &H,
    ) -> Option<Counterexample<SymbolOf<H>, H::Output>> {
        let witness = self.automaton.witness_inequivalence(hypothesis)?;
        let output = self.output_of(&witness);
        trace!(
            "found counterexample {} with output {}",
            witness.show(),
            output.show()
        );
        Some(Counterexample::new(witness, output))
    }
}

#[cfg(test)]
mod tests {
    use mealy::prelude::*;

    use super::{Counterexample, EquivalenceOracle, MealyOracle, SymbolOracle};

    fn target() -> MealyMachine {
        MealyMachine::from_transitions(
            CharAlphabet::of_size(2),
            0,
            [(0, 'a', 0, 1), (0, 'b', 0, 0), (1, 'a', 1, 0), (1, 'b', 1, 1)],
        )
    }

    #[test_log::test]
    fn mealy_oracle_counts_queries() {
        let mut oracle = MealyOracle::new(target(), None);
        assert_eq!(oracle.answer(&['a'], &['b', 'a']), vec![1, 1]);
        assert_eq!(oracle.answer(&[], &['b']), vec![0]);
        assert_eq!(oracle.resets(), 2);
        assert_eq!(oracle.queries(), 4);
        assert_eq!(oracle.output_of(&['a', 'a', 'a']), vec![0, 1, 0]);
        assert_eq!(oracle.queries(), 4);
    }

    #[test]
    fn mealy_oracle_uses_default_on_missing_transitions() {
        let partial = MealyMachine::from_transitions(CharAlphabet::of_size(2), 0, [(0, 'a', 3, 0)]);
        let mut oracle = MealyOracle::new(partial, Some(7));
        assert_eq!(oracle.answer(&[], &['a', 'b', 'a']), vec![3, 7, 3]);
    }

    #[test_log::test]
    fn equivalence_queries() {
        let mut oracle = MealyOracle::new(target(), None);
        let single = MealyMachine::from_transitions(
            CharAlphabet::of_size(2),
            0,
            [(0, 'a', 0, 0), (0, 'b', 0, 0)],
        );
        let ce = oracle.find_counterexample(&single).unwrap();
        assert!(ce.is_counterexample_for(&single));
        assert!(!ce.is_counterexample_for(&target()));
        assert_eq!(oracle.find_counterexample(&target()), None);

        let explained = Counterexample::new(vec!['a', 'b'], vec![0, 1]);
        assert!(!explained.is_counterexample_for(&target()));
        assert!(explained.is_counterexample_for(&single));
    }

    #[test_log::test]
    fn counterexamples_need_one_output_per_symbol() {
        assert_eq!(
            Counterexample::try_new(vec!['a', 'b'], vec![0, 1]),
            Some(Counterexample::new(vec!['a', 'b'], vec![0, 1]))
        );
        assert_eq!(Counterexample::<char, usize>::try_new(vec!['a'], vec![]), None);
        assert_eq!(Counterexample::try_new(vec!['a'], vec![0, 1]), None);
    }

    #[test]
    #[should_panic(expected = "must be of equal length")]
    fn mismatched_counterexample_panics() {
        Counterexample::new(vec!['a', 'b'], vec![0]);
    }
}
