//! A library for actively learning Mealy machines from a black box system.
//!
//! The central piece is [`active::AdtLearner`], which organizes the states of its hypothesis in an
//! adaptive distinguishing tree and tries to keep the number of system resets low. Membership
//! queries are posed symbol by symbol through a [`active::SymbolOracle`], equivalence queries
//! through an [`active::EquivalenceOracle`].

/// Deals with active learning algorithms, their oracles and the data structures they use.
pub mod active;

/// Everything that is needed for setting up a learner, i.e. `use mealy_learning::prelude::*;`.
pub mod prelude {
    pub use super::active::{
        adt::{
            AdtError, AdtLearner, AdtSnapshot, BestEffortExtender, DefaultSplitter,
            ExhaustiveReplacer, ExtendParentSplitter, LevelOrderReplacer, NeverReplace,
            NopExtender, SingleReplacer,
        },
        Counterexample, EquivalenceOracle, Hypothesis, LocalSuffixFinder, MealyOracle,
        SymbolOracle,
    };
}
