use mealy::prelude::*;

/// A hypothesis of an active learner. On top of being a (possibly partial) [`Mealy`] machine, every
/// state of a hypothesis knows an access sequence, that is a word which leads from the initial state
/// to it and that has been posed to the system under learning.
pub trait Hypothesis: Mealy {
    /// Returns the access sequence of `state`, if it has been assigned already.
    fn access_sequence(&self, state: Self::StateIndex) -> Option<&[SymbolOf<Self>]>;
}
