use thiserror::Error;

use super::{NodeId, StateId};

/// Errors that can occur while learning with an [`super::AdtLearner`]. Apart from
/// [`AdtError::HypothesisModified`], which is used as a signal between the learner and its
/// extension policies, all of them indicate a violated invariant and abort the current call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdtError {
    /// The suffix finder could not decompose a counterexample.
    #[error("could not decompose counterexample")]
    DecompositionFailed,
    /// A proposed replacement does not cover the same states or contradicts the hypothesis.
    #[error("invalid replacement: {0}")]
    InvalidReplacement(String),
    /// The tree does not have the expected shape.
    #[error("malformed tree: {0}")]
    MalformedTree(String),
    /// An operation that requires a leaf was invoked on a different kind of node.
    #[error("node {0:?} is not a leaf")]
    NotALeaf(NodeId),
    /// The splitter and the two output words differ in length.
    #[error("distinguishing suffix of length {suffix} does not match outputs of lengths {old} and {new}")]
    OutputLengthMismatch {
        /// Length of the distinguishing suffix.
        suffix: usize,
        /// Length of the output of the old state.
        old: usize,
        /// Length of the output of the new state.
        new: usize,
    },
    /// The outputs that should separate two states are equal.
    #[error("old and new output are equal")]
    EqualOutputs,
    /// The two nodes do not have a common symbol node as ancestor.
    #[error("nodes {0:?} and {1:?} do not share a decision node")]
    NoCommonAncestor(NodeId, NodeId),
    /// The state does not exist in the hypothesis.
    #[error("unknown state {0:?}")]
    UnknownState(StateId),
    /// The transition does not exist in the hypothesis.
    #[error("no transition from {0:?} on {1}")]
    UnknownTransition(StateId, String),
    /// The symbol is not part of the alphabet.
    #[error("symbol {0} is not part of the alphabet")]
    UnknownSymbol(String),
    /// The learner has not been started yet.
    #[error("learning has not been started")]
    NotStarted,
    /// The observation tree has no information about the state.
    #[error("no observations for state {0:?}")]
    MissingObservation(StateId),
    /// Two states could not be told apart when grafting a separating sequence.
    #[error("could not separate {0:?} and {1:?}")]
    AmbiguityUnresolved(StateId, StateId),
    /// Learning did not converge within the configured number of iterations.
    #[error("no result after {0} iterations")]
    IterationLimit(usize),
    /// Closing a transition discovered a new state, which invalidates all assumptions that were
    /// made about the hypothesis so far.
    #[error("hypothesis was modified")]
    HypothesisModified,
}
