//! Learning of Mealy machines with adaptive distinguishing trees (ADTs).
//!
//! In contrast to discrimination tree based learners, the inner nodes of an ADT are single input
//! symbols whose children are indexed by the output the system produces on them. A path from the
//! root to a leaf therefore describes an adaptive experiment, which can be executed without
//! resetting the system in between. Only [`tree::AdtNode::Reset`] nodes abandon the current run,
//! so the learner tries to keep their number low by extending and replacing parts of the tree
//! with adaptive distinguishing sequences whenever this is possible.
//!
//! The main entry point is [`AdtLearner`], whose behavior can be customized with a
//! [`LeafSplitter`], an [`AdtExtender`] and a [`SubtreeReplacer`].

mod error;
pub use error::AdtError;

mod hypothesis;
pub use hypothesis::{AdtHypothesis, AdtState, AdtTransition, StateId, TransitionId};

/// The adaptive distinguishing tree and the operations that modify it.
pub mod tree;
pub use tree::{Adt, AdtNode, LcaInfo, NodeId};

mod observation;
pub use observation::ObservationTree;

mod ads;
pub use ads::{compute_ads, Ads};

mod policy;
pub use policy::{
    AdtExtender, BestEffortExtender, DefaultSplitter, ExhaustiveReplacer, ExtendParentSplitter,
    ExtensionResult, LeafSplitter, LevelOrderReplacer, NeverReplace, NopExtender,
    PartialTransitionAnalyzer, ReplacementResult, SingleReplacer, SubtreeReplacer,
};

mod learner;
pub use learner::{AdtLearner, AdtLearnerBuilder};

mod snapshot;
pub use snapshot::AdtSnapshot;
