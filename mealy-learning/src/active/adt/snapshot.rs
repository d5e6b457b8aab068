use std::fmt::Debug;

use mealy::prelude::*;
use serde::{Deserialize, Serialize};

use super::{Adt, AdtHypothesis};

/// The state of an [`super::AdtLearner`] that is needed to continue learning at a later point,
/// see [`super::AdtLearner::suspend`] and [`super::AdtLearner::resume`]. Observations are not
/// part of it, they are rebuilt from the access sequences when learning is resumed.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "A: Serialize, A::Symbol: Serialize, O: Serialize",
    deserialize = "A: Deserialize<'de>, A::Symbol: Deserialize<'de>, O: Deserialize<'de>"
))]
pub struct AdtSnapshot<A: Alphabet, O: Color> {
    /// The hypothesis at the time of suspension.
    pub hypothesis: AdtHypothesis<A, O>,
    /// The tree at the time of suspension.
    pub tree: Adt<A::Symbol, O>,
}

impl<A: Alphabet, O: Color> Debug for AdtSnapshot<A, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:?}", self.hypothesis)?;
        write!(f, "{:?}", self.tree)
    }
}
