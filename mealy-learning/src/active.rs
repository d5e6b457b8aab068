pub(crate) mod oracle;
pub use oracle::*;

mod hypothesis;
pub use hypothesis::*;

mod suffix;
pub use suffix::LocalSuffixFinder;

/// Learning Mealy machines with an adaptive distinguishing tree.
pub mod adt;
