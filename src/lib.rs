//! Library for working with deterministic Mealy machines in Rust.
//!
//! A Mealy machine consists of a finite set of states, a designated initial state and a
//! transition function which, for every state and input symbol, determines a successor state
//! together with an output. Running a Mealy machine on a finite word of length `n` therefore
//! produces a sequence of `n` outputs.
//!
//! The most important trait is [`Mealy`], which only requires access to successors and
//! transition outputs and derives everything else from that, for example computing the output
//! of a word, finding words that separate two states or witnessing the inequivalence of two
//! machines. It is implemented by the concrete [`MealyMachine`] as well as by the (possibly
//! partial) hypotheses that learning algorithms build up incrementally.
//!
//! Further building blocks are
//! - [`Alphabet`]/[`alphabet::GrowingAlphabet`] which describe the input symbols a machine reads,
//! - [`word::FiniteWord`], a small set of helpers on top of slices of symbols,
//! - [`Show`] which is used throughout for human readable output of states, symbols and words.
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// The prelude is supposed to make using this package easier. Including everything, i.e.
/// `use mealy::prelude::*;` should be enough to use the package.
pub mod prelude {
    pub use super::{
        alphabet::{Alphabet, CharAlphabet, GrowingAlphabet, Symbol},
        math,
        mealy::{Mealy, MealyMachine, StateIndexOf, SymbolOf},
        word::FiniteWord,
        Color, Show,
    };
}

/// This module contains some definitions of mathematical objects which are used throughout the crate and
/// do not really fit to the top level.
pub mod math;

/// Module that contains definitions for dealing with alphabets.
pub mod alphabet;
pub use alphabet::Alphabet;

/// Module that contains definitions for dealing with finite words.
pub mod word;

/// Defines the [`Mealy`] trait and the concrete [`MealyMachine`].
pub mod mealy;
pub use mealy::{Mealy, MealyMachine};

/// Contains partition refinement for computing the minimal machine that is equivalent to
/// a given one.
pub mod minimization;

/// Implements the generation of random Mealy machines.
#[cfg(feature = "random")]
pub mod random;

use std::{fmt::Debug, hash::Hash};

/// A color is simply a type that can be used as the output of a transition.
pub trait Color: Clone + Eq + Ord + Hash + Debug + Show {}

impl<T: Eq + Ord + Clone + Hash + Debug + Show> Color for T {}

/// Helper trait which can be used to display states, transitions and such.
pub trait Show {
    /// Returns a human readable representation of `self`, for a state index that should be
    /// for example q0, q1, q2, ... and for a transition (q0, a, q1) it should be (q0, a, q1).
    /// Just use something that makes sense. This is mainly used for debugging purposes.
    fn show(&self) -> String;
    /// Show a collection of the thing, for a collection of states this should be {q0, q1, q2, ...}
    /// and for a collection of symbols it should be the concatenation of the symbols.
    fn show_collection<'a, I>(iter: I) -> String
    where
        Self: 'a,
        I: IntoIterator<Item = &'a Self>,
    {
        format!(
            "[{}]",
            itertools::Itertools::join(&mut iter.into_iter().map(|x| x.show()), ", ")
        )
    }
}

impl Show for usize {
    fn show(&self) -> String {
        self.to_string()
    }
}

impl Show for u32 {
    fn show(&self) -> String {
        self.to_string()
    }
}

impl Show for i32 {
    fn show(&self) -> String {
        self.to_string()
    }
}

impl Show for u8 {
    fn show(&self) -> String {
        self.to_string()
    }
}

impl Show for String {
    fn show(&self) -> String {
        self.clone()
    }
}

impl Show for () {
    fn show(&self) -> String {
        "-".into()
    }
}

impl Show for bool {
    fn show(&self) -> String {
        match self {
            true => "+",
            false => "-",
        }
        .to_string()
    }
}

impl Show for char {
    fn show(&self) -> String {
        self.to_string()
    }

    fn show_collection<'a, I>(iter: I) -> String
    where
        Self: 'a,
        I: IntoIterator<Item = &'a Self>,
    {
        format!("\"{}\"", iter.into_iter().collect::<String>())
    }
}

impl<S: Show> Show for [S] {
    fn show(&self) -> String {
        S::show_collection(self.iter())
    }
}

impl<S: Show> Show for Vec<S> {
    fn show(&self) -> String {
        S::show_collection(self.iter())
    }
}

impl<S: Show, T: Show> Show for (S, T) {
    fn show(&self) -> String {
        format!("({}, {})", self.0.show(), self.1.show())
    }
}

impl<S: Show> Show for Option<S> {
    fn show(&self) -> String {
        match self {
            None => "_".to_string(),
            Some(x) => x.show(),
        }
    }
}

impl<S: Show> Show for &S {
    fn show(&self) -> String {
        S::show(*self)
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[test]
    fn showing_words_and_collections() {
        assert_eq!(vec!['a', 'b', 'a'].show(), "\"aba\"");
        assert_eq!(vec![1usize, 2, 3].show(), "[1, 2, 3]");
        assert_eq!(Some(true).show(), "+");
        assert_eq!(None::<usize>.show(), "_");
        assert_eq!(('a', 2usize).show(), "(a, 2)");
    }
}
