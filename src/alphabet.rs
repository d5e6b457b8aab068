use std::{fmt::Debug, hash::Hash};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::Show;

/// A symbol of an alphabet, which is also the type of input for a Mealy machine.
pub trait Symbol: Copy + Hash + Eq + Ord + Debug + Show {}

impl<S: Copy + Hash + Eq + Ord + Debug + Show> Symbol for S {}

/// An alphabet is a finite, ordered collection of [`Symbol`]s. The order in which
/// [`Alphabet::universe`] yields the symbols is the order in which learning algorithms
/// explore them, so it should be stable.
pub trait Alphabet: Clone + Debug {
    /// The type of symbol that the alphabet contains.
    type Symbol: Symbol;

    /// Iterator over all symbols of the alphabet, in order.
    type Universe<'this>: Iterator<Item = Self::Symbol>
    where
        Self: 'this;

    /// Returns an iterator over all symbols.
    fn universe(&self) -> Self::Universe<'_>;

    /// Returns the number of symbols.
    fn size(&self) -> usize;

    /// Returns true if `symbol` is part of the alphabet.
    fn contains(&self, symbol: Self::Symbol) -> bool;

    /// Returns the position of `symbol` in the alphabet, if it is contained.
    fn position(&self, symbol: Self::Symbol) -> Option<usize> {
        self.universe().position(|sym| sym == symbol)
    }
}

/// An [`Alphabet`] that can be extended by new symbols.
pub trait GrowingAlphabet: Alphabet {
    /// Appends `symbol` to the alphabet. Returns `false` if it was already present,
    /// in which case nothing changes.
    fn add_symbol(&mut self, symbol: Self::Symbol) -> bool;
}

/// Represents an alphabet where a [`Symbol`] is just a single `char`.
#[derive(Clone, Hash, PartialEq, Eq, Debug, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CharAlphabet(pub(crate) Vec<char>);

impl CharAlphabet {
    /// Creates a new [`CharAlphabet`] alphabet of the given size. The symbols are just the first `size` letters
    /// of the alphabet, i.e. 'a' to 'z'.
    pub fn of_size(size: usize) -> Self {
        assert!(size <= 26, "Alphabet is too large");
        Self((0..size).map(|i| (b'a' + i as u8) as char).collect())
    }

    /// Creates a new [`CharAlphabet`] from the given symbols, keeping their order and
    /// dropping duplicates.
    pub fn new(symbols: Vec<char>) -> Self {
        Self(symbols.into_iter().unique().collect())
    }
}

impl std::ops::Index<usize> for CharAlphabet {
    type Output = char;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl From<Vec<char>> for CharAlphabet {
    fn from(value: Vec<char>) -> Self {
        Self::new(value)
    }
}

impl FromIterator<char> for CharAlphabet {
    fn from_iter<T: IntoIterator<Item = char>>(iter: T) -> Self {
        Self(iter.into_iter().unique().sorted().collect())
    }
}

impl Alphabet for CharAlphabet {
    type Symbol = char;

    type Universe<'this> = std::iter::Copied<std::slice::Iter<'this, char>>
    where
        Self: 'this;

    fn universe(&self) -> Self::Universe<'_> {
        self.0.iter().copied()
    }

    fn size(&self) -> usize {
        self.0.len()
    }

    fn contains(&self, symbol: char) -> bool {
        self.0.contains(&symbol)
    }
}

impl GrowingAlphabet for CharAlphabet {
    fn add_symbol(&mut self, symbol: char) -> bool {
        if self.contains(symbol) {
            return false;
        }
        self.0.push(symbol);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_alphabet_growth() {
        let mut alphabet = CharAlphabet::of_size(2);
        assert_eq!(alphabet.universe().collect::<String>(), "ab");
        assert!(alphabet.add_symbol('z'));
        assert!(!alphabet.add_symbol('a'));
        assert_eq!(alphabet.size(), 3);
        assert_eq!(alphabet.position('z'), Some(2));
        assert_eq!(alphabet.position('q'), None);
    }

    #[test]
    fn char_alphabet_from_iterator_is_sorted() {
        let alphabet: CharAlphabet = "cabca".chars().collect();
        assert_eq!(alphabet.universe().collect::<String>(), "abc");
        let alphabet = CharAlphabet::new(vec!['c', 'a', 'c']);
        assert_eq!(alphabet.universe().collect::<String>(), "ca");
    }
}
