use crate::alphabet::Symbol;

/// Helper methods on finite words. Words are represented as slices/vectors of symbols,
/// this trait only bundles the handful of operations that learning algorithms need all
/// the time, such as concatenation and prefix checks.
pub trait FiniteWord<S: Symbol> {
    /// Returns the symbols of the word as a slice.
    fn as_slice(&self) -> &[S];

    /// Returns a human readable representation of the word.
    fn as_string(&self) -> String {
        S::show_collection(self.as_slice().iter())
    }

    /// Returns a new word consisting of `self` followed by `other`.
    fn followed_by(&self, other: &[S]) -> Vec<S> {
        let mut out = Vec::with_capacity(self.as_slice().len() + other.len());
        out.extend_from_slice(self.as_slice());
        out.extend_from_slice(other);
        out
    }

    /// Returns a new word consisting of `self` followed by `symbol`.
    fn with_symbol(&self, symbol: S) -> Vec<S> {
        self.followed_by(&[symbol])
    }

    /// Returns true if `self` is a (not necessarily proper) prefix of `other`.
    fn is_prefix_of(&self, other: &[S]) -> bool {
        other.starts_with(self.as_slice())
    }
}

impl<S: Symbol> FiniteWord<S> for [S] {
    fn as_slice(&self) -> &[S] {
        self
    }
}

impl<S: Symbol> FiniteWord<S> for Vec<S> {
    fn as_slice(&self) -> &[S] {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::FiniteWord;

    #[test]
    fn word_helpers() {
        let word = vec!['a', 'b'];
        assert_eq!(word.with_symbol('c'), vec!['a', 'b', 'c']);
        assert_eq!(word.followed_by(&['b', 'a']), vec!['a', 'b', 'b', 'a']);
        assert!(word.is_prefix_of(&['a', 'b', 'c']));
        assert!(!word.is_prefix_of(&['a']));
        assert!(Vec::<char>::new().is_prefix_of(&[]));
        assert_eq!(word.as_string(), "\"ab\"");
    }
}
