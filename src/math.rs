use std::{collections::BTreeSet, hash::Hash};

/// Type alias for sets, we use this to hide which type of `HashSet` we are actually using.
pub type Set<S> = fxhash::FxHashSet<S>;
/// Type alias for maps, we use this to hide which type of `HashMap` we are actually using.
pub type Map<K, V> = fxhash::FxHashMap<K, V>;
/// Type alias for maps whose iteration order must be deterministic.
pub type OrderedMap<K, V> = std::collections::BTreeMap<K, V>;

/// Represents a bijective mapping between `L` and `R`, that is a mapping which associates
/// each `L` with precisely one `R` and vice versa.
pub type Bijection<L, R> = bimap::BiBTreeMap<L, R>;

/// A partition is a different view on an equivalence relation, by grouping elements of
/// type `I` into their respective classes under the relation.
#[derive(Debug, Clone)]
pub struct Partition<I: Hash + Eq>(Vec<BTreeSet<I>>);

impl<I: Hash + Eq> std::ops::Deref for Partition<I> {
    type Target = Vec<BTreeSet<I>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'a, I: Hash + Eq> IntoIterator for &'a Partition<I> {
    type Item = &'a BTreeSet<I>;
    type IntoIter = std::slice::Iter<'a, BTreeSet<I>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<I: Hash + Eq + Ord> PartialEq for Partition<I> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|o| other.contains(o))
    }
}
impl<I: Hash + Eq + Ord> Eq for Partition<I> {}

impl<I: Hash + Eq + Ord> Partition<I> {
    /// Returns the size of the partition, i.e. the number of classes.
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// Builds a new partition from an iterator that yields iterators
    /// which yield elements of type `I`.
    pub fn new<X: IntoIterator<Item = I>, Y: IntoIterator<Item = X>>(iter: Y) -> Self {
        Self(
            iter.into_iter()
                .map(|it| it.into_iter().collect::<BTreeSet<_>>())
                .collect(),
        )
    }

    /// Returns the position of the class that contains `element`, if any.
    pub fn class_of(&self, element: &I) -> Option<usize> {
        self.0.iter().position(|class| class.contains(element))
    }
}

impl<I: Hash + Eq + Ord> From<Vec<BTreeSet<I>>> for Partition<I> {
    fn from(value: Vec<BTreeSet<I>>) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::Partition;

    #[test]
    fn partition_equality_ignores_class_order() {
        let left = Partition::new([vec![0, 1], vec![2]]);
        let right = Partition::new([vec![2], vec![1, 0]]);
        assert_eq!(left, right);
        assert_eq!(left.class_of(&1), Some(0));
        assert_eq!(right.class_of(&1), Some(1));
        assert_eq!(left.class_of(&7), None);
    }
}
