use itertools::Itertools;
use tracing::trace;

use crate::{
    math::{self, Partition},
    prelude::*,
};

/// Computes the coarsest partition of the reachable states of `mm` such that two states are
/// in the same class if and only if they produce the same output on every word.
///
/// This is a Moore-style refinement: we start from the classes induced by the outputs of
/// single symbols and split classes whose members have successors in different classes,
/// until nothing changes anymore. Missing transitions are treated as a distinct output.
pub fn mealy_partition_refinement<M: Mealy>(mm: &M) -> Partition<M::StateIndex> {
    let states = mm.reachable_states();
    let symbols = mm.alphabet().universe().collect_vec();

    let mut class_of: math::Map<M::StateIndex, usize> = {
        let mut signatures = math::Map::default();
        states
            .iter()
            .map(|&q| {
                let signature = symbols
                    .iter()
                    .map(|&sym| mm.transition_output(q, sym))
                    .collect_vec();
                let next = signatures.len();
                (q, *signatures.entry(signature).or_insert(next))
            })
            .collect()
    };
    let mut classes = class_of.values().unique().count();

    loop {
        let mut signatures = math::Map::default();
        let refined: math::Map<M::StateIndex, usize> = states
            .iter()
            .map(|&q| {
                let successors = symbols
                    .iter()
                    .map(|&sym| mm.successor(q, sym).map(|p| class_of[&p]))
                    .collect_vec();
                let next = signatures.len();
                (
                    q,
                    *signatures
                        .entry((class_of[&q], successors))
                        .or_insert(next),
                )
            })
            .collect();
        let refined_classes = signatures.len();
        trace!("refinement step produced {refined_classes} classes from {classes}");
        class_of = refined;
        if refined_classes == classes {
            break;
        }
        classes = refined_classes;
    }

    Partition::new(
        states
            .iter()
            .map(|q| class_of[q])
            .unique()
            .map(|class| {
                states
                    .iter()
                    .filter(|q| class_of[*q] == class)
                    .copied()
                    .collect_vec()
            })
            .collect_vec(),
    )
}

/// Builds the minimal machine that is equivalent to `mm`, i.e. the quotient of its reachable
/// part with respect to [`mealy_partition_refinement`]. The class of the initial state gets
/// index `0`. Returns `None` if `mm` has no initial state.
pub fn minimize<M: Mealy>(mm: &M) -> Option<MealyMachine<M::Alphabet, M::Output>> {
    let initial = mm.initial()?;
    let partition = mealy_partition_refinement(mm);
    let initial_class = partition.class_of(&initial)?;
    // move the initial class to the front
    let order = std::iter::once(initial_class)
        .chain((0..partition.size()).filter(|c| *c != initial_class))
        .collect_vec();

    let mut out = MealyMachine::for_alphabet(mm.alphabet().clone());
    for _ in 0..partition.size() {
        out.add_state();
    }
    for (idx, &class) in order.iter().enumerate() {
        let Some(representative) = partition[class].first() else {
            continue;
        };
        for sym in mm.alphabet().universe() {
            let (Some(target), Some(output)) = (
                mm.successor(*representative, sym),
                mm.transition_output(*representative, sym),
            ) else {
                continue;
            };
            let target_class = partition.class_of(&target)?;
            let target_idx = order.iter().position(|c| *c == target_class)?;
            out.add_transition(idx, sym, output, target_idx);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn mealy_minimization() {
        // states 1 and 3 as well as 2 and 4 are equivalent
        let mm = MealyMachine::from_transitions(
            CharAlphabet::of_size(2),
            0,
            [
                (0, 'a', 0, 1),
                (0, 'b', 0, 3),
                (1, 'a', 1, 2),
                (1, 'b', 0, 0),
                (2, 'a', 2, 0),
                (2, 'b', 0, 2),
                (3, 'a', 1, 4),
                (3, 'b', 0, 0),
                (4, 'a', 2, 0),
                (4, 'b', 0, 4),
            ],
        );
        let partition = mealy_partition_refinement(&mm);
        assert_eq!(
            partition,
            Partition::new([vec![0], vec![1, 3], vec![2, 4]])
        );

        let minimal = minimize(&mm).unwrap();
        assert_eq!(minimal.size(), 3);
        assert!(minimal.bisimilar(&mm));
        assert!(minimal.is_complete());
    }

    #[test]
    fn single_state_is_minimal() {
        let mm = MealyMachine::from_transitions(
            CharAlphabet::of_size(2),
            0,
            [(0, 'a', 1, 0), (0, 'b', 1, 0)],
        );
        assert_eq!(mealy_partition_refinement(&mm).size(), 1);
        assert_eq!(minimize(&mm).unwrap().size(), 1);
    }
}
