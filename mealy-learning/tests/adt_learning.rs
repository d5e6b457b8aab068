use mealy::{minimization::minimize, prelude::*, random::generate_random_mealy_sized};
use mealy_learning::{
    active::adt::{AdtExtender, AdtHypothesis, LeafSplitter, SubtreeReplacer},
    prelude::*,
};

type Learner = AdtLearner<CharAlphabet, usize, MealyOracle>;

/// Counts modulo three on 'a' and reports the current count on 'b', which also resets it.
fn counter() -> MealyMachine {
    MealyMachine::from_transitions(
        CharAlphabet::of_size(2),
        0,
        [
            (0, 'a', 0, 1),
            (0, 'b', 0, 0),
            (1, 'a', 0, 2),
            (1, 'b', 1, 0),
            (2, 'a', 1, 0),
            (2, 'b', 2, 0),
        ],
    )
}

/// A chain in which only the last state produces a different output.
fn chain(length: usize) -> MealyMachine {
    let transitions = (0..length).flat_map(|q| {
        let last = q + 1 == length;
        [
            (q, 'a', usize::from(last), (q + 1) % length),
            (q, 'b', 0, q),
        ]
    });
    MealyMachine::from_transitions(CharAlphabet::of_size(2), 0, transitions)
}

fn learner_with<L, E, R>(target: &MealyMachine, splitter: L, extender: E, replacer: R) -> Learner
where
    L: LeafSplitter<char, usize> + 'static,
    E: AdtExtender<CharAlphabet, usize> + 'static,
    R: SubtreeReplacer<CharAlphabet, usize> + 'static,
{
    AdtLearner::builder(
        target.alphabet().clone(),
        MealyOracle::new(target.clone(), None),
    )
    .with_leaf_splitter(splitter)
    .with_extender(extender)
    .with_replacer(replacer)
    .with_iteration_threshold(100)
    .build()
}

/// Runs every combination of policies on `target` and checks that the result is a minimal
/// machine that is equivalent to it.
fn learn_with_all_configurations(target: &MealyMachine) {
    let minimal = minimize(target).unwrap().size();
    let mut learners = vec![
        learner_with(target, DefaultSplitter, NopExtender, NeverReplace),
        learner_with(target, DefaultSplitter, NopExtender, SingleReplacer),
        learner_with(target, DefaultSplitter, BestEffortExtender, NeverReplace),
        learner_with(target, DefaultSplitter, BestEffortExtender, SingleReplacer),
        learner_with(target, ExtendParentSplitter, NopExtender, NeverReplace),
        learner_with(target, ExtendParentSplitter, NopExtender, SingleReplacer),
        learner_with(target, ExtendParentSplitter, BestEffortExtender, NeverReplace),
        learner_with(target, ExtendParentSplitter, BestEffortExtender, SingleReplacer),
        learner_with(target, DefaultSplitter, NopExtender, ExhaustiveReplacer),
        learner_with(target, DefaultSplitter, BestEffortExtender, ExhaustiveReplacer),
        learner_with(target, ExtendParentSplitter, NopExtender, ExhaustiveReplacer),
        learner_with(target, ExtendParentSplitter, BestEffortExtender, ExhaustiveReplacer),
        learner_with(target, DefaultSplitter, NopExtender, LevelOrderReplacer),
        learner_with(target, DefaultSplitter, BestEffortExtender, LevelOrderReplacer),
        learner_with(target, ExtendParentSplitter, NopExtender, LevelOrderReplacer),
        learner_with(target, ExtendParentSplitter, BestEffortExtender, LevelOrderReplacer),
    ];
    for learner in &mut learners {
        let mut equivalence = MealyOracle::new(target.clone(), None);
        let learned = learner.infer(&mut equivalence).unwrap();
        assert!(learned.bisimilar(target), "{learner:?}");
        assert_eq!(learned.size(), minimal);

        let hypothesis = learner.hypothesis_model();
        let mut oracle = MealyOracle::new(target.clone(), None);
        assert!(learner
            .adt()
            .self_sift(&mut oracle, |q| hypothesis.access_sequence(q).map(|w| w.to_vec()))
            .unwrap());
        assert_eq!(learner.adt().states().len(), hypothesis.size());

        let root = learner.adt().root().unwrap();
        let leaves = learner.adt().collect_leaves(root);
        for (i, &first) in leaves.iter().enumerate() {
            for &second in &leaves[i + 1..] {
                let lca = learner.adt().find_lca(first, second).unwrap();
                assert_ne!(lca.first_output, lca.second_output);
            }
        }
    }
}

#[test_log::test]
fn learning_handwritten_machines() {
    learn_with_all_configurations(&counter());
    learn_with_all_configurations(&chain(5));
}

#[test_log::test]
fn learning_random_machines() {
    for size in [4, 8, 12] {
        for _ in 0..4 {
            let target = generate_random_mealy_sized(3, 2, size);
            learn_with_all_configurations(&target);
        }
    }
}

#[test_log::test]
fn learning_without_cache_and_linear_decomposition() {
    let target = chain(6);
    let mut learner = AdtLearner::builder(
        CharAlphabet::of_size(2),
        MealyOracle::new(target.clone(), None),
    )
    .use_cache(false)
    .with_suffix_finder(LocalSuffixFinder::Linear)
    .build();
    let mut equivalence = MealyOracle::new(target.clone(), None);
    let learned = learner.infer(&mut equivalence).unwrap();
    assert!(learned.bisimilar(&target));
    assert_eq!(learned.size(), 6);
}

#[test_log::test]
fn two_states_from_one_counterexample() {
    let target = MealyMachine::from_transitions(
        CharAlphabet::of_size(2),
        0,
        [(0, 'a', 0, 1), (0, 'b', 0, 0), (1, 'a', 1, 0), (1, 'b', 1, 1)],
    );
    let mut learner = Learner::new(
        CharAlphabet::of_size(2),
        MealyOracle::new(target.clone(), None),
    );
    learner.start_learning().unwrap();
    learner.start_learning().unwrap();
    assert_eq!(learner.hypothesis_model().size(), 1);

    let ce = Counterexample::new(vec!['a', 'b'], vec![0, 1]);
    assert!(learner.refine_hypothesis(ce.clone()).unwrap());
    assert_eq!(learner.hypothesis_model().size(), 2);
    assert!(learner.hypothesis_model().bisimilar(&target));

    let root = learner.adt().root().unwrap();
    assert_eq!(learner.adt().collect_ads_nodes(root).len(), 1);
    assert_eq!(learner.adt().collect_reset_nodes(root).len(), 0);
    assert!(!learner.refine_hypothesis(ce).unwrap());
}

#[test_log::test]
fn growing_the_alphabet() {
    let target = counter();
    let only_a = MealyMachine::from_transitions(
        CharAlphabet::new(vec!['a']),
        0,
        [(0, 'a', 0, 1), (1, 'a', 0, 2), (2, 'a', 1, 0)],
    );

    let mut learner = Learner::new(
        CharAlphabet::new(vec!['a']),
        MealyOracle::new(target.clone(), None),
    );
    let learned = learner
        .infer(&mut MealyOracle::new(only_a.clone(), None))
        .unwrap();
    assert!(learned.bisimilar(&only_a));

    assert!(learner.add_alphabet_symbol('b').unwrap());
    assert!(!learner.add_alphabet_symbol('b').unwrap());
    let hypothesis = learner.hypothesis_model();
    assert!(hypothesis.states().all(|q| learner.is_transition_defined(q, 'b')));
    assert_eq!(hypothesis.open_transitions().count(), 0);
    assert!(hypothesis.bisimilar(&target));

    let learned = learner
        .infer(&mut MealyOracle::new(target.clone(), None))
        .unwrap();
    assert_eq!(learned.size(), 3);
}

#[test_log::test]
fn growing_the_alphabet_before_learning() {
    let target = counter();
    let mut learner = Learner::new(
        CharAlphabet::new(vec!['a']),
        MealyOracle::new(target.clone(), None),
    );
    assert!(learner.add_alphabet_symbol('b').unwrap());
    assert!(learner.hypothesis_model().initial().is_none());
    let learned = learner
        .infer(&mut MealyOracle::new(target.clone(), None))
        .unwrap();
    assert!(learned.bisimilar(&target));
}

#[test_log::test]
fn suspending_and_resuming() {
    let target = chain(4);
    let mut learner = Learner::new(
        CharAlphabet::of_size(2),
        MealyOracle::new(target.clone(), None),
    );
    learner.start_learning().unwrap();
    let ce = Counterexample::new(vec!['a', 'a', 'a', 'a'], vec![0, 0, 0, 1]);
    assert!(learner.refine_hypothesis(ce).unwrap());

    let snapshot = learner.suspend();
    let serialized = serde_json::to_string(&snapshot).unwrap();
    let restored: AdtSnapshot<CharAlphabet, usize> = serde_json::from_str(&serialized).unwrap();
    assert_eq!(restored, snapshot);

    let mut resumed = Learner::new(
        CharAlphabet::of_size(2),
        MealyOracle::new(target.clone(), None),
    );
    resumed.resume(restored);
    assert!(resumed.hypothesis_model() == learner.hypothesis_model());
    assert!(resumed.adt() == learner.adt());

    let learned = resumed
        .infer(&mut MealyOracle::new(target.clone(), None))
        .unwrap();
    assert!(learned.bisimilar(&target));
    assert_eq!(learned.size(), 4);
}

#[test_log::test]
fn refining_before_starting_fails() {
    let mut learner = Learner::new(
        CharAlphabet::of_size(2),
        MealyOracle::new(counter(), None),
    );
    let ce = Counterexample::new(vec!['a'], vec![0]);
    assert_eq!(learner.refine_hypothesis(ce), Err(AdtError::NotStarted));
    let empty: &AdtHypothesis<CharAlphabet, usize> = learner.hypothesis_model();
    assert_eq!(empty.size(), 0);
}

#[test_log::test]
fn counterexamples_with_missing_outputs_are_rejected() {
    let mut learner = Learner::new(
        CharAlphabet::of_size(2),
        MealyOracle::new(counter(), None),
    );
    learner.start_learning().unwrap();
    let malformed = Counterexample {
        input: vec!['a', 'a', 'a'],
        output: vec![0, 0],
    };
    assert_eq!(
        learner.refine_hypothesis(malformed),
        Err(AdtError::OutputLengthMismatch {
            suffix: 3,
            old: 2,
            new: 2
        })
    );
    assert_eq!(learner.hypothesis_model().size(), 1);
    assert_eq!(Counterexample::try_new(vec!['a', 'a', 'a'], vec![0, 0]), None);
}

#[test_log::test]
fn iteration_limit_is_reported() {
    let target = chain(6);
    let mut learner = AdtLearner::builder(
        CharAlphabet::of_size(2),
        MealyOracle::new(target.clone(), None),
    )
    .with_iteration_threshold(1)
    .build();
    let result = learner.infer(&mut MealyOracle::new(target, None));
    assert_eq!(result.err(), Some(AdtError::IterationLimit(1)));
}
