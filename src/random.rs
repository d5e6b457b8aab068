use tracing::debug;

use crate::prelude::*;

/// Uses a sprout-like algorithm to generate a random, complete Mealy machine. `symbols` determines
/// the number of distinct symbols in the [`CharAlphabet`] and every transition is labelled with an
/// output drawn uniformly from `0..outputs`. `probability` determines the probability of a back
/// edge to some state being inserted. The algorithm is as follows:
/// 1. Start with a single state.
/// 2. For each symbol, go through the existing states in order and with probability `probability`
///    add a back edge to that state.
/// 3. If no back edge to some state was added, we insert an edge to a new state.
/// 4. Repeat until all states and symbols have been treated.
///
/// Every state of the result is reachable, but the machine need not be minimal.
pub fn generate_random_mealy(symbols: usize, outputs: usize, probability: f64) -> MealyMachine {
    assert!(outputs > 0, "need at least one output");
    let alphabet = CharAlphabet::of_size(symbols);
    let mut mm = MealyMachine::for_alphabet(alphabet.clone());

    let mut current = mm.add_state();
    let mut symbol_position = 0;

    'outer: loop {
        if current >= mm.size() {
            // we have treated all states, we can exit
            break 'outer;
        }

        if symbol_position >= symbols {
            // we have treated all symbols, go to next state
            symbol_position = 0;
            current += 1;
            continue 'outer;
        }

        let symbol = alphabet[symbol_position];
        symbol_position += 1;
        let output = fastrand::usize(..outputs);

        for target in 0..=current {
            if fastrand::f64() < probability {
                mm.add_transition(current, symbol, output, target);
                continue 'outer;
            }
        }

        // no target was found so we create it
        let target = mm.add_state();
        mm.add_transition(current, symbol, output, target);
    }

    debug!("generated random Mealy machine with {} states", mm.size());
    mm
}

/// Generate a random complete Mealy machine of size `size` by randomly drawing transitions and
/// outputs. Afterwards the unreachable states are removed, so the result may be smaller than
/// `size`.
pub fn generate_random_mealy_sized(symbols: usize, outputs: usize, size: usize) -> MealyMachine {
    assert!(size > 0 && outputs > 0);
    let alphabet = CharAlphabet::of_size(symbols);
    let mut mm = MealyMachine::for_alphabet(alphabet.clone());
    for _ in 0..size {
        mm.add_state();
    }
    for q in 0..size {
        for sym in alphabet.universe() {
            mm.add_transition(q, sym, fastrand::usize(..outputs), fastrand::usize(..size));
        }
    }
    match mm.collect_mealy() {
        Some(trimmed) => trimmed,
        None => unreachable!("the machine has at least one state"),
    }
}

/// Generate a random word over the universe of the `alphabet`.
/// The length of the word is drawn uniformly from the range `min_len..=max_len`.
pub fn generate_random_word(alphabet: &CharAlphabet, min_len: usize, max_len: usize) -> Vec<char> {
    let length = fastrand::usize(min_len..=max_len);
    (0..length)
        .map(|_| alphabet[fastrand::usize(..alphabet.size())])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_mealy_machines_are_complete() {
        for _ in 0..20 {
            let mm = generate_random_mealy(3, 2, 0.4);
            assert!(mm.is_complete());
            assert_eq!(mm.reachable_states().len(), mm.size());
            assert!(mm.output_range().all(|o| *o < 2));

            let sized = generate_random_mealy_sized(2, 3, 6);
            assert!(sized.size() <= 6);
            assert!(sized.is_complete());
        }
    }

    #[test]
    fn random_words_respect_bounds() {
        let alphabet = CharAlphabet::of_size(3);
        for _ in 0..20 {
            let word = generate_random_word(&alphabet, 2, 5);
            assert!((2..=5).contains(&word.len()));
            assert!(word.iter().all(|c| alphabet.contains(*c)));
        }
    }
}
