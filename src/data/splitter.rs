// ============================================================
// Layer 4 — Train/Validation Splitter and Pair Sampling
// ============================================================
// Two seeded sampling helpers shared by every data provider:
//
//   split_train_val  shuffles samples and cuts them into a
//                    training part and a held-out part
//   sample_pairs     draws verification pairs from a list of
//                    labels: about half same-identity pairs,
//                    the rest different-identity pairs
//
// Both take an explicit seed so that a run (and a resumed run)
// sees the same split and the same validation pairs.
//
// Reference: rand crate documentation (SliceRandom, StdRng)

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use std::collections::BTreeMap;

/// Shuffle `samples` with `seed` and split into (train, held_out).
pub fn split_train_val<T>(mut samples: Vec<T>, train_fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let total    = samples.len();
    let split_at = ((total as f64) * train_fraction).round() as usize;
    let split_at = split_at.min(total);

    let held_out = samples.split_off(split_at);

    tracing::debug!(
        "Dataset split: {} training, {} held out",
        samples.len(),
        held_out.len(),
    );

    (samples, held_out)
}

/// One sampled pair: indices into the label list and whether
/// both indices share a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairIndex {
    pub left:  usize,
    pub right: usize,
    pub same:  bool,
}

/// Draw up to `n` verification pairs over `labels`.
///
/// Positives need a label with at least two samples, negatives
/// need two distinct labels; when one kind cannot be formed the
/// other fills the whole quota.
pub fn sample_pairs(labels: &[usize], n: usize, seed: u64) -> Vec<PairIndex> {
    let mut rng = StdRng::seed_from_u64(seed);

    let mut by_label: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        by_label.entry(label).or_default().push(i);
    }
    let pos_groups: Vec<&Vec<usize>> = by_label.values().filter(|g| g.len() >= 2).collect();
    let can_negative = by_label.len() >= 2;

    let (n_pos, n_neg) = match (pos_groups.is_empty(), can_negative) {
        (true, true)   => (0, n),
        (false, false) => (n, 0),
        (true, false)  => (0, 0),
        (false, true)  => (n / 2, n - n / 2),
    };

    let mut pairs = Vec::with_capacity(n_pos + n_neg);
    for _ in 0..n_pos {
        let group = pos_groups[rng.gen_range(0..pos_groups.len())];
        let mut two = group.choose_multiple(&mut rng, 2);
        if let (Some(&left), Some(&right)) = (two.next(), two.next()) {
            pairs.push(PairIndex { left, right, same: true });
        }
    }
    for _ in 0..n_neg {
        let left = rng.gen_range(0..labels.len());
        // rejection sampling terminates: at least two labels exist
        let right = loop {
            let j = rng.gen_range(0..labels.len());
            if labels[j] != labels[left] {
                break j;
            }
        };
        pairs.push(PairIndex { left, right, same: false });
    }
    pairs.shuffle(&mut rng);
    pairs
}
