use rand::Rng;

/// Picks one candidate with probability proportional to its score
///
/// `candidates` is an immutable snapshot of `(address, score)` pairs; the
/// function has no side effects beyond drawing from `rng`. Non-positive or
/// non-finite scores carry no weight. If no candidate carries weight, the
/// pick is uniform.
///
/// Returns the index of the chosen candidate, or None if `candidates` is empty.
pub fn select_weighted<R: Rng + ?Sized>(candidates: &[(&str, f64)], rng: &mut R) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }

    let weight = |score: f64| if score.is_finite() && score > 0.0 { score } else { 0.0 };
    let total: f64 = candidates.iter().map(|(_, score)| weight(*score)).sum();

    if !(total > 0.0 && total.is_finite()) {
        return Some(rng.random_range(0..candidates.len()));
    }

    let roll = rng.random_range(0.0..total);
    let mut cumulative = 0.0;
    let mut last_weighted = 0;
    for (index, (_, score)) in candidates.iter().enumerate() {
        let w = weight(*score);
        if w == 0.0 {
            continue;
        }
        cumulative += w;
        last_weighted = index;
        if roll < cumulative {
            return Some(index);
        }
    }

    // Float rounding can leave roll == total
    Some(last_weighted)
}
