//! Relevance ranking of recalled memories.
//!
//! Each candidate carries three independent scores: similarity to the
//! query, importance, and recency. Each score is min-max normalized across
//! the candidate set and the three are summed, so every total lies in
//! `[0, 3]`. A score whose range is zero across the set contributes 0 for
//! every candidate. Sorting is stable, so equal totals keep input order.

/// Milliseconds in an hour.
const HOUR_MS: u64 = 3_600_000;

/// Raw scores for one recall candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankInput {
    /// Similarity to the query embedding.
    pub similarity: f64,
    /// Importance on the 0 to 9 scale.
    pub importance: f64,
    /// Recency score, see [`recency_score`].
    pub recency: f64,
}

/// A ranked candidate, referring back to its input position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ranked {
    /// Position of the candidate in the input slice.
    pub index: usize,
    /// Normalized total in `[0, 3]`.
    pub score: f64,
}

/// Recency score: `decay ^ floor(hours since last access)`.
pub fn recency_score(last_access: u64, now: u64, decay: f64) -> f64 {
    let hours = now.saturating_sub(last_access) / HOUR_MS;
    decay.powi(i32::try_from(hours).unwrap_or(i32::MAX))
}

/// Whether recall should refresh a memory's `last_access`.
///
/// True iff the prior access is strictly older than `throttle_ms` before
/// `now`.
pub const fn needs_touch(last_access: u64, now: u64, throttle_ms: u64) -> bool {
    last_access < now.saturating_sub(throttle_ms)
}

#[derive(Clone, Copy)]
struct Range {
    min: f64,
    max: f64,
}

impl Range {
    fn of(values: impl Iterator<Item = f64>) -> Self {
        values.fold(
            Self {
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
            },
            |r, v| Self {
                min: r.min.min(v),
                max: r.max.max(v),
            },
        )
    }

    fn normalize(self, value: f64) -> f64 {
        let span = self.max - self.min;
        if span <= f64::EPSILON {
            return 0.0;
        }
        (value - self.min) / span
    }
}

/// Rank candidates and keep the best `n`.
pub fn rank(inputs: &[RankInput], n: usize) -> Vec<Ranked> {
    let similarity = Range::of(inputs.iter().map(|c| c.similarity));
    let importance = Range::of(inputs.iter().map(|c| c.importance));
    let recency = Range::of(inputs.iter().map(|c| c.recency));

    let mut ranked: Vec<Ranked> = inputs
        .iter()
        .enumerate()
        .map(|(index, c)| Ranked {
            index,
            score: similarity.normalize(c.similarity)
                + importance.normalize(c.importance)
                + recency.normalize(c.recency),
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(n);
    ranked
}
