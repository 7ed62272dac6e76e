//! Ranking math shared by every similarity search: cosine closeness blended with a linear,
//! floored recency decay.

use time::OffsetDateTime;

use zync_config::Ranking;

const SECONDS_PER_HOUR: f64 = 3_600.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RankingWeights {
	pub similarity_weight: f32,
	pub recency_weight: f32,
	pub decay_per_hour: f32,
	pub decay_floor: f32,
}
impl Default for RankingWeights {
	fn default() -> Self {
		Self::from(&Ranking::default())
	}
}
impl From<&Ranking> for RankingWeights {
	fn from(cfg: &Ranking) -> Self {
		Self {
			similarity_weight: cfg.similarity_weight,
			recency_weight: cfg.recency_weight,
			decay_per_hour: cfg.decay_per_hour,
			decay_floor: cfg.decay_floor,
		}
	}
}

/// Normalized dot product. Zero-norm inputs and length mismatches score 0.0 instead of NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
	if a.len() != b.len() || a.is_empty() {
		return 0.0;
	}

	let mut dot = 0.0_f64;
	let mut norm_a = 0.0_f64;
	let mut norm_b = 0.0_f64;

	for (x, y) in a.iter().zip(b) {
		let (x, y) = (f64::from(*x), f64::from(*y));

		dot += x * y;
		norm_a += x * x;
		norm_b += y * y;
	}

	if norm_a == 0.0 || norm_b == 0.0 {
		return 0.0;
	}

	let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());

	if !similarity.is_finite() {
		return 0.0;
	}

	similarity.clamp(-1.0, 1.0) as f32
}

/// Elapsed hours between `created_at` and `now`. Timestamps in the future count as age zero.
pub fn age_hours(created_at: OffsetDateTime, now: OffsetDateTime) -> f64 {
	let seconds = (now - created_at).as_seconds_f64();

	(seconds / SECONDS_PER_HOUR).max(0.0)
}

pub fn decay_factor(age_hours: f64, weights: &RankingWeights) -> f32 {
	let floor = f64::from(weights.decay_floor);
	let linear = 1.0 - age_hours.max(0.0) * f64::from(weights.decay_per_hour);

	linear.max(floor) as f32
}

pub fn blended_score(similarity: f32, decay_factor: f32, weights: &RankingWeights) -> f32 {
	similarity * weights.similarity_weight + decay_factor * weights.recency_weight
}

#[cfg(test)]
mod tests {
	use time::Duration;

	use super::*;

	#[test]
	fn cosine_is_one_for_identical_vectors() {
		let v = [0.3, -1.2, 4.5, 0.01];

		assert_eq!(cosine_similarity(&v, &v), 1.0);
	}

	#[test]
	fn cosine_is_minus_one_for_opposite_vectors() {
		let v = [0.3, -1.2, 4.5, 0.01];
		let negated: Vec<f32> = v.iter().map(|x| -x).collect();

		assert_eq!(cosine_similarity(&v, &negated), -1.0);
	}

	#[test]
	fn cosine_with_zero_vector_is_zero() {
		let score = cosine_similarity(&[1.0, 2.0], &[0.0, 0.0]);

		assert_eq!(score, 0.0);
		assert!(!score.is_nan());
	}

	#[test]
	fn cosine_with_mismatched_lengths_is_zero() {
		assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
	}

	#[test]
	fn future_timestamps_have_zero_age() {
		let now = OffsetDateTime::now_utc();

		assert_eq!(age_hours(now + Duration::hours(2), now), 0.0);
		assert!((age_hours(now - Duration::minutes(90), now) - 1.5).abs() < 1e-9);
	}
}
