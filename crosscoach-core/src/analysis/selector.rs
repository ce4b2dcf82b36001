//! Insight selection: significance and strength filters, then top-K per sign.

use super::correlation::CorrelationResult;
use crate::config::AnalysisConfig;
use crate::types::RankBucket;

/// A correlation chosen for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct Selected {
    pub result: CorrelationResult,
    pub bucket: RankBucket,
    /// Position within the bucket, starting at 1
    pub rank: u32,
}

/// Whether a correlation clears both the significance and strength filters.
pub fn is_notable(result: &CorrelationResult, config: &AnalysisConfig) -> bool {
    result.p_value < config.significance_threshold
        && result.r.abs() > config.min_strength_threshold
}

/// Filter and rank correlations.
///
/// Keeps `p < significance_threshold` and `|r| > min_strength_threshold`,
/// splits by sign, orders each side by `|r|` descending (ties keep input
/// order, which is pair enumeration order), truncates to the configured
/// top-K, and returns positives followed by negatives.
pub fn select(results: &[CorrelationResult], config: &AnalysisConfig) -> Vec<Selected> {
    let (mut positive, mut negative): (Vec<&CorrelationResult>, Vec<&CorrelationResult>) = results
        .iter()
        .filter(|c| is_notable(c, config))
        .partition(|c| c.r > 0.0);

    // sort_by is stable, so equal magnitudes stay in enumeration order
    let by_magnitude =
        |a: &&CorrelationResult, b: &&CorrelationResult| b.r.abs().total_cmp(&a.r.abs());
    positive.sort_by(by_magnitude);
    negative.sort_by(by_magnitude);

    fn take<'a>(
        bucket: Vec<&'a CorrelationResult>,
        k: usize,
        tag: RankBucket,
    ) -> impl Iterator<Item = Selected> + 'a {
        bucket
            .into_iter()
            .take(k)
            .enumerate()
            .map(move |(i, result)| Selected {
                result: result.clone(),
                bucket: tag,
                rank: i as u32 + 1,
            })
    }

    take(positive, config.top_k_positive, RankBucket::Positive)
        .chain(take(negative, config.top_k_negative, RankBucket::Negative))
        .collect()
}
