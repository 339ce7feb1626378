// ABOUTME: Splits identifier lists into bounded batches
// ABOUTME: Keeps each generated statement under the store's row and parameter limits

use std::slice::Chunks;

/// Default ceiling on identifiers per statement.
pub const DEFAULT_BATCH_SIZE: usize = 999;

/// PostgreSQL accepts at most this many bind parameters in one statement.
pub const MAX_BIND_PARAMS: usize = 65535;

/// Lazily split `ids` into consecutive batches of at most `max` items.
///
/// Batches preserve the input order and cover every item exactly once. An
/// empty input yields no batches. Returns `None` when `max` is zero.
pub fn plan_batches<T>(ids: &[T], max: usize) -> Option<Chunks<'_, T>> {
    if max == 0 {
        return None;
    }
    Some(ids.chunks(max))
}

/// Number of batches [`plan_batches`] will produce.
pub fn batch_count(len: usize, max: usize) -> usize {
    if max == 0 {
        0
    } else {
        len.div_ceil(max)
    }
}

/// Largest batch size that keeps `rows * params_per_row` within [`MAX_BIND_PARAMS`].
pub fn effective_batch_size(requested: usize, params_per_row: usize) -> usize {
    let ceiling = std::cmp::max(1, MAX_BIND_PARAMS / std::cmp::max(1, params_per_row));
    std::cmp::min(requested, ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("id_{:05}", i)).collect()
    }

    #[test]
    fn test_empty_input_produces_no_batches() {
        let empty: Vec<String> = Vec::new();
        assert_eq!(plan_batches(&empty, 999).unwrap().count(), 0);
        assert_eq!(batch_count(0, 999), 0);
    }

    #[test]
    fn test_within_limit_is_single_batch() {
        let input = ids(999);
        let batches: Vec<_> = plan_batches(&input, 999).unwrap().collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 999);
    }

    #[test]
    fn test_batches_cover_input_in_order() {
        let input = ids(2500);
        let batches: Vec<_> = plan_batches(&input, 999).unwrap().collect();

        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![999, 999, 502]);
        assert_eq!(batch_count(2500, 999), 3);

        let rejoined: Vec<String> = batches.concat();
        assert_eq!(rejoined, input);
    }

    #[test]
    fn test_coverage_for_many_sizes() {
        for n in [1, 2, 7, 10, 11, 100] {
            for m in [1, 3, 10] {
                let input = ids(n);
                let batches: Vec<_> = plan_batches(&input, m).unwrap().collect();
                assert_eq!(batches.len(), batch_count(n, m));
                assert!(batches.iter().all(|b| b.len() <= m && !b.is_empty()));
                assert_eq!(batches.concat(), input);
            }
        }
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        assert!(plan_batches(&ids(3), 0).is_none());
    }

    #[test]
    fn test_effective_batch_size() {
        assert_eq!(effective_batch_size(999, 45), 999);
        assert_eq!(effective_batch_size(999, 100), 655);
        assert_eq!(effective_batch_size(999, 0), 999);
        assert_eq!(effective_batch_size(999, 100_000), 1);
    }
}
