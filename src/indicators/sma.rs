// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
// Arithmetic mean over a trailing window of `period` closes. Used in pairs
// (short/long) by the engine's dual-SMA-cross entry rule.
// =============================================================================

/// Compute the full SMA series for the given `closes` and `period`.
///
/// Returns one value per valid trailing window: `closes.len() - period + 1`
/// elements, or an empty vec when there isn't a single full window yet.
///
/// # Edge cases
/// - `period == 0` => empty vec (division by zero guard)
/// - `closes.len() < period` => empty vec
pub fn sma(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }

    let period_f = period as f64;
    let mut result = Vec::with_capacity(closes.len() - period + 1);

    let mut window_sum: f64 = closes[..period].iter().sum();
    result.push(window_sum / period_f);

    for i in period..closes.len() {
        window_sum += closes[i] - closes[i - period];
        result.push(window_sum / period_f);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_empty_input() {
        assert!(sma(&[], 5).is_empty());
    }

    #[test]
    fn sma_period_zero() {
        assert!(sma(&[1.0, 2.0, 3.0], 0).is_empty());
    }

    #[test]
    fn sma_insufficient_data() {
        assert!(sma(&[1.0, 2.0], 3).is_empty());
    }

    #[test]
    fn sma_single_window() {
        let closes = vec![1.0, 2.0, 3.0];
        let series = sma(&closes, 3);
        assert_eq!(series, vec![2.0]);
    }

    #[test]
    fn sma_rolling_window() {
        let closes = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let series = sma(&closes, 2);
        assert_eq!(series, vec![1.5, 2.5, 3.5, 4.5]);
    }

    #[test]
    fn sma_flat_series() {
        let closes = vec![10.0; 10];
        let series = sma(&closes, 4);
        for v in series {
            assert!((v - 10.0).abs() < 1e-10);
        }
    }

    #[test]
    fn sma_output_length_matches_contract() {
        let closes: Vec<f64> = (1..=50).map(|x| x as f64).collect();
        let series = sma(&closes, 21);
        assert_eq!(series.len(), closes.len() - 21 + 1);
    }
}
