//! Rolling-window statistics and smoothing over a close/volume series.
//!
//! Every function is causal: the value at index `i` only looks at inputs
//! `0..=i`. Positions without enough history are `None`, and so is any
//! window that contains an undefined input or a division by zero.

/// Trading days per year, used to annualize volatility.
pub const TRADING_DAYS: f64 = 252.0;

// =============================================================================
// Basic statistics
// =============================================================================

pub fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    Some(xs.iter().sum::<f64>() / xs.len() as f64)
}

/// Sample standard deviation (n - 1 denominator). Needs at least two values.
///
/// A constant window is exactly 0, even when the value has no exact binary
/// representation.
pub fn sample_std(xs: &[f64]) -> Option<f64> {
    if xs.len() < 2 {
        return None;
    }
    if xs.iter().all(|&x| x == xs[0]) {
        return Some(0.0);
    }
    let m = mean(xs)?;
    let ss: f64 = xs.iter().map(|x| (x - m).powi(2)).sum();
    Some((ss / (xs.len() - 1) as f64).sqrt())
}

/// Quantile with linear interpolation between closest ranks.
pub fn quantile(xs: &[f64], q: f64) -> Option<f64> {
    if xs.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(f64::total_cmp);

    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Applies `stat` to each trailing window of `window` values.
fn rolling<F>(values: &[Option<f64>], window: usize, stat: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    let mut out = vec![None; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }

    let mut buf = Vec::with_capacity(window);
    for i in (window - 1)..values.len() {
        let slice = &values[i + 1 - window..=i];
        if slice.iter().all(Option::is_some) {
            buf.clear();
            buf.extend(slice.iter().flatten());
            out[i] = stat(&buf);
        }
    }
    out
}

fn defined(values: &[f64]) -> Vec<Option<f64>> {
    values.iter().copied().map(Some).collect()
}

// =============================================================================
// Price indicators
// =============================================================================

/// Simple moving average; first defined at `window - 1`.
pub fn sma(closes: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling(&defined(closes), window, mean)
}

/// Exponential moving average with `alpha = 2 / (span + 1)`.
///
/// Uses normalised weights over the whole running history, so the first
/// value equals the first input and early values carry warm-up bias instead
/// of being undefined.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let decay = 1.0 - alpha;

    let mut num = 0.0;
    let mut den = 0.0;
    values
        .iter()
        .map(|&x| {
            num = x + decay * num;
            den = 1.0 + decay * den;
            num / den
        })
        .collect()
}

/// Relative Strength Index over the trailing `window` close-to-close deltas.
///
/// Gains and losses are averaged with a plain mean. With no losses in the
/// window RSI saturates at 100; a completely flat window is undefined.
pub fn rsi(closes: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if window == 0 || closes.len() <= window {
        return out;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let gains: Vec<f64> = deltas.iter().map(|d| d.max(0.0)).collect();
    let losses: Vec<f64> = deltas.iter().map(|d| (-d).max(0.0)).collect();

    // deltas[j] belongs to bar j + 1
    for i in window..closes.len() {
        let range = (i - window)..i;
        let (Some(avg_gain), Some(avg_loss)) =
            (mean(&gains[range.clone()]), mean(&losses[range]))
        else {
            continue;
        };
        out[i] = rsi_from_averages(avg_gain, avg_loss);
    }
    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    if avg_loss == 0.0 {
        return (avg_gain > 0.0).then_some(100.0);
    }
    let rs = avg_gain / avg_loss;
    let value = 100.0 - 100.0 / (1.0 + rs);
    value.is_finite().then_some(value)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerBands {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

/// Bollinger Bands: SMA(window) +/- `num_std` sample standard deviations.
pub fn bollinger_bands(closes: &[f64], window: usize, num_std: f64) -> BollingerBands {
    let middle = sma(closes, window);
    let std = rolling(&defined(closes), window, sample_std);

    let band = |sign: f64| -> Vec<Option<f64>> {
        middle
            .iter()
            .zip(&std)
            .map(|(&m, &s)| Some(m? + sign * num_std * s?))
            .collect()
    };

    BollingerBands {
        upper: band(1.0),
        lower: band(-1.0),
        middle,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Macd {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);

    let macd: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
    let signal = ema(&macd, signal);
    let histogram = macd.iter().zip(&signal).map(|(m, s)| m - s).collect();

    Macd {
        macd,
        signal,
        histogram,
    }
}

/// `close[i] / close[i - 1] - 1`. Undefined at index 0 and after a zero close.
pub fn pct_change(closes: &[f64]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(closes.len());
    if closes.is_empty() {
        return out;
    }
    out.push(None);
    out.extend(
        closes
            .windows(2)
            .map(|w| (w[0] != 0.0).then(|| w[1] / w[0] - 1.0)),
    );
    out
}

/// Annualized rolling volatility of daily returns.
pub fn volatility(returns: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    rolling(returns, window, sample_std)
        .into_iter()
        .map(|s| s.map(|s| s * TRADING_DAYS.sqrt()))
        .collect()
}

// =============================================================================
// Volume indicators
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeIndicators {
    pub volume_ma: Vec<Option<f64>>,
    pub volume_ratio: Vec<Option<f64>>,
    pub obv: Vec<i64>,
}

pub fn volume_indicators(closes: &[f64], volumes: &[u64], window: usize) -> VolumeIndicators {
    let as_f64: Vec<f64> = volumes.iter().map(|&v| v as f64).collect();
    let volume_ma = rolling(&defined(&as_f64), window, mean);

    let volume_ratio = as_f64
        .iter()
        .zip(&volume_ma)
        .map(|(&v, &ma)| ma.filter(|&ma| ma > 0.0).map(|ma| v / ma))
        .collect();

    VolumeIndicators {
        volume_ma,
        volume_ratio,
        obv: on_balance_volume(closes, volumes),
    }
}

/// Running volume flow; the first bar has no predecessor and contributes 0.
pub fn on_balance_volume(closes: &[f64], volumes: &[u64]) -> Vec<i64> {
    let mut total: i64 = 0;
    closes
        .iter()
        .zip(volumes)
        .enumerate()
        .map(|(i, (&close, &volume))| {
            if i > 0 {
                let prev = closes[i - 1];
                let volume = i64::try_from(volume).unwrap_or(i64::MAX);
                if close > prev {
                    total = total.saturating_add(volume);
                } else if close < prev {
                    total = total.saturating_sub(volume);
                }
            }
            total
        })
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    // ---- statistics ------------------------------------------------------

    #[test]
    fn sample_std_uses_n_minus_one() {
        let s = sample_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!(approx(s, (32.0f64 / 7.0).sqrt()));
        assert!(sample_std(&[1.0]).is_none());
    }

    #[test]
    fn constant_window_has_zero_std() {
        for value in [0.1, 101.37, 50.0] {
            assert_eq!(sample_std(&[value; 20]), Some(0.0));
        }
    }

    #[test]
    fn quantile_interpolates_linearly() {
        let xs: Vec<f64> = (1..=10).map(f64::from).collect();
        assert!(approx(quantile(&xs, 0.9).unwrap(), 9.1));
        assert!(approx(quantile(&xs, 0.1).unwrap(), 1.9));
        assert!(quantile(&[], 0.5).is_none());
    }

    // ---- sma / ema -------------------------------------------------------

    #[test]
    fn sma_warm_up_is_undefined() {
        let closes = [1.0, 2.0, 3.0, 4.0, 5.0];
        let out = sma(&closes, 3);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        assert!(approx(out[2].unwrap(), 2.0));
        assert!(approx(out[4].unwrap(), 4.0));
    }

    #[test]
    fn sma_window_longer_than_series() {
        assert!(sma(&[1.0, 2.0], 5).iter().all(Option::is_none));
    }

    #[test]
    fn ema_starts_at_first_value() {
        let out = ema(&[10.0, 20.0], 3);
        assert!(approx(out[0], 10.0));
        // alpha = 0.5: (20 + 0.5 * 10) / (1 + 0.5)
        assert!(approx(out[1], 25.0 / 1.5));
    }

    #[test]
    fn ema_of_constant_is_constant() {
        assert!(ema(&[7.0; 30], 12).iter().all(|v| approx(*v, 7.0)));
    }

    // ---- rsi -------------------------------------------------------------

    #[test]
    fn rsi_first_defined_at_window() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + (i % 3) as f64).collect();
        let out = rsi(&closes, 14);
        assert!(out[..14].iter().all(Option::is_none));
        assert!(out[14].is_some());
    }

    #[test]
    fn rsi_all_gains_saturates() {
        let closes: Vec<f64> = (1..=30).map(f64::from).collect();
        let out = rsi(&closes, 14);
        assert!(out[14..].iter().all(|v| *v == Some(100.0)));
    }

    #[test]
    fn rsi_all_losses_is_zero() {
        let closes: Vec<f64> = (1..=30).rev().map(f64::from).collect();
        let out = rsi(&closes, 14);
        assert!(out[14..].iter().all(|v| approx(v.unwrap(), 0.0)));
    }

    #[test]
    fn rsi_flat_window_is_undefined() {
        let out = rsi(&[50.0; 20], 14);
        assert!(out.iter().all(Option::is_none));
    }

    #[test]
    fn rsi_matches_hand_computation() {
        // Two deltas: +2, -1 => RS = 1 / 0.5 = 2 => RSI = 66.67
        let out = rsi(&[10.0, 12.0, 11.0], 2);
        assert!(approx(out[2].unwrap(), 100.0 - 100.0 / 3.0));
    }

    // ---- bollinger / volatility ------------------------------------------

    #[test]
    fn bollinger_bands_are_ordered() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + ((i * 7) % 5) as f64).collect();
        let bb = bollinger_bands(&closes, 20, 2.0);
        assert!(bb.upper[18].is_none());
        for i in 19..closes.len() {
            let (u, m, l) = (bb.upper[i].unwrap(), bb.middle[i].unwrap(), bb.lower[i].unwrap());
            assert!(u >= m && m >= l);
        }
    }

    #[test]
    fn flat_window_collapses_bands() {
        let bb = bollinger_bands(&[101.37; 25], 20, 2.0);
        for i in 19..25 {
            assert_eq!(bb.upper[i], bb.lower[i]);
        }
    }

    #[test]
    fn volatility_needs_window_returns() {
        let closes: Vec<f64> = (1..=25).map(|i| 100.0 + f64::from(i % 4)).collect();
        let returns = pct_change(&closes);
        let vol = volatility(&returns, 20);
        assert!(vol[19].is_none());
        assert!(vol[20].is_some());
    }

    #[test]
    fn pct_change_handles_zero_previous() {
        let out = pct_change(&[0.0, 5.0, 10.0]);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        assert!(approx(out[2].unwrap(), 1.0));
    }

    // ---- volume ----------------------------------------------------------

    #[test]
    fn obv_accumulates_signed_volume() {
        let closes = [10.0, 11.0, 11.0, 9.0];
        let volumes = [100, 200, 300, 400];
        assert_eq!(on_balance_volume(&closes, &volumes), vec![0, 200, 200, -200]);
    }

    #[test]
    fn volume_ratio_undefined_for_zero_average() {
        let closes = [1.0; 3];
        let vi = volume_indicators(&closes, &[0, 0, 0], 2);
        assert_eq!(vi.volume_ma[1], Some(0.0));
        assert_eq!(vi.volume_ratio[1], None);
    }
}
