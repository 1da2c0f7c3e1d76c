use std::collections::BTreeMap;

use rust_decimal::prelude::ToPrimitive;
use ta::indicators::{
    AverageTrueRange, BollingerBands, ExponentialMovingAverage, MoneyFlowIndex,
    MovingAverageConvergenceDivergence, RelativeStrengthIndex, SimpleMovingAverage,
};
use ta::{DataItem, Next};

use crate::domain::market::candle::Candle;

use super::config::{IndicatorConfig, IndicatorSpec};

/// Pure, stateless computation of configured indicators over an ordered
/// candle sequence (§4.6). Each call builds fresh indicator state and
/// folds it across the full input slice; nothing survives between calls,
/// which is what makes `Compute` a pure function of `(config, candles)`
/// rather than a service with hidden state.
pub struct IndicatorEngine;

impl IndicatorEngine {
    /// Annotates `candles` in place with `indicators: label -> value` per
    /// the enabled spec list. Values before an indicator's warm-up period
    /// are omitted from the mapping entirely (not inserted as null).
    pub fn compute(config: &IndicatorConfig, candles: &mut [Candle]) {
        for spec in &config.specs {
            Self::apply_spec(*spec, candles);
        }
    }

    fn apply_spec(spec: IndicatorSpec, candles: &mut [Candle]) {
        let labels = spec.output_labels();
        let warmup = spec.warmup_period();

        match spec {
            IndicatorSpec::Sma { period } => {
                let Ok(mut ind) = SimpleMovingAverage::new(period) else {
                    return;
                };
                for (i, candle) in candles.iter_mut().enumerate() {
                    let value = ind.next(close_f64(candle));
                    if i + 1 >= warmup {
                        candle.indicators.insert(labels[0].clone(), value);
                    }
                }
            }
            IndicatorSpec::Ema { period } => {
                let Ok(mut ind) = ExponentialMovingAverage::new(period) else {
                    return;
                };
                for (i, candle) in candles.iter_mut().enumerate() {
                    let value = ind.next(close_f64(candle));
                    if i + 1 >= warmup {
                        candle.indicators.insert(labels[0].clone(), value);
                    }
                }
            }
            IndicatorSpec::Rsi { period } => {
                let Ok(mut ind) = RelativeStrengthIndex::new(period) else {
                    return;
                };
                for (i, candle) in candles.iter_mut().enumerate() {
                    let value = ind.next(close_f64(candle));
                    if i + 1 >= warmup {
                        candle.indicators.insert(labels[0].clone(), value);
                    }
                }
            }
            IndicatorSpec::Macd { fast, slow, signal } => {
                let Ok(mut ind) = MovingAverageConvergenceDivergence::new(fast, slow, signal)
                else {
                    return;
                };
                for (i, candle) in candles.iter_mut().enumerate() {
                    let out = ind.next(close_f64(candle));
                    if i + 1 >= warmup {
                        candle.indicators.insert(labels[0].clone(), out.macd);
                        candle.indicators.insert(labels[1].clone(), out.signal);
                        candle.indicators.insert(labels[2].clone(), out.histogram);
                    }
                }
            }
            IndicatorSpec::BollingerBands { period, std_dev } => {
                let Ok(mut ind) = BollingerBands::new(period, std_dev as f64) else {
                    return;
                };
                for (i, candle) in candles.iter_mut().enumerate() {
                    let out = ind.next(close_f64(candle));
                    if i + 1 >= warmup {
                        candle.indicators.insert(labels[0].clone(), out.average);
                        candle.indicators.insert(labels[1].clone(), out.upper);
                        candle.indicators.insert(labels[2].clone(), out.lower);
                    }
                }
            }
            IndicatorSpec::Atr { period } => {
                let Ok(mut ind) = AverageTrueRange::new(period) else {
                    return;
                };
                for (i, candle) in candles.iter_mut().enumerate() {
                    let Some(item) = to_data_item(candle) else {
                        continue;
                    };
                    let value = ind.next(&item);
                    if i + 1 >= warmup {
                        candle.indicators.insert(labels[0].clone(), value);
                    }
                }
            }
            IndicatorSpec::Mfi { period } => {
                let Ok(mut ind) = MoneyFlowIndex::new(period) else {
                    return;
                };
                for (i, candle) in candles.iter_mut().enumerate() {
                    let Some(item) = to_data_item(candle) else {
                        continue;
                    };
                    let value = ind.next(&item);
                    if i + 1 >= warmup {
                        candle.indicators.insert(labels[0].clone(), value);
                    }
                }
            }
        }
    }

    /// Indices (0-based, into `candles`) at or after which `spec` has
    /// completed warm-up, given that the slice starts at history index 0.
    pub fn warmup_boundary(spec: &IndicatorSpec) -> usize {
        spec.warmup_period().saturating_sub(1)
    }
}

fn close_f64(candle: &Candle) -> f64 {
    candle.close.to_f64().unwrap_or(0.0)
}

/// `None` when the candle's OHLC values violate `DataItem`'s ordering
/// constraints (e.g. a malformed upstream payload with `high < low`);
/// callers skip the candle for this indicator rather than propagate a panic.
fn to_data_item(candle: &Candle) -> Option<DataItem> {
    DataItem::builder()
        .open(candle.open.to_f64().unwrap_or(0.0))
        .high(candle.high.to_f64().unwrap_or(0.0))
        .low(candle.low.to_f64().unwrap_or(0.0))
        .close(candle.close.to_f64().unwrap_or(0.0))
        .volume(candle.volume.to_f64().unwrap_or(0.0))
        .build()
        .ok()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::market::timeframe::Timeframe;

    fn candle(i: i64, close: rust_decimal::Decimal) -> Candle {
        Candle {
            exchange_id: "binance".to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::OneHour,
            open_time: Utc::now() + chrono::Duration::hours(i),
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(10),
            indicators: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn sma_omits_values_before_warmup() {
        let config: IndicatorConfig = "sma(3)".parse().unwrap();
        let mut candles: Vec<Candle> = (0..5)
            .map(|i| candle(i, rust_decimal::Decimal::from(10 + i)))
            .collect();

        IndicatorEngine::compute(&config, &mut candles);

        assert!(!candles[0].indicators.contains_key("sma_3"));
        assert!(!candles[1].indicators.contains_key("sma_3"));
        assert!(candles[2].indicators.contains_key("sma_3"));
        assert!(candles[4].indicators.contains_key("sma_3"));
    }

    #[test]
    fn recomputing_over_extended_suffix_preserves_prefix() {
        let config: IndicatorConfig = "sma(3),rsi(3)".parse().unwrap();
        let base: Vec<Candle> = (0..6)
            .map(|i| candle(i, rust_decimal::Decimal::from(10 + i * 2)))
            .collect();

        let mut prefix_only = base.clone();
        IndicatorEngine::compute(&config, &mut prefix_only);

        let mut extended = base.clone();
        extended.push(candle(6, rust_decimal::Decimal::from(50)));
        extended.push(candle(7, rust_decimal::Decimal::from(55)));
        IndicatorEngine::compute(&config, &mut extended);

        for i in 0..prefix_only.len() {
            assert_eq!(prefix_only[i].indicators, extended[i].indicators);
        }
    }

    #[test]
    fn macd_emits_three_sub_labels_together() {
        let config: IndicatorConfig = "macd(2,4,2)".parse().unwrap();
        let mut candles: Vec<Candle> = (0..10)
            .map(|i| candle(i, rust_decimal::Decimal::from(10 + i)))
            .collect();

        IndicatorEngine::compute(&config, &mut candles);

        let last = candles.last().unwrap();
        assert!(last.indicators.contains_key("macd_2_4_2_line"));
        assert!(last.indicators.contains_key("macd_2_4_2_signal"));
        assert!(last.indicators.contains_key("macd_2_4_2_hist"));
    }
}
