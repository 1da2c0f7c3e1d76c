use std::str::FromStr;

use crate::domain::errors::ConfigError;

/// One configured indicator instance with its parameters. The closed set
/// of categories is `{trend, momentum, volatility, volume}` (§4.6); each
/// variant here belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorSpec {
    Sma { period: usize },
    Ema { period: usize },
    Rsi { period: usize },
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    BollingerBands { period: usize, std_dev: i64 },
    Atr { period: usize },
    Mfi { period: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorCategory {
    Trend,
    Momentum,
    Volatility,
    Volume,
}

impl IndicatorSpec {
    pub fn category(&self) -> IndicatorCategory {
        match self {
            IndicatorSpec::Sma { .. } | IndicatorSpec::Ema { .. } => IndicatorCategory::Trend,
            IndicatorSpec::Rsi { .. } | IndicatorSpec::Macd { .. } => IndicatorCategory::Momentum,
            IndicatorSpec::BollingerBands { .. } | IndicatorSpec::Atr { .. } => {
                IndicatorCategory::Volatility
            }
            IndicatorSpec::Mfi { .. } => IndicatorCategory::Volume,
        }
    }

    /// Base label identifying this indicator instance. Simple indicators
    /// use this directly as their output key; composite indicators
    /// (MACD, Bollinger Bands) derive several suffixed keys from it via
    /// `output_labels`.
    pub fn label(&self) -> String {
        match self {
            IndicatorSpec::Sma { period } => format!("sma_{period}"),
            IndicatorSpec::Ema { period } => format!("ema_{period}"),
            IndicatorSpec::Rsi { period } => format!("rsi_{period}"),
            IndicatorSpec::Macd { fast, slow, signal } => format!("macd_{fast}_{slow}_{signal}"),
            IndicatorSpec::BollingerBands { period, std_dev } => {
                format!("bbands_{period}_{std_dev}")
            }
            IndicatorSpec::Atr { period } => format!("atr_{period}"),
            IndicatorSpec::Mfi { period } => format!("mfi_{period}"),
        }
    }

    /// Output mapping keys this spec contributes, all gated by the same
    /// warm-up period.
    pub fn output_labels(&self) -> Vec<String> {
        let base = self.label();
        match self {
            IndicatorSpec::Macd { .. } => vec![
                format!("{base}_line"),
                format!("{base}_signal"),
                format!("{base}_hist"),
            ],
            IndicatorSpec::BollingerBands { .. } => vec![
                format!("{base}_mid"),
                format!("{base}_upper"),
                format!("{base}_lower"),
            ],
            _ => vec![base],
        }
    }

    /// Minimum number of input candles before this indicator emits a
    /// value (§4.6 "warm-up"). For composites this is the longest
    /// internal lookback plus the signal smoothing length.
    pub fn warmup_period(&self) -> usize {
        match self {
            IndicatorSpec::Sma { period }
            | IndicatorSpec::Ema { period }
            | IndicatorSpec::Rsi { period }
            | IndicatorSpec::Atr { period }
            | IndicatorSpec::Mfi { period } => *period,
            IndicatorSpec::BollingerBands { period, .. } => *period,
            IndicatorSpec::Macd { slow, signal, .. } => slow + signal,
        }
    }

    fn parse_one(token: &str) -> Result<Self, ConfigError> {
        let token = token.trim();
        let (name, args) = match token.split_once('(') {
            Some((name, rest)) => {
                let args = rest.strip_suffix(')').ok_or_else(|| ConfigError::InvalidParameter {
                    indicator: name.to_string(),
                    reason: "missing closing parenthesis".to_string(),
                })?;
                (name, args)
            }
            None => {
                return Err(ConfigError::InvalidParameter {
                    indicator: token.to_string(),
                    reason: "expected name(params), e.g. sma(20)".to_string(),
                });
            }
        };

        let nums: Result<Vec<usize>, _> = args
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.trim().parse::<usize>())
            .collect();
        let nums = nums.map_err(|_| ConfigError::InvalidParameter {
            indicator: name.to_string(),
            reason: format!("non-numeric parameter in '{token}'"),
        })?;

        let bad_arity = |expected: usize| ConfigError::InvalidParameter {
            indicator: name.to_string(),
            reason: format!("expected {expected} parameter(s), got {}", nums.len()),
        };

        match name.to_lowercase().as_str() {
            "sma" => Ok(IndicatorSpec::Sma {
                period: *nums.first().ok_or_else(|| bad_arity(1))?,
            }),
            "ema" => Ok(IndicatorSpec::Ema {
                period: *nums.first().ok_or_else(|| bad_arity(1))?,
            }),
            "rsi" => Ok(IndicatorSpec::Rsi {
                period: *nums.first().ok_or_else(|| bad_arity(1))?,
            }),
            "atr" => Ok(IndicatorSpec::Atr {
                period: *nums.first().ok_or_else(|| bad_arity(1))?,
            }),
            "mfi" => Ok(IndicatorSpec::Mfi {
                period: *nums.first().ok_or_else(|| bad_arity(1))?,
            }),
            "macd" => {
                if nums.len() != 3 {
                    return Err(bad_arity(3));
                }
                Ok(IndicatorSpec::Macd {
                    fast: nums[0],
                    slow: nums[1],
                    signal: nums[2],
                })
            }
            "bbands" => {
                if nums.len() != 2 {
                    return Err(bad_arity(2));
                }
                Ok(IndicatorSpec::BollingerBands {
                    period: nums[0],
                    std_dev: nums[1] as i64,
                })
            }
            other => Err(ConfigError::UnknownIndicator(other.to_string())),
        }
    }
}

/// The enabled set of indicators and their parameters. Unknown
/// configuration keys are rejected at load time (§4.6); disabled
/// indicators are simply absent from the spec list, hence absent from
/// output mappings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndicatorConfig {
    pub specs: Vec<IndicatorSpec>,
}

impl IndicatorConfig {
    pub fn warmup_window(&self) -> usize {
        self.specs.iter().map(|s| s.warmup_period()).max().unwrap_or(0)
    }
}

impl FromStr for IndicatorConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let specs = s
            .split(',')
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(IndicatorSpec::parse_one)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(IndicatorConfig { specs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_known_indicators() {
        let cfg: IndicatorConfig = "sma(20), ema(50), rsi(14), macd(12,26,9), bbands(20,2), atr(14), mfi(14)"
            .parse()
            .unwrap();
        assert_eq!(cfg.specs.len(), 7);
        assert_eq!(cfg.specs[0].label(), "sma_20");
        assert_eq!(cfg.specs[3].label(), "macd_12_26_9");
    }

    #[test]
    fn rejects_unknown_indicator_key() {
        let err = IndicatorConfig::from_str("totallymadeup(1)").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownIndicator(_)));
    }

    #[test]
    fn rejects_wrong_arity() {
        let err = IndicatorConfig::from_str("macd(12,26)").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidParameter { .. }));
    }

    #[test]
    fn warmup_window_is_the_longest_spec() {
        let cfg: IndicatorConfig = "sma(20), macd(12,26,9)".parse().unwrap();
        assert_eq!(cfg.warmup_window(), 35);
    }
}
