//! Pivot and pattern parameters parsed from environment variables.

use anyhow::{Result, bail};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::str::FromStr;

use crate::domain::market::timeframe::MINUTE_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PivotConfig {
    /// L: candles to the left a pivot must exceed
    pub left_bars: usize,
    /// R: closed candles to the right before confirmation
    pub right_bars: usize,
}

impl Default for PivotConfig {
    fn default() -> Self {
        Self {
            left_bars: 2,
            right_bars: 2,
        }
    }
}

impl PivotConfig {
    pub fn new(left_bars: usize, right_bars: usize) -> Self {
        Self {
            left_bars,
            right_bars,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.left_bars == 0 || self.right_bars == 0 {
            bail!(
                "Pivot windows must be >= 1 (left={}, right={})",
                self.left_bars,
                self.right_bars
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoublePatternConfig {
    /// Band around the first extreme, as a fraction of its price
    pub tolerance_pct: Decimal,
    /// Maximum span between the two extremes (and from the second extreme to the break)
    pub max_window_ms: i64,
    /// Minimum retracement depth, as a fraction of the first extreme's price
    pub min_retracement_pct: Decimal,
}

impl Default for DoublePatternConfig {
    fn default() -> Self {
        Self {
            tolerance_pct: dec!(0.01),
            max_window_ms: 1_440 * MINUTE_MS,
            min_retracement_pct: dec!(0.05),
        }
    }
}

impl DoublePatternConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tolerance_pct < Decimal::ZERO || self.tolerance_pct > Decimal::ONE {
            bail!("DOUBLE_TOLERANCE_PCT must be in [0, 1], got {}", self.tolerance_pct);
        }
        if self.min_retracement_pct < Decimal::ZERO || self.min_retracement_pct > Decimal::ONE {
            bail!(
                "DOUBLE_MIN_RETRACEMENT_PCT must be in [0, 1], got {}",
                self.min_retracement_pct
            );
        }
        if self.max_window_ms <= 0 {
            bail!("DOUBLE_MAX_WINDOW_MINUTES must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VcpConfig {
    /// N: minimum number of contracting legs
    pub min_contractions: usize,
    /// Candles after the last leg's low in which the breakout must happen
    pub breakout_bars: usize,
    /// Candles after the first leg's high in which N legs must form
    pub lookback_bars: usize,
    pub require_volume_contraction: bool,
}

impl Default for VcpConfig {
    fn default() -> Self {
        Self {
            min_contractions: 3,
            breakout_bars: 10,
            lookback_bars: 200,
            require_volume_contraction: false,
        }
    }
}

impl VcpConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_contractions < 2 {
            bail!(
                "VCP_MIN_CONTRACTIONS must be >= 2, got {}",
                self.min_contractions
            );
        }
        if self.breakout_bars == 0 || self.lookback_bars == 0 {
            bail!("VCP breakout and lookback windows must be >= 1");
        }
        Ok(())
    }
}

/// Detection environment configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionEnvConfig {
    pub pivot: PivotConfig,
    pub double_pattern: DoublePatternConfig,
    pub vcp: VcpConfig,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl DetectionEnvConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            pivot: PivotConfig {
                left_bars: env_or("PIVOT_LEFT_BARS", defaults.pivot.left_bars),
                right_bars: env_or("PIVOT_RIGHT_BARS", defaults.pivot.right_bars),
            },
            double_pattern: DoublePatternConfig {
                tolerance_pct: env_or("DOUBLE_TOLERANCE_PCT", defaults.double_pattern.tolerance_pct),
                max_window_ms: env_or(
                    "DOUBLE_MAX_WINDOW_MINUTES",
                    defaults.double_pattern.max_window_ms / MINUTE_MS,
                ) * MINUTE_MS,
                min_retracement_pct: env_or(
                    "DOUBLE_MIN_RETRACEMENT_PCT",
                    defaults.double_pattern.min_retracement_pct,
                ),
            },
            vcp: VcpConfig {
                min_contractions: env_or("VCP_MIN_CONTRACTIONS", defaults.vcp.min_contractions),
                breakout_bars: env_or("VCP_BREAKOUT_BARS", defaults.vcp.breakout_bars),
                lookback_bars: env_or("VCP_LOOKBACK_BARS", defaults.vcp.lookback_bars),
                require_volume_contraction: env_or(
                    "VCP_REQUIRE_VOLUME_CONTRACTION",
                    defaults.vcp.require_volume_contraction,
                ),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.pivot.validate()?;
        self.double_pattern.validate()?;
        self.vcp.validate()
    }
}
