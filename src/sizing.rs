use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::models::{MarketSnapshot, TradeSignal};

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SizingError {
    #[error(
        "entry {entry} deviates {deviation_pct:.3}% from market {last} (tolerance {allowed_pct}%)"
    )]
    ExcessiveSlippage {
        entry: f64,
        last: f64,
        deviation_pct: f64,
        allowed_pct: f64,
    },
    #[error("{margin} USDT x{leverage} at {entry} rounds below the tradeable minimum")]
    InsufficientSize {
        margin: f64,
        leverage: u32,
        entry: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizingResult {
    /// Entry quantity in base-asset units, already truncated to the
    /// instrument step.
    pub quantity: f64,
    /// margin x leverage, in USDT.
    pub notional: f64,
}

/// Turns account parameters into an entry quantity, refusing signals whose
/// entry price has drifted too far from the live market.
pub fn size_position(
    signal: &TradeSignal,
    snapshot: &MarketSnapshot,
    cfg: &Config,
) -> Result<SizingResult, SizingError> {
    let entry = signal.entry_price;
    let last = snapshot.last();

    let deviation = deviation_pct(last, entry);
    let within = matches!(deviation, Some(pct) if pct <= cfg.allow_slippage_pct);
    if !within {
        return Err(SizingError::ExcessiveSlippage {
            entry,
            last,
            deviation_pct: deviation.unwrap_or(f64::INFINITY),
            allowed_pct: cfg.allow_slippage_pct,
        });
    }

    let notional = cfg.margin_usdt * cfg.leverage as f64;
    let quantity = snapshot.spec.truncate_qty(notional / entry);
    if quantity <= 0.0 || quantity < snapshot.spec.min_qty {
        return Err(SizingError::InsufficientSize {
            margin: cfg.margin_usdt,
            leverage: cfg.leverage,
            entry,
        });
    }

    Ok(SizingResult { quantity, notional })
}

/// Percent distance of the market from the requested entry. None when either
/// price is not positive; callers treat that as out of tolerance.
fn deviation_pct(last: f64, entry: f64) -> Option<f64> {
    if last <= 0.0 || entry <= 0.0 {
        return None;
    }
    Some((last - entry).abs() / entry * 100.0)
}
