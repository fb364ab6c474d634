//! Capital gains tax on investment liquidations
//!
//! Gains are estimated rather than tracked lot-by-lot: a fixed share of any
//! taxable liquidation is assumed to be gain. ISA-wrapped withdrawals are
//! exempt, and an annual exemption resets each tax year.

use super::UkTaxConfig;
use serde::{Deserialize, Serialize};

/// Per-run CGT exemption tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CgtTracker {
    exemption_remaining: f64,
}

impl CgtTracker {
    pub fn new(cfg: &UkTaxConfig) -> Self {
        Self {
            exemption_remaining: cfg.cgt_annual_exemption,
        }
    }

    /// April rollover
    pub fn reset_tax_year(&mut self, cfg: &UkTaxConfig) {
        self.exemption_remaining = cfg.cgt_annual_exemption;
    }

    pub fn exemption_remaining(&self) -> f64 {
        self.exemption_remaining
    }

    /// Factor by which a net cash need is grossed up so that the gross
    /// liquidation covers the need after estimated CGT:
    /// `1 / (1 - taxable_ratio * gain_ratio * rate)`.
    pub fn gross_up_factor(&self, taxable_ratio: f64, cfg: &UkTaxConfig) -> f64 {
        let drag = taxable_ratio.clamp(0.0, 1.0) * cfg.cgt_taxable_gain_ratio * cfg.cgt_rate;
        1.0 / (1.0 - drag)
    }

    /// Charge CGT on the taxable part of a liquidation, consuming the
    /// annual exemption first. Returns the tax due.
    pub fn charge(&mut self, taxable_liquidation: f64, cfg: &UkTaxConfig) -> f64 {
        if taxable_liquidation <= 0.0 {
            return 0.0;
        }
        let gain = taxable_liquidation * cfg.cgt_taxable_gain_ratio;
        let tax = (gain - self.exemption_remaining).max(0.0) * cfg.cgt_rate;
        self.exemption_remaining = (self.exemption_remaining - gain).max(0.0);
        tax
    }
}
