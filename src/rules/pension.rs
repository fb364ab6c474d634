//! Private pension withdrawal state
//!
//! One [`PensionState`] exists per projection run. It is lazily initialized
//! at the first withdrawal so the 25% tax-free allowance is computed from
//! the pot as it stands at first access, not from the starting balance.
//! Taking any taxable (flexi-access) amount triggers the MPAA, which caps
//! further pension contributions.

use super::income::marginal_income_tax;
use super::UkTaxConfig;
use serde::{Deserialize, Serialize};

/// Fixed at first access: the pot snapshot and the resulting tax-free cap
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Crystallization {
    pot_at_first_access: f64,
    tax_free_cap: f64,
}

/// Outcome of a single pension withdrawal
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PensionWithdrawal {
    pub gross: f64,
    pub tax_free: f64,
    pub taxable: f64,
    pub tax: f64,
    pub net: f64,
}

impl PensionWithdrawal {
    pub const ZERO: PensionWithdrawal = PensionWithdrawal {
        gross: 0.0,
        tax_free: 0.0,
        taxable: 0.0,
        tax: 0.0,
        net: 0.0,
    };
}

/// Per-run pension withdrawal tracking
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PensionState {
    crystallization: Option<Crystallization>,

    pub tax_free_used: f64,

    pub taxable_withdrawn: f64,

    /// Gross withdrawn in the period currently being simulated
    pub total_withdrawn_this_period: f64,

    /// Set once any taxable amount has been flexi-accessed
    pub mpaa_triggered: bool,
}

impl PensionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the pot on first access; later calls are no-ops
    pub fn ensure_initialized(&mut self, pot: f64, cfg: &UkTaxConfig) {
        if self.crystallization.is_none() {
            self.crystallization = Some(Crystallization {
                pot_at_first_access: pot,
                tax_free_cap: (cfg.pension_tax_free_fraction * pot).min(cfg.pension_tax_free_cap),
            });
        }
    }

    pub fn initialized(&self) -> bool {
        self.crystallization.is_some()
    }

    pub fn tax_free_remaining(&self) -> f64 {
        match self.crystallization {
            Some(c) => (c.tax_free_cap - self.tax_free_used).max(0.0),
            None => 0.0,
        }
    }

    /// Reset the per-period withdrawal counter
    pub fn begin_period(&mut self) {
        self.total_withdrawn_this_period = 0.0;
    }

    /// Withdraw a gross amount from a pot of the given size.
    ///
    /// The tax-free allowance is consumed first; the remainder is taxed at
    /// the marginal rate against `base_annual_income` (year-to-date
    /// employment income, annualized). Recurring withdrawals annualize the
    /// taxable part before the band walk and divide the tax back by 12.
    pub fn withdraw_gross(
        &mut self,
        gross_requested: f64,
        pot: f64,
        base_annual_income: f64,
        recurring: bool,
        cfg: &UkTaxConfig,
    ) -> PensionWithdrawal {
        let gross = gross_requested.max(0.0).min(pot.max(0.0));
        if gross <= 0.0 {
            return PensionWithdrawal::ZERO;
        }
        self.ensure_initialized(pot, cfg);

        let tax_free = gross.min(self.tax_free_remaining());
        let taxable = gross - tax_free;
        let tax = if recurring {
            marginal_income_tax(cfg, base_annual_income, taxable * 12.0) / 12.0
        } else {
            marginal_income_tax(cfg, base_annual_income, taxable)
        };

        self.tax_free_used += tax_free;
        self.taxable_withdrawn += taxable;
        self.total_withdrawn_this_period += gross;
        if taxable > 0.0 {
            self.mpaa_triggered = true;
        }

        PensionWithdrawal {
            gross,
            tax_free,
            taxable,
            tax,
            net: gross - tax,
        }
    }

    /// Withdraw whatever gross amount nets to `net_needed` after tax,
    /// bounded by the pot. Solved by fixed-point iteration on
    /// `gross = net + tax(gross)`, which converges in a handful of steps
    /// for stepwise schedules.
    pub fn withdraw_net_target(
        &mut self,
        net_needed: f64,
        pot: f64,
        base_annual_income: f64,
        cfg: &UkTaxConfig,
    ) -> PensionWithdrawal {
        if net_needed <= 0.0 || pot <= 0.0 {
            return PensionWithdrawal::ZERO;
        }
        self.ensure_initialized(pot, cfg);

        let tax_free_remaining = self.tax_free_remaining();
        let mut gross = net_needed;
        for _ in 0..100 {
            let taxable = (gross - tax_free_remaining).max(0.0);
            let tax = marginal_income_tax(cfg, base_annual_income, taxable * 12.0) / 12.0;
            let next = (net_needed + tax).min(pot);
            if (next - gross).abs() < 1e-9 {
                gross = next;
                break;
            }
            gross = next;
        }

        self.withdraw_gross(gross, pot, base_annual_income, true, cfg)
    }
}
