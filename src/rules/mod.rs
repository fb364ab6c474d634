//! UK tax and pension rules
//!
//! All thresholds and rates live on [`UkTaxConfig`] so callers can override
//! any of them; [`UkTaxConfig::default`] carries current UK values.

mod capital_gains;
mod income;
mod pension;
mod student_loan;

pub use capital_gains::CgtTracker;
pub use income::{
    annual_income_tax, annual_national_insurance, corporation_tax, marginal_income_tax,
    monthly_income_tax, monthly_national_insurance, personal_allowance,
};
pub use pension::{PensionState, PensionWithdrawal};
pub use student_loan::{monthly_student_loan_repayment, PlanTerms};

use crate::model::AssetClass;
use crate::model::StudentLoanPlan;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One step of a stepwise tax schedule: `rate` applies from `floor` up to
/// the next band's floor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaxBand {
    pub floor: f64,
    pub rate: f64,
}

/// Walk a complete stepwise schedule (first band floor 0) over an amount
pub fn stepwise_tax(bands: &[TaxBand], amount: f64) -> f64 {
    let mut tax = 0.0;
    for (band, next) in bands.iter().zip(bands.iter().skip(1)) {
        if amount <= band.floor {
            return tax;
        }
        let ceil = amount.min(next.floor);
        tax += (ceil - band.floor) * band.rate;
    }
    if let Some(last) = bands.last() {
        if amount > last.floor {
            tax += (amount - last.floor) * last.rate;
        }
    }
    tax
}

/// All UK tax, pension, and wrapper constants used by the simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UkTaxConfig {
    /// Annual tax-free personal allowance
    pub personal_allowance: f64,

    /// Income above this tapers the allowance by 1 for every 2
    pub personal_allowance_taper_threshold: f64,

    /// Bands over taxable income (gross minus remaining allowance)
    pub income_tax_bands: Vec<TaxBand>,

    /// Bands over annual salary; pensions are exempt
    pub national_insurance_bands: Vec<TaxBand>,

    /// Bands over annual business profit
    pub corporation_tax_bands: Vec<TaxBand>,

    /// Annual ISA contribution limit
    pub isa_annual_limit: f64,

    /// Annual capital gains exemption, reset each tax year
    pub cgt_annual_exemption: f64,

    pub cgt_rate: f64,

    /// Share of a taxable liquidation assumed to be gain
    pub cgt_taxable_gain_ratio: f64,

    /// Minimum private pension access age
    pub pension_access_age: f64,

    /// Access age once the 2028 rise takes effect
    pub pension_access_age_post_switch: f64,

    /// Calendar year the access age rises
    pub pension_access_age_switch_year: i32,

    pub state_pension_age: f64,

    /// Fraction of the pot withdrawable tax-free at first access
    pub pension_tax_free_fraction: f64,

    /// Lifetime cap on the tax-free portion
    pub pension_tax_free_cap: f64,

    /// Annual pension contribution cap after a flexi-access withdrawal
    pub mpaa_annual_limit: f64,

    /// Repayment rate above a student loan plan's threshold
    pub student_loan_repayment_rate: f64,

    /// Annual repayment thresholds per plan
    pub student_loan_thresholds: BTreeMap<StudentLoanPlan, f64>,

    /// Allocation percentages used when a baseline supplies none
    pub default_allocation_percentages: BTreeMap<AssetClass, f64>,
}

impl Default for UkTaxConfig {
    fn default() -> Self {
        Self {
            personal_allowance: 12_570.0,
            personal_allowance_taper_threshold: 100_000.0,
            income_tax_bands: vec![
                TaxBand { floor: 0.0, rate: 0.20 },
                TaxBand { floor: 37_700.0, rate: 0.40 },
                TaxBand { floor: 125_140.0, rate: 0.45 },
            ],
            national_insurance_bands: vec![
                TaxBand { floor: 0.0, rate: 0.0 },
                TaxBand { floor: 12_570.0, rate: 0.08 },
                TaxBand { floor: 50_270.0, rate: 0.02 },
            ],
            corporation_tax_bands: vec![
                TaxBand { floor: 0.0, rate: 0.19 },
                TaxBand { floor: 50_000.0, rate: 0.25 },
            ],
            isa_annual_limit: 20_000.0,
            cgt_annual_exemption: 3_000.0,
            cgt_rate: 0.20,
            cgt_taxable_gain_ratio: 0.5,
            pension_access_age: 55.0,
            pension_access_age_post_switch: 57.0,
            pension_access_age_switch_year: 2028,
            state_pension_age: 67.0,
            pension_tax_free_fraction: 0.25,
            pension_tax_free_cap: 268_275.0,
            mpaa_annual_limit: 10_000.0,
            student_loan_repayment_rate: 0.09,
            student_loan_thresholds: BTreeMap::from([
                (StudentLoanPlan::Plan1, 26_065.0),
                (StudentLoanPlan::Plan2, 28_470.0),
                (StudentLoanPlan::Plan4, 32_745.0),
                (StudentLoanPlan::Plan5, 25_000.0),
            ]),
            default_allocation_percentages: BTreeMap::from([
                (AssetClass::Equities, 10.0),
                (AssetClass::Pension, 5.0),
            ]),
        }
    }
}

impl UkTaxConfig {
    /// Pension access age effective in a calendar year
    pub fn pension_access_age_in(&self, calendar_year: i32) -> f64 {
        if calendar_year >= self.pension_access_age_switch_year {
            self.pension_access_age_post_switch
        } else {
            self.pension_access_age
        }
    }

    /// Terms for a student loan plan
    pub fn plan_terms(&self, plan: StudentLoanPlan) -> PlanTerms {
        PlanTerms {
            annual_threshold: self
                .student_loan_thresholds
                .get(&plan)
                .copied()
                .unwrap_or(25_000.0),
            repayment_rate: self.student_loan_repayment_rate,
        }
    }
}
