//! Projection output structures
//!
//! One [`ProjectionPoint`] per simulated month, carrying the headline cash
//! flow and net worth plus a full breakdown of where the money moved.

use crate::error::Diagnostic;
use crate::model::AssetClass;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Balance of one account at the end of a period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryBalance {
    pub name: String,
    pub asset_class: AssetClass,
    pub balance: f64,
}

/// Detailed composition of a single period
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeriodBreakdown {
    // Income
    pub gross_income: f64,
    pub baseline_income: f64,
    pub scenario_income: f64,
    pub business_income: f64,
    pub state_pension_income: f64,
    pub private_pension_income: f64,

    // Outgoings
    pub expenses: f64,
    pub baseline_expenses: f64,
    pub scenario_expenses: f64,

    /// Scheduled contributions actually applied this period (after any
    /// proportional scale-down and ISA capping)
    pub account_contributions: f64,

    // Taxes
    pub income_tax: f64,
    pub national_insurance: f64,
    pub corporation_tax: f64,
    pub capital_gains_tax: f64,
    /// Tax withheld on deficit-driven pension drawdowns; separate from
    /// `income_tax`, which covers only flows inside `gross_income`
    pub pension_drawdown_tax: f64,
    pub student_loan_repayment: f64,

    // Balance sheet
    pub total_assets: f64,
    /// Magnitude of outstanding debt
    pub total_debts: f64,
    pub asset_categories: Vec<CategoryBalance>,
    pub debt_categories: Vec<CategoryBalance>,

    // Allocator activity
    pub allocations_by_class: BTreeMap<AssetClass, f64>,
    pub allocations_by_account: BTreeMap<String, f64>,
    pub liquidations_by_class: BTreeMap<AssetClass, f64>,
    pub liquidations_by_account: BTreeMap<String, f64>,

    /// Cash left after automated percentages and goal top-ups, before
    /// surplus routing; absent on liquidation periods
    pub surplus_cash: Option<f64>,

    /// Cash need the allocator could not cover from any account
    pub uncovered_deficit: f64,

    // Growth attribution for the period
    pub compound_growth: f64,
    pub contributions_total: f64,

    /// Net cash-flow impact per scenario group
    pub scenario_impacts: BTreeMap<String, f64>,
}

/// A single month of projection output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionPoint {
    pub period: u32,

    /// Net income minus taxes, expenses, and scheduled contributions
    pub cash_flow: f64,

    /// Sum of all account balances (debts carry negative balances)
    pub net_worth: f64,

    pub breakdown: PeriodBreakdown,
}

/// A complete projection run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionResult {
    pub points: Vec<ProjectionPoint>,

    /// Advisory conditions observed during the run
    pub diagnostics: Vec<Diagnostic>,
}

impl ProjectionResult {
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn add_point(&mut self, point: ProjectionPoint) {
        self.points.push(point);
    }

    /// Summary statistics over the whole run
    pub fn summary(&self) -> ProjectionSummary {
        let final_net_worth = self.points.last().map(|p| p.net_worth).unwrap_or(0.0);
        let min_net_worth = self
            .points
            .iter()
            .map(|p| p.net_worth)
            .fold(f64::INFINITY, f64::min);
        let total_income_tax: f64 = self.points.iter().map(|p| p.breakdown.income_tax).sum();
        let total_ni: f64 = self
            .points
            .iter()
            .map(|p| p.breakdown.national_insurance)
            .sum();
        let total_cgt: f64 = self
            .points
            .iter()
            .map(|p| p.breakdown.capital_gains_tax)
            .sum();

        ProjectionSummary {
            total_months: self.points.len() as u32,
            final_net_worth,
            min_net_worth: if min_net_worth.is_finite() {
                min_net_worth
            } else {
                0.0
            },
            total_income_tax,
            total_national_insurance: total_ni,
            total_capital_gains_tax: total_cgt,
        }
    }
}

impl Default for ProjectionResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Headline numbers for a projection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionSummary {
    pub total_months: u32,
    pub final_net_worth: f64,
    pub min_net_worth: f64,
    pub total_income_tax: f64,
    pub total_national_insurance: f64,
    pub total_capital_gains_tax: f64,
}
