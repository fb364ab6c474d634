//! Solvency analysis over a finished projection
//!
//! Two distinct failure modes: net worth going negative (owing more than
//! everything owned), and running out of accessible cash even while net
//! worth stays positive. The second is the one people actually hit first,
//! so the analyzer also reports whether liquidating investments at the
//! worst month would have covered the shortfall.

use crate::engine::{ProjectionPoint, ProjectionResult};
use crate::model::{AssetClass, SimClock};
use serde::{Deserialize, Serialize};

/// Classes counted as spendable cash when scanning for shortfalls
const CASH_CLASSES: [AssetClass; 3] = [
    AssetClass::CurrentAccount,
    AssetClass::Hysa,
    AssetClass::DefaultSavings,
];

/// Classes counted as liquidity that could be sold to cover a shortfall
const LIQUID_INVESTMENT_CLASSES: [AssetClass; 2] =
    [AssetClass::GeneralInvestment, AssetClass::Equities];

/// Result of analyzing one projection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolvencyAnalysis {
    pub is_solvent: bool,

    pub min_net_worth: f64,

    /// First month net worth went negative, as "YYYY-MM"
    pub first_deficit_date: Option<String>,

    /// Deepest net-worth deficit (a positive magnitude)
    pub max_deficit: f64,

    /// Mean surplus cash across periods where the allocator ran a deposit
    pub monthly_surplus_avg: f64,

    /// Deepest single-account cash overdraft (a positive magnitude)
    pub max_cash_shortfall: f64,

    /// Investment balances at the worst-shortfall month
    pub available_liquidity_at_worst: f64,

    /// What would have to be liquidated to clear the worst shortfall
    pub required_liquidation: f64,

    pub can_fix_with_liquidation: bool,
}

/// Analyze a projection for both insolvency dimensions
pub fn analyze(result: &ProjectionResult, clock: &SimClock) -> SolvencyAnalysis {
    let points = &result.points;

    let mut min_net_worth = f64::INFINITY;
    let mut first_deficit_period: Option<u32> = None;
    let mut max_deficit = 0.0f64;

    let mut worst_shortfall = 0.0f64;
    let mut worst_period: Option<u32> = None;

    let mut surplus_sum = 0.0;
    let mut surplus_count = 0u32;

    for point in points {
        min_net_worth = min_net_worth.min(point.net_worth);
        if point.net_worth < 0.0 {
            if first_deficit_period.is_none() {
                first_deficit_period = Some(point.period);
            }
            max_deficit = max_deficit.max(-point.net_worth);
        }

        let shortfall = cash_shortfall(point);
        if shortfall > worst_shortfall {
            worst_shortfall = shortfall;
            worst_period = Some(point.period);
        }

        if let Some(surplus) = point.breakdown.surplus_cash {
            surplus_sum += surplus;
            surplus_count += 1;
        }
    }

    if points.is_empty() {
        min_net_worth = 0.0;
    }

    let available_liquidity = worst_period
        .and_then(|period| points.iter().find(|p| p.period == period))
        .map(liquid_investments)
        .unwrap_or(0.0);

    let net_worth_insolvent = min_net_worth < 0.0;
    let liquidity_insolvent = worst_shortfall > 0.0;

    SolvencyAnalysis {
        is_solvent: !net_worth_insolvent && !liquidity_insolvent,
        min_net_worth,
        first_deficit_date: first_deficit_period.map(|p| clock.label_of(p)),
        max_deficit,
        monthly_surplus_avg: if surplus_count > 0 {
            surplus_sum / surplus_count as f64
        } else {
            0.0
        },
        max_cash_shortfall: worst_shortfall,
        available_liquidity_at_worst: available_liquidity,
        required_liquidation: worst_shortfall,
        can_fix_with_liquidation: liquidity_insolvent && available_liquidity >= worst_shortfall,
    }
}

/// Deepest overdraft among cash accounts in one period, scanning debt
/// categories too in case a cash account was classed as one
fn cash_shortfall(point: &ProjectionPoint) -> f64 {
    point
        .breakdown
        .asset_categories
        .iter()
        .chain(point.breakdown.debt_categories.iter())
        .filter(|c| CASH_CLASSES.contains(&c.asset_class))
        .map(|c| (-c.balance).max(0.0))
        .fold(0.0, f64::max)
}

/// Positive investment balances available at a period
fn liquid_investments(point: &ProjectionPoint) -> f64 {
    point
        .breakdown
        .asset_categories
        .iter()
        .filter(|c| LIQUID_INVESTMENT_CLASSES.contains(&c.asset_class))
        .map(|c| c.balance.max(0.0))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CategoryBalance, PeriodBreakdown, ProjectionPoint};
    use approx::assert_relative_eq;

    fn point(period: u32, net_worth: f64, categories: Vec<CategoryBalance>) -> ProjectionPoint {
        ProjectionPoint {
            period,
            cash_flow: 0.0,
            net_worth,
            breakdown: PeriodBreakdown {
                asset_categories: categories,
                surplus_cash: Some(100.0),
                ..PeriodBreakdown::default()
            },
        }
    }

    fn category(name: &str, class: AssetClass, balance: f64) -> CategoryBalance {
        CategoryBalance {
            name: name.into(),
            asset_class: class,
            balance,
        }
    }

    #[test]
    fn test_healthy_projection_is_solvent() {
        let clock = SimClock::new(2026, 1, 2);
        let mut result = ProjectionResult::new();
        result.add_point(point(
            0,
            10_000.0,
            vec![category("Cash", AssetClass::DefaultSavings, 10_000.0)],
        ));
        result.add_point(point(
            1,
            10_100.0,
            vec![category("Cash", AssetClass::DefaultSavings, 10_100.0)],
        ));

        let analysis = analyze(&result, &clock);
        assert!(analysis.is_solvent);
        assert_eq!(analysis.first_deficit_date, None);
        assert_relative_eq!(analysis.monthly_surplus_avg, 100.0);
        assert_eq!(analysis.max_cash_shortfall, 0.0);
    }

    #[test]
    fn test_net_worth_deficit_detected() {
        let clock = SimClock::new(2026, 1, 3);
        let mut result = ProjectionResult::new();
        result.add_point(point(0, 500.0, vec![]));
        result.add_point(point(1, -2_500.0, vec![]));
        result.add_point(point(2, -1_000.0, vec![]));

        let analysis = analyze(&result, &clock);
        assert!(!analysis.is_solvent);
        assert_eq!(analysis.first_deficit_date.as_deref(), Some("2026-02"));
        assert_relative_eq!(analysis.max_deficit, 2_500.0);
        assert_relative_eq!(analysis.min_net_worth, -2_500.0);
    }

    #[test]
    fn test_liquidity_shortfall_with_cover() {
        let clock = SimClock::new(2026, 1, 2);
        let mut result = ProjectionResult::new();
        // Net worth positive throughout, but the current account is 5,000
        // overdrawn while the ISA holds 8,000
        result.add_point(point(
            0,
            3_000.0,
            vec![
                category("Current Account", AssetClass::CurrentAccount, -5_000.0),
                category("Stocks & Shares ISA", AssetClass::GeneralInvestment, 8_000.0),
            ],
        ));

        let analysis = analyze(&result, &clock);
        assert!(!analysis.is_solvent);
        assert_relative_eq!(analysis.max_cash_shortfall, 5_000.0);
        assert_relative_eq!(analysis.available_liquidity_at_worst, 8_000.0);
        assert_relative_eq!(analysis.required_liquidation, 5_000.0);
        assert!(analysis.can_fix_with_liquidation);
    }

    #[test]
    fn test_liquidity_shortfall_without_cover() {
        let clock = SimClock::new(2026, 1, 1);
        let mut result = ProjectionResult::new();
        result.add_point(point(
            0,
            -1_000.0,
            vec![
                category("Cash Savings", AssetClass::DefaultSavings, -4_000.0),
                category("GIA", AssetClass::GeneralInvestment, 3_000.0),
            ],
        ));

        let analysis = analyze(&result, &clock);
        assert!(!analysis.is_solvent);
        assert!(!analysis.can_fix_with_liquidation);
    }
}
