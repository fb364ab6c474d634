//! Shared data model: accounts, modifiers, baseline profile, dates

mod account;
mod dates;
mod modifier;
pub mod loader;

pub use account::{classify_name, rate_per_period, Account, AssetClass, SavingsGoalKind, TaxWrapper};
pub use dates::{SimClock, TAX_YEAR_START_MONTH0};
pub use modifier::{
    AmountInterpretation, Assumptions, CashFlowBehavior, ConfigArchetype, ConfigModifier,
    IncomeType, PensionWithdrawalRequest, ScenarioModifier, StudentLoanModifier, StudentLoanPlan,
    TargetedArchetype, TargetedModifier,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where surplus cash goes after automated percentages and savings-goal
/// top-ups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurplusAllocation {
    pub asset_class: AssetClass,
}

/// Allocation policy for surplus cash
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// Percent of surplus routed to each asset class; may sum to at most
    /// 100 after proportional scaling
    #[serde(default)]
    pub automated_allocation_percentages: BTreeMap<AssetClass, f64>,

    #[serde(default)]
    pub surplus_allocation: Option<SurplusAllocation>,
}

impl AllocationConfig {
    /// Whether the user explicitly pinned a class to zero percent
    pub fn explicitly_zero(&self, class: AssetClass) -> bool {
        self.automated_allocation_percentages.get(&class) == Some(&0.0)
    }
}

/// The baseline financial profile a scenario perturbs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineProfile {
    pub accounts: Vec<Account>,

    /// Gross monthly salary
    pub monthly_income: f64,

    pub monthly_expenses: f64,

    pub current_age: f64,

    pub retirement_age: f64,

    /// Monthly state pension once state pension age is reached
    #[serde(default)]
    pub state_pension_monthly: Option<f64>,

    #[serde(default)]
    pub allocation_config: Option<AllocationConfig>,
}

/// A full simulation request: baseline plus scenario modifiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioRequest {
    pub baseline: BaselineProfile,

    #[serde(default)]
    pub modifiers: Vec<ScenarioModifier>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_config_explicit_zero() {
        let mut config = AllocationConfig::default();
        assert!(!config.explicitly_zero(AssetClass::DefaultSavings));
        config
            .automated_allocation_percentages
            .insert(AssetClass::DefaultSavings, 0.0);
        assert!(config.explicitly_zero(AssetClass::DefaultSavings));
    }

    #[test]
    fn test_request_round_trips_through_json() {
        let request = ScenarioRequest {
            baseline: BaselineProfile {
                accounts: vec![],
                monthly_income: 4000.0,
                monthly_expenses: 2200.0,
                current_age: 34.0,
                retirement_age: 67.0,
                state_pension_monthly: None,
                allocation_config: None,
            },
            modifiers: vec![],
        };
        let json = serde_json::to_string(&request).unwrap();
        let back: ScenarioRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.baseline.monthly_income, 4000.0);
        assert!(back.modifiers.is_empty());
    }
}
