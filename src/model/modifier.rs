//! Scenario modifiers: the discriminated union driving scenario projections
//!
//! A scenario is a baseline profile plus an ordered list of modifiers. Each
//! modifier has one of three shapes: a targeted modifier (a dated financial
//! move with a target amount), a config modifier (a change to rates or
//! allocation policy), or a student loan. The archetype tag on each shape
//! determines how it expands into per-period cash flows and synthetic
//! accounts.

use super::account::{AssetClass, SavingsGoalKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Archetypes of a [`TargetedModifier`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetedArchetype {
    OneOffInflow,
    OneOffExpense,
    OneOffAccountContribution,
    OneOffAccountWithdrawal,
    RecurringIncome,
    RecurringExpense,
    RecurringAccountContribution,
    RecurringAccountWithdrawal,
    NewDebt,
}

impl TargetedArchetype {
    /// Archetypes whose expansion is anchored on `target_date`
    pub fn requires_target_date(&self) -> bool {
        matches!(
            self,
            TargetedArchetype::OneOffInflow
                | TargetedArchetype::OneOffExpense
                | TargetedArchetype::OneOffAccountContribution
                | TargetedArchetype::OneOffAccountWithdrawal
        )
    }
}

/// Archetypes of a [`ConfigModifier`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigArchetype {
    AllocationConfigChange,
    InterestRateChange,
}

/// How a targeted amount is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountInterpretation {
    Monthly,
    Total,
}

/// How a targeted modifier hits cash flow and accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashFlowBehavior {
    /// Contributions build a synthetic asset account
    Asset,
    /// Equal monthly outflows fund a lump expense over a horizon; nothing
    /// is withdrawn at the end
    SinkingExpense,
    /// A single outflow at the target date
    LumpSumExpense,
    /// Contributions build a priority-funded savings goal (HYSA)
    SavingsGoal,
}

/// Whether an income stream is employment or business income
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomeType {
    Salary,
    Business,
}

/// UK income-contingent student loan plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudentLoanPlan {
    Plan1,
    Plan2,
    Plan4,
    Plan5,
}

/// A request to draw from the pension pot, attached to a targeted modifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PensionWithdrawalRequest {
    /// Gross amount: per period when recurring, one-off otherwise
    pub gross_amount: f64,

    #[serde(default)]
    pub is_recurring: bool,
}

/// Free-form contextual assumptions carried by a modifier
pub type Assumptions = BTreeMap<String, serde_json::Value>;

/// A dated financial move with a target amount
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetedModifier {
    pub id: String,

    pub display_name: String,

    /// Groups related modifiers into one scenario for impact reporting
    pub scenario_id: String,

    pub archetype: TargetedArchetype,

    pub start_date: NaiveDate,

    #[serde(default)]
    pub assumptions: Assumptions,

    pub target_amount: f64,

    #[serde(default)]
    pub target_date: Option<NaiveDate>,

    #[serde(default)]
    pub monthly_contribution: Option<f64>,

    #[serde(default)]
    pub duration_years: Option<f64>,

    #[serde(default)]
    pub amount_interpretation: Option<AmountInterpretation>,

    /// Initial balance of a synthetic account; a negative value on a
    /// recurring income stream is a one-off setup cost instead
    #[serde(default)]
    pub starting_amount: Option<f64>,

    /// Annual growth rate of a synthetic account, or interest rate of a
    /// new debt
    #[serde(default)]
    pub performance: Option<f64>,

    #[serde(default)]
    pub cash_flow_behavior: Option<CashFlowBehavior>,

    /// Name pattern matched against existing accounts
    #[serde(default)]
    pub linked_account_name: Option<String>,

    #[serde(default)]
    pub contribution_stop_after_periods: Option<u32>,

    #[serde(default)]
    pub income_type: Option<IncomeType>,

    /// Year-over-year growth applied to a recurring income stream
    #[serde(default)]
    pub annual_percentage: Option<f64>,

    #[serde(default)]
    pub savings_goal_priority: Option<u32>,

    #[serde(default)]
    pub savings_goal_target: Option<f64>,

    #[serde(default)]
    pub savings_goal_kind: Option<SavingsGoalKind>,

    /// Source class for one-off withdrawals without a linked account name
    #[serde(default)]
    pub source_asset_class: Option<AssetClass>,

    #[serde(default)]
    pub pension_withdrawal_request: Option<PensionWithdrawalRequest>,
}

impl TargetedModifier {
    /// Stream duration in whole periods, if a duration was given
    pub fn duration_months(&self) -> Option<u32> {
        self.duration_years.map(|y| (y * 12.0).round() as u32)
    }

    /// True when the contribution represents a balance move between
    /// accounts rather than new money
    pub fn is_transfer(&self) -> bool {
        self.assumptions
            .get("is_transfer")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Optional setup-cost date override for recurring income streams
    pub fn setup_date(&self) -> Option<NaiveDate> {
        self.assumptions
            .get("setup_date")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }
}

/// A change to allocation policy, a salary override, or an interest-rate
/// change on an existing account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigModifier {
    pub id: String,

    pub display_name: String,

    pub scenario_id: String,

    pub archetype: ConfigArchetype,

    pub start_date: NaiveDate,

    #[serde(default)]
    pub assumptions: Assumptions,

    /// New annual rate for `InterestRateChange`
    #[serde(default)]
    pub performance: Option<f64>,

    #[serde(default)]
    pub linked_account_name: Option<String>,

    /// Percentages merged into the active allocation config
    #[serde(default)]
    pub automated_allocation_percentages: Option<BTreeMap<AssetClass, f64>>,

    #[serde(default)]
    pub surplus_allocation: Option<super::SurplusAllocation>,

    /// Gross monthly salary override from this modifier's start
    #[serde(default)]
    pub salary_override: Option<f64>,
}

impl ConfigModifier {
    /// Rebalancing rate changes add to the existing rate; refinance-style
    /// changes replace it.
    pub fn rebalancing_enabled(&self) -> bool {
        self.assumptions
            .get("rebalancingEnabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// An income-contingent student loan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentLoanModifier {
    pub id: String,

    pub display_name: String,

    pub scenario_id: String,

    pub start_date: NaiveDate,

    #[serde(default)]
    pub assumptions: Assumptions,

    pub plan: StudentLoanPlan,

    pub principal: f64,

    pub annual_interest_rate: f64,

    /// Repayments begin the April after graduation in reality; here they
    /// begin at this date
    pub graduation_date: NaiveDate,

    /// Outstanding balance is written off at this date
    pub write_off_date: NaiveDate,
}

/// The modifier union
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioModifier {
    Targeted(TargetedModifier),
    Config(ConfigModifier),
    StudentLoan(StudentLoanModifier),
}

impl ScenarioModifier {
    pub fn id(&self) -> &str {
        match self {
            ScenarioModifier::Targeted(m) => &m.id,
            ScenarioModifier::Config(m) => &m.id,
            ScenarioModifier::StudentLoan(m) => &m.id,
        }
    }

    pub fn scenario_id(&self) -> &str {
        match self {
            ScenarioModifier::Targeted(m) => &m.scenario_id,
            ScenarioModifier::Config(m) => &m.scenario_id,
            ScenarioModifier::StudentLoan(m) => &m.scenario_id,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            ScenarioModifier::Targeted(m) => &m.display_name,
            ScenarioModifier::Config(m) => &m.display_name,
            ScenarioModifier::StudentLoan(m) => &m.display_name,
        }
    }

    pub fn start_date(&self) -> NaiveDate {
        match self {
            ScenarioModifier::Targeted(m) => m.start_date,
            ScenarioModifier::Config(m) => m.start_date,
            ScenarioModifier::StudentLoan(m) => m.start_date,
        }
    }

    /// Text scanned by account bootstrapping to decide whether a scenario
    /// touches pensions or investments
    pub fn mention_text(&self) -> String {
        let linked = match self {
            ScenarioModifier::Targeted(m) => m.linked_account_name.as_deref().unwrap_or(""),
            ScenarioModifier::Config(m) => m.linked_account_name.as_deref().unwrap_or(""),
            ScenarioModifier::StudentLoan(_) => "",
        };
        format!(
            "{} {} {}",
            self.display_name().to_lowercase(),
            self.scenario_id().to_lowercase(),
            linked.to_lowercase()
        )
    }
}
