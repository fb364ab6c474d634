//! Account inputs and asset-class taxonomy

use serde::{Deserialize, Serialize};

/// Asset classes the allocator routes cash between
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AssetClass {
    CurrentAccount,
    Hysa,
    GeneralInvestment,
    Equities,
    Pension,
    BusinessEquity,
    OtherAssets,
    DefaultSavings,
}

impl AssetClass {
    /// Liquidation priority for the standard deficit-covering path.
    /// Cash first, then progressively less liquid holdings.
    pub const LIQUIDATION_ORDER: [AssetClass; 8] = [
        AssetClass::CurrentAccount,
        AssetClass::DefaultSavings,
        AssetClass::Hysa,
        AssetClass::GeneralInvestment,
        AssetClass::Equities,
        AssetClass::Pension,
        AssetClass::BusinessEquity,
        AssetClass::OtherAssets,
    ];

    /// Classes whose non-ISA liquidations are subject to capital gains tax
    pub fn is_cgt_subject(&self) -> bool {
        matches!(self, AssetClass::Equities | AssetClass::OtherAssets)
    }

    /// Cash-like classes that may run an overdraft instead of leaving an
    /// uncovered deficit
    pub fn is_overdraftable(&self) -> bool {
        matches!(self, AssetClass::CurrentAccount | AssetClass::DefaultSavings)
    }

    /// Display name used when a zero-balance account is injected for a
    /// class referenced by allocation config
    pub fn default_account_name(&self) -> &'static str {
        match self {
            AssetClass::CurrentAccount => "Current Account",
            AssetClass::Hysa => "High-Yield Savings",
            AssetClass::GeneralInvestment => "General Investment Account",
            AssetClass::Equities => "Equities Portfolio",
            AssetClass::Pension => "Personal Pension",
            AssetClass::BusinessEquity => "Business Equity",
            AssetClass::OtherAssets => "Other Assets",
            AssetClass::DefaultSavings => "Cash Savings",
        }
    }
}

/// Tax wrapper on an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TaxWrapper {
    #[default]
    None,
    Isa,
    Pension,
    Gia,
}

/// What a priority-funded savings goal is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SavingsGoalKind {
    EmergencyFund,
    EducationFund,
    Other,
}

/// A single account in the baseline profile.
///
/// Debts carry a balance at or below zero; reaching zero means paid off and
/// is terminal. Asset balances may go negative, which represents an implicit
/// overdraft and feeds the solvency analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub name: String,

    /// Starting balance; at or below zero for debts
    pub balance: f64,

    /// Annual growth (assets) or interest (debts) rate, e.g. 0.05 for 5%
    #[serde(default)]
    pub annual_rate: f64,

    /// Scheduled monthly contribution; for debts this is the monthly payment
    #[serde(default)]
    pub monthly_contribution: f64,

    /// Stop scheduled contributions after this many periods from account start
    #[serde(default)]
    pub contribution_stop_after_periods: Option<u32>,

    #[serde(default)]
    pub is_debt: bool,

    #[serde(default)]
    pub wrapper: TaxWrapper,

    /// Explicit asset-class assignment; inferred from the name when absent
    #[serde(default)]
    pub asset_class: Option<AssetClass>,

    /// Lower number funds first among priority savings goals
    #[serde(default)]
    pub savings_goal_priority: Option<u32>,

    #[serde(default)]
    pub savings_goal_target: Option<f64>,

    #[serde(default)]
    pub savings_goal_kind: Option<SavingsGoalKind>,
}

impl Account {
    /// Per-period rate derived so that twelve compounded periods reproduce
    /// the annual rate exactly: `(1 + r)^(1/12) - 1`.
    pub fn rate_per_period(&self) -> f64 {
        rate_per_period(self.annual_rate)
    }

    /// ISA status is metadata-first; the name fallback covers legacy inputs
    /// that never set a wrapper.
    pub fn is_isa(&self) -> bool {
        match self.wrapper {
            TaxWrapper::Isa => true,
            TaxWrapper::None => self.name.to_lowercase().contains("isa"),
            _ => false,
        }
    }

    /// Resolve the asset class: explicit metadata first, then wrapper, then
    /// name heuristics, then a cash default.
    pub fn classify(&self) -> AssetClass {
        if let Some(class) = self.asset_class {
            return class;
        }
        if self.wrapper == TaxWrapper::Pension {
            return AssetClass::Pension;
        }
        if self.wrapper == TaxWrapper::Gia {
            return AssetClass::GeneralInvestment;
        }
        classify_name(&self.name)
    }
}

/// Geometric per-period rate for 12 periods per year
pub fn rate_per_period(annual_rate: f64) -> f64 {
    (1.0 + annual_rate).powf(1.0 / 12.0) - 1.0
}

/// Name-based asset-class inference for accounts without explicit metadata
pub fn classify_name(name: &str) -> AssetClass {
    let lower = name.to_lowercase();
    if lower.contains("pension") || lower.contains("sipp") {
        AssetClass::Pension
    } else if lower.contains("current") || lower.contains("checking") {
        AssetClass::CurrentAccount
    } else if lower.contains("hysa")
        || lower.contains("high yield")
        || lower.contains("high-yield")
        || lower.contains("emergency")
    {
        AssetClass::Hysa
    } else if lower.contains("equit") || lower.contains("stock") || lower.contains("share") {
        AssetClass::Equities
    } else if lower.contains("gia") || lower.contains("investment") || lower.contains("isa") {
        AssetClass::GeneralInvestment
    } else if lower.contains("business") {
        AssetClass::BusinessEquity
    } else if lower.contains("saving") || lower.contains("cash") {
        AssetClass::DefaultSavings
    } else {
        AssetClass::OtherAssets
    }
}
