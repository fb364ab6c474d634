//! Per-account evolution: compound growth, scheduled flows, allocator
//! adjustments, and the closed-form loan duration

use crate::error::SimError;
use crate::model::{rate_per_period, Account, AssetClass, SavingsGoalKind, TaxWrapper};

/// Outcome of advancing one account by one period
#[derive(Debug, Clone, Copy)]
pub struct StepOutcome {
    pub new_balance: f64,
    /// Growth portion of the change; negative for accruing debts
    pub interest: f64,
}

/// Runtime state of one account during a projection run.
///
/// Built from a baseline [`Account`] or synthesized by modifier expansion
/// with a later `start_period`. Mutated only by the simulation driver.
#[derive(Debug, Clone)]
pub struct AccountState {
    pub name: String,

    pub balance: f64,

    /// Base annual rate from the input; rate changes override per period
    pub annual_rate: f64,

    /// Effective per-period rate currently in force
    pub rate_per_period: f64,

    pub monthly_contribution: f64,

    pub contribution_stop_after_periods: Option<u32>,

    pub is_debt: bool,

    pub wrapper: TaxWrapper,

    pub asset_class: AssetClass,

    /// First period this account exists; 0 for baseline accounts
    pub start_period: u32,

    pub savings_goal_priority: Option<u32>,

    pub savings_goal_target: Option<f64>,

    pub savings_goal_kind: Option<SavingsGoalKind>,

    /// Scenario group a synthetic account belongs to, for impact reporting
    pub source_scenario_id: Option<String>,
}

impl AccountState {
    /// Build runtime state from a baseline account
    pub fn from_account(account: &Account) -> Self {
        Self {
            name: account.name.clone(),
            balance: account.balance,
            annual_rate: account.annual_rate,
            rate_per_period: account.rate_per_period(),
            monthly_contribution: account.monthly_contribution,
            contribution_stop_after_periods: account.contribution_stop_after_periods,
            is_debt: account.is_debt,
            wrapper: account.wrapper,
            asset_class: account.classify(),
            start_period: 0,
            savings_goal_priority: account.savings_goal_priority,
            savings_goal_target: account.savings_goal_target,
            savings_goal_kind: account.savings_goal_kind,
            source_scenario_id: None,
        }
    }

    /// A zero-balance cash-like account injected by bootstrapping
    pub fn injected(name: &str, asset_class: AssetClass, annual_rate: f64) -> Self {
        Self {
            name: name.to_string(),
            balance: 0.0,
            annual_rate,
            rate_per_period: rate_per_period(annual_rate),
            monthly_contribution: 0.0,
            contribution_stop_after_periods: None,
            is_debt: false,
            wrapper: TaxWrapper::None,
            asset_class,
            start_period: 0,
            savings_goal_priority: None,
            savings_goal_target: None,
            savings_goal_kind: None,
            source_scenario_id: None,
        }
    }

    /// Whether this account exists at a period
    pub fn active(&self, period: u32) -> bool {
        period >= self.start_period
    }

    /// A debt that has reached zero is terminal
    pub fn is_paid_off(&self) -> bool {
        self.is_debt && self.balance >= 0.0
    }

    pub fn is_isa(&self) -> bool {
        match self.wrapper {
            TaxWrapper::Isa => true,
            TaxWrapper::None => self.name.to_lowercase().contains("isa"),
            _ => false,
        }
    }

    /// Scheduled contribution in force at a period, honoring the start
    /// period and the contribution stop
    pub fn scheduled_contribution(&self, period: u32) -> f64 {
        if !self.active(period) || self.is_paid_off() {
            return 0.0;
        }
        if let Some(stop) = self.contribution_stop_after_periods {
            if period - self.start_period >= stop {
                return 0.0;
            }
        }
        self.monthly_contribution
    }

    /// Balance after this period's growth, before any flows. Used to cap
    /// debt payments so they never overshoot past zero.
    pub fn after_growth(&self) -> f64 {
        self.balance * (1.0 + self.rate_per_period)
    }

    /// Advance one period: grow, apply the scheduled flow, apply the
    /// allocator adjustment, clamp debts at zero.
    ///
    /// For debts the scheduled flow is a payment (positive reduces the
    /// magnitude of the negative balance). Assets are never clamped; a
    /// negative asset balance is an implicit overdraft.
    pub fn step(&mut self, scheduled: f64, adjustment: f64) -> StepOutcome {
        if self.is_debt && self.balance >= 0.0 {
            self.balance = 0.0;
            return StepOutcome {
                new_balance: 0.0,
                interest: 0.0,
            };
        }

        let after_growth = self.after_growth();
        let interest = after_growth - self.balance;
        let mut new_balance = after_growth + scheduled + adjustment;

        if self.is_debt && new_balance >= 0.0 {
            new_balance = 0.0;
        }

        self.balance = new_balance;
        StepOutcome {
            new_balance,
            interest,
        }
    }
}

/// Number of periods to amortize a debt with the given per-period rate and
/// payment, by the closed form
/// `N = ceil(-ln(1 + balance * r / payment) / ln(1 + r))`
/// (balance is stored negative, so the argument shrinks toward zero as the
/// payment gets tighter).
///
/// Returns `None` for a zero payment (the debt is repaid externally, or
/// never), and `PaymentTooSmall` when the payment cannot outpace interest.
pub fn loan_duration_periods(
    balance: f64,
    rate_per_period: f64,
    payment: f64,
) -> Result<Option<u32>, SimError> {
    if balance >= 0.0 {
        return Ok(Some(0));
    }
    if payment == 0.0 {
        return Ok(None);
    }
    if payment < 0.0 {
        return Err(SimError::invalid("payment", "must not be negative"));
    }

    if rate_per_period == 0.0 {
        return Ok(Some((-balance / payment).ceil() as u32));
    }

    let arg = 1.0 + balance * rate_per_period / payment;
    if arg <= 0.0 {
        return Err(SimError::PaymentTooSmall {
            principal: -balance,
            payment,
        });
    }
    let n = -arg.ln() / (1.0 + rate_per_period).ln();
    Ok(Some(n.ceil() as u32))
}
