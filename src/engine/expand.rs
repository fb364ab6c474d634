//! Modifier expansion
//!
//! Turns the scenario modifier list into the raw material the period loop
//! consumes: a sparse per-period cash-flow map, synthetic accounts with a
//! start period, rate overrides, an allocation-config timeline, and the
//! scenario-wide effects (quitting a job, selling a business).

use crate::engine::account_state::AccountState;
use crate::error::{Diagnostic, DiagnosticKind, SimError};
use crate::model::{
    classify_name, rate_per_period, AmountInterpretation, AssetClass, CashFlowBehavior,
    ConfigArchetype, IncomeType, ScenarioModifier, SimClock, StudentLoanPlan, SurplusAllocation,
    TargetedArchetype, TargetedModifier, TaxWrapper,
};
use log::warn;
use std::collections::BTreeMap;

/// How a cash-flow entry is treated by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// Joins gross income and is taxed (employment or business per the
    /// income type)
    Income,
    /// Reduces cash flow; business-typed expenses are business costs
    Expense,
    /// Proceeds of withdrawing from an owned account; added after tax
    WithdrawalProceeds,
}

/// One signed cash flow at one period, attributed to a modifier
#[derive(Debug, Clone)]
pub struct FlowEntry {
    pub modifier_id: String,
    pub scenario_id: String,
    pub kind: FlowKind,
    pub income_type: Option<IncomeType>,
    pub amount: f64,
    /// Period the originating stream started; used for business-sale
    /// termination
    pub stream_start: u32,
}

/// An interest-rate change on a matched account
#[derive(Debug, Clone)]
pub struct RateOverride {
    pub start_period: u32,
    pub pattern: String,
    pub annual_rate: f64,
    /// Rebalancing changes add to the existing rate; refinance-style
    /// changes replace it
    pub additive: bool,
}

/// An allocation-config change taking effect at a period
#[derive(Debug, Clone)]
pub struct AllocationChange {
    pub start_period: u32,
    pub percentages: BTreeMap<AssetClass, f64>,
    pub surplus: Option<SurplusAllocation>,
}

/// A one-off payment against a matched debt
#[derive(Debug, Clone)]
pub struct DebtPayment {
    pub period: u32,
    pub pattern: Option<String>,
    pub amount: f64,
    pub scenario_id: String,
}

/// A recurring overpayment against a matched account, paid from surplus
#[derive(Debug, Clone)]
pub struct DebtOverpayment {
    pub start_period: u32,
    /// Exclusive; `None` runs to the horizon
    pub end_period: Option<u32>,
    pub pattern: String,
    pub monthly_amount: f64,
    pub scenario_id: String,
}

/// A balance move from a matched source into a synthetic account
#[derive(Debug, Clone)]
pub struct Transfer {
    pub period: u32,
    pub source_pattern: Option<String>,
    pub source_class: Option<AssetClass>,
    pub amount: f64,
    pub scenario_id: String,
}

/// The balance-reduction side of an account withdrawal
#[derive(Debug, Clone)]
pub struct AccountWithdrawal {
    pub start_period: u32,
    /// Exclusive; `None` means a single period
    pub end_period: Option<u32>,
    pub source_pattern: Option<String>,
    pub source_class: Option<AssetClass>,
    pub monthly_amount: f64,
    pub scenario_id: String,
}

/// A pension withdrawal request routed through the pension state
#[derive(Debug, Clone)]
pub struct PensionRequest {
    pub start_period: u32,
    pub gross_amount: f64,
    pub is_recurring: bool,
    pub scenario_id: String,
    pub modifier_id: String,
}

/// A student loan whose payment is recomputed from salary each period
#[derive(Debug, Clone)]
pub struct StudentLoanSpec {
    pub account_name: String,
    pub plan: StudentLoanPlan,
    pub graduation_period: u32,
    pub write_off_period: u32,
}

/// Everything the period loop needs from the modifier list
#[derive(Debug, Clone, Default)]
pub struct ExpandedModifiers {
    pub flows: BTreeMap<u32, Vec<FlowEntry>>,
    pub synthetic_accounts: Vec<AccountState>,
    pub rate_overrides: Vec<RateOverride>,
    pub allocation_changes: Vec<AllocationChange>,
    /// (period, gross monthly salary) overrides, sorted by period
    pub salary_overrides: Vec<(u32, f64)>,
    pub quit_job_period: Option<u32>,
    pub sale_periods: Vec<u32>,
    pub debt_payments: Vec<DebtPayment>,
    pub debt_overpayments: Vec<DebtOverpayment>,
    pub transfers: Vec<Transfer>,
    pub withdrawals: Vec<AccountWithdrawal>,
    pub pension_requests: Vec<PensionRequest>,
    pub student_loans: Vec<StudentLoanSpec>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ExpandedModifiers {
    fn add_flow(&mut self, period: u32, entry: FlowEntry) {
        self.flows.entry(period).or_default().push(entry);
    }
}

/// Validate the modifier list; fatal problems abort before any run
pub fn validate_modifiers(modifiers: &[ScenarioModifier]) -> Result<(), SimError> {
    for modifier in modifiers {
        if let ScenarioModifier::Targeted(t) = modifier {
            if t.archetype.requires_target_date() && t.target_date.is_none() {
                return Err(SimError::invalid(
                    "target_date",
                    format!("modifier {} ({:?}) has no target date", t.id, t.archetype),
                ));
            }
            if t.target_amount < 0.0 {
                return Err(SimError::invalid(
                    "target_amount",
                    format!("modifier {} has a negative target amount", t.id),
                ));
            }
            if let Some(performance) = t.performance {
                if performance <= -1.0 {
                    return Err(SimError::invalid(
                        "performance",
                        format!("modifier {} has a rate at or below -100%", t.id),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Expand the modifier list against a fixed clock
pub fn expand_modifiers(
    modifiers: &[ScenarioModifier],
    clock: &SimClock,
) -> Result<ExpandedModifiers, SimError> {
    validate_modifiers(modifiers)?;
    let mut out = ExpandedModifiers::default();

    for modifier in modifiers {
        let start = clock.period_of(modifier.start_date());
        detect_scenario_effects(modifier, start, &mut out);

        match modifier {
            ScenarioModifier::Targeted(t) => expand_targeted(t, start, clock, &mut out),
            ScenarioModifier::Config(c) => match c.archetype {
                ConfigArchetype::AllocationConfigChange => {
                    out.allocation_changes.push(AllocationChange {
                        start_period: start,
                        percentages: c
                            .automated_allocation_percentages
                            .clone()
                            .unwrap_or_default(),
                        surplus: c.surplus_allocation,
                    });
                    if let Some(salary) = c.salary_override {
                        out.salary_overrides.push((start, salary));
                    }
                }
                ConfigArchetype::InterestRateChange => match (&c.linked_account_name, c.performance)
                {
                    (Some(pattern), Some(rate)) => out.rate_overrides.push(RateOverride {
                        start_period: start,
                        pattern: pattern.clone(),
                        annual_rate: rate,
                        additive: c.rebalancing_enabled(),
                    }),
                    _ => {
                        let message = format!(
                            "rate change {} needs a linked account and a rate, skipping",
                            c.id
                        );
                        warn!("{message}");
                        out.diagnostics.push(Diagnostic::new(
                            DiagnosticKind::AccountNotFound,
                            Some(start),
                            message,
                        ));
                    }
                },
            },
            ScenarioModifier::StudentLoan(sl) => {
                let mut account =
                    AccountState::injected(&sl.display_name, AssetClass::OtherAssets, 0.0);
                account.balance = -sl.principal;
                account.annual_rate = sl.annual_interest_rate;
                account.rate_per_period = rate_per_period(sl.annual_interest_rate);
                account.is_debt = true;
                account.start_period = start;
                account.source_scenario_id = Some(sl.scenario_id.clone());
                out.synthetic_accounts.push(account);
                out.student_loans.push(StudentLoanSpec {
                    account_name: sl.display_name.clone(),
                    plan: sl.plan,
                    graduation_period: clock.period_of(sl.graduation_date),
                    write_off_period: clock.period_of(sl.write_off_date),
                });
            }
        }
    }

    out.allocation_changes.sort_by_key(|c| c.start_period);
    out.salary_overrides.sort_by_key(|s| s.0);
    out.rate_overrides.sort_by_key(|r| r.start_period);
    terminate_sold_business_streams(&mut out);
    Ok(out)
}

/// Quit-job and sell-business behavior is keyed off the scenario group
fn detect_scenario_effects(modifier: &ScenarioModifier, start: u32, out: &mut ExpandedModifiers) {
    let tag = modifier.scenario_id().to_lowercase();
    if tag.contains("quit_job") || tag.contains("quit-job") || tag.contains("quit job") {
        out.quit_job_period = Some(match out.quit_job_period {
            Some(existing) => existing.min(start),
            None => start,
        });
    }
    if tag.contains("sell_business") || tag.contains("sell-business") || tag.contains("sell business")
    {
        if !out.sale_periods.contains(&start) {
            out.sale_periods.push(start);
        }
    }
}

fn expand_targeted(t: &TargetedModifier, start: u32, clock: &SimClock, out: &mut ExpandedModifiers) {
    if let Some(request) = &t.pension_withdrawal_request {
        out.pension_requests.push(PensionRequest {
            start_period: start,
            gross_amount: request.gross_amount,
            is_recurring: request.is_recurring,
            scenario_id: t.scenario_id.clone(),
            modifier_id: t.id.clone(),
        });
    }

    let target = t.target_date.map(|d| clock.period_of(d));
    let duration = t
        .duration_months()
        .or_else(|| target.map(|tp| tp.saturating_sub(start)))
        .filter(|d| *d > 0);

    let flow = |kind: FlowKind, amount: f64| FlowEntry {
        modifier_id: t.id.clone(),
        scenario_id: t.scenario_id.clone(),
        kind,
        income_type: t.income_type,
        amount,
        stream_start: start,
    };

    match t.archetype {
        TargetedArchetype::OneOffInflow => {
            out.add_flow(target.unwrap(), flow(FlowKind::Income, t.target_amount));
        }

        TargetedArchetype::OneOffExpense => match t.cash_flow_behavior {
            Some(CashFlowBehavior::SinkingExpense) => {
                let end = target.unwrap();
                let months = end.saturating_sub(start).max(1);
                let monthly = t.target_amount / months as f64;
                for period in start..start.max(end) {
                    out.add_flow(period, flow(FlowKind::Expense, -monthly));
                }
                if end <= start {
                    out.add_flow(end, flow(FlowKind::Expense, -t.target_amount));
                }
            }
            _ => {
                out.add_flow(target.unwrap(), flow(FlowKind::Expense, -t.target_amount));
            }
        },

        TargetedArchetype::OneOffAccountContribution => {
            let period = target.unwrap();
            if t.is_transfer() {
                // Balance move: no cash flow, source drops, a synthetic
                // account opens at the transferred amount
                out.transfers.push(Transfer {
                    period,
                    source_pattern: t.linked_account_name.clone(),
                    source_class: t.source_asset_class,
                    amount: t.target_amount,
                    scenario_id: t.scenario_id.clone(),
                });
                out.synthetic_accounts
                    .push(synthetic_asset(t, period, t.target_amount));
            } else if t.linked_account_name.is_some()
                && t.cash_flow_behavior != Some(CashFlowBehavior::Asset)
            {
                // One-off payment against an existing (debt) account
                out.add_flow(period, flow(FlowKind::Expense, -t.target_amount));
                out.debt_payments.push(DebtPayment {
                    period,
                    pattern: t.linked_account_name.clone(),
                    amount: t.target_amount,
                    scenario_id: t.scenario_id.clone(),
                });
            } else {
                out.add_flow(period, flow(FlowKind::Expense, -t.target_amount));
                out.synthetic_accounts
                    .push(synthetic_asset(t, period, t.target_amount));
            }
        }

        TargetedArchetype::RecurringAccountContribution => {
            let months = duration.unwrap_or(0);
            let monthly = t.monthly_contribution.unwrap_or_else(|| {
                if months > 0 {
                    t.target_amount / months as f64
                } else {
                    0.0
                }
            });
            if let Some(pattern) = &t.linked_account_name {
                // Directed at an existing account: treated as an
                // overpayment stream funded from surplus
                out.debt_overpayments.push(DebtOverpayment {
                    start_period: start,
                    end_period: duration.map(|d| start + d),
                    pattern: pattern.clone(),
                    monthly_amount: monthly,
                    scenario_id: t.scenario_id.clone(),
                });
            } else {
                let mut account = synthetic_asset(t, start, t.starting_amount.unwrap_or(0.0));
                account.monthly_contribution = monthly;
                account.contribution_stop_after_periods =
                    t.contribution_stop_after_periods.or(duration);
                out.synthetic_accounts.push(account);
            }
        }

        TargetedArchetype::OneOffAccountWithdrawal => {
            let period = target.unwrap();
            out.add_flow(period, flow(FlowKind::WithdrawalProceeds, t.target_amount));
            out.withdrawals.push(AccountWithdrawal {
                start_period: period,
                end_period: None,
                source_pattern: t.linked_account_name.clone(),
                source_class: t.source_asset_class,
                monthly_amount: t.target_amount,
                scenario_id: t.scenario_id.clone(),
            });
        }

        TargetedArchetype::RecurringAccountWithdrawal => {
            let monthly = monthly_amount(t, duration);
            let end = duration.map(|d| start + d).unwrap_or(clock.periods);
            for period in start..end.min(clock.periods) {
                out.add_flow(period, flow(FlowKind::WithdrawalProceeds, monthly));
            }
            out.withdrawals.push(AccountWithdrawal {
                start_period: start,
                end_period: Some(end),
                source_pattern: t.linked_account_name.clone(),
                source_class: t.source_asset_class,
                monthly_amount: monthly,
                scenario_id: t.scenario_id.clone(),
            });
        }

        TargetedArchetype::RecurringExpense => {
            let monthly = monthly_amount(t, duration);
            let end = duration.map(|d| start + d).unwrap_or(clock.periods);
            for period in start..end.min(clock.periods) {
                out.add_flow(period, flow(FlowKind::Expense, -monthly));
            }
        }

        TargetedArchetype::RecurringIncome => {
            let monthly = monthly_amount(t, duration);
            let end = duration.map(|d| start + d).unwrap_or(clock.periods);

            // A negative starting amount is a one-off setup cost
            if let Some(setup) = t.starting_amount.filter(|s| *s < 0.0) {
                let setup_period = t
                    .setup_date()
                    .map(|d| clock.period_of(d))
                    .or(target)
                    .unwrap_or(start);
                out.add_flow(setup_period, flow(FlowKind::Expense, setup));
            }

            let uplift = t.annual_percentage.unwrap_or(0.0);
            for period in start..end.min(clock.periods) {
                let years_in = (period - start) / 12;
                let amount = monthly * (1.0 + uplift).powi(years_in as i32);
                out.add_flow(period, flow(FlowKind::Income, amount));
            }
        }

        TargetedArchetype::NewDebt => {
            let mut account =
                AccountState::injected(&t.display_name, classify_name(&t.display_name), 0.0);
            account.balance = -t.target_amount;
            account.annual_rate = t.performance.unwrap_or(0.0);
            account.rate_per_period = rate_per_period(account.annual_rate);
            account.is_debt = true;
            account.monthly_contribution = t.monthly_contribution.unwrap_or(0.0);
            account.contribution_stop_after_periods = t.contribution_stop_after_periods;
            account.start_period = start;
            account.source_scenario_id = Some(t.scenario_id.clone());
            out.synthetic_accounts.push(account);
        }
    }
}

/// Monthly amount of a recurring stream under the amount interpretation
fn monthly_amount(t: &TargetedModifier, duration: Option<u32>) -> f64 {
    if let Some(monthly) = t.monthly_contribution {
        return monthly;
    }
    match t.amount_interpretation {
        Some(AmountInterpretation::Total) => match duration {
            Some(months) if months > 0 => t.target_amount / months as f64,
            _ => t.target_amount,
        },
        _ => t.target_amount,
    }
}

/// Build a synthetic asset account for a targeted modifier
fn synthetic_asset(t: &TargetedModifier, start_period: u32, balance: f64) -> AccountState {
    let class = if t.cash_flow_behavior == Some(CashFlowBehavior::SavingsGoal)
        || t.savings_goal_target.is_some()
    {
        AssetClass::Hysa
    } else {
        match classify_name(&t.display_name) {
            AssetClass::OtherAssets | AssetClass::DefaultSavings => AssetClass::GeneralInvestment,
            class => class,
        }
    };

    let mut account = AccountState::injected(&t.display_name, class, 0.0);
    account.balance = balance;
    account.annual_rate = t.performance.unwrap_or(0.0);
    account.rate_per_period = rate_per_period(account.annual_rate);
    account.start_period = start_period;
    account.savings_goal_priority = t.savings_goal_priority;
    account.savings_goal_target = t.savings_goal_target;
    account.savings_goal_kind = t.savings_goal_kind;
    account.source_scenario_id = Some(t.scenario_id.clone());
    if account.name.to_lowercase().contains("isa") {
        account.wrapper = TaxWrapper::Isa;
    }
    account
}

/// Selling a business ends every business stream that predates the sale;
/// streams starting on or after the sale date belong to a new venture.
fn terminate_sold_business_streams(out: &mut ExpandedModifiers) {
    if out.sale_periods.is_empty() {
        return;
    }
    let sales = out.sale_periods.clone();
    for (period, entries) in out.flows.iter_mut() {
        entries.retain(|entry| {
            if entry.income_type != Some(IncomeType::Business) {
                return true;
            }
            !sales
                .iter()
                .any(|&sale| entry.stream_start < sale && *period >= sale)
        });
    }
    out.flows.retain(|_, entries| !entries.is_empty());
}

/// Resolve an account-name pattern against the account list.
///
/// Lowercased exact match first, then a unique substring match, then the
/// first of several substring matches (with a warning). Debt-scoped
/// lookups fall back to the first debt account.
pub fn match_account(
    accounts: &[AccountState],
    pattern: &str,
    debt_only: bool,
    period: Option<u32>,
) -> (Option<usize>, Option<Diagnostic>) {
    let needle = pattern.trim().to_lowercase();

    for (index, account) in accounts.iter().enumerate() {
        if account.name.to_lowercase() == needle {
            return (Some(index), None);
        }
    }

    let substring_matches: Vec<usize> = accounts
        .iter()
        .enumerate()
        .filter(|(_, a)| a.name.to_lowercase().contains(&needle))
        .map(|(i, _)| i)
        .collect();

    match substring_matches.len() {
        1 => (Some(substring_matches[0]), None),
        0 => {
            if debt_only {
                if let Some(index) = accounts.iter().position(|a| a.is_debt) {
                    return (Some(index), None);
                }
            }
            let message = format!("no account matches \"{pattern}\"");
            warn!("{message}");
            (
                None,
                Some(Diagnostic::new(
                    DiagnosticKind::AccountNotFound,
                    period,
                    message,
                )),
            )
        }
        n => {
            let chosen = substring_matches[0];
            let message = format!(
                "\"{pattern}\" matches {n} accounts, using \"{}\"",
                accounts[chosen].name
            );
            warn!("{message}");
            (
                Some(chosen),
                Some(Diagnostic::new(
                    DiagnosticKind::AmbiguousAccountMatch,
                    period,
                    message,
                )),
            )
        }
    }
}
