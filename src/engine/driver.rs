//! Simulation driver: the per-period loop
//!
//! One engine invocation produces two projections: the baseline run uses
//! the baseline accounts and allocation config with no modifiers; the
//! scenario run layers the expanded modifiers on top. The two runs share
//! nothing mutable: each gets a fresh allocator, account list, ISA tracker,
//! and pension state, so baseline results are invariant to the modifier
//! list by construction.

use crate::engine::account_state::AccountState;
use crate::engine::allocator::{Allocator, IsaTracker, RetirementContext};
use crate::engine::expand::{
    expand_modifiers, match_account, ExpandedModifiers, FlowEntry, FlowKind,
};
use crate::engine::projection::{
    CategoryBalance, PeriodBreakdown, ProjectionPoint, ProjectionResult,
};
use crate::error::{Diagnostic, DiagnosticKind, SimError};
use crate::model::{
    AllocationConfig, AssetClass, BaselineProfile, IncomeType, ScenarioModifier, SimClock,
};
use crate::rules::{
    annual_income_tax, corporation_tax, monthly_national_insurance,
    monthly_student_loan_repayment, PensionState, UkTaxConfig,
};
use log::debug;
use std::collections::BTreeMap;

/// Annual rate of the workplace pension injected when a scenario mentions
/// pensions but the baseline has none
const INJECTED_PENSION_GROWTH: f64 = 0.06;
/// Contribution share of gross salary for the injected workplace pension
const INJECTED_PENSION_CONTRIB_SHARE: f64 = 0.08;
/// Annual growth of the injected general investment account
const INJECTED_GIA_GROWTH: f64 = 0.07;
/// Contribution share of gross salary for the injected investment account
const INJECTED_GIA_CONTRIB_SHARE: f64 = 0.05;

/// One projection run's mutable state
struct RunState<'a> {
    baseline: &'a BaselineProfile,
    accounts: Vec<AccountState>,
    allocator: Allocator,
    isa: IsaTracker,
    pension: PensionState,
    expanded: ExpandedModifiers,
    base_config: AllocationConfig,
    /// Allocation changes already merged into the allocator config
    change_cursor: usize,
    /// Student loans as (account index, spec) pairs
    student_loans: Vec<(usize, crate::engine::expand::StudentLoanSpec)>,
    result: ProjectionResult,
}

/// The simulation engine for one clock and rule set
pub struct SimulationEngine<'a> {
    cfg: &'a UkTaxConfig,
    clock: SimClock,
}

impl<'a> SimulationEngine<'a> {
    pub fn new(cfg: &'a UkTaxConfig, clock: SimClock) -> Self {
        Self { cfg, clock }
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Run the baseline projection (no modifiers)
    pub fn run_baseline(&self, baseline: &BaselineProfile) -> Result<ProjectionResult, SimError> {
        self.run(baseline, &[])
    }

    /// Run the scenario projection (baseline plus modifiers)
    pub fn run_scenario(
        &self,
        baseline: &BaselineProfile,
        modifiers: &[ScenarioModifier],
    ) -> Result<ProjectionResult, SimError> {
        self.run(baseline, modifiers)
    }

    fn validate(&self, baseline: &BaselineProfile) -> Result<(), SimError> {
        if self.clock.periods == 0 {
            return Err(SimError::invalid("years", "projection horizon is empty"));
        }
        if baseline.monthly_income < 0.0 {
            return Err(SimError::invalid("monthly_income", "must not be negative"));
        }
        if baseline.monthly_expenses < 0.0 {
            return Err(SimError::invalid("monthly_expenses", "must not be negative"));
        }
        if baseline.current_age < 0.0 || baseline.retirement_age < 0.0 {
            return Err(SimError::invalid("age", "ages must not be negative"));
        }
        for account in &baseline.accounts {
            if account.annual_rate <= -1.0 {
                return Err(SimError::invalid(
                    "annual_rate",
                    format!("account \"{}\" has a rate at or below -100%", account.name),
                ));
            }
            if account.is_debt && account.balance > 0.0 {
                return Err(SimError::invalid(
                    "balance",
                    format!("debt \"{}\" has a positive balance", account.name),
                ));
            }
        }
        Ok(())
    }

    fn run<'b>(
        &self,
        baseline: &'b BaselineProfile,
        modifiers: &[ScenarioModifier],
    ) -> Result<ProjectionResult, SimError> {
        self.validate(baseline)?;
        let expanded = expand_modifiers(modifiers, &self.clock)?;
        let mut state = self.bootstrap(baseline, modifiers, expanded);

        for period in 0..self.clock.periods {
            let point = self.simulate_period(period, &mut state);
            state.result.add_point(point);
        }

        let mut result = state.result;
        result.diagnostics.splice(0..0, state.expanded.diagnostics);
        Ok(result)
    }

    /// Build the account list and per-run state for one projection
    fn bootstrap<'b>(
        &self,
        baseline: &'b BaselineProfile,
        modifiers: &[ScenarioModifier],
        expanded: ExpandedModifiers,
    ) -> RunState<'b> {
        let mut accounts: Vec<AccountState> = baseline
            .accounts
            .iter()
            .map(AccountState::from_account)
            .collect();

        let base_config = baseline.allocation_config.clone().unwrap_or_else(|| {
            AllocationConfig {
                automated_allocation_percentages: self.cfg.default_allocation_percentages.clone(),
                surplus_allocation: None,
            }
        });

        let periods_to_retirement =
            ((baseline.retirement_age - baseline.current_age) * 12.0).max(0.0).round() as u32;

        // Scenario-driven injections: a pension or investment vehicle the
        // scenario talks about but the baseline never opened.
        if !modifiers.is_empty() {
            let mentions: String = modifiers
                .iter()
                .map(|m| m.mention_text())
                .collect::<Vec<_>>()
                .join(" ");

            let mentions_pension = mentions.contains("pension")
                || mentions.contains("retire")
                || !expanded.pension_requests.is_empty();
            let has_pension = accounts
                .iter()
                .any(|a| a.asset_class == AssetClass::Pension);
            if mentions_pension && !has_pension {
                let mut pension = AccountState::injected(
                    "Workplace Pension",
                    AssetClass::Pension,
                    INJECTED_PENSION_GROWTH,
                );
                pension.monthly_contribution =
                    baseline.monthly_income * INJECTED_PENSION_CONTRIB_SHARE;
                pension.contribution_stop_after_periods = Some(periods_to_retirement);
                accounts.push(pension);
            }

            let mentions_investment = mentions.contains("invest")
                || mentions.contains("isa")
                || mentions.contains("equit");
            let has_investment = accounts.iter().any(|a| {
                matches!(
                    a.asset_class,
                    AssetClass::GeneralInvestment | AssetClass::Equities
                )
            });
            if mentions_investment && !has_investment {
                let mut gia = AccountState::injected(
                    "General Investment Account",
                    AssetClass::GeneralInvestment,
                    INJECTED_GIA_GROWTH,
                );
                gia.monthly_contribution = baseline.monthly_income * INJECTED_GIA_CONTRIB_SHARE;
                accounts.push(gia);
            }
        }

        // Every class the allocation config routes to needs at least one
        // account to receive the money.
        let mut referenced: Vec<AssetClass> = base_config
            .automated_allocation_percentages
            .iter()
            .filter(|(_, pct)| **pct > 0.0)
            .map(|(class, _)| *class)
            .collect();
        if let Some(surplus) = base_config.surplus_allocation {
            referenced.push(surplus.asset_class);
        }
        for change in &expanded.allocation_changes {
            referenced.extend(
                change
                    .percentages
                    .iter()
                    .filter(|(_, pct)| **pct > 0.0)
                    .map(|(class, _)| *class),
            );
            if let Some(surplus) = change.surplus {
                referenced.push(surplus.asset_class);
            }
        }
        for class in referenced {
            let covered = accounts
                .iter()
                .any(|a| !a.is_debt && a.asset_class == class)
                || expanded
                    .synthetic_accounts
                    .iter()
                    .any(|a| !a.is_debt && a.asset_class == class);
            if !covered {
                accounts.push(AccountState::injected(
                    class.default_account_name(),
                    class,
                    0.0,
                ));
            }
        }

        // There is always a zero-interest cash account to land surplus in.
        if !accounts
            .iter()
            .any(|a| !a.is_debt && a.asset_class == AssetClass::DefaultSavings)
        {
            accounts.push(AccountState::injected(
                "Cash Savings",
                AssetClass::DefaultSavings,
                0.0,
            ));
        }

        accounts.extend(expanded.synthetic_accounts.iter().cloned());

        let student_loans = expanded
            .student_loans
            .iter()
            .filter_map(|spec| {
                accounts
                    .iter()
                    .position(|a| a.name == spec.account_name)
                    .map(|index| (index, spec.clone()))
            })
            .collect();

        let allocator = Allocator::new(base_config.clone(), self.cfg);
        let isa = IsaTracker::new(self.clock.tax_year_of(0));

        RunState {
            baseline,
            accounts,
            allocator,
            isa,
            pension: PensionState::new(),
            expanded,
            base_config,
            change_cursor: 0,
            student_loans,
            result: ProjectionResult::new(),
        }
    }

    /// Merge every allocation change up to the cursor into a fresh config:
    /// percentages sum per class, the latest surplus target wins.
    fn merged_config(&self, state: &RunState) -> AllocationConfig {
        let mut config = state.base_config.clone();
        for change in &state.expanded.allocation_changes[..state.change_cursor] {
            for (class, pct) in &change.percentages {
                *config
                    .automated_allocation_percentages
                    .entry(*class)
                    .or_insert(0.0) += pct;
            }
            if change.surplus.is_some() {
                config.surplus_allocation = change.surplus;
            }
        }
        config
    }

    fn simulate_period(&self, period: u32, state: &mut RunState) -> ProjectionPoint {
        let cfg = self.cfg;
        let clock = &self.clock;
        let (calendar_year, _) = clock.date_of(period);

        // Tax-year rollover: ISA allowance, CGT exemption, MPAA counter
        let tax_year = clock.tax_year_of(period);
        if tax_year != state.isa.tax_year {
            state.isa.roll_to(tax_year);
            state.allocator.begin_tax_year(cfg);
        }
        state.pension.begin_period();

        // Allocation-config changes taking effect this period
        let mut config_changed = false;
        while state.change_cursor < state.expanded.allocation_changes.len()
            && state.expanded.allocation_changes[state.change_cursor].start_period <= period
        {
            state.change_cursor += 1;
            config_changed = true;
        }
        if config_changed {
            let merged = self.merged_config(state);
            debug!("period {period}: allocation config change applied");
            state.allocator.set_config(merged);
        }

        // Interest-rate overrides: most recent matching change wins
        self.apply_rate_overrides(period, state);

        let age = state.baseline.current_age + period as f64 / 12.0;
        let retired = age >= state.baseline.retirement_age;
        let quit = state
            .expanded
            .quit_job_period
            .map(|q| period >= q)
            .unwrap_or(false);

        // Salary: overrides apply in order, quitting or retiring zeroes it
        let mut salary = state.baseline.monthly_income;
        for (start, override_salary) in &state.expanded.salary_overrides {
            if *start <= period {
                salary = *override_salary;
            }
        }
        if quit || retired {
            salary = 0.0;
        }

        // Modifier cash flows for this period
        let entries: Vec<FlowEntry> = state
            .expanded
            .flows
            .get(&period)
            .cloned()
            .unwrap_or_default();
        let mut scenario_employment = 0.0;
        let mut withdrawal_proceeds = 0.0;
        let mut business_revenue = 0.0;
        let mut business_costs = 0.0;
        let mut scenario_expenses = 0.0;
        let mut impacts: BTreeMap<String, f64> = BTreeMap::new();
        let mut business_profit_by_scenario: BTreeMap<String, f64> = BTreeMap::new();
        for entry in &entries {
            *impacts.entry(entry.scenario_id.clone()).or_insert(0.0) += entry.amount;
            match (entry.kind, entry.income_type) {
                (FlowKind::Income, Some(IncomeType::Business)) => {
                    business_revenue += entry.amount;
                    *business_profit_by_scenario
                        .entry(entry.scenario_id.clone())
                        .or_insert(0.0) += entry.amount;
                }
                (FlowKind::Income, _) => scenario_employment += entry.amount,
                (FlowKind::Expense, Some(IncomeType::Business)) => {
                    business_costs += -entry.amount;
                    *business_profit_by_scenario
                        .entry(entry.scenario_id.clone())
                        .or_insert(0.0) += entry.amount;
                }
                (FlowKind::Expense, _) => scenario_expenses += -entry.amount,
                (FlowKind::WithdrawalProceeds, _) => withdrawal_proceeds += entry.amount,
            }
        }

        // State pension switches on at state pension age
        let state_pension = if age >= cfg.state_pension_age {
            state.baseline.state_pension_monthly.unwrap_or(0.0)
        } else {
            0.0
        };

        // Requested pension withdrawals (scenario-driven income)
        let employment_recurring = salary + state_pension + scenario_employment;
        let mut pre_adjustments = vec![0.0; state.accounts.len()];
        let mut requested_pension_gross = 0.0;
        let mut requested_pension_tax = 0.0;
        let requests = state.expanded.pension_requests.clone();
        for request in &requests {
            let active = period == request.start_period
                || (request.is_recurring && period > request.start_period);
            if !active {
                continue;
            }
            if age < cfg.pension_access_age_in(calendar_year) {
                if period == request.start_period {
                    let message = format!(
                        "pension withdrawal for {} requested at age {age:.1}, before access age",
                        request.modifier_id
                    );
                    state.result.diagnostics.push(Diagnostic::new(
                        DiagnosticKind::PensionAgeRestricted,
                        Some(period),
                        message,
                    ));
                }
                continue;
            }
            let members: Vec<usize> = state
                .accounts
                .iter()
                .enumerate()
                .filter(|(_, a)| {
                    a.active(period)
                        && !a.is_debt
                        && a.asset_class == AssetClass::Pension
                        && a.balance > 0.0
                })
                .map(|(i, _)| i)
                .collect();
            let pot: f64 = members.iter().map(|&i| state.accounts[i].balance).sum();
            if pot <= 0.0 {
                continue;
            }
            let wd = state.pension.withdraw_gross(
                request.gross_amount,
                pot,
                employment_recurring * 12.0,
                request.is_recurring,
                cfg,
            );
            for &index in &members {
                let share = state.accounts[index].balance / pot;
                pre_adjustments[index] -= wd.gross * share;
            }
            requested_pension_gross += wd.gross;
            requested_pension_tax += wd.tax;
            *impacts.entry(request.scenario_id.clone()).or_insert(0.0) += wd.net;
        }

        // Taxes on stable annualized aggregates
        let income_tax = annual_income_tax(cfg, employment_recurring * 12.0) / 12.0
            + requested_pension_tax;
        let ni = monthly_national_insurance(cfg, salary);
        let business_profit = business_revenue - business_costs;
        let corp_tax = corporation_tax(cfg, business_profit * 12.0) / 12.0;

        // Business costs are carried inside expenses, so income here is the
        // full revenue line less corporation tax
        let employment_net = employment_recurring + requested_pension_gross - income_tax - ni;
        let net_income = employment_net + business_revenue - corp_tax + withdrawal_proceeds;
        let expenses = state.baseline.monthly_expenses + scenario_expenses + business_costs;

        // Student loans: income-contingent payment set from this period's
        // salary; balance written off at the write-off date
        for (index, spec) in &state.student_loans {
            let account = &mut state.accounts[*index];
            if period >= spec.write_off_period {
                account.balance = 0.0;
                account.monthly_contribution = 0.0;
            } else if period >= spec.graduation_period && account.balance < 0.0 {
                account.monthly_contribution =
                    monthly_student_loan_repayment(cfg, spec.plan, salary);
            } else {
                account.monthly_contribution = 0.0;
            }
        }

        // Scheduled contributions: debts capped at their grown balance,
        // asset contributions scaled down to what income leaves room for,
        // ISA contributions pre-capped against the shared tracker.
        let mut scheduled = vec![0.0; state.accounts.len()];
        let mut asset_scheduled_total = 0.0;
        let mut debt_scheduled_total = 0.0;
        for (index, account) in state.accounts.iter().enumerate() {
            let mut amount = account.scheduled_contribution(period);
            if quit && account.name.to_lowercase().contains("workplace pension") {
                amount = 0.0;
            }
            if account.is_debt {
                amount = amount.min(-account.after_growth()).max(0.0);
                debt_scheduled_total += amount;
            } else {
                asset_scheduled_total += amount;
            }
            scheduled[index] = amount;
        }

        let room_for_assets = net_income - expenses - debt_scheduled_total;
        if asset_scheduled_total > room_for_assets && asset_scheduled_total > 0.0 {
            let scale = (room_for_assets.max(0.0)) / asset_scheduled_total;
            for (index, account) in state.accounts.iter().enumerate() {
                if !account.is_debt {
                    scheduled[index] *= scale;
                }
            }
        }

        for (index, account) in state.accounts.iter().enumerate() {
            if !account.is_debt && account.is_isa() && scheduled[index] > 0.0 {
                let capped = scheduled[index].min(state.isa.remaining(cfg));
                state.isa.record(capped);
                scheduled[index] = capped;
            }
        }
        let scheduled_total: f64 = scheduled.iter().sum();
        let student_loan_repayment: f64 = state
            .student_loans
            .iter()
            .map(|(index, _)| scheduled[*index])
            .sum();

        // The allocator routes what is left
        let net_cash_flow = net_income - expenses - scheduled_total;
        let ctx = RetirementContext {
            is_retired: retired,
            age,
            calendar_year,
            annual_employment_income: employment_recurring * 12.0,
        };
        let mut outcome = {
            let RunState {
                allocator,
                accounts,
                isa,
                pension,
                ..
            } = state;
            allocator.allocate(net_cash_flow, accounts, period, isa, pension, &ctx, cfg)
        };
        state.result.diagnostics.extend(outcome.diagnostics.drain(..));

        // Debt overpayments come out of routed surplus
        let mut surplus_available = outcome.surplus_cash.unwrap_or(0.0);
        let overpayments = state.expanded.debt_overpayments.clone();
        for spec in &overpayments {
            if surplus_available <= 0.0 {
                break;
            }
            let in_window = period >= spec.start_period
                && spec.end_period.map(|end| period < end).unwrap_or(true);
            if !in_window {
                continue;
            }
            let (matched, diag) = match_account(&state.accounts, &spec.pattern, true, Some(period));
            if let Some(diag) = diag {
                if period == spec.start_period {
                    state.result.diagnostics.push(diag);
                }
            }
            let Some(index) = matched else { continue };
            let account = &state.accounts[index];
            let remaining_debt = if account.is_debt {
                (-account.after_growth() - scheduled[index]).max(0.0)
            } else {
                f64::INFINITY
            };
            let pay = spec
                .monthly_amount
                .min(surplus_available)
                .min(remaining_debt);
            if pay <= 0.0 {
                continue;
            }
            claw_back_surplus(pay, &state.accounts, &mut outcome);
            pre_adjustments[index] += pay;
            surplus_available -= pay;
        }

        // One-off debt payments: balance moves, the cash side was already
        // an expense flow
        let payments = state.expanded.debt_payments.clone();
        for spec in &payments {
            if spec.period != period {
                continue;
            }
            let matched = match spec.pattern.as_deref() {
                Some(pattern) => {
                    let (matched, diag) =
                        match_account(&state.accounts, pattern, true, Some(period));
                    if let Some(diag) = diag {
                        state.result.diagnostics.push(diag);
                    }
                    matched
                }
                None => state.accounts.iter().position(|a| a.is_debt),
            };
            if let Some(index) = matched {
                let account = &state.accounts[index];
                let cap = if account.is_debt {
                    (-account.after_growth()).max(0.0)
                } else {
                    spec.amount
                };
                pre_adjustments[index] += spec.amount.min(cap);
            }
        }

        // Transfers and the balance side of account withdrawals
        let transfers = state.expanded.transfers.clone();
        for spec in &transfers {
            if spec.period != period {
                continue;
            }
            if let Some(index) = self.resolve_source(
                state,
                spec.source_pattern.as_deref(),
                spec.source_class,
                period,
            ) {
                pre_adjustments[index] -= spec.amount;
            }
        }

        let withdrawals = state.expanded.withdrawals.clone();
        for spec in &withdrawals {
            let active = period >= spec.start_period
                && spec
                    .end_period
                    .map(|end| period < end)
                    .unwrap_or(period == spec.start_period);
            if !active {
                continue;
            }
            match self.resolve_source(
                state,
                spec.source_pattern.as_deref(),
                spec.source_class,
                period,
            ) {
                Some(index) => pre_adjustments[index] -= spec.monthly_amount,
                None => {
                    if period == spec.start_period {
                        state.result.diagnostics.push(Diagnostic::new(
                            DiagnosticKind::AccountNotFound,
                            Some(period),
                            format!(
                                "withdrawal in scenario {} has no source account",
                                spec.scenario_id
                            ),
                        ));
                    }
                }
            }
        }

        // An uncovered deficit lands on cash as an implicit overdraft
        if outcome.deficit > 0.0 {
            let target = state
                .accounts
                .iter()
                .position(|a| !a.is_debt && a.asset_class == AssetClass::CurrentAccount)
                .or_else(|| {
                    state
                        .accounts
                        .iter()
                        .position(|a| !a.is_debt && a.asset_class == AssetClass::DefaultSavings)
                })
                .or(if state.accounts.is_empty() { None } else { Some(0) });
            if let Some(index) = target {
                pre_adjustments[index] -= outcome.deficit;
            }
        }

        // Evolve every active account exactly once
        let mut compound_growth = 0.0;
        let mut contributions_total = 0.0;
        for (index, account) in state.accounts.iter_mut().enumerate() {
            if !account.active(period) {
                continue;
            }
            let step = account.step(
                scheduled[index],
                outcome.adjustments[index] + pre_adjustments[index],
            );
            compound_growth += step.interest;
            contributions_total += scheduled[index];
            if let Some(scenario_id) = &account.source_scenario_id {
                if scheduled[index] != 0.0 {
                    *impacts.entry(scenario_id.clone()).or_insert(0.0) -= scheduled[index];
                }
            }
        }

        // Allocate the corporation tax charge across business scenarios by
        // their share of this period's business profit
        if corp_tax > 0.0 {
            let positive_total: f64 = business_profit_by_scenario
                .values()
                .filter(|p| **p > 0.0)
                .sum();
            if positive_total > 0.0 {
                for (scenario_id, profit) in &business_profit_by_scenario {
                    if *profit > 0.0 {
                        *impacts.entry(scenario_id.clone()).or_insert(0.0) -=
                            corp_tax * profit / positive_total;
                    }
                }
            }
        }

        // Net worth and category lists
        let mut net_worth = 0.0;
        let mut total_assets = 0.0;
        let mut total_debts = 0.0;
        let mut asset_categories = Vec::new();
        let mut debt_categories = Vec::new();
        for account in &state.accounts {
            if !account.active(period) {
                continue;
            }
            net_worth += account.balance;
            let category = CategoryBalance {
                name: account.name.clone(),
                asset_class: account.asset_class,
                balance: account.balance,
            };
            if account.is_debt {
                total_debts += -account.balance;
                debt_categories.push(category);
            } else {
                total_assets += account.balance;
                asset_categories.push(category);
            }
        }

        let drawdown = outcome.pension_drawdown;
        let gross_income = employment_recurring
            + requested_pension_gross
            + business_revenue
            + withdrawal_proceeds;

        ProjectionPoint {
            period,
            cash_flow: net_cash_flow,
            net_worth,
            breakdown: PeriodBreakdown {
                gross_income,
                baseline_income: salary,
                scenario_income: scenario_employment + withdrawal_proceeds,
                business_income: business_revenue,
                state_pension_income: state_pension,
                private_pension_income: requested_pension_gross
                    + drawdown.map(|w| w.gross).unwrap_or(0.0),
                expenses,
                baseline_expenses: state.baseline.monthly_expenses,
                scenario_expenses: scenario_expenses + business_costs,
                account_contributions: scheduled_total,
                income_tax,
                national_insurance: ni,
                corporation_tax: corp_tax,
                capital_gains_tax: outcome.cgt_paid,
                pension_drawdown_tax: drawdown.map(|w| w.tax).unwrap_or(0.0),
                student_loan_repayment,
                total_assets,
                total_debts,
                asset_categories,
                debt_categories,
                allocations_by_class: outcome.allocations_by_class,
                allocations_by_account: outcome.allocations_by_account,
                liquidations_by_class: outcome.liquidations_by_class,
                liquidations_by_account: outcome.liquidations_by_account,
                surplus_cash: outcome.surplus_cash,
                uncovered_deficit: outcome.deficit,
                compound_growth,
                contributions_total,
                scenario_impacts: impacts,
            },
        }
    }

    /// Apply the most recent matching rate override to each account
    fn apply_rate_overrides(&self, period: u32, state: &mut RunState) {
        let overrides = state.expanded.rate_overrides.clone();
        for override_spec in overrides.iter().filter(|o| o.start_period == period) {
            let (matched, diag) = match_account(
                &state.accounts,
                &override_spec.pattern,
                false,
                Some(period),
            );
            if let Some(diag) = diag {
                state.result.diagnostics.push(diag);
            }
            let Some(index) = matched else { continue };
            let account = &mut state.accounts[index];
            let annual = if override_spec.additive {
                account.annual_rate + override_spec.annual_rate
            } else {
                override_spec.annual_rate
            };
            account.annual_rate = annual;
            account.rate_per_period = crate::model::rate_per_period(annual);
        }
    }

    /// Source account for withdrawals and transfers: a name pattern first,
    /// else the highest-balance account of the source class
    fn resolve_source(
        &self,
        state: &mut RunState,
        pattern: Option<&str>,
        class: Option<AssetClass>,
        period: u32,
    ) -> Option<usize> {
        if let Some(pattern) = pattern {
            let (matched, diag) = match_account(&state.accounts, pattern, false, Some(period));
            if let Some(diag) = diag {
                state.result.diagnostics.push(diag);
            }
            if matched.is_some() {
                return matched;
            }
        }
        let class = class?;
        state
            .accounts
            .iter()
            .enumerate()
            .filter(|(_, a)| a.active(period) && !a.is_debt && a.asset_class == class)
            .max_by(|(_, a), (_, b)| a.balance.total_cmp(&b.balance))
            .map(|(i, _)| i)
    }
}

/// Take a clawback out of the surplus routed by the allocator, undoing the
/// corresponding deposits and their reporting entries
fn claw_back_surplus(
    amount: f64,
    accounts: &[AccountState],
    outcome: &mut crate::engine::allocator::AllocationOutcome,
) {
    let mut remaining = amount;
    let mut routed = std::mem::take(&mut outcome.surplus_routed);
    for entry in routed.iter_mut() {
        if remaining <= 0.0 {
            break;
        }
        let take = entry.1.min(remaining);
        entry.1 -= take;
        outcome.adjustments[entry.0] -= take;
        let account = &accounts[entry.0];
        if let Some(total) = outcome.allocations_by_class.get_mut(&account.asset_class) {
            *total -= take;
        }
        if let Some(total) = outcome.allocations_by_account.get_mut(&account.name) {
            *total -= take;
        }
        remaining -= take;
    }
    outcome.surplus_routed = routed;
}
