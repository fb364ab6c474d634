//! End-to-end simulations through the public API

use approx::{assert_abs_diff_eq, assert_relative_eq};
use chrono::NaiveDate;
use finsim::engine::loan_duration_periods;
use finsim::model::{
    Account, AllocationConfig, AssetClass, BaselineProfile, CashFlowBehavior, PensionWithdrawalRequest,
    SavingsGoalKind, ScenarioModifier, ScenarioRequest, SurplusAllocation, TargetedArchetype,
    TargetedModifier, TaxWrapper,
};
use finsim::runner::ScenarioRunner;
use std::collections::BTreeMap;

fn account(name: &str, balance: f64, annual_rate: f64) -> Account {
    Account {
        name: name.to_string(),
        balance,
        annual_rate,
        monthly_contribution: 0.0,
        contribution_stop_after_periods: None,
        is_debt: false,
        wrapper: TaxWrapper::None,
        asset_class: None,
        savings_goal_priority: None,
        savings_goal_target: None,
        savings_goal_kind: None,
    }
}

fn baseline(accounts: Vec<Account>, income: f64, expenses: f64) -> BaselineProfile {
    BaselineProfile {
        accounts,
        monthly_income: income,
        monthly_expenses: expenses,
        current_age: 34.0,
        retirement_age: 67.0,
        state_pension_monthly: None,
        allocation_config: Some(AllocationConfig::default()),
    }
}

fn request(baseline: BaselineProfile, modifiers: Vec<ScenarioModifier>) -> ScenarioRequest {
    ScenarioRequest { baseline, modifiers }
}

fn targeted(archetype: TargetedArchetype, scenario_id: &str) -> TargetedModifier {
    TargetedModifier {
        id: format!("mod-{scenario_id}"),
        display_name: "Modifier".into(),
        scenario_id: scenario_id.to_string(),
        archetype,
        start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        assumptions: BTreeMap::new(),
        target_amount: 0.0,
        target_date: None,
        monthly_contribution: None,
        duration_years: None,
        amount_interpretation: None,
        starting_amount: None,
        performance: None,
        cash_flow_behavior: None,
        linked_account_name: None,
        contribution_stop_after_periods: None,
        income_type: None,
        annual_percentage: None,
        savings_goal_priority: None,
        savings_goal_target: None,
        savings_goal_kind: None,
        source_asset_class: None,
        pension_withdrawal_request: None,
    }
}

#[test]
fn zero_input_projection_is_flat_and_solvent() {
    let runner = ScenarioRunner::new();
    let mut pot = account("Savings Pot", 10_000.0, 0.0);
    pot.asset_class = Some(AssetClass::DefaultSavings);
    let output = runner
        .simulate(&request(baseline(vec![pot], 0.0, 0.0), vec![]), 1, Some(2026), Some(1))
        .unwrap();

    assert_eq!(output.baseline.projection.points.len(), 12);
    for point in &output.baseline.projection.points {
        assert_relative_eq!(point.net_worth, 10_000.0);
        assert_relative_eq!(point.cash_flow, 0.0);
    }
    assert!(output.baseline.solvency.is_solvent);
}

#[test]
fn compounding_reproduces_annual_rate_over_twelve_periods() {
    let runner = ScenarioRunner::new();
    let mut pot = account("Savings Pot", 10_000.0, 0.07);
    pot.asset_class = Some(AssetClass::DefaultSavings);
    let output = runner
        .simulate(&request(baseline(vec![pot], 0.0, 0.0), vec![]), 1, Some(2026), Some(1))
        .unwrap();

    let final_worth = output.baseline.projection.points.last().unwrap().net_worth;
    assert_relative_eq!(final_worth, 10_700.0, max_relative = 1e-12);
}

#[test]
fn debt_payoff_matches_closed_form_and_stays_terminal() {
    let runner = ScenarioRunner::new();
    let mut loan = account("Car Loan", -10_000.0, 0.12);
    loan.is_debt = true;
    loan.monthly_contribution = 500.0;

    let output = runner
        .simulate(&request(baseline(vec![loan], 0.0, 0.0), vec![]), 5, Some(2026), Some(1))
        .unwrap();

    let monthly_rate = (1.0f64 + 0.12).powf(1.0 / 12.0) - 1.0;
    let expected = loan_duration_periods(-10_000.0, monthly_rate, 500.0)
        .unwrap()
        .unwrap();

    let points = &output.baseline.projection.points;
    let payoff = points
        .iter()
        .position(|p| {
            p.breakdown
                .debt_categories
                .iter()
                .all(|c| c.balance == 0.0)
        })
        .expect("debt should pay off") as u32;
    assert_eq!(payoff + 1, expected);

    // Terminal: no further interest or payments after payoff
    for point in &points[payoff as usize..] {
        for debt in &point.breakdown.debt_categories {
            assert_eq!(debt.balance, 0.0);
        }
    }
    let last = points.last().unwrap();
    assert_eq!(last.breakdown.account_contributions, 0.0);
}

#[test]
fn isa_scheduled_contributions_cap_at_annual_limit() {
    let runner = ScenarioRunner::new();
    let mut isa = account("Stocks & Shares ISA", 0.0, 0.0);
    isa.wrapper = TaxWrapper::Isa;
    isa.asset_class = Some(AssetClass::GeneralInvestment);
    isa.monthly_contribution = 2_000.0;

    // Start in April so a single tax year covers the whole projection
    let profile = baseline(vec![isa], 5_000.0, 1_500.0);
    let output = runner
        .simulate(&request(profile, vec![]), 1, Some(2026), Some(4))
        .unwrap();

    let points = &output.baseline.projection.points;
    let isa_contributions: f64 = points
        .iter()
        .map(|p| p.breakdown.account_contributions)
        .sum();
    assert_abs_diff_eq!(isa_contributions, 20_000.0, epsilon = 1e-6);

    // The first ten months take the full 2,000; month 10 takes nothing
    assert_relative_eq!(points[9].breakdown.account_contributions, 2_000.0);
    assert_relative_eq!(points[10].breakdown.account_contributions, 0.0);

    // Capped contributions fall through to cash deposits instead
    let cash_deposits: f64 = points[10]
        .breakdown
        .allocations_by_class
        .get(&AssetClass::DefaultSavings)
        .copied()
        .unwrap_or(0.0);
    assert!(cash_deposits > 2_000.0);
}

#[test]
fn isa_ytd_resets_in_april() {
    let runner = ScenarioRunner::new();
    let mut isa = account("Cash ISA", 0.0, 0.0);
    isa.wrapper = TaxWrapper::Isa;
    isa.asset_class = Some(AssetClass::GeneralInvestment);
    isa.monthly_contribution = 2_000.0;

    // Start in January: 20,000 fits into Jan..Oct of the first tax year,
    // then nothing until the April reset
    let profile = baseline(vec![isa], 5_000.0, 1_500.0);
    let output = runner
        .simulate(&request(profile, vec![]), 2, Some(2026), Some(1))
        .unwrap();

    let points = &output.baseline.projection.points;
    // Tax year 2025 covers Jan-Mar 2026: 6,000 used. Tax year 2026 starts
    // at period 3 (April) with a fresh allowance.
    let first_year: f64 = points[0..3]
        .iter()
        .map(|p| p.breakdown.account_contributions)
        .sum();
    assert_abs_diff_eq!(first_year, 6_000.0, epsilon = 1e-6);

    let second_year: f64 = points[3..15]
        .iter()
        .map(|p| p.breakdown.account_contributions)
        .sum();
    assert_abs_diff_eq!(second_year, 20_000.0, epsilon = 1e-6);
}

#[test]
fn priority_savings_goal_fills_then_stops() {
    let runner = ScenarioRunner::new();
    let mut emergency = account("Emergency Fund", 0.0, 0.0);
    emergency.asset_class = Some(AssetClass::Hysa);
    emergency.savings_goal_priority = Some(1);
    emergency.savings_goal_target = Some(15_000.0);
    emergency.savings_goal_kind = Some(SavingsGoalKind::EmergencyFund);

    let mut profile = baseline(
        vec![
            emergency,
            account("Equity Fund", 0.0, 0.0),
            account("Workplace Pension", 0.0, 0.0),
            account("Cash Savings", 0.0, 0.0),
        ],
        0.0,
        0.0,
    );
    profile.allocation_config = Some(AllocationConfig {
        automated_allocation_percentages: BTreeMap::from([
            (AssetClass::Equities, 10.0),
            (AssetClass::Pension, 5.0),
        ]),
        surplus_allocation: None,
    });
    // 1,000 of income a month, below the tax and NI thresholds, so the
    // whole amount is clean surplus
    profile.monthly_income = 1_000.0;
    profile.monthly_expenses = 0.0;

    let output = runner
        .simulate(&request(profile, vec![]), 3, Some(2026), Some(1))
        .unwrap();

    let first = &output.baseline.projection.points[0].breakdown;
    assert_relative_eq!(
        first.allocations_by_class[&AssetClass::Equities],
        100.0
    );
    assert_relative_eq!(first.allocations_by_class[&AssetClass::Pension], 50.0);
    assert_relative_eq!(first.allocations_by_class[&AssetClass::Hysa], 850.0);
    assert!(first
        .allocations_by_class
        .get(&AssetClass::DefaultSavings)
        .is_none());

    // 15,000 / 850 per month: the goal fills during period 17, after which
    // HYSA allocations stop and cash picks up the difference
    let later = &output.baseline.projection.points[18].breakdown;
    assert!(later.allocations_by_class.get(&AssetClass::Hysa).is_none());
    assert_relative_eq!(
        later.allocations_by_class[&AssetClass::DefaultSavings],
        850.0
    );
}

#[test]
fn pension_first_withdrawal_applies_25_percent_rule() {
    let runner = ScenarioRunner::new();
    let mut pension_pot = account("Personal Pension", 400_000.0, 0.0);
    pension_pot.asset_class = Some(AssetClass::Pension);

    let mut withdrawal = targeted(TargetedArchetype::OneOffInflow, "scn-retirement");
    withdrawal.target_amount = 0.0;
    withdrawal.target_date = Some(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
    withdrawal.pension_withdrawal_request = Some(PensionWithdrawalRequest {
        gross_amount: 200_000.0,
        is_recurring: false,
    });
    withdrawal.start_date = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();

    let mut profile = baseline(vec![pension_pot], 0.0, 0.0);
    profile.current_age = 67.0;
    profile.retirement_age = 67.0;

    let output = runner
        .simulate(
            &request(profile, vec![ScenarioModifier::Targeted(withdrawal)]),
            1,
            Some(2026),
            Some(1),
        )
        .unwrap();

    let point = &output.scenario.projection.points[1];
    assert_relative_eq!(point.breakdown.private_pension_income, 200_000.0);

    // Tax-free half is min(25% of 400k, 268,275) = 100,000; the other
    // 100,000 is taxed at marginal rates with no other income:
    // 100,000 gross: allowance 12,570, 37,700 at 20%, the rest at 40%
    let expected_tax = 37_700.0 * 0.20 + (100_000.0 - 12_570.0 - 37_700.0) * 0.40;
    assert_abs_diff_eq!(point.breakdown.income_tax, expected_tax, epsilon = 1e-6);
}

#[test]
fn pension_withdrawal_before_access_age_is_ignored_with_diagnostic() {
    let runner = ScenarioRunner::new();
    let mut pension_pot = account("Personal Pension", 100_000.0, 0.0);
    pension_pot.asset_class = Some(AssetClass::Pension);

    let mut withdrawal = targeted(TargetedArchetype::OneOffInflow, "scn-early");
    withdrawal.target_amount = 0.0;
    withdrawal.target_date = Some(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
    withdrawal.pension_withdrawal_request = Some(PensionWithdrawalRequest {
        gross_amount: 10_000.0,
        is_recurring: false,
    });

    let mut profile = baseline(vec![pension_pot], 0.0, 0.0);
    profile.current_age = 54.0;

    let output = runner
        .simulate(
            &request(profile, vec![ScenarioModifier::Targeted(withdrawal)]),
            1,
            Some(2026),
            Some(1),
        )
        .unwrap();

    let point = &output.scenario.projection.points[0];
    assert_eq!(point.breakdown.private_pension_income, 0.0);
    assert!(output
        .scenario
        .projection
        .diagnostics
        .iter()
        .any(|d| d.kind == finsim::DiagnosticKind::PensionAgeRestricted));
    // At 55 the same request goes through
    let mut profile_55 = baseline(
        vec![{
            let mut p = account("Personal Pension", 100_000.0, 0.0);
            p.asset_class = Some(AssetClass::Pension);
            p
        }],
        0.0,
        0.0,
    );
    profile_55.current_age = 55.0;
    let mut withdrawal_55 = targeted(TargetedArchetype::OneOffInflow, "scn-55");
    withdrawal_55.target_amount = 0.0;
    withdrawal_55.target_date = Some(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
    withdrawal_55.pension_withdrawal_request = Some(PensionWithdrawalRequest {
        gross_amount: 10_000.0,
        is_recurring: false,
    });
    let output = runner
        .simulate(
            &request(profile_55, vec![ScenarioModifier::Targeted(withdrawal_55)]),
            1,
            Some(2026),
            Some(1),
        )
        .unwrap();
    assert_relative_eq!(
        output.scenario.projection.points[0]
            .breakdown
            .private_pension_income,
        10_000.0
    );
}

#[test]
fn liquidity_insolvency_detected_with_fixable_shortfall() {
    let runner = ScenarioRunner::new();
    let mut isa = account("Stocks & Shares ISA", 8_000.0, 0.0);
    isa.wrapper = TaxWrapper::Isa;
    isa.asset_class = Some(AssetClass::GeneralInvestment);
    let current = {
        let mut a = account("Current Account", 1_000.0, 0.0);
        a.asset_class = Some(AssetClass::CurrentAccount);
        a
    };

    // 500/month short for a year: the current account sinks to -5,000
    let profile = baseline(vec![current, isa], 0.0, 500.0);
    let output = runner
        .simulate(&request(profile, vec![]), 1, Some(2026), Some(1))
        .unwrap();

    let solvency = &output.baseline.solvency;
    assert!(!solvency.is_solvent);
    assert_abs_diff_eq!(solvency.max_cash_shortfall, 5_000.0, epsilon = 1e-6);
    assert_abs_diff_eq!(
        solvency.available_liquidity_at_worst,
        8_000.0,
        epsilon = 1e-6
    );
    assert!(solvency.can_fix_with_liquidation);
}

#[test]
fn baseline_is_invariant_to_modifier_list() {
    let runner = ScenarioRunner::new();
    let profile = baseline(
        vec![account("Cash Savings", 5_000.0, 0.02)],
        3_500.0,
        2_200.0,
    );

    let plain = runner
        .simulate(&request(profile.clone(), vec![]), 3, Some(2026), Some(1))
        .unwrap();

    let mut expense = targeted(TargetedArchetype::RecurringExpense, "scn-car");
    expense.target_amount = 400.0;
    expense.duration_years = Some(2.0);
    let mut inflow = targeted(TargetedArchetype::OneOffInflow, "scn-bonus");
    inflow.target_amount = 9_000.0;
    inflow.target_date = Some(NaiveDate::from_ymd_opt(2027, 6, 1).unwrap());

    let modified = runner
        .simulate(
            &request(
                profile,
                vec![
                    ScenarioModifier::Targeted(expense),
                    ScenarioModifier::Targeted(inflow),
                ],
            ),
            3,
            Some(2026),
            Some(1),
        )
        .unwrap();

    for (a, b) in plain
        .baseline
        .projection
        .points
        .iter()
        .zip(modified.baseline.projection.points.iter())
    {
        assert_relative_eq!(a.net_worth, b.net_worth, max_relative = 1e-12);
        assert_relative_eq!(a.cash_flow, b.cash_flow, max_relative = 1e-12);
    }
}

#[test]
fn transfer_moves_balance_without_cash_flow() {
    let runner = ScenarioRunner::new();
    let profile = baseline(
        vec![account("Cash Savings", 20_000.0, 0.0)],
        0.0,
        0.0,
    );

    let mut transfer = targeted(TargetedArchetype::OneOffAccountContribution, "scn-move");
    transfer.display_name = "New Investment Pot".into();
    transfer.target_amount = 8_000.0;
    transfer.target_date = Some(NaiveDate::from_ymd_opt(2026, 4, 1).unwrap());
    transfer.linked_account_name = Some("Cash Savings".into());
    transfer
        .assumptions
        .insert("is_transfer".into(), serde_json::json!(true));

    let output = runner
        .simulate(
            &request(profile, vec![ScenarioModifier::Targeted(transfer)]),
            1,
            Some(2026),
            Some(1),
        )
        .unwrap();

    let points = &output.scenario.projection.points;
    // Net worth unchanged through the transfer month
    for point in points {
        assert_abs_diff_eq!(point.net_worth, 20_000.0, epsilon = 1e-9);
        assert_relative_eq!(point.cash_flow, 0.0);
    }
    // Balance moved: 8,000 out of cash, 8,000 into the new pot
    let at_transfer = &points[3].breakdown;
    let cash = at_transfer
        .asset_categories
        .iter()
        .find(|c| c.name == "Cash Savings")
        .unwrap();
    let pot = at_transfer
        .asset_categories
        .iter()
        .find(|c| c.name == "New Investment Pot")
        .unwrap();
    assert_abs_diff_eq!(cash.balance, 12_000.0, epsilon = 1e-9);
    assert_abs_diff_eq!(pot.balance, 8_000.0, epsilon = 1e-9);
}

#[test]
fn recurring_contribution_builds_synthetic_account_and_charges_cash_flow() {
    let runner = ScenarioRunner::new();
    let profile = baseline(
        vec![account("Cash Savings", 10_000.0, 0.0)],
        4_000.0,
        2_000.0,
    );

    let mut contribution = targeted(
        TargetedArchetype::RecurringAccountContribution,
        "scn-house",
    );
    contribution.display_name = "House Deposit Fund".into();
    contribution.target_amount = 12_000.0;
    contribution.duration_years = Some(2.0);

    let output = runner
        .simulate(
            &request(profile, vec![ScenarioModifier::Targeted(contribution)]),
            3,
            Some(2026),
            Some(1),
        )
        .unwrap();

    let points = &output.scenario.projection.points;
    // 500/month flows into the synthetic account for 24 months, then stops
    assert_relative_eq!(points[0].breakdown.account_contributions, 500.0);
    assert_relative_eq!(points[23].breakdown.account_contributions, 500.0);
    assert_relative_eq!(points[24].breakdown.account_contributions, 0.0);

    let fund = points[24]
        .breakdown
        .asset_categories
        .iter()
        .find(|c| c.name == "House Deposit Fund")
        .unwrap();
    assert_abs_diff_eq!(fund.balance, 12_000.0, epsilon = 1e-6);

    // The scenario impact records the outflow
    assert_abs_diff_eq!(
        points[0].breakdown.scenario_impacts["scn-house"],
        -500.0,
        epsilon = 1e-9
    );
}

#[test]
fn quit_job_zeroes_salary_and_workplace_pension_contribution() {
    let runner = ScenarioRunner::new();
    let mut pension_account = account("Workplace Pension", 10_000.0, 0.0);
    pension_account.asset_class = Some(AssetClass::Pension);
    pension_account.monthly_contribution = 300.0;

    let profile = baseline(
        vec![account("Cash Savings", 50_000.0, 0.0), pension_account],
        3_000.0,
        1_000.0,
    );

    let mut quit = targeted(TargetedArchetype::RecurringExpense, "scn-quit_job");
    quit.target_amount = 0.0;
    quit.start_date = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
    quit.duration_years = Some(1.0);

    let output = runner
        .simulate(
            &request(profile, vec![ScenarioModifier::Targeted(quit)]),
            1,
            Some(2026),
            Some(1),
        )
        .unwrap();

    let points = &output.scenario.projection.points;
    assert_relative_eq!(points[5].breakdown.baseline_income, 3_000.0);
    assert_relative_eq!(points[5].breakdown.account_contributions, 300.0);
    assert_relative_eq!(points[6].breakdown.baseline_income, 0.0);
    assert_relative_eq!(points[6].breakdown.account_contributions, 0.0);
}

#[test]
fn new_debt_amortizes_from_its_start_period() {
    let runner = ScenarioRunner::new();
    let profile = baseline(
        vec![account("Cash Savings", 50_000.0, 0.0)],
        4_000.0,
        2_000.0,
    );

    let mut debt = targeted(TargetedArchetype::NewDebt, "scn-car");
    debt.display_name = "Car Loan".into();
    debt.target_amount = 12_000.0;
    debt.performance = Some(0.06);
    debt.monthly_contribution = Some(400.0);
    debt.start_date = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();

    let output = runner
        .simulate(
            &request(profile, vec![ScenarioModifier::Targeted(debt)]),
            4,
            Some(2026),
            Some(1),
        )
        .unwrap();

    let points = &output.scenario.projection.points;
    // Debt absent before its start period
    assert!(points[5].breakdown.debt_categories.is_empty());
    let loan = points[6]
        .breakdown
        .debt_categories
        .iter()
        .find(|c| c.name == "Car Loan")
        .unwrap();
    assert!(loan.balance < 0.0 && loan.balance > -12_000.0);

    // Paid off well before the horizon
    let last = points.last().unwrap();
    assert!(last.breakdown.debt_categories.iter().all(|c| c.balance == 0.0));
}

#[test]
fn business_income_pays_corporation_tax() {
    let runner = ScenarioRunner::new();
    let profile = baseline(vec![account("Cash Savings", 5_000.0, 0.0)], 0.0, 0.0);

    let mut revenue = targeted(TargetedArchetype::RecurringIncome, "scn-biz");
    revenue.target_amount = 5_000.0;
    revenue.income_type = Some(finsim::model::IncomeType::Business);
    revenue.duration_years = Some(1.0);

    let output = runner
        .simulate(
            &request(profile, vec![ScenarioModifier::Targeted(revenue)]),
            1,
            Some(2026),
            Some(1),
        )
        .unwrap();

    let point = &output.scenario.projection.points[0];
    assert_relative_eq!(point.breakdown.business_income, 5_000.0);
    // 60,000 annual profit: 50,000 at 19% + 10,000 at 25%, monthly twelfth
    let expected = (50_000.0 * 0.19 + 10_000.0 * 0.25) / 12.0;
    assert_abs_diff_eq!(point.breakdown.corporation_tax, expected, epsilon = 1e-6);
    // No NI or income tax on business profit
    assert_eq!(point.breakdown.national_insurance, 0.0);
    assert_eq!(point.breakdown.income_tax, 0.0);

    // Corporation tax is charged against the business scenario's impact
    let impact = point.breakdown.scenario_impacts["scn-biz"];
    assert_abs_diff_eq!(impact, 5_000.0 - expected, epsilon = 1e-6);
}

#[test]
fn surplus_routing_targets_configured_class() {
    let runner = ScenarioRunner::new();
    let mut gia = account("GIA", 0.0, 0.0);
    gia.asset_class = Some(AssetClass::GeneralInvestment);
    // 1,000 of income a month, below the tax thresholds
    let mut profile = baseline(
        vec![gia, account("Cash Savings", 0.0, 0.0)],
        1_000.0,
        0.0,
    );
    profile.allocation_config = Some(AllocationConfig {
        automated_allocation_percentages: BTreeMap::new(),
        surplus_allocation: Some(SurplusAllocation {
            asset_class: AssetClass::GeneralInvestment,
        }),
    });

    let output = runner
        .simulate(&request(profile, vec![]), 1, Some(2026), Some(1))
        .unwrap();

    let first = &output.baseline.projection.points[0].breakdown;
    assert_relative_eq!(
        first.allocations_by_class[&AssetClass::GeneralInvestment],
        1_000.0
    );
    assert_relative_eq!(first.surplus_cash.unwrap(), 1_000.0);
}

#[test]
fn sinking_expense_spends_monthly_without_final_withdrawal() {
    let runner = ScenarioRunner::new();
    let profile = baseline(vec![account("Cash Savings", 30_000.0, 0.0)], 0.0, 0.0);

    let mut wedding = targeted(TargetedArchetype::OneOffExpense, "scn-wedding");
    wedding.target_amount = 12_000.0;
    wedding.cash_flow_behavior = Some(CashFlowBehavior::SinkingExpense);
    wedding.target_date = Some(NaiveDate::from_ymd_opt(2027, 1, 1).unwrap());

    let output = runner
        .simulate(
            &request(profile, vec![ScenarioModifier::Targeted(wedding)]),
            2,
            Some(2026),
            Some(1),
        )
        .unwrap();

    let points = &output.scenario.projection.points;
    for point in &points[0..12] {
        assert_relative_eq!(point.cash_flow, -1_000.0);
    }
    assert_relative_eq!(points[12].cash_flow, 0.0);
    // Total drain equals the lump amount
    let final_worth = points.last().unwrap().net_worth;
    assert_abs_diff_eq!(final_worth, 18_000.0, epsilon = 1e-6);
}

#[test]
fn cash_flow_identity_holds_under_mixed_activity() {
    let runner = ScenarioRunner::new();
    let mut isa = account("Stocks & Shares ISA", 2_000.0, 0.05);
    isa.wrapper = TaxWrapper::Isa;
    isa.monthly_contribution = 300.0;
    let mut loan = account("Car Loan", -4_000.0, 0.07);
    loan.is_debt = true;
    loan.monthly_contribution = 200.0;

    let profile = baseline(
        vec![account("Current Account", 3_000.0, 0.0), isa, loan],
        3_800.0,
        2_100.0,
    );

    let mut expense = targeted(TargetedArchetype::RecurringExpense, "scn-nursery");
    expense.target_amount = 900.0;
    expense.duration_years = Some(2.0);

    let output = runner
        .simulate(
            &request(profile, vec![ScenarioModifier::Targeted(expense)]),
            3,
            Some(2026),
            Some(1),
        )
        .unwrap();

    for run in [&output.baseline, &output.scenario] {
        for point in &run.projection.points {
            let b = &point.breakdown;
            assert_abs_diff_eq!(
                point.cash_flow,
                b.gross_income
                    - b.income_tax
                    - b.national_insurance
                    - b.corporation_tax
                    - b.expenses
                    - b.account_contributions,
                epsilon = 1e-9
            );
        }
    }
}

#[test]
fn interest_rate_change_overrides_account_rate() {
    let runner = ScenarioRunner::new();
    let profile = baseline(vec![account("Cash Savings", 10_000.0, 0.0)], 0.0, 0.0);

    let change = finsim::model::ConfigModifier {
        id: "mod-rate".into(),
        display_name: "Savings rate rises".into(),
        scenario_id: "scn-rate".into(),
        archetype: finsim::model::ConfigArchetype::InterestRateChange,
        start_date: NaiveDate::from_ymd_opt(2027, 1, 1).unwrap(),
        assumptions: BTreeMap::new(),
        performance: Some(0.12),
        linked_account_name: Some("Cash Savings".into()),
        automated_allocation_percentages: None,
        surplus_allocation: None,
        salary_override: None,
    };

    let output = runner
        .simulate(
            &request(profile, vec![ScenarioModifier::Config(change)]),
            2,
            Some(2026),
            Some(1),
        )
        .unwrap();

    let points = &output.scenario.projection.points;
    // Flat through year one, then compounding at 12% through year two
    assert_relative_eq!(points[11].net_worth, 10_000.0);
    assert_relative_eq!(
        points[23].net_worth,
        10_000.0 * 1.12,
        max_relative = 1e-9
    );
}

#[test]
fn allocation_config_change_takes_effect_from_its_start() {
    let runner = ScenarioRunner::new();
    let mut gia = account("GIA", 0.0, 0.0);
    gia.asset_class = Some(AssetClass::GeneralInvestment);
    // 1,000 of income a month, below the tax thresholds
    let mut profile = baseline(
        vec![gia, account("Cash Savings", 0.0, 0.0)],
        1_000.0,
        0.0,
    );
    profile.allocation_config = Some(AllocationConfig::default());

    let change = finsim::model::ConfigModifier {
        id: "mod-alloc".into(),
        display_name: "Start investing".into(),
        scenario_id: "scn-alloc".into(),
        archetype: finsim::model::ConfigArchetype::AllocationConfigChange,
        start_date: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
        assumptions: BTreeMap::new(),
        performance: None,
        linked_account_name: None,
        automated_allocation_percentages: Some(BTreeMap::from([(
            AssetClass::GeneralInvestment,
            40.0,
        )])),
        surplus_allocation: None,
        salary_override: None,
    };

    let output = runner
        .simulate(
            &request(profile, vec![ScenarioModifier::Config(change)]),
            1,
            Some(2026),
            Some(1),
        )
        .unwrap();

    let points = &output.scenario.projection.points;
    // Before the change everything lands in cash
    assert!(points[5]
        .breakdown
        .allocations_by_class
        .get(&AssetClass::GeneralInvestment)
        .is_none());
    // After: 40% to the GIA, the rest routed to cash
    assert_relative_eq!(
        points[6].breakdown.allocations_by_class[&AssetClass::GeneralInvestment],
        400.0
    );
    assert_relative_eq!(
        points[6].breakdown.allocations_by_class[&AssetClass::DefaultSavings],
        600.0
    );
}

#[test]
fn one_off_withdrawal_adds_cash_and_reduces_source() {
    let runner = ScenarioRunner::new();
    let mut gia = account("GIA", 25_000.0, 0.0);
    gia.asset_class = Some(AssetClass::GeneralInvestment);
    let profile = baseline(
        vec![account("Cash Savings", 1_000.0, 0.0), gia],
        0.0,
        0.0,
    );

    let mut withdrawal = targeted(TargetedArchetype::OneOffAccountWithdrawal, "scn-wd");
    withdrawal.target_amount = 5_000.0;
    withdrawal.target_date = Some(NaiveDate::from_ymd_opt(2026, 4, 1).unwrap());
    withdrawal.source_asset_class = Some(AssetClass::GeneralInvestment);

    let output = runner
        .simulate(
            &request(profile, vec![ScenarioModifier::Targeted(withdrawal)]),
            1,
            Some(2026),
            Some(1),
        )
        .unwrap();

    let points = &output.scenario.projection.points;
    // Proceeds arrive as untaxed cash flow at the target month
    assert_relative_eq!(points[3].cash_flow, 5_000.0);
    assert_eq!(points[3].breakdown.income_tax, 0.0);

    // The source account drops by the same amount; the proceeds land back
    // in cash, so net worth is unchanged
    let gia_balance = points[3]
        .breakdown
        .asset_categories
        .iter()
        .find(|c| c.name == "GIA")
        .unwrap()
        .balance;
    assert_abs_diff_eq!(gia_balance, 20_000.0, epsilon = 1e-9);
    assert_abs_diff_eq!(points[3].net_worth, 26_000.0, epsilon = 1e-9);
}

#[test]
fn student_loan_repays_from_salary_and_writes_off() {
    let runner = ScenarioRunner::new();
    let profile = baseline(
        vec![account("Cash Savings", 5_000.0, 0.0)],
        3_000.0,
        1_000.0,
    );

    let loan = finsim::model::StudentLoanModifier {
        id: "mod-sl".into(),
        display_name: "Student Loan".into(),
        scenario_id: "scn-uni".into(),
        start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        assumptions: BTreeMap::new(),
        plan: finsim::model::StudentLoanPlan::Plan2,
        principal: 40_000.0,
        annual_interest_rate: 0.0,
        graduation_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        write_off_date: NaiveDate::from_ymd_opt(2027, 1, 1).unwrap(),
    };

    let output = runner
        .simulate(
            &request(profile, vec![ScenarioModifier::StudentLoan(loan)]),
            2,
            Some(2026),
            Some(1),
        )
        .unwrap();

    let points = &output.scenario.projection.points;
    // 9% of salary above the Plan 2 monthly threshold
    let expected = (3_000.0 - 28_470.0 / 12.0) * 0.09;
    assert_abs_diff_eq!(
        points[0].breakdown.student_loan_repayment,
        expected,
        epsilon = 1e-6
    );

    // Written off at the write-off date: balance zero, repayments stop
    let at_write_off = &points[12];
    assert!(at_write_off
        .breakdown
        .debt_categories
        .iter()
        .all(|c| c.balance == 0.0));
    assert_eq!(at_write_off.breakdown.student_loan_repayment, 0.0);
    // Net worth jumps when the balance is written off
    assert!(points[12].net_worth > points[11].net_worth);
}
