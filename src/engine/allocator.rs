//! Cash-flow allocator
//!
//! Routes each period's surplus into accounts by asset class, and covers
//! each period's deficit by liquidating accounts in priority order. The
//! allocator owns the state that persists across periods within one run:
//! the savings-goal cumulative balances, the CGT exemption tracker, and the
//! MPAA contribution counter. The ISA tracker and pension state are owned
//! by the driver and passed in, since scheduled contributions share them.

use crate::engine::account_state::AccountState;
use crate::error::{Diagnostic, DiagnosticKind};
use crate::model::{AllocationConfig, AssetClass};
use crate::rules::{CgtTracker, PensionState, PensionWithdrawal, UkTaxConfig};
use log::{debug, warn};
use std::collections::BTreeMap;

/// Year-to-date ISA contributions, shared between scheduled-contribution
/// capping in the driver and deposit enforcement here
#[derive(Debug, Clone)]
pub struct IsaTracker {
    pub tax_year: i32,
    pub ytd_contributions: f64,
}

impl IsaTracker {
    pub fn new(tax_year: i32) -> Self {
        Self {
            tax_year,
            ytd_contributions: 0.0,
        }
    }

    /// Advance to a new tax year, resetting the running total
    pub fn roll_to(&mut self, tax_year: i32) {
        if tax_year != self.tax_year {
            self.tax_year = tax_year;
            self.ytd_contributions = 0.0;
        }
    }

    pub fn remaining(&self, cfg: &UkTaxConfig) -> f64 {
        (cfg.isa_annual_limit - self.ytd_contributions).max(0.0)
    }

    pub fn record(&mut self, amount: f64) {
        self.ytd_contributions += amount.max(0.0);
    }
}

/// Retirement and income context for one allocation call
#[derive(Debug, Clone, Copy)]
pub struct RetirementContext {
    pub is_retired: bool,
    pub age: f64,
    pub calendar_year: i32,
    /// Annualized employment income in force this period; the base for
    /// marginal tax on pension drawdowns
    pub annual_employment_income: f64,
}

/// Result of one allocation call
#[derive(Debug, Clone)]
pub struct AllocationOutcome {
    /// Signed balance adjustment per account index
    pub adjustments: Vec<f64>,

    pub allocations_by_class: BTreeMap<AssetClass, f64>,
    pub allocations_by_account: BTreeMap<String, f64>,
    pub liquidations_by_class: BTreeMap<AssetClass, f64>,
    pub liquidations_by_account: BTreeMap<String, f64>,

    /// Cash left after percentages and goal top-ups; defined on deposit
    /// periods only
    pub surplus_cash: Option<f64>,

    /// Where the surplus was routed, so the driver can claw some back for
    /// debt overpayments
    pub surplus_routed: Vec<(usize, f64)>,

    /// Need that no account could cover
    pub deficit: f64,

    pub cgt_paid: f64,

    /// Combined pension drawdown executed to cover a deficit
    pub pension_drawdown: Option<PensionWithdrawal>,

    pub diagnostics: Vec<Diagnostic>,
}

impl AllocationOutcome {
    fn empty(account_count: usize) -> Self {
        Self {
            adjustments: vec![0.0; account_count],
            allocations_by_class: BTreeMap::new(),
            allocations_by_account: BTreeMap::new(),
            liquidations_by_class: BTreeMap::new(),
            liquidations_by_account: BTreeMap::new(),
            surplus_cash: None,
            surplus_routed: Vec::new(),
            deficit: 0.0,
            cgt_paid: 0.0,
            pension_drawdown: None,
            diagnostics: Vec::new(),
        }
    }

    fn deposit(&mut self, index: usize, account: &AccountState, amount: f64) {
        self.adjustments[index] += amount;
        *self
            .allocations_by_class
            .entry(account.asset_class)
            .or_insert(0.0) += amount;
        *self
            .allocations_by_account
            .entry(account.name.clone())
            .or_insert(0.0) += amount;
    }

    fn liquidate(&mut self, index: usize, account: &AccountState, amount: f64) {
        self.adjustments[index] -= amount;
        *self
            .liquidations_by_class
            .entry(account.asset_class)
            .or_insert(0.0) += amount;
        *self
            .liquidations_by_account
            .entry(account.name.clone())
            .or_insert(0.0) += amount;
    }
}

/// The per-run allocator
#[derive(Debug, Clone)]
pub struct Allocator {
    config: AllocationConfig,

    /// Cumulative balance per savings-goal account, as tracked for
    /// shortfall computation; decremented on liquidation
    goal_balances: BTreeMap<String, f64>,

    cgt: CgtTracker,

    /// Allocator deposits into pension accounts this tax year, for MPAA
    pension_deposits_ytd: f64,

    overflow_reported: bool,
}

impl Allocator {
    pub fn new(config: AllocationConfig, cfg: &UkTaxConfig) -> Self {
        Self {
            config,
            goal_balances: BTreeMap::new(),
            cgt: CgtTracker::new(cfg),
            pension_deposits_ytd: 0.0,
            overflow_reported: false,
        }
    }

    /// Swap in a new allocation config (allocation-change modifiers)
    pub fn set_config(&mut self, config: AllocationConfig) {
        self.config = config;
        self.overflow_reported = false;
    }

    pub fn config(&self) -> &AllocationConfig {
        &self.config
    }

    /// April rollover: CGT exemption and MPAA counter reset
    pub fn begin_tax_year(&mut self, cfg: &UkTaxConfig) {
        self.cgt.reset_tax_year(cfg);
        self.pension_deposits_ytd = 0.0;
    }

    /// Tracked cumulative balance for a savings-goal account
    pub fn goal_balance(&self, name: &str) -> Option<f64> {
        self.goal_balances.get(name).copied()
    }

    /// Route one period's net cash flow through the accounts.
    ///
    /// Positive flow follows the deposit path: automated percentages, then
    /// priority savings-goal top-ups, then surplus routing, then ISA limit
    /// enforcement. Negative flow follows the liquidation path: retirement
    /// pension drawdown first, then the standard priority order.
    #[allow(clippy::too_many_arguments)]
    pub fn allocate(
        &mut self,
        net_cash_flow: f64,
        accounts: &[AccountState],
        period: u32,
        isa: &mut IsaTracker,
        pension: &mut PensionState,
        ctx: &RetirementContext,
        cfg: &UkTaxConfig,
    ) -> AllocationOutcome {
        let mut out = AllocationOutcome::empty(accounts.len());
        if net_cash_flow >= 0.0 {
            self.allocate_surplus(net_cash_flow, accounts, period, isa, pension, ctx, cfg, &mut out);
        } else {
            self.cover_deficit(-net_cash_flow, accounts, period, pension, ctx, cfg, &mut out);
        }
        out
    }

    /// Active non-debt accounts of a class
    fn class_members(
        &self,
        accounts: &[AccountState],
        period: u32,
        class: AssetClass,
    ) -> Vec<usize> {
        accounts
            .iter()
            .enumerate()
            .filter(|(_, a)| a.active(period) && !a.is_debt && a.asset_class == class)
            .map(|(i, _)| i)
            .collect()
    }

    /// Remaining pension deposit capacity under the MPAA
    fn pension_capacity(&self, pension: &PensionState, cfg: &UkTaxConfig) -> f64 {
        if pension.mpaa_triggered {
            (cfg.mpaa_annual_limit - self.pension_deposits_ytd).max(0.0)
        } else {
            f64::INFINITY
        }
    }

    fn deposit_equal(
        &mut self,
        amount: f64,
        members: &[usize],
        accounts: &[AccountState],
        out: &mut AllocationOutcome,
    ) {
        if members.is_empty() || amount <= 0.0 {
            return;
        }
        let share = amount / members.len() as f64;
        for &index in members {
            out.deposit(index, &accounts[index], share);
        }
    }

    // ---- deposit path ----

    #[allow(clippy::too_many_arguments)]
    fn allocate_surplus(
        &mut self,
        net_cash_flow: f64,
        accounts: &[AccountState],
        period: u32,
        isa: &mut IsaTracker,
        pension: &mut PensionState,
        ctx: &RetirementContext,
        cfg: &UkTaxConfig,
        out: &mut AllocationOutcome,
    ) {
        let mut remaining = net_cash_flow;

        // 1. Automated percentages, scaled down proportionally if they sum
        // above 100.
        let percentages: Vec<(AssetClass, f64)> = self
            .config
            .automated_allocation_percentages
            .iter()
            .filter(|(_, pct)| **pct > 0.0)
            .map(|(class, pct)| (*class, *pct))
            .collect();
        let total_pct: f64 = percentages.iter().map(|(_, p)| p).sum();
        let scale = if total_pct > 100.0 {
            if !self.overflow_reported {
                self.overflow_reported = true;
                let message = format!(
                    "allocation percentages sum to {total_pct:.1}%, scaling down proportionally"
                );
                warn!("{message}");
                out.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::AllocationOverflow,
                    Some(period),
                    message,
                ));
            }
            100.0 / total_pct
        } else {
            1.0
        };

        for (class, pct) in percentages {
            if class == AssetClass::Hysa {
                // HYSA is funded only through priority savings goals
                continue;
            }
            if class == AssetClass::Pension && ctx.is_retired {
                continue;
            }
            let members = self.class_members(accounts, period, class);
            if members.is_empty() {
                continue;
            }
            let mut amount = (net_cash_flow * pct * scale / 100.0).min(remaining);
            if class == AssetClass::Pension {
                amount = amount.min(self.pension_capacity(pension, cfg));
            }
            if amount <= 0.0 {
                continue;
            }
            self.deposit_equal(amount, &members, accounts, out);
            if class == AssetClass::Pension {
                self.pension_deposits_ytd += amount;
            }
            remaining -= amount;
        }

        // 2. Priority savings-goal top-ups (HYSA wrappers only), ordered by
        // priority then account age.
        let mut goal_members: Vec<usize> = accounts
            .iter()
            .enumerate()
            .filter(|(_, a)| {
                a.active(period)
                    && !a.is_debt
                    && a.asset_class == AssetClass::Hysa
                    && a.savings_goal_target.is_some()
            })
            .map(|(i, _)| i)
            .collect();
        goal_members.sort_by_key(|&i| {
            (
                accounts[i].savings_goal_priority.unwrap_or(u32::MAX),
                accounts[i].start_period,
            )
        });

        for index in goal_members {
            if remaining <= 0.0 {
                break;
            }
            let account = &accounts[index];
            let target = account.savings_goal_target.unwrap_or(0.0);
            let tracked = *self
                .goal_balances
                .entry(account.name.clone())
                .or_insert(account.balance);
            let shortfall = (target - tracked).max(0.0);
            let take = remaining.min(shortfall);
            if take > 0.0 {
                out.deposit(index, account, take);
                *self.goal_balances.get_mut(&account.name).unwrap() += take;
                remaining -= take;
            }
        }

        // 3. Whatever is left is surplus cash.
        let surplus = remaining.max(0.0);
        out.surplus_cash = Some(surplus);

        // 4. Route surplus to the configured class, falling back to cash.
        if surplus > 0.0 {
            let mut target = self
                .config
                .surplus_allocation
                .map(|s| s.asset_class)
                .unwrap_or(AssetClass::DefaultSavings);
            if target == AssetClass::Pension && ctx.is_retired {
                target = AssetClass::DefaultSavings;
            }

            let mut to_route = surplus;
            if target == AssetClass::Pension {
                let capacity = self.pension_capacity(pension, cfg);
                let to_pension = to_route.min(capacity);
                if to_pension > 0.0 {
                    let members = self.class_members(accounts, period, AssetClass::Pension);
                    if !members.is_empty() {
                        self.route_surplus(to_pension, &members, accounts, out);
                        self.pension_deposits_ytd += to_pension;
                        to_route -= to_pension;
                    }
                }
                target = AssetClass::DefaultSavings;
            }
            if to_route > 0.0 {
                let mut members = self.class_members(accounts, period, target);
                if members.is_empty() {
                    members = self.class_members(accounts, period, AssetClass::DefaultSavings);
                }
                if members.is_empty() {
                    members = accounts
                        .iter()
                        .enumerate()
                        .filter(|(_, a)| a.active(period) && !a.is_debt)
                        .map(|(i, _)| i)
                        .take(1)
                        .collect();
                }
                self.route_surplus(to_route, &members, accounts, out);
            }
        }

        // 5. ISA limit enforcement across everything deposited above.
        self.enforce_isa_limit(accounts, period, isa, ctx, cfg, out);
    }

    fn route_surplus(
        &mut self,
        amount: f64,
        members: &[usize],
        accounts: &[AccountState],
        out: &mut AllocationOutcome,
    ) {
        if members.is_empty() || amount <= 0.0 {
            return;
        }
        let share = amount / members.len() as f64;
        for &index in members {
            out.deposit(index, &accounts[index], share);
            out.surplus_routed.push((index, share));
        }
    }

    /// Cap this period's ISA deposits at the remaining annual allowance,
    /// reducing each ISA deposit proportionally and redirecting the excess.
    fn enforce_isa_limit(
        &mut self,
        accounts: &[AccountState],
        period: u32,
        isa: &mut IsaTracker,
        ctx: &RetirementContext,
        cfg: &UkTaxConfig,
        out: &mut AllocationOutcome,
    ) {
        let isa_indices: Vec<usize> = accounts
            .iter()
            .enumerate()
            .filter(|(i, a)| a.is_isa() && out.adjustments[*i] > 0.0)
            .map(|(i, _)| i)
            .collect();
        let isa_total: f64 = isa_indices.iter().map(|&i| out.adjustments[i]).sum();
        if isa_total <= 0.0 {
            return;
        }

        let allowed = isa.remaining(cfg);
        let overflow = (isa_total - allowed).max(0.0);
        if overflow <= 0.0 {
            isa.record(isa_total);
            return;
        }

        let keep_factor = allowed / isa_total;
        for &index in &isa_indices {
            let account = &accounts[index];
            let cut = out.adjustments[index] * (1.0 - keep_factor);
            out.adjustments[index] -= cut;
            *out
                .allocations_by_class
                .entry(account.asset_class)
                .or_insert(0.0) -= cut;
            *out
                .allocations_by_account
                .entry(account.name.clone())
                .or_insert(0.0) -= cut;
            // Keep the goal tracker honest about what actually landed
            if let Some(tracked) = self.goal_balances.get_mut(&account.name) {
                *tracked -= cut;
            }
        }

        let redirect_class = self.isa_overflow_target(accounts, period, ctx);
        let message = format!(
            "ISA deposits of {isa_total:.2} exceed remaining allowance {allowed:.2}, \
             redirecting {overflow:.2} to {redirect_class:?}"
        );
        debug!("{message}");
        out.diagnostics.push(Diagnostic::new(
            DiagnosticKind::IsaOverflow,
            Some(period),
            message,
        ));

        // Redirect into non-ISA accounts of the chosen class so the
        // overflow cannot re-enter the wrapper.
        let mut members: Vec<usize> = self
            .class_members(accounts, period, redirect_class)
            .into_iter()
            .filter(|&i| !accounts[i].is_isa())
            .collect();
        if members.is_empty() {
            members = self
                .class_members(accounts, period, AssetClass::DefaultSavings)
                .into_iter()
                .filter(|&i| !accounts[i].is_isa())
                .collect();
        }
        self.deposit_equal(overflow, &members, accounts, out);

        isa.record(allowed);
    }

    /// Overflow target per the deposit rules: explicit zero on
    /// DefaultSavings means the user wants everything invested, so prefer
    /// investment classes that can actually take the money; otherwise cash.
    fn isa_overflow_target(
        &self,
        accounts: &[AccountState],
        period: u32,
        ctx: &RetirementContext,
    ) -> AssetClass {
        if self.config.explicitly_zero(AssetClass::DefaultSavings) {
            for class in [
                AssetClass::GeneralInvestment,
                AssetClass::Hysa,
                AssetClass::Pension,
            ] {
                if class == AssetClass::Pension && ctx.is_retired {
                    continue;
                }
                let has_unwrapped = self
                    .class_members(accounts, period, class)
                    .into_iter()
                    .any(|i| !accounts[i].is_isa());
                if has_unwrapped {
                    return class;
                }
            }
            AssetClass::GeneralInvestment
        } else {
            AssetClass::DefaultSavings
        }
    }

    // ---- liquidation path ----

    #[allow(clippy::too_many_arguments)]
    fn cover_deficit(
        &mut self,
        amount_needed: f64,
        accounts: &[AccountState],
        period: u32,
        pension: &mut PensionState,
        ctx: &RetirementContext,
        cfg: &UkTaxConfig,
        out: &mut AllocationOutcome,
    ) {
        let mut needed = amount_needed;

        // Phase 1: in retirement, draw the pension down first.
        let access_age = cfg.pension_access_age_in(ctx.calendar_year);
        let pension_drawn_in_phase1 = ctx.is_retired && ctx.age >= access_age;
        if pension_drawn_in_phase1 {
            needed -= self.drawdown_pension(needed, accounts, period, pension, ctx, cfg, out);
        }

        // Phase 2: standard priority order. Cash-like classes absorb the
        // whole remaining need (overdrafting if necessary); everything else
        // gives what it has.
        for class in AssetClass::LIQUIDATION_ORDER {
            if needed <= 1e-9 {
                needed = needed.max(0.0);
                break;
            }
            if class == AssetClass::Pension {
                if pension_drawn_in_phase1 || ctx.age < access_age {
                    continue;
                }
                needed -= self.drawdown_pension(needed, accounts, period, pension, ctx, cfg, out);
                continue;
            }

            let members = self.class_members(accounts, period, class);
            if members.is_empty() {
                continue;
            }

            if class.is_overdraftable() {
                self.liquidate_proportional(needed, &members, accounts, out);
                needed = 0.0;
            } else if class.is_cgt_subject() {
                needed -= self.liquidate_with_cgt(needed, &members, accounts, cfg, out);
            } else {
                let pool: f64 = members.iter().map(|&i| accounts[i].balance.max(0.0)).sum();
                let take = needed.min(pool);
                if take > 0.0 {
                    self.liquidate_proportional(take, &members, accounts, out);
                    if class == AssetClass::Hysa {
                        self.reduce_goal_balances(take, &members, accounts);
                    }
                    needed -= take;
                }
            }
        }

        out.deficit = needed.max(0.0);
    }

    /// Execute a net-target pension drawdown against the pension pool,
    /// decrementing pension accounts proportionally. Returns the net cash
    /// received.
    #[allow(clippy::too_many_arguments)]
    fn drawdown_pension(
        &mut self,
        needed: f64,
        accounts: &[AccountState],
        period: u32,
        pension: &mut PensionState,
        ctx: &RetirementContext,
        cfg: &UkTaxConfig,
        out: &mut AllocationOutcome,
    ) -> f64 {
        if needed <= 0.0 {
            return 0.0;
        }
        let members: Vec<usize> = self
            .class_members(accounts, period, AssetClass::Pension)
            .into_iter()
            .filter(|&i| accounts[i].balance > 0.0)
            .collect();
        let pool: f64 = members.iter().map(|&i| accounts[i].balance).sum();
        if pool <= 0.0 {
            return 0.0;
        }

        let wd = pension.withdraw_net_target(needed, pool, ctx.annual_employment_income, cfg);
        if wd.gross <= 0.0 {
            return 0.0;
        }
        self.liquidate_proportional(wd.gross, &members, accounts, out);
        out.pension_drawdown = Some(match out.pension_drawdown {
            Some(prior) => PensionWithdrawal {
                gross: prior.gross + wd.gross,
                tax_free: prior.tax_free + wd.tax_free,
                taxable: prior.taxable + wd.taxable,
                tax: prior.tax + wd.tax,
                net: prior.net + wd.net,
            },
            None => wd,
        });
        wd.net
    }

    /// Liquidate a gross amount across members proportionally to their
    /// current (positive) balances; if nothing is positive, the first
    /// member takes the whole draw (overdraft).
    fn liquidate_proportional(
        &mut self,
        amount: f64,
        members: &[usize],
        accounts: &[AccountState],
        out: &mut AllocationOutcome,
    ) {
        if members.is_empty() || amount <= 0.0 {
            return;
        }
        let pool: f64 = members.iter().map(|&i| accounts[i].balance.max(0.0)).sum();
        if pool <= 0.0 {
            out.liquidate(members[0], &accounts[members[0]], amount);
            return;
        }
        for &index in members {
            let share = accounts[index].balance.max(0.0) / pool;
            if share > 0.0 {
                out.liquidate(index, &accounts[index], amount * share);
            }
        }
    }

    /// Liquidate from a CGT-subject class: gross up the need by the
    /// estimated tax drag, charge CGT on the taxable (non-ISA) share, and
    /// return the net cash received.
    fn liquidate_with_cgt(
        &mut self,
        needed: f64,
        members: &[usize],
        accounts: &[AccountState],
        cfg: &UkTaxConfig,
        out: &mut AllocationOutcome,
    ) -> f64 {
        let pool: f64 = members.iter().map(|&i| accounts[i].balance.max(0.0)).sum();
        if pool <= 0.0 {
            return 0.0;
        }
        let isa_pool: f64 = members
            .iter()
            .filter(|&&i| accounts[i].is_isa())
            .map(|&i| accounts[i].balance.max(0.0))
            .sum();
        let taxable_ratio = 1.0 - (isa_pool / pool);

        let gross = (needed * self.cgt.gross_up_factor(taxable_ratio, cfg)).min(pool);
        let taxable_liquidation = gross * taxable_ratio;
        let tax = self.cgt.charge(taxable_liquidation, cfg);

        self.liquidate_proportional(gross, members, accounts, out);
        out.cgt_paid += tax;
        gross - tax
    }

    /// HYSA liquidations reduce the tracked savings-goal balances so the
    /// goals refill later
    fn reduce_goal_balances(&mut self, amount: f64, members: &[usize], accounts: &[AccountState]) {
        let pool: f64 = members.iter().map(|&i| accounts[i].balance.max(0.0)).sum();
        if pool <= 0.0 {
            return;
        }
        for &index in members {
            let account = &accounts[index];
            if let Some(tracked) = self.goal_balances.get_mut(&account.name) {
                let share = account.balance.max(0.0) / pool;
                *tracked = (*tracked - amount * share).max(0.0);
            }
        }
    }
}
