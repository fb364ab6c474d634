//! finsim CLI
//!
//! Runs a scenario file through the simulator and prints baseline and
//! scenario projections side by side, with optional CSV export.

use anyhow::Context;
use clap::Parser;
use finsim::model::loader::load_scenario;
use finsim::runner::{RunOutput, ScenarioRunner};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "finsim", about = "UK personal-finance scenario simulator")]
struct Args {
    /// Scenario request JSON file
    #[arg(long)]
    scenario: PathBuf,

    /// Projection horizon in years
    #[arg(long, default_value_t = 30)]
    years: u32,

    /// Simulation start year (defaults to the current UTC year)
    #[arg(long)]
    start_year: Option<i32>,

    /// Simulation start month, 1-12 (defaults to the current UTC month)
    #[arg(long)]
    start_month: Option<u32>,

    /// Write the scenario projection to a CSV file
    #[arg(long)]
    export: Option<PathBuf>,

    /// Number of months to print per run
    #[arg(long, default_value_t = 24)]
    print_months: usize,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let request = load_scenario(&args.scenario)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("loading scenario from {}", args.scenario.display()))?;

    println!("finsim v{}", env!("CARGO_PKG_VERSION"));
    println!("==========\n");
    println!("Baseline: {} accounts, gross income {:.2}/mo, expenses {:.2}/mo",
        request.baseline.accounts.len(),
        request.baseline.monthly_income,
        request.baseline.monthly_expenses,
    );
    println!("Modifiers: {}\n", request.modifiers.len());

    let runner = ScenarioRunner::new();
    let output = runner
        .simulate(&request, args.years, args.start_year, args.start_month)
        .context("simulation failed")?;

    print_run("Baseline", &output.baseline, args.print_months);
    print_run("Scenario", &output.scenario, args.print_months);

    if let Some(path) = &args.export {
        export_csv(path, &output.scenario)?;
        println!("Scenario projection written to {}", path.display());
    }

    Ok(())
}

fn print_run(label: &str, run: &RunOutput, print_months: usize) {
    let summary = run.projection.summary();
    println!("{label} ({} months):", summary.total_months);
    println!(
        "{:>5} {:>14} {:>12} {:>12} {:>12} {:>12}",
        "Month", "Net Worth", "Cash Flow", "Income", "Tax", "Surplus"
    );
    println!("{}", "-".repeat(72));
    for point in run.projection.points.iter().take(print_months) {
        println!(
            "{:>5} {:>14.2} {:>12.2} {:>12.2} {:>12.2} {:>12.2}",
            point.period,
            point.net_worth,
            point.cash_flow,
            point.breakdown.gross_income,
            point.breakdown.income_tax + point.breakdown.national_insurance,
            point.breakdown.surplus_cash.unwrap_or(0.0),
        );
    }
    println!();
    println!(
        "  Final net worth: {:.2}  (min {:.2})",
        summary.final_net_worth, summary.min_net_worth
    );
    let solvency = &run.solvency;
    if solvency.is_solvent {
        println!("  Solvent; average monthly surplus {:.2}", solvency.monthly_surplus_avg);
    } else {
        println!(
            "  INSOLVENT: max cash shortfall {:.2}, liquidity at worst {:.2}, fixable: {}",
            solvency.max_cash_shortfall,
            solvency.available_liquidity_at_worst,
            solvency.can_fix_with_liquidation
        );
        if let Some(date) = &solvency.first_deficit_date {
            println!("  First net-worth deficit: {date}");
        }
    }
    if !run.projection.diagnostics.is_empty() {
        println!("  Diagnostics:");
        for diagnostic in &run.projection.diagnostics {
            println!("    [{:?}] {}", diagnostic.kind, diagnostic.message);
        }
    }
    println!();
}

fn export_csv(path: &std::path::Path, run: &RunOutput) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record([
        "period",
        "net_worth",
        "cash_flow",
        "gross_income",
        "expenses",
        "income_tax",
        "national_insurance",
        "corporation_tax",
        "capital_gains_tax",
        "contributions",
        "surplus_cash",
        "total_assets",
        "total_debts",
    ])?;
    for point in &run.projection.points {
        let b = &point.breakdown;
        writer.write_record([
            point.period.to_string(),
            format!("{:.2}", point.net_worth),
            format!("{:.2}", point.cash_flow),
            format!("{:.2}", b.gross_income),
            format!("{:.2}", b.expenses),
            format!("{:.2}", b.income_tax),
            format!("{:.2}", b.national_insurance),
            format!("{:.2}", b.corporation_tax),
            format!("{:.2}", b.capital_gains_tax),
            format!("{:.2}", b.account_contributions),
            b.surplus_cash
                .map(|s| format!("{s:.2}"))
                .unwrap_or_default(),
            format!("{:.2}", b.total_assets),
            format!("{:.2}", b.total_debts),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
