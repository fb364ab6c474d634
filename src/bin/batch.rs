//! Batch-run every scenario JSON in a directory
//!
//! Prints a one-line solvency summary per scenario. Runs are independent
//! and execute in parallel.

use anyhow::Context;
use finsim::model::loader::load_scenario;
use finsim::runner::ScenarioRunner;
use rayon::prelude::*;
use std::path::PathBuf;
use std::time::Instant;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let dir = PathBuf::from(args.next().context("usage: batch <scenario-dir> [years]")?);
    let years: u32 = args.next().map(|y| y.parse()).transpose()?.unwrap_or(30);

    let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
        .collect();
    paths.sort();

    println!("Running {} scenarios over {years} years...", paths.len());
    let start = Instant::now();

    let results: Vec<(PathBuf, String)> = paths
        .par_iter()
        .map(|path| {
            let line = match load_scenario(path) {
                Ok(request) => {
                    let runner = ScenarioRunner::new();
                    match runner.simulate(&request, years, None, None) {
                        Ok(output) => {
                            let solvency = &output.scenario.solvency;
                            format!(
                                "solvent={} min_net_worth={:.0} surplus_avg={:.0} shortfall={:.0}",
                                solvency.is_solvent,
                                solvency.min_net_worth,
                                solvency.monthly_surplus_avg,
                                solvency.max_cash_shortfall,
                            )
                        }
                        Err(e) => format!("ERROR: {e}"),
                    }
                }
                Err(e) => format!("LOAD ERROR: {e}"),
            };
            (path.clone(), line)
        })
        .collect();

    for (path, line) in &results {
        println!(
            "{:<40} {}",
            path.file_name().unwrap_or_default().to_string_lossy(),
            line
        );
    }
    println!("Done in {:?}", start.elapsed());

    Ok(())
}
