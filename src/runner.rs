//! Pre-configured scenario runner
//!
//! Owns a rule set once and runs any number of simulations against it.
//! Each simulation produces two isolated projections (baseline and
//! scenario) plus a solvency analysis for each.

use crate::engine::{ProjectionResult, SimulationEngine};
use crate::error::SimError;
use crate::model::{ScenarioRequest, SimClock};
use crate::rules::UkTaxConfig;
use crate::solvency::{self, SolvencyAnalysis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// One projection and its solvency analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub projection: ProjectionResult,
    pub solvency: SolvencyAnalysis,
}

/// The result of one simulation: baseline and scenario side by side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationOutput {
    pub baseline: RunOutput,
    pub scenario: RunOutput,
}

/// Pre-loaded runner for one rule set
///
/// # Example
/// ```ignore
/// let runner = ScenarioRunner::new();
/// let output = runner.simulate(&request, 30, None, None)?;
/// println!("solvent: {}", output.scenario.solvency.is_solvent);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScenarioRunner {
    cfg: UkTaxConfig,
}

impl ScenarioRunner {
    /// Runner with current UK rules
    pub fn new() -> Self {
        Self {
            cfg: UkTaxConfig::default(),
        }
    }

    /// Runner with overridden rules
    pub fn with_config(cfg: UkTaxConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &UkTaxConfig {
        &self.cfg
    }

    pub fn config_mut(&mut self) -> &mut UkTaxConfig {
        &mut self.cfg
    }

    /// Run baseline and scenario projections over a horizon of whole years.
    /// The clock starts at the given UTC year/month, defaulting to now.
    pub fn simulate(
        &self,
        request: &ScenarioRequest,
        years: u32,
        start_year: Option<i32>,
        start_month: Option<u32>,
    ) -> Result<SimulationOutput, SimError> {
        if years == 0 {
            return Err(SimError::invalid("years", "horizon must be at least 1 year"));
        }
        let clock = match (start_year, start_month) {
            (Some(year), Some(month)) => SimClock::new(year, month, years * 12),
            (Some(year), None) => SimClock::new(year, 1, years * 12),
            _ => SimClock::starting_now(years * 12),
        };

        let engine = SimulationEngine::new(&self.cfg, clock);
        let baseline = engine.run_baseline(&request.baseline)?;
        let scenario = engine.run_scenario(&request.baseline, &request.modifiers)?;

        Ok(SimulationOutput {
            baseline: RunOutput {
                solvency: solvency::analyze(&baseline, &clock),
                projection: baseline,
            },
            scenario: RunOutput {
                solvency: solvency::analyze(&scenario, &clock),
                projection: scenario,
            },
        })
    }

    /// Run many independent requests in parallel
    pub fn run_batch(
        &self,
        requests: &[ScenarioRequest],
        years: u32,
        start_year: Option<i32>,
        start_month: Option<u32>,
    ) -> Vec<Result<SimulationOutput, SimError>> {
        requests
            .par_iter()
            .map(|request| self.simulate(request, years, start_year, start_month))
            .collect()
    }
}
