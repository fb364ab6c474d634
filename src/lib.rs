//! finsim - Deterministic month-by-month UK personal-finance scenario simulator
//!
//! This library provides:
//! - Baseline and scenario projections over a multi-decade monthly horizon
//! - Compound account evolution with scheduled contributions and payoff semantics
//! - Surplus allocation and deficit liquidation under UK ISA and pension rules
//! - Scenario modifiers (one-off and recurring flows, new debts, rate and
//!   allocation changes, student loans) expanded into per-period effects
//! - UK income tax, NI, corporation tax, CGT, and pension drawdown rules
//! - Liquidity-aware solvency analysis distinct from net-worth deficit

pub mod engine;
pub mod error;
pub mod model;
pub mod rules;
pub mod runner;
pub mod solvency;

// Re-export commonly used types
pub use engine::{ProjectionPoint, ProjectionResult, SimulationEngine};
pub use error::{Diagnostic, DiagnosticKind, SimError};
pub use model::{
    Account, AllocationConfig, AssetClass, BaselineProfile, ScenarioModifier, ScenarioRequest,
    SimClock,
};
pub use rules::UkTaxConfig;
pub use runner::{RunOutput, ScenarioRunner, SimulationOutput};
pub use solvency::SolvencyAnalysis;
