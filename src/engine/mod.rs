//! Simulation engine: account evolution, allocation, modifier expansion,
//! and the period-loop driver

mod account_state;
mod allocator;
mod driver;
mod expand;
mod projection;

pub use account_state::{loan_duration_periods, AccountState, StepOutcome};
pub use allocator::{AllocationOutcome, Allocator, IsaTracker, RetirementContext};
pub use driver::SimulationEngine;
pub use expand::{expand_modifiers, match_account, validate_modifiers, ExpandedModifiers};
pub use projection::{
    CategoryBalance, PeriodBreakdown, ProjectionPoint, ProjectionResult, ProjectionSummary,
};
