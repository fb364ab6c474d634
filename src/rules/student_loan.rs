//! Income-contingent student loan repayment

use super::UkTaxConfig;
use crate::model::StudentLoanPlan;
use serde::{Deserialize, Serialize};

/// Repayment terms for one loan plan
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlanTerms {
    pub annual_threshold: f64,
    pub repayment_rate: f64,
}

/// Monthly repayment: 9% of salary above the plan's monthly threshold.
/// Recomputed every period from the salary in force, so a salary change or
/// quitting a job changes the repayment immediately.
pub fn monthly_student_loan_repayment(
    cfg: &UkTaxConfig,
    plan: StudentLoanPlan,
    monthly_salary: f64,
) -> f64 {
    let terms = cfg.plan_terms(plan);
    (monthly_salary - terms.annual_threshold / 12.0).max(0.0) * terms.repayment_rate
}
