//! Inspection orchestrator: map-reduce execution of skills over device
//! sets.

mod catalog;
mod criteria;
mod plan;
mod report;
mod runner;
mod skill;

pub use catalog::SkillCatalog;
pub use criteria::{CmpOp, Criterion, EvalContext, Expr, Severity};
pub use plan::{InspectionPlan, prepare};
pub use report::{
    DeviceSummary, InspectionReport, RenderedReport, ReportAggregate, Tier, reduce,
};
pub use runner::InspectionRunner;
pub use skill::{ParamKind, ParameterSpec, Skill, SkillStep, parse_skill_file};
