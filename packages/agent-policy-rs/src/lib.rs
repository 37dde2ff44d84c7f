//! Risk assessment for agent control operations.
//!
//! A [`PolicyEngine`] scores each proposed operation (start, stop, deploy, ...)
//! through a fixed pipeline of analyzers, decides allow/deny against a
//! configured threshold and records the outcome in an in-memory audit log.

mod analyzers;
mod audit;
mod config;
mod engine;
mod error;
mod rules;
mod types;

pub use audit::AuditLog;
pub use config::{
    AuditLevel, EngineConfig, DEFAULT_RISK_THRESHOLD, ENV_AUDIT_CAPACITY, ENV_AUDIT_LEVEL,
    ENV_RISK_THRESHOLD, ENV_RULES_FILE,
};
pub use engine::PolicyEngine;
pub use error::PolicyError;
pub use rules::{AnalyzerKind, RiskRule, RuleSet};
pub use types::{
    compliance_level, AgentAction, AuditEntry, EvaluationContext, PolicyStatistics,
    RiskAssessment, RiskCategory, MAX_RISK_LEVEL, MIN_RISK_LEVEL,
};
