use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::analyzers::{build_pipeline, Finding, RiskAnalyzer};
use crate::audit::AuditLog;
use crate::config::{AuditLevel, EngineConfig};
use crate::error::PolicyError;
use crate::rules::{sha256_hex, AnalyzerKind};
use crate::types::{
    compliance_level, AgentAction, AuditEntry, EvaluationContext, PolicyStatistics,
    RiskAssessment, RiskCategory, MAX_RISK_LEVEL, MIN_RISK_LEVEL,
};

const AUDIT_ID_PREFIX: &str = "audit";

/// Scores agent control operations and keeps the audit trail of every decision.
///
/// Share one instance per process behind an `Arc`; scoring runs without locks
/// and only the audit append and the readers serialize on the log mutex.
pub struct PolicyEngine {
    config: EngineConfig,
    fingerprint: String,
    pipeline: Vec<Box<dyn RiskAnalyzer>>,
    audit: Mutex<AuditLog>,
}

impl PolicyEngine {
    pub fn new(config: EngineConfig) -> Result<Self, PolicyError> {
        config.validate()?;
        let compiled = config.rules.compile()?;
        let fingerprint = config.rules.fingerprint();

        info!(
            risk_threshold = config.risk_threshold,
            audit_level = %config.audit_level,
            rules = compiled.len(),
            fingerprint = %fingerprint,
            "policy engine ready"
        );

        Ok(Self {
            audit: Mutex::new(AuditLog::new(config.audit_capacity)),
            pipeline: build_pipeline(compiled),
            fingerprint,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ruleset_fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Always returns a decision. Denial is a normal outcome, not an error.
    pub fn assess(&self, context: EvaluationContext) -> RiskAssessment {
        let findings = self.score(&context);

        let risk_level = findings
            .iter()
            .map(|finding| finding.score)
            .max()
            .unwrap_or(MIN_RISK_LEVEL)
            .clamp(MIN_RISK_LEVEL, MAX_RISK_LEVEL);
        let hard_blocked = findings.iter().any(Finding::is_hard_block);
        let allowed = risk_level <= self.config.risk_threshold && !hard_blocked;

        let mut categories = BTreeSet::from([RiskCategory::Operational]);
        for finding in findings.iter().filter(|finding| finding.score >= 2) {
            categories.extend(finding.categories.iter().copied());
        }

        let (reason, suggestions) = if allowed {
            (None, None)
        } else {
            let dominant = dominant_finding(&findings);
            (
                Some(self.denial_reason(dominant, risk_level, hard_blocked)),
                Some(remediation_hints(dominant, context.action, hard_blocked)),
            )
        };

        let assessment = RiskAssessment {
            allowed,
            risk_level,
            compliance_level: compliance_level(risk_level),
            categories,
            reason,
            suggestions,
            hard_blocked,
            audit_id: generate_audit_id(),
        };

        if allowed {
            debug!(
                audit_id = %assessment.audit_id,
                agent_id = %context.agent_id,
                action = %context.action,
                risk_level,
                "operation allowed"
            );
        } else {
            warn!(
                audit_id = %assessment.audit_id,
                agent_id = %context.agent_id,
                action = %context.action,
                risk_level,
                hard_blocked,
                "operation denied by policy"
            );
        }

        self.record(context, &assessment);
        assessment
    }

    pub fn statistics(&self) -> PolicyStatistics {
        self.lock_audit().statistics()
    }

    /// Most recent first. Each call returns an independent snapshot.
    pub fn audit_log(&self, limit: Option<usize>) -> Vec<AuditEntry> {
        self.lock_audit().list(limit)
    }

    fn score(&self, context: &EvaluationContext) -> Vec<Finding> {
        if context.command.trim().is_empty() {
            return vec![Finding {
                analyzer: AnalyzerKind::Operational,
                score: MIN_RISK_LEVEL,
                categories: BTreeSet::from([RiskCategory::Operational]),
                category: RiskCategory::Operational,
                class: "empty command".to_string(),
            }];
        }

        self.pipeline
            .iter()
            .map(|analyzer| {
                let finding = analyzer.analyze(context);
                trace!(analyzer = %analyzer.kind(), score = finding.score, "analyzer finding");
                finding
            })
            .collect()
    }

    fn record(&self, mut context: EvaluationContext, assessment: &RiskAssessment) {
        if self.config.audit_level == AuditLevel::Minimal && !context.command.is_empty() {
            context.command = format!("sha256:{}", sha256_hex(&context.command));
        }

        let mut audit = self.lock_audit();
        audit.push(AuditEntry {
            id: assessment.audit_id.clone(),
            timestamp: Utc::now(),
            context,
            assessment: assessment.clone(),
        });
    }

    fn denial_reason(&self, dominant: &Finding, risk_level: u8, hard_blocked: bool) -> String {
        if hard_blocked {
            format!(
                "{} risk ({}) is blocked regardless of the configured threshold",
                dominant.category, dominant.class
            )
        } else {
            format!(
                "{} risk ({}) scored {risk_level}/{MAX_RISK_LEVEL}, above the configured threshold of {}",
                dominant.category, dominant.class, self.config.risk_threshold
            )
        }
    }

    // A panic while holding the lock cannot leave a torn entry behind, so a
    // poisoned log is still safe to use.
    fn lock_audit(&self) -> MutexGuard<'_, AuditLog> {
        self.audit.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Highest score wins; ties go to the earlier analyzer in the pipeline.
fn dominant_finding(findings: &[Finding]) -> &Finding {
    let mut dominant = &findings[0];
    for finding in &findings[1..] {
        if finding.score > dominant.score {
            dominant = finding;
        }
    }
    dominant
}

fn remediation_hints(dominant: &Finding, action: AgentAction, hard_blocked: bool) -> Vec<String> {
    let mut hints = Vec::new();
    if hard_blocked {
        hints.push(
            "Destructive system commands are blocked at every threshold; run them manually under change control"
                .to_string(),
        );
    }

    match dominant.category {
        RiskCategory::Security => {
            hints.push("Review command for injection patterns before resubmitting".to_string());
            hints.push(
                "Remove chained network calls and never pipe downloaded content into an interpreter"
                    .to_string(),
            );
        }
        RiskCategory::Privacy => {
            hints.push(
                "Avoid printing secrets or reading credential files from agent commands".to_string(),
            );
            hints.push("Reference credentials through the secret manager instead".to_string());
        }
        RiskCategory::Content => {
            hints.push(
                "Narrow destructive operations to explicit, non-system targets".to_string(),
            );
        }
        RiskCategory::Operational => {
            hints.push(format!(
                "Schedule the {action} operation in a maintenance window or ask an operator to raise the risk threshold"
            ));
        }
    }

    hints
}

fn generate_audit_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{AUDIT_ID_PREFIX}_{}_{}",
        Utc::now().timestamp_millis(),
        &suffix[..12]
    )
}
