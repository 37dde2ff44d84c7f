use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

pub const MIN_RISK_LEVEL: u8 = 1;
pub const MAX_RISK_LEVEL: u8 = 5;

/// Semantic operation requested against an agent. Unrecognised input maps to `Other`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgentAction {
    Start,
    Stop,
    Restart,
    Deploy,
    Status,
    Logs,
    Message,
    #[default]
    Other,
}

impl AgentAction {
    pub const ALL: [AgentAction; 8] = [
        AgentAction::Start,
        AgentAction::Stop,
        AgentAction::Restart,
        AgentAction::Deploy,
        AgentAction::Status,
        AgentAction::Logs,
        AgentAction::Message,
        AgentAction::Other,
    ];

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "start" => AgentAction::Start,
            "stop" => AgentAction::Stop,
            "restart" => AgentAction::Restart,
            "deploy" => AgentAction::Deploy,
            "status" => AgentAction::Status,
            "logs" => AgentAction::Logs,
            "message" => AgentAction::Message,
            _ => AgentAction::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentAction::Start => "start",
            AgentAction::Stop => "stop",
            AgentAction::Restart => "restart",
            AgentAction::Deploy => "deploy",
            AgentAction::Status => "status",
            AgentAction::Logs => "logs",
            AgentAction::Message => "message",
            AgentAction::Other => "other",
        }
    }
}

impl From<String> for AgentAction {
    fn from(value: String) -> Self {
        AgentAction::parse(&value)
    }
}

impl From<AgentAction> for String {
    fn from(action: AgentAction) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for AgentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskCategory {
    Operational,
    Security,
    Privacy,
    Content,
}

impl RiskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Operational => "operational",
            RiskCategory::Security => "security",
            RiskCategory::Privacy => "privacy",
            RiskCategory::Content => "content",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `(command, agentId, action)` tuple submitted for assessment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub action: AgentAction,
}

impl EvaluationContext {
    pub fn new(
        command: impl Into<String>,
        agent_id: impl Into<String>,
        action: AgentAction,
    ) -> Self {
        Self {
            command: command.into(),
            agent_id: agent_id.into(),
            action,
        }
    }

    /// Builds a context from an untyped request body. Never fails: non-string
    /// fields collapse to their safest value (empty command, `other` action).
    pub fn from_json(value: &Value) -> Self {
        let agent_id = string_field(value, "agentId").or_else(|| string_field(value, "agent_id"));
        Self {
            command: string_field(value, "command").unwrap_or_default().to_string(),
            agent_id: agent_id.unwrap_or_default().to_string(),
            action: string_field(value, "action")
                .map(AgentAction::parse)
                .unwrap_or(AgentAction::Other),
        }
    }
}

fn string_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub allowed: bool,
    pub risk_level: u8,
    pub compliance_level: u8,
    pub categories: BTreeSet<RiskCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    #[serde(default)]
    pub hard_blocked: bool,
    pub audit_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub context: EvaluationContext,
    pub assessment: RiskAssessment,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatistics {
    pub total_assessments: usize,
    pub allowed_operations: usize,
    pub denied_operations: usize,
    pub average_risk_level: f64,
    pub average_compliance_level: f64,
    pub last_assessment_timestamp: Option<DateTime<Utc>>,
    pub evicted_entries: u64,
}

impl Default for PolicyStatistics {
    fn default() -> Self {
        Self {
            total_assessments: 0,
            allowed_operations: 0,
            denied_operations: 0,
            average_risk_level: 0.0,
            average_compliance_level: 0.0,
            last_assessment_timestamp: None,
            evicted_entries: 0,
        }
    }
}

/// `100 - (risk - 1) * 20`, with the risk level clamped to 1..=5 first.
pub fn compliance_level(risk_level: u8) -> u8 {
    let risk = i32::from(risk_level.clamp(MIN_RISK_LEVEL, MAX_RISK_LEVEL));
    (100 - (risk - 1) * 20).clamp(0, 100) as u8
}
