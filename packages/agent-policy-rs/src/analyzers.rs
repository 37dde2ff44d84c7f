use std::collections::{BTreeSet, HashSet};

use crate::rules::{AnalyzerKind, CompiledRule};
use crate::types::{AgentAction, EvaluationContext, RiskCategory};

/// Partial result of one analyzer in the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Finding {
    pub analyzer: AnalyzerKind,
    /// 0..=5; zero means the analyzer saw nothing relevant.
    pub score: u8,
    pub categories: BTreeSet<RiskCategory>,
    /// Category of the strongest signal, used to explain denials.
    pub category: RiskCategory,
    /// Pattern class of the strongest signal. Never the matched text.
    pub class: String,
}

impl Finding {
    fn baseline(analyzer: AnalyzerKind, score: u8, category: RiskCategory, class: &str) -> Self {
        Self {
            analyzer,
            score,
            categories: BTreeSet::new(),
            category,
            class: class.to_string(),
        }
    }

    /// A catastrophic content match denies regardless of the configured threshold.
    pub fn is_hard_block(&self) -> bool {
        self.analyzer == AnalyzerKind::Content
            && self.score == 5
            && self.categories.contains(&RiskCategory::Security)
    }
}

pub(crate) trait RiskAnalyzer: Send + Sync {
    fn kind(&self) -> AnalyzerKind;
    fn analyze(&self, context: &EvaluationContext) -> Finding;
}

/// Scores a command against the rules owned by one analyzer.
pub(crate) struct PatternAnalyzer {
    kind: AnalyzerKind,
    baseline: u8,
    default_category: RiskCategory,
    rules: Vec<CompiledRule>,
}

impl PatternAnalyzer {
    pub fn new(
        kind: AnalyzerKind,
        baseline: u8,
        default_category: RiskCategory,
        rules: Vec<CompiledRule>,
    ) -> Self {
        Self {
            kind,
            baseline,
            default_category,
            rules,
        }
    }
}

impl RiskAnalyzer for PatternAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        self.kind
    }

    fn analyze(&self, context: &EvaluationContext) -> Finding {
        let mut finding = Finding::baseline(self.kind, self.baseline, self.default_category, "no match");
        let mut strongest = 0;

        for compiled in self.rules.iter().filter(|rule| rule.matches(&context.command)) {
            let rule = &compiled.rule;
            finding.categories.insert(rule.category);
            if rule.score > strongest {
                strongest = rule.score;
                finding.category = rule.category;
                finding.class = rule.class.clone();
            }
        }

        finding.score = finding.score.max(strongest);
        finding
    }
}

/// Pattern rules plus a structural check for chains of unrelated binaries.
pub(crate) struct SecurityAnalyzer {
    patterns: PatternAnalyzer,
}

impl SecurityAnalyzer {
    pub fn new(rules: Vec<CompiledRule>) -> Self {
        Self {
            patterns: PatternAnalyzer::new(AnalyzerKind::Security, 0, RiskCategory::Security, rules),
        }
    }
}

impl RiskAnalyzer for SecurityAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Security
    }

    fn analyze(&self, context: &EvaluationContext) -> Finding {
        let mut finding = self.patterns.analyze(context);

        let chain_score = match distinct_chained_binaries(&context.command) {
            0..=1 => 0,
            2 => 2,
            _ => 3,
        };
        if chain_score > 0 {
            finding.categories.insert(RiskCategory::Security);
            if chain_score > finding.score {
                finding.score = chain_score;
                finding.category = RiskCategory::Security;
                finding.class = "command chaining".to_string();
            }
        }

        finding
    }
}

/// Baseline risk of the requested action itself.
pub(crate) struct OperationalAnalyzer;

impl OperationalAnalyzer {
    pub fn baseline(action: AgentAction) -> u8 {
        match action {
            AgentAction::Status | AgentAction::Logs | AgentAction::Start => 1,
            AgentAction::Message | AgentAction::Restart | AgentAction::Stop | AgentAction::Other => 2,
            AgentAction::Deploy => 3,
        }
    }
}

impl RiskAnalyzer for OperationalAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Operational
    }

    fn analyze(&self, context: &EvaluationContext) -> Finding {
        let mut finding = Finding::baseline(
            AnalyzerKind::Operational,
            Self::baseline(context.action),
            RiskCategory::Operational,
            &format!("{} action", context.action),
        );
        finding.categories.insert(RiskCategory::Operational);
        finding
    }
}

/// Content, security, privacy, operational, in that order.
pub(crate) fn build_pipeline(rules: Vec<CompiledRule>) -> Vec<Box<dyn RiskAnalyzer>> {
    let mut content = Vec::new();
    let mut security = Vec::new();
    let mut privacy = Vec::new();
    for rule in rules {
        match rule.rule.analyzer {
            AnalyzerKind::Content => content.push(rule),
            AnalyzerKind::Security => security.push(rule),
            AnalyzerKind::Privacy => privacy.push(rule),
            AnalyzerKind::Operational => {}
        }
    }

    let mut pipeline: Vec<Box<dyn RiskAnalyzer>> = Vec::with_capacity(4);
    pipeline.push(Box::new(PatternAnalyzer::new(
        AnalyzerKind::Content,
        1,
        RiskCategory::Content,
        content,
    )));
    pipeline.push(Box::new(SecurityAnalyzer::new(security)));
    pipeline.push(Box::new(PatternAnalyzer::new(
        AnalyzerKind::Privacy,
        0,
        RiskCategory::Privacy,
        privacy,
    )));
    pipeline.push(Box::new(OperationalAnalyzer));
    pipeline
}

/// Counts distinct leading binaries across `&&`, `||` and `;` separated
/// segments, ignoring separators inside quotes.
fn distinct_chained_binaries(command: &str) -> usize {
    let mut binaries = HashSet::new();
    for segment in split_chain(command) {
        if let Some(binary) = leading_binary(&segment) {
            binaries.insert(binary);
        }
    }
    binaries.len()
}

fn split_chain(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = command.chars().peekable();

    while let Some(ch) = chars.next() {
        match quote {
            Some(open) => {
                if ch == open {
                    quote = None;
                }
                current.push(ch);
            }
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                ';' => segments.push(std::mem::take(&mut current)),
                '&' | '|' if chars.peek() == Some(&ch) => {
                    chars.next();
                    segments.push(std::mem::take(&mut current));
                }
                _ => current.push(ch),
            },
        }
    }
    segments.push(current);
    segments
}

fn leading_binary(segment: &str) -> Option<String> {
    segment
        .split_whitespace()
        .filter(|token| !token.contains('=') && *token != "sudo")
        .find(|token| !token.starts_with('-'))
        .map(|token| {
            let token = token.trim_matches(|ch: char| ch == '(' || ch == ')' || ch == '{' || ch == '}');
            token.rsplit('/').next().unwrap_or(token).to_ascii_lowercase()
        })
        .filter(|binary| !binary.is_empty())
}
