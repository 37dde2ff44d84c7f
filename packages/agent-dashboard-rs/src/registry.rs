use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "__pycache__", "venv", ".venv", "target"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Idle,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub agent_type: String,
    pub status: AgentStatus,
    /// Name of the root directory the agent was discovered under, suffixed
    /// with `-2`, `-3`, ... when several roots share a name.
    pub source: String,
    pub location: String,
    pub script: String,
    pub last_seen: DateTime<Utc>,
}

impl Agent {
    /// tmux session the agent runs in.
    pub fn session(&self) -> &str {
        &self.id
    }
}

pub trait AgentRegistry: Send + Sync {
    fn agents(&self) -> Vec<Agent>;

    fn find(&self, id: &str) -> Option<Agent> {
        self.agents().into_iter().find(|agent| agent.id == id)
    }
}

/// Fixed agent list.
#[derive(Clone, Debug, Default)]
pub struct StaticRegistry {
    agents: Vec<Agent>,
}

impl StaticRegistry {
    pub fn new(agents: Vec<Agent>) -> Self {
        Self { agents }
    }
}

impl AgentRegistry for StaticRegistry {
    fn agents(&self) -> Vec<Agent> {
        self.agents.clone()
    }
}

struct Snapshot {
    scanned_at: Instant,
    agents: Vec<Agent>,
}

/// Discovers agent scripts under a set of root directories and caches the
/// result for `refresh_interval`.
pub struct DirectoryRegistry {
    roots: Vec<PathBuf>,
    active_window: Duration,
    refresh_interval: Duration,
    cache: Mutex<Option<Snapshot>>,
}

impl DirectoryRegistry {
    pub fn new(roots: Vec<PathBuf>, active_window: Duration, refresh_interval: Duration) -> Self {
        Self {
            roots,
            active_window,
            refresh_interval,
            cache: Mutex::new(None),
        }
    }

    pub fn scan(&self) -> Vec<Agent> {
        let now = SystemTime::now();
        let mut agents = Vec::new();
        let mut sources: HashSet<String> = HashSet::new();

        for root in &self.roots {
            if !root.is_dir() {
                warn!(root = %root.display(), "agent root missing; skipping");
                continue;
            }
            let source = unique_source(root, &mut sources);
            agents.extend(self.scan_root(root, &source, now));
        }

        info!(agents = agents.len(), roots = self.roots.len(), "agent discovery complete");
        agents
    }

    fn scan_root(&self, root: &Path, source: &str, now: SystemTime) -> Vec<Agent> {
        let mut counters: HashMap<String, usize> = HashMap::new();
        let mut agents = Vec::new();

        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_skipped_dir(entry));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    debug!(root = %root.display(), %error, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(agent_type) = entry.file_name().to_str().and_then(agent_type_of) else {
                continue;
            };

            let counter = counters.entry(agent_type.clone()).or_insert(0);
            *counter += 1;

            let modified = entry
                .metadata()
                .ok()
                .and_then(|metadata| metadata.modified().ok())
                .unwrap_or(now);
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            let status = if age <= self.active_window {
                AgentStatus::Active
            } else {
                AgentStatus::Idle
            };

            let path = entry.path();
            agents.push(Agent {
                id: format!("{source}-{agent_type}-{counter}"),
                name: format!("AI {} Agent", agent_type.to_uppercase()),
                agent_type,
                status,
                source: source.to_string(),
                location: path
                    .parent()
                    .unwrap_or(root)
                    .display()
                    .to_string(),
                script: path.display().to_string(),
                last_seen: DateTime::<Utc>::from(modified),
            });
        }

        agents
    }
}

impl AgentRegistry for DirectoryRegistry {
    fn agents(&self) -> Vec<Agent> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let stale = cache
            .as_ref()
            .map_or(true, |snapshot| snapshot.scanned_at.elapsed() >= self.refresh_interval);
        if stale {
            *cache = Some(Snapshot {
                scanned_at: Instant::now(),
                agents: self.scan(),
            });
        }
        cache
            .as_ref()
            .map(|snapshot| snapshot.agents.clone())
            .unwrap_or_default()
    }
}

/// Root directory name, suffixed with `-2`, `-3`, ... when another root already
/// claimed it, so agent ids stay unique across roots.
fn unique_source(root: &Path, taken: &mut HashSet<String>) -> String {
    let base = root
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("agents")
        .to_ascii_lowercase();
    let mut candidate = base.clone();
    let mut suffix = 1;
    while !taken.insert(candidate.clone()) {
        suffix += 1;
        candidate = format!("{base}-{suffix}");
    }
    candidate
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

/// `ai-qa-agent-real.py` is a `qa` agent, `simple-dev-daemon.py` a `dev` one.
fn agent_type_of(file_name: &str) -> Option<String> {
    let stem = file_name.strip_suffix(".py")?.to_ascii_lowercase();
    let kind = if let Some(index) = stem.find("-agent") {
        let head = &stem[..index];
        head.strip_prefix("ai-").unwrap_or(head).to_string()
    } else if let Some(head) = stem.strip_suffix("-daemon") {
        head.rsplit('-').next().unwrap_or(head).to_string()
    } else {
        return None;
    };
    (!kind.is_empty()).then_some(kind)
}
