//! Agent registry: the configured vantage points that run probes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::db::{load_json, save_json, DbError, Persistence, KEY_AGENTS};

pub const DEFAULT_REGION: &str = "default";

/// Registry shared between the queue, the scheduler and the API.
pub type SharedRegistry = Arc<RwLock<AgentRegistry>>;

/// Per-agent HTTP settings that override the global probe defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpOverrides {
    pub url: Option<String>,
    pub method: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub timeout_seconds: Option<f64>,
    /// Text the response body must contain, matched case-insensitively.
    pub keyword: Option<String>,
    pub interval_seconds: Option<u64>,
}

/// A configured prober.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub http: HttpOverrides,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_active() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

impl Agent {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            label: id.to_string(),
            region: default_region(),
            active: true,
            weight: 1.0,
            http: HttpOverrides::default(),
        }
    }

    /// Weight usable in weighted math: non-finite and negative weights count as zero.
    pub fn effective_weight(&self) -> f64 {
        if self.weight.is_finite() && self.weight > 0.0 {
            self.weight
        } else {
            0.0
        }
    }

    fn sanitized(mut self) -> Self {
        self.weight = self.effective_weight();
        if self.label.trim().is_empty() {
            self.label = self.id.clone();
        }
        if self.region.trim().is_empty() {
            self.region = default_region();
        }
        self
    }
}

/// Agents keyed by id. Agents are deactivated, never removed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRegistry {
    agents: BTreeMap<String, Agent>,
}

impl AgentRegistry {
    pub fn new(agents: impl IntoIterator<Item = Agent>) -> Self {
        let mut registry = Self::default();
        for agent in agents {
            registry.upsert(agent);
        }
        registry
    }

    /// Parse an agent list, skipping entries that are not valid agents.
    pub fn from_json(blob: &str) -> Result<Self, DbError> {
        let raw: Vec<serde_json::Value> = serde_json::from_str(blob)?;
        Ok(Self::from_values(raw))
    }

    fn from_values(raw: Vec<serde_json::Value>) -> Self {
        let mut agents = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_value::<Agent>(value) {
                Ok(agent) if !agent.id.trim().is_empty() => agents.push(agent),
                Ok(_) => tracing::warn!("AgentRegistry: Skipping agent with empty id"),
                Err(e) => tracing::warn!("AgentRegistry: Skipping malformed agent: {}", e),
            }
        }
        Self::new(agents)
    }

    /// Read the agent list from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let blob = std::fs::read_to_string(path)?;
        Self::from_json(&blob)
    }

    pub fn load(store: &dyn Persistence) -> Self {
        load_json::<Vec<serde_json::Value>>(store, KEY_AGENTS)
            .map(Self::from_values)
            .unwrap_or_default()
    }

    pub fn save(&self, store: &dyn Persistence) -> Result<(), DbError> {
        let agents: Vec<&Agent> = self.agents.values().collect();
        save_json(store, KEY_AGENTS, &agents)
    }

    pub fn upsert(&mut self, agent: Agent) {
        let agent = agent.sanitized();
        self.agents.insert(agent.id.clone(), agent);
    }

    /// Flip an agent's active flag. Returns false for unknown agents.
    pub fn set_active(&mut self, id: &str, active: bool) -> bool {
        match self.agents.get_mut(id) {
            Some(agent) => {
                agent.active = active;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Agent> {
        self.agents.get(id)
    }

    /// The agent, only when it exists and is active.
    pub fn active(&self, id: &str) -> Option<&Agent> {
        self.agents.get(id).filter(|a| a.active)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active(id).is_some()
    }

    pub fn all(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub fn active_agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values().filter(|a| a.active)
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
