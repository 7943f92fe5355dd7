use crate::agent::Agent;
use crate::agent::tools::ToolRegistry;
use crate::error::{AgentError, ErrorKind, MemoryError};
use crate::llm::ChatModel;
use crate::memory::{MemoryStore, SessionMemory};
use crate::prompts::AGENT_SYSTEM_PROMPT;
use crate::response::{ProcessedResponse, ToolUsage, process_agent_response};
use crate::sanitize::{sanitize_input, spawn_sanitizing_relay};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How victims are chosen once the live-session ceiling is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Lexicographically smallest keys go first. Kept for compatibility:
    /// with random keys this is unrelated to age.
    #[default]
    KeyOrder,
    /// Earliest-created sessions go first.
    OldestCreated,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::KeyOrder => "key_order",
            EvictionPolicy::OldestCreated => "oldest_created",
        }
    }

    pub fn select_victims(&self, live: &[LiveSession], ceiling: usize, protect: &str) -> Vec<String> {
        match self {
            EvictionPolicy::KeyOrder => evict_by_key_order(live, ceiling, protect),
            EvictionPolicy::OldestCreated => evict_oldest_created(live, ceiling, protect),
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "key_order" => Ok(EvictionPolicy::KeyOrder),
            "oldest_created" => Ok(EvictionPolicy::OldestCreated),
            other => Err(format!("unknown eviction policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSession {
    pub key: String,
    pub created_seq: u64,
}

fn surplus(live: &[LiveSession], ceiling: usize) -> usize {
    live.len().saturating_sub(ceiling)
}

/// Evicts the smallest keys in sort order until `ceiling` remain.
/// `protect` is never chosen.
pub fn evict_by_key_order(live: &[LiveSession], ceiling: usize, protect: &str) -> Vec<String> {
    let n = surplus(live, ceiling);
    let mut keys: Vec<&str> = live
        .iter()
        .map(|s| s.key.as_str())
        .filter(|k| *k != protect)
        .collect();
    keys.sort_unstable();
    keys.into_iter().take(n).map(str::to_string).collect()
}

/// Evicts the earliest-created sessions until `ceiling` remain.
/// `protect` is never chosen.
pub fn evict_oldest_created(live: &[LiveSession], ceiling: usize, protect: &str) -> Vec<String> {
    let n = surplus(live, ceiling);
    let mut sessions: Vec<&LiveSession> = live.iter().filter(|s| s.key != protect).collect();
    sessions.sort_by_key(|s| s.created_seq);
    sessions.into_iter().take(n).map(|s| s.key.clone()).collect()
}

pub struct SessionSlot {
    pub agent: Arc<Agent>,
    pub created_seq: u64,
    pub created_at: DateTime<Utc>,
    turn_lock: Mutex<()>,
}

pub struct Resolved {
    pub slot: Arc<SessionSlot>,
    pub created: bool,
    pub evicted: Vec<String>,
}

/// Bounded map from session key to its agent.
pub trait SessionTable: Send + Sync {
    fn get(&self, key: &str) -> Option<Arc<SessionSlot>>;

    /// Returns the slot for `key`, building it with `make` when absent and
    /// evicting other sessions if the table grows past its ceiling.
    fn get_or_insert_with(&self, key: &str, make: &mut dyn FnMut() -> Arc<Agent>) -> Resolved;

    fn remove(&self, key: &str) -> Option<Arc<SessionSlot>>;

    fn live(&self) -> Vec<LiveSession>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct InMemorySessionTable {
    ceiling: usize,
    policy: EvictionPolicy,
    next_seq: AtomicU64,
    slots: RwLock<HashMap<String, Arc<SessionSlot>>>,
}

impl InMemorySessionTable {
    pub fn new(ceiling: usize, policy: EvictionPolicy) -> Self {
        Self {
            ceiling: ceiling.max(1),
            policy,
            next_seq: AtomicU64::new(0),
            slots: RwLock::new(HashMap::new()),
        }
    }
}

impl SessionTable for InMemorySessionTable {
    fn get(&self, key: &str) -> Option<Arc<SessionSlot>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn get_or_insert_with(&self, key: &str, make: &mut dyn FnMut() -> Arc<Agent>) -> Resolved {
        if let Some(slot) = self.get(key) {
            return Resolved {
                slot,
                created: false,
                evicted: vec![],
            };
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get(key) {
            return Resolved {
                slot: slot.clone(),
                created: false,
                evicted: vec![],
            };
        }

        let slot = Arc::new(SessionSlot {
            agent: make(),
            created_seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            created_at: Utc::now(),
            turn_lock: Mutex::new(()),
        });
        slots.insert(key.to_string(), slot.clone());

        let mut evicted = Vec::new();
        if slots.len() > self.ceiling {
            let live: Vec<LiveSession> = slots
                .iter()
                .map(|(k, s)| LiveSession {
                    key: k.clone(),
                    created_seq: s.created_seq,
                })
                .collect();
            for victim in self.policy.select_victims(&live, self.ceiling, key) {
                slots.remove(&victim);
                evicted.push(victim);
            }
        }

        Resolved {
            slot,
            created: true,
            evicted,
        }
    }

    fn remove(&self, key: &str) -> Option<Arc<SessionSlot>> {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    fn live(&self) -> Vec<LiveSession> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, s)| LiveSession {
                key: k.clone(),
                created_seq: s.created_seq,
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Outcome of one turn. Failures are reported here rather than as errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,
    pub tool_usage: Vec<ToolUsage>,
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ExecutionResult {
    pub fn success(processed: ProcessedResponse) -> Self {
        Self {
            output: processed.output,
            tool_usage: processed.tool_usage,
            error: false,
            error_kind: None,
        }
    }

    pub fn failure(err: &AgentError) -> Self {
        Self {
            output: format!("Error: {}", err),
            tool_usage: vec![],
            error: true,
            error_kind: Some(err.kind()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Token(String),
    Completed(ExecutionResult),
    Failed(ExecutionResult),
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub system_prompt: String,
    pub max_iterations: usize,
    pub max_active: usize,
    pub eviction_policy: EvictionPolicy,
    /// Use similarity recall with this many turns instead of full history.
    pub recall_k: Option<usize>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            system_prompt: AGENT_SYSTEM_PROMPT.to_string(),
            max_iterations: 5,
            max_active: 100,
            eviction_policy: EvictionPolicy::default(),
            recall_k: None,
        }
    }
}

/// Owns the session table and drives turns against per-session agents.
pub struct SessionManager {
    settings: SessionSettings,
    llm: Arc<dyn ChatModel>,
    memory: Arc<dyn MemoryStore>,
    tools: ToolRegistry,
    table: Arc<dyn SessionTable>,
}

impl SessionManager {
    pub fn new(
        settings: SessionSettings,
        llm: Arc<dyn ChatModel>,
        memory: Arc<dyn MemoryStore>,
        tools: ToolRegistry,
    ) -> Self {
        let table = Arc::new(InMemorySessionTable::new(
            settings.max_active,
            settings.eviction_policy,
        ));
        Self::with_table(settings, llm, memory, tools, table)
    }

    pub fn with_table(
        settings: SessionSettings,
        llm: Arc<dyn ChatModel>,
        memory: Arc<dyn MemoryStore>,
        tools: ToolRegistry,
        table: Arc<dyn SessionTable>,
    ) -> Self {
        Self {
            settings,
            llm,
            memory,
            tools,
            table,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    fn build_agent(&self, key: &str) -> Arc<Agent> {
        let memory = SessionMemory::new(self.memory.clone(), key);
        let mut agent = Agent::new(
            self.llm.clone(),
            self.settings.system_prompt.clone(),
            self.tools.list(),
            memory,
        )
        .with_max_iterations(self.settings.max_iterations);
        if let Some(k) = self.settings.recall_k {
            agent = agent.with_recall(k);
        }
        Arc::new(agent)
    }

    fn resolve(&self, key: Option<&str>) -> (String, Arc<SessionSlot>) {
        let key = key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let resolved = self
            .table
            .get_or_insert_with(&key, &mut || self.build_agent(&key));
        if resolved.created {
            info!(session = %key, live = self.table.len(), "Created session agent");
        }
        for victim in &resolved.evicted {
            info!(session = %victim, policy = %self.settings.eviction_policy, "Evicted session agent");
        }
        (key, resolved.slot)
    }

    /// Returns the agent for `key`, creating it (and a key, if none is given)
    /// on first contact. Existing agents are returned unchanged.
    pub fn get_or_create(&self, key: Option<&str>) -> (String, Arc<Agent>) {
        let (key, slot) = self.resolve(key);
        (key, slot.agent.clone())
    }

    fn finish(key: &str, outcome: Result<ProcessedResponse, AgentError>) -> ExecutionResult {
        match outcome {
            Ok(processed) => {
                debug!(session = %key, tools = processed.tool_usage.len(), "Turn completed");
                ExecutionResult::success(processed)
            }
            Err(AgentError::Cancelled) => {
                warn!(session = %key, "Turn cancelled");
                ExecutionResult::failure(&AgentError::Cancelled)
            }
            Err(e) => {
                error!(session = %key, "Error executing agent: {}", e);
                ExecutionResult::failure(&e)
            }
        }
    }

    /// Runs one turn. Never fails: errors come back flagged in the result.
    pub async fn execute(&self, input: &str, key: Option<&str>) -> (String, ExecutionResult) {
        let input = sanitize_input(input);
        let (key, slot) = self.resolve(key);

        let outcome = {
            let _turn = slot.turn_lock.lock().await;
            slot.agent.step(&input, None).await
        };
        let result = Self::finish(&key, outcome.and_then(process_agent_response));
        (key, result)
    }

    /// Runs one turn, delivering sanitized text deltas to `tokens` in
    /// generation order. Every delta is delivered before this returns.
    ///
    /// Cancelling `cancel` or dropping the receiving end of `tokens` aborts
    /// the in-flight model call.
    pub async fn execute_streaming(
        &self,
        input: &str,
        key: Option<&str>,
        tokens: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> (String, ExecutionResult) {
        let input = sanitize_input(input);
        let (key, slot) = self.resolve(key);
        let (raw_tx, relay) = spawn_sanitizing_relay(tokens);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            outcome = async {
                let _turn = slot.turn_lock.lock().await;
                slot.agent.step(&input, Some(&raw_tx)).await
            } => outcome,
        };

        drop(raw_tx);
        if let Err(e) = relay.await {
            warn!(session = %key, "Token relay ended abnormally: {}", e);
        }

        let result = Self::finish(&key, outcome.and_then(process_agent_response));
        (key, result)
    }

    /// Starts a turn in the background and returns its event stream.
    ///
    /// The stream yields `Token`s in generation order followed by exactly one
    /// `Completed` or `Failed`. Dropping the receiver cancels the turn.
    pub fn stream(
        self: &Arc<Self>,
        input: String,
        key: Option<&str>,
        cancel: CancellationToken,
    ) -> (String, mpsc::Receiver<StreamEvent>) {
        let (key, _) = self.resolve(key);
        let (event_tx, event_rx) = mpsc::channel(64);
        let (token_tx, mut token_rx) = mpsc::channel::<String>(64);

        let manager = Arc::clone(self);
        let session = key.clone();
        tokio::spawn(async move {
            let forward_tx = event_tx.clone();
            let forward = tokio::spawn(async move {
                while let Some(token) = token_rx.recv().await {
                    if forward_tx.send(StreamEvent::Token(token)).await.is_err() {
                        break;
                    }
                }
            });

            let (_, result) = manager
                .execute_streaming(&input, Some(&session), token_tx, cancel)
                .await;
            let _ = forward.await;

            let terminal = if result.error {
                StreamEvent::Failed(result)
            } else {
                StreamEvent::Completed(result)
            };
            let _ = event_tx.send(terminal).await;
        });

        (key, event_rx)
    }

    /// Clears stored turns for `key` and drops its cached agent.
    /// Returns false when nothing was known about the session.
    pub async fn clear_memory(&self, key: &str) -> Result<bool, MemoryError> {
        let removed = self.table.remove(key).is_some();
        let cleared = self.memory.clear(key).await?;
        info!(session = %key, removed, cleared, "Cleared session memory");
        Ok(removed || cleared)
    }

    pub fn live_sessions(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.table.live().into_iter().map(|s| s.key).collect();
        keys.sort();
        keys
    }
}
