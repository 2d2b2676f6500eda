//! Ephemeral key-value storage mirroring engine state for other contexts.
//!
//! Keys are namespaced `"<session>:<key>"`. Clearing a session removes every
//! declared key and tombstones the session, so a late write from an engine
//! that has not noticed the close yet cannot bring entries back.
use crate::actor::{Actor, Context};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Every key a session may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    CurrentStep,
    StepStatuses,
    ExtractedVariables,
    SessionState,
}

impl StorageKey {
    pub const ALL: [StorageKey; 4] = [
        StorageKey::CurrentStep,
        StorageKey::StepStatuses,
        StorageKey::ExtractedVariables,
        StorageKey::SessionState,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StorageKey::CurrentStep => "currentStep",
            StorageKey::StepStatuses => "stepStatuses",
            StorageKey::ExtractedVariables => "extractedVariables",
            StorageKey::SessionState => "sessionState",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub session: SessionId,
    pub key: StorageKey,
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session, self.key.as_str())
    }
}

pub enum StorageMsg {
    Set {
        key: SessionKey,
        value: Value,
    },
    Get {
        key: SessionKey,
        reply: oneshot::Sender<Option<Value>>,
    },
    /// Remove every key of `session`; replies with how many were present.
    Clear {
        session: SessionId,
        reply: Option<oneshot::Sender<usize>>,
    },
    /// Every entry of `session`, keyed by the namespaced key.
    Snapshot {
        session: SessionId,
        reply: oneshot::Sender<BTreeMap<String, Value>>,
    },
}

/// Cleared sessions remembered to reject late writes; the oldest are forgotten first.
const CLEARED_CAPACITY: usize = 1024;

pub struct SessionStorage {
    entries: HashMap<String, Value>,
    cleared: HashSet<SessionId>,
    cleared_order: VecDeque<SessionId>,
    cleared_capacity: usize,
}

impl Default for SessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStorage {
    pub fn new() -> Self {
        Self::with_cleared_capacity(CLEARED_CAPACITY)
    }

    pub fn with_cleared_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            cleared: HashSet::new(),
            cleared_order: VecDeque::new(),
            cleared_capacity: capacity.max(1),
        }
    }

    fn remember_cleared(&mut self, session: SessionId) {
        if !self.cleared.insert(session) {
            return;
        }
        self.cleared_order.push_back(session);
        while self.cleared_order.len() > self.cleared_capacity {
            if let Some(oldest) = self.cleared_order.pop_front() {
                self.cleared.remove(&oldest);
                debug!(session = %oldest, "storage.tombstone.evicted");
            }
        }
    }
}

#[async_trait::async_trait]
impl Actor for SessionStorage {
    type Msg = StorageMsg;

    async fn handle(&mut self, msg: Self::Msg, _ctx: &mut Context<Self>) -> Result<()> {
        match msg {
            StorageMsg::Set { key, value } => {
                if self.cleared.contains(&key.session) {
                    debug!(key = %key, "storage.set.after_clear_ignored");
                } else {
                    self.entries.insert(key.to_string(), value);
                }
            }
            StorageMsg::Get { key, reply } => {
                if reply.send(self.entries.get(&key.to_string()).cloned()).is_err() {
                    debug!("storage.get.reply_dropped");
                }
            }
            StorageMsg::Clear { session, reply } => {
                let removed = StorageKey::ALL
                    .into_iter()
                    .filter(|key| {
                        self.entries
                            .remove(&SessionKey { session, key: *key }.to_string())
                            .is_some()
                    })
                    .count();
                self.remember_cleared(session);
                debug!(session = %session, removed, "storage.cleared");
                if let Some(reply) = reply {
                    let _ = reply.send(removed);
                }
            }
            StorageMsg::Snapshot { session, reply } => {
                let prefix = format!("{session}:");
                let snapshot = self
                    .entries
                    .iter()
                    .filter(|(k, _)| k.starts_with(&prefix))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                if reply.send(snapshot).is_err() {
                    debug!("storage.snapshot.reply_dropped");
                }
            }
        }
        Ok(())
    }
}
