//! Typed message bus and session storage shared by the engine, the side
//! panel and the background coordinator.
//!
//! Only engine state and extracted variables travel here. Transcript bytes stay
//! with whoever captured them and redaction sets go straight to the notary.
use crate::actor::Addr;
use crate::steps::StepsView;
use crate::storage::{SessionId, SessionKey, SessionStorage, StorageKey, StorageMsg};
use crate::traits::ProofArtifact;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const BUS_CAPACITY: usize = 64;

/// Wire shape is `{"type": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all_fields = "camelCase")]
pub enum ExtensionMessage {
    ProofDone {
        step: usize,
        proof: ProofArtifact,
    },
    ProofError {
        step: Option<usize>,
        error: String,
    },
    CleanProvingSessionStorageOnClose,
    CloseSidePanel,
    SidePanelClosed,
    StepsUpdated(StepsView),
    VariablesExtracted {
        step: usize,
        variables: BTreeMap<String, String>,
    },
}

impl ExtensionMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ExtensionMessage::ProofDone { .. } => "ProofDone",
            ExtensionMessage::ProofError { .. } => "ProofError",
            ExtensionMessage::CleanProvingSessionStorageOnClose => {
                "CleanProvingSessionStorageOnClose"
            }
            ExtensionMessage::CloseSidePanel => "CloseSidePanel",
            ExtensionMessage::SidePanelClosed => "SidePanelClosed",
            ExtensionMessage::StepsUpdated(_) => "StepsUpdated",
            ExtensionMessage::VariablesExtracted { .. } => "VariablesExtracted",
        }
    }
}

/// One proving session's view of the bus and of its storage namespace.
#[derive(Clone)]
pub struct SessionChannel {
    session: SessionId,
    bus: broadcast::Sender<ExtensionMessage>,
    storage: Addr<SessionStorage>,
}

impl SessionChannel {
    /// Open a channel for a fresh session id.
    pub fn open(storage: Addr<SessionStorage>) -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        let session = SessionId::new();
        info!(session = %session, "channel.opened");
        Self {
            session,
            bus,
            storage,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Fire-and-forget; having no subscribers is not an error.
    pub fn publish(&self, msg: ExtensionMessage) {
        let kind = msg.kind();
        let receivers = self.bus.send(msg).unwrap_or(0);
        debug!(session = %self.session, kind, receivers, "channel.publish");
    }

    /// Messages published from now on. Dropping the subscription unsubscribes.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            session: self.session,
            rx: self.bus.subscribe(),
        }
    }

    pub async fn store<T: Serialize>(&self, key: StorageKey, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(key = key.as_str(), error = %e, "storage.encode_failed");
                return;
            }
        };
        let key = self.key(key);
        if self.storage.send(StorageMsg::Set { key, value }).await.is_err() {
            warn!(key = %key, "storage.unavailable");
        }
    }

    pub async fn load(&self, key: StorageKey) -> Option<Value> {
        let (reply, rx) = oneshot::channel();
        let key = self.key(key);
        self.storage.send(StorageMsg::Get { key, reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    /// Every stored entry of this session, keyed `"<session>:<key>"`.
    pub async fn snapshot(&self) -> BTreeMap<String, Value> {
        let (reply, rx) = oneshot::channel();
        let msg = StorageMsg::Snapshot {
            session: self.session,
            reply,
        };
        if self.storage.send(msg).await.is_err() {
            return BTreeMap::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Remove every declared key of this session. No acknowledgement.
    pub async fn clear_storage(&self) {
        send_clear(&self.storage, self.session).await;
    }

    /// Non-blocking variant for contexts that cannot await, such as `Drop`.
    pub fn try_clear_storage(&self) {
        let msg = StorageMsg::Clear {
            session: self.session,
            reply: None,
        };
        if self.storage.try_send(msg).is_err() {
            warn!(session = %self.session, "storage.clear_dropped");
        }
    }

    fn key(&self, key: StorageKey) -> SessionKey {
        SessionKey {
            session: self.session,
            key,
        }
    }
}

async fn send_clear(storage: &Addr<SessionStorage>, session: SessionId) {
    let msg = StorageMsg::Clear {
        session,
        reply: None,
    };
    if storage.send(msg).await.is_err() {
        warn!(session = %session, "storage.clear_dropped");
    }
}

/// An explicit, session-scoped listener.
pub struct Subscription {
    session: SessionId,
    rx: broadcast::Receiver<ExtensionMessage>,
}

impl Subscription {
    /// Next message, or `None` once every publisher is gone. Lagged messages
    /// are skipped.
    pub async fn recv(&mut self) -> Option<ExtensionMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(session = %self.session, skipped, "channel.subscriber_lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Background coordinator reacting to close messages for one session.
///
/// `CleanProvingSessionStorageOnClose` clears storage, `CloseSidePanel`
/// cancels pending engine waits, `SidePanelClosed` does both and ends the
/// task. It also ends once every [`SessionChannel`] clone is dropped.
pub fn spawn_coordinator(channel: &SessionChannel, cancel: CancellationToken) -> JoinHandle<()> {
    let mut sub = channel.subscribe();
    let storage = channel.storage.clone();
    let session = channel.session;
    tokio::spawn(async move {
        while let Some(msg) = sub.recv().await {
            match msg {
                ExtensionMessage::CleanProvingSessionStorageOnClose => {
                    send_clear(&storage, session).await;
                }
                ExtensionMessage::CloseSidePanel => cancel.cancel(),
                ExtensionMessage::SidePanelClosed => {
                    cancel.cancel();
                    send_clear(&storage, session).await;
                    break;
                }
                _ => {}
            }
        }
        debug!(session = %session, "coordinator.stopped");
    })
}

/// Guard for the UI surface of a session.
///
/// Unloading, explicitly or by drop, announces the close on the bus and clears
/// storage directly so cleanup does not depend on the coordinator being alive.
pub struct SidePanel {
    channel: SessionChannel,
    unloaded: bool,
}

impl SidePanel {
    pub fn attach(channel: SessionChannel) -> Self {
        Self {
            channel,
            unloaded: false,
        }
    }

    /// The user asked to close the panel.
    pub fn request_close(&self) {
        self.channel.publish(ExtensionMessage::CloseSidePanel);
    }

    pub async fn unload(mut self) {
        self.unloaded = true;
        self.announce_close();
        self.channel.clear_storage().await;
    }

    fn announce_close(&self) {
        self.channel
            .publish(ExtensionMessage::CleanProvingSessionStorageOnClose);
        self.channel.publish(ExtensionMessage::SidePanelClosed);
    }
}

impl Drop for SidePanel {
    fn drop(&mut self) {
        if !self.unloaded {
            self.announce_close();
            self.channel.try_clear_storage();
        }
    }
}
