//! Actor runtime and session orchestration for web proofs.
//!
//! A proving session is a [`engine::StepEngine`] actor walking the configured
//! steps, a [`storage::SessionStorage`] actor holding what other contexts may
//! observe, and a [`channel::SessionChannel`] carrying typed messages between
//! them, the side panel and the background coordinator.
//!
//! # Overview
//!
//! - [`actor`], [`system`]: mailbox actors and cooperative shutdown
//! - [`steps`]: the per-step status machine
//! - [`engine`]: one handler per step kind
//! - [`channel`], [`storage`]: message bus, session storage, cleanup
//! - [`traits`]: browser, capture and notary seams; [`notary`] is the HTTP notary

pub mod actor;
pub mod channel;
pub mod engine;
pub mod notary;
pub mod steps;
pub mod storage;
pub mod system;
pub mod traits;

pub use channel::{spawn_coordinator, ExtensionMessage, SessionChannel, SidePanel, Subscription};
pub use engine::{spawn_engine, EngineDeps, EngineMsg, StepEngine};
pub use notary::HttpNotary;
pub use steps::{SessionState, StepStatus, Steps, StepsView};
pub use storage::{SessionId, SessionStorage, StorageKey};
pub use traits::{
    BrowserContext, CaptureRequest, CapturedExchange, NotarizationRequest, Notarizer,
    ProofArtifact, TranscriptSource,
};
