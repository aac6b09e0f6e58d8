//! Emergency escalation engine: rank facilities around a patient emergency and
//! race notification channels across ordered batches until one accepts.
//!
//! Pipeline: intake (`normalize`) → facility sourcing (`lookup`) → ranking
//! (`ranking`, `geo`) → batched dispatch (`dispatcher`, `channel`, `adapters`)
//! → per-incident audit trail (`session`).
//!
//! Best-effort and in-memory; no ledger, no delivery guarantees across restarts.

pub mod adapters;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod geo;
pub mod lookup;
pub mod normalize;
pub mod ranking;
pub mod session;
pub mod types;

pub use channel::{ChannelAdapter, ChannelOutcome, ChannelSet};
pub use config::{Config, DispatchConfig, DispatchOverrides};
pub use engine::Engine;
pub use error::EngineError;
pub use lookup::{CachedLookup, FacilityLookup, StaticRegistry};
pub use types::{EscalationOutcome, EscalationRequest, Facility, Incident};
