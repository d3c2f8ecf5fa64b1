//! Core library for the real-time telephony/AI voice bridge.
//!
//! This crate owns everything that doesn't need a concrete transport: the
//! call session data model, the audio codec/resampler, the frame buffer and
//! recorder, the AI-peer and telephony wire protocols, the observer command
//! dispatcher, the event log, and the orchestrator that wires a call's full
//! lifecycle together. The thin binary in `apps/bridge-server` supplies
//! configuration loading, process-level bootstrap and the actual WebSocket
//! listeners built on top of [`server::router`].

pub mod ai;
pub mod audio;
pub mod bootstrap;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod model;
pub mod observer;
pub mod orchestrator;
pub mod persistence;
pub mod protocol_constants;
pub mod recorder;
pub mod registry;
pub mod runtime;
pub mod server;
pub mod telephony;
pub mod utils;

pub use context::BridgeContext;
pub use error::{BridgeError, BridgeResult};
pub use model::CallSession;
pub use registry::SessionRegistry;
