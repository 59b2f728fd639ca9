//! # visor-core
//!
//! Core protocol layer and alert state machine for the visor smart-helmet
//! safety companion.
//!
//! This crate provides:
//! - Decoding of the loosely structured text frames arriving from the
//!   helmet sensor unit over a short-range wireless link
//! - The crash countdown workflow with cancel/auto-proceed semantics
//! - Guard-mode disconnection ("helmet left behind") and theft handling
//! - Best-effort location resolution across multiple stale-able sources
//! - Configuration management
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`protocol`] - wire text grammar: inbound decoding, outbound commands
//! - [`engine`] - the single-owner event engine serializing all state
//! - [`crash`] - the crash countdown state machine
//! - [`location`] - recency-based location resolution
//! - [`sinks`] - collaborator interfaces injected into the engine
//! - [`config`] - application configuration loading, saving, validation
//! - [`error`] - unified error types for the crate
//! - [`types`] - shared data model
//!
//! The engine owns every state transition: transport frames, timer ticks,
//! and user commands all funnel through one ordered queue (see [`engine`]).

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod config;
pub mod crash;
pub mod engine;
pub mod error;
pub mod location;
pub mod protocol;
pub mod sinks;
pub mod types;

// Re-export primary types for convenience
pub use config::VisorConfig;
pub use crash::{CrashEffect, CrashSession, CrashWorkflow, CUE_PULSES, DEFAULT_COUNTDOWN_TICKS};
pub use engine::{Engine, EngineHandle};
pub use error::{Result, VisorError};
pub use location::LocationResolver;
pub use protocol::{decode, frame_from_bytes, DEFAULT_MAX_WRITE_LEN};
pub use sinks::{
    AlertSink, Collaborators, CueSink, EmergencyCallSink, EmergencyContactSink,
    ExecutionExtension, ExecutionToken, LocationSource, NotificationSink, TransportLink,
};
pub use types::{
    AlertKind, AlertRecord, AlertSeverity, Coordinate, CrashSnapshot, DecodedEvent,
    EngineSnapshot, GpsSample, InboundFrame, LinkEvent, OperatingMode, ResolvedLocation,
};
