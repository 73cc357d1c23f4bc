//! fogmix - Privacy Mixnet & Fog Compute Orchestration
//!
//! A single-process toolkit for running a fog-compute node:
//! - Sphinx packet processing for onion routing, with VRF-gated relay
//!   selection and Poisson-distributed forwarding delays
//! - A replay cache guarding against packet re-injection
//! - A multi-objective (NSGA-II) placement engine for scheduling jobs
//!   across heterogeneous fog nodes
//! - A fog coordinator tracking node health and dispatching placements
//! - A dependency-aware service orchestrator supervising local services
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                       fogmix                          │
//! ├───────────────────────────────────────────────────────┤
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐             │
//! │  │  sphinx  │  │  replay  │  │  delay   │             │
//! │  ├──────────┤  ├──────────┤  ├──────────┤             │
//! │  │  header  │  │  cache   │  │ poisson  │             │
//! │  │  crypto  │  │          │  │scheduler │             │
//! │  │  engine  │  │          │  │  cover   │             │
//! │  └──────────┘  └──────────┘  └──────────┘             │
//! │                                                        │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐             │
//! │  │reputation│  │ lottery  │  │ mixnode  │             │
//! │  │          │  │  + vrf   │  │ pipeline │             │
//! │  └──────────┘  └──────────┘  └──────────┘             │
//! │                                                        │
//! │  ┌──────────┐  ┌──────────────┐  ┌──────────────┐     │
//! │  │placement │  │ coordinator  │  │ orchestrator │     │
//! │  │ (nsga2)  │  │              │  │ (dag+super.) │     │
//! │  └──────────┘  └──────────────┘  └──────────────┘     │
//! └───────────────────────────────────────────────────────┘
//! ```

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(missing_docs)]

use thiserror::Error;

pub mod config;

pub mod sphinx {
    pub mod crypto;
    pub mod engine;
    pub mod header;
}

pub mod replay;

pub mod delay {
    pub mod cover;
    pub mod poisson;
    pub mod scheduler;
}

pub mod reputation;
pub mod lottery;
pub mod vrf;

pub mod mixnode {
    pub mod carrier;
    pub mod pipeline;
}

pub mod placement {
    pub mod fallback;
    pub mod model;
    pub mod nsga2;
}

pub mod coordinator;

pub mod orchestrator {
    pub mod dag;
    pub mod service;
    pub mod supervisor;
}

pub mod dao;
pub mod metrics;
pub mod protocol_version;
pub mod timing_defense;

pub use config::FogConfig;
pub use sphinx::engine::SphinxEngine;
pub use sphinx::header::{SphinxHeader, HEADER_SIZE, MAX_HOPS, PAYLOAD_SIZE};

/// Wire protocol version for the mixnode carrier handshake.
pub const PROTOCOL_VERSION: u8 = 1;

/// Total on-wire size of a Sphinx packet (header + payload).
pub const PACKET_SIZE: usize = HEADER_SIZE + PAYLOAD_SIZE;

/// Crate-wide error type.
///
/// Every variant family corresponds to one of the failure domains a caller
/// needs to distinguish: protocol-level rejection of a malformed or replayed
/// packet, transient resource exhaustion that may clear on retry, a failure
/// in a collaborator the node depends on (e.g. a reward ledger), and fatal
/// conditions that should stop the owning task. Diagnostic strings must
/// never carry key material or packet payload bytes.
#[derive(Debug, Error)]
pub enum FogError {
    /// The packet, handshake, or message violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A bounded resource (queue, connection pool, generation budget) is
    /// exhausted; the caller may retry once the resource frees up.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// IO or other transient failure, typically retryable.
    #[error("transient error: {0}")]
    Io(#[from] std::io::Error),

    /// A collaborator this node depends on (reward ledger, placement
    /// target, dependent service) failed or refused the operation.
    #[error("dependency error: {0}")]
    Dependency(String),

    /// Configuration is invalid or internally inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// Cryptographic operation failed (bad MAC, malformed key material).
    #[error("crypto error: {0}")]
    Crypto(String),

    /// An unrecoverable condition; the owning task should stop.
    #[error("fatal error: {0}")]
    Fatal(String),
}

/// Result type used throughout the crate.
pub type FogResult<T> = std::result::Result<T, FogError>;
