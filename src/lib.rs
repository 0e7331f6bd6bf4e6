//! switch-gate - a mode-switching local egress gateway
//!
//! # Architecture
//!
//! ```text
//! SOCKS5 ingress ─┐
//!                 ├─→ Router ─→ Dialer (direct / warp / home)
//! Transparent ────┘      │            │
//! ingress (Linux)        │            └─→ MeteredStream ─→ Relay
//!                        │
//!            HTTP API ───┴── limit ticker / webhook sink
//! ```
//!
//! ## Core principles
//!
//! - Dialers are capabilities: one trait, three variants, no hierarchy
//! - Router state is one RW lock, never held across I/O
//! - Every relayed byte is accounted to exactly one mode
//! - Collaborators (API, webhook, tunnel control) sit behind narrow
//!   interfaces and never block the data path
//!
//! ## Module structure
//!
//! ```text
//! src/
//! ├── common/          # Target address parsing
//! ├── metrics.rs       # Per-mode byte and connection counters
//! ├── router/          # Mode, dialers, metering, the router itself
//! ├── proxy/           # SOCKS5 + transparent ingress, relay
//! ├── api/             # Control/observability HTTP API
//! ├── webhook.rs       # Outbound event notifier
//! └── app.rs           # Supervisor
//! ```

pub mod api;
pub mod app;
pub mod common;
pub mod config;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod router;
pub mod webhook;

// Re-exports for convenience
pub use app::App;
pub use common::TargetAddr;
pub use config::Config;
pub use error::{Error, Result};
pub use metrics::Metrics;
pub use router::{Dialer, Mode, Router};
