//! Backend relay - same-origin access to a separately hosted API
//!
//! Three cooperating pieces:
//! - a request executor that picks direct, same-origin or relayed routing per
//!   call and manages the bearer credential ([`executor`], [`resolver`])
//! - a reverse proxy forwarder mirroring backend responses verbatim ([`relay`])
//! - an auth-flow diagnostics sequencer producing a timed report
//!   ([`diagnostics`])

pub mod config;
pub mod cookies;
pub mod credentials;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod models;
pub mod relay;
pub mod resolver;
pub mod transport;
pub mod validation;
