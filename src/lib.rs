//! In-line HTTP protection layer.
//!
//! Sits between an edge load balancer and backend handlers, deciding per
//! request whether to forward, rate-limit or reject, with per-client state
//! kept consistent across requests: token-bucket and distributed
//! sliding-window rate limiting, an IP reputation store with lease-based
//! blacklisting and whitelist override, pattern-based request filtering,
//! behavioral botnet detection, and a traffic monitor feeding alerts back
//! into the reputation store.

pub mod api;
pub mod config;
pub mod core;
pub mod service;
pub mod utils;

pub use service::ProtectionService;
