//! Utility modules for the protection layer.
//! This module contains common utilities used across the application.

mod error;
mod logging;

pub use error::{ProtectionError, ProtectionResult};
pub use logging::{
    init_logging, log_botnet_detection, log_degraded, log_rate_limit, log_reputation_event,
};
