//! # safeguard-types
//!
//! Shared vocabulary for the safeguard crates: the action submitted for
//! validation, the state snapshot and context it is judged against, the
//! closed level/severity enums and the BLAKE3 content hash used for
//! checkpoint integrity.

#![deny(unsafe_code)]

pub mod action;
pub mod hash;
pub mod level;
pub mod state;
pub mod time;

pub use action::Action;
pub use hash::{ContentHash, ContentHashError};
pub use level::{RiskLevel, ViolationSeverity};
pub use state::{ActionContext, SystemState};
pub use time::now_ms;
