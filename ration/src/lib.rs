//! Admission control for an MTA speaking the policy delegation protocol.
//!
//! Every request is checked against sender and recipient blocklists, an
//! optional reputation cache, and a per-identity quota that drains over time.

pub mod credential;
pub mod engine;
pub mod net;
pub mod protocol;
pub mod quota;
pub mod reputation;
pub mod store;

pub use engine::{Engine, EngineSettings, QuotaLock};
pub use protocol::{PolicyRequest, Verdict};
