//! The policy delegation protocol: newline separated `key=value` attributes
//! in, a single `action=` line out.

mod request;
mod response;

pub use request::{LineStatus, ParseRequestError, PolicyRequest};
pub use response::{DeferReason, RejectReason, Response, Verdict};
