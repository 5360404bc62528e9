//! Persistent state behind the decision engine: quota rows and the two
//! blocklist tables.

use std::future::Future;

use thiserror::Error;

use crate::{credential::Credential, quota::Charge};

pub mod memory;
pub mod mysql;
mod pattern;

pub use memory::MemoryStore;
pub use mysql::{MySqlStore, Tables};
pub use pattern::like;

pub trait QuotaStore: Send + Sync {
	/// Charges one request against `credential` in a single read-modify-write
	/// transaction and commits the new level whether or not it is over `max`.
	///
	/// No other charge for the same credential may observe or commit between
	/// this transaction's read and its write. A missing row is created with
	/// `default_max` and an empty quota.
	fn charge(
		&self,
		credential: &Credential,
		default_max: f64,
	) -> impl Future<Output = Result<Charge, StoreError>> + Send;
}

pub trait Blocklist: Send + Sync {
	/// Whether `sender` matches any pattern in the sender blocklist
	fn sender_blocked(&self, sender: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

	/// Whether `recipient` matches any pattern in the recipient blocklist
	fn recipient_blocked(
		&self,
		recipient: &str,
	) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),
	#[error("'{0}' is not a valid table name")]
	InvalidTableName(String),
	#[error("store unavailable")]
	Unavailable,
}
