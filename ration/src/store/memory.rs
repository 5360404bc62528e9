use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex, PoisonError, RwLock,
	},
};

use time::OffsetDateTime;

use super::{like, Blocklist, QuotaStore, StoreError};
use crate::{
	credential::Credential,
	quota::{Charge, QuotaRecord},
};

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// A quota row as the store keeps it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StoredQuota {
	pub max: f64,
	pub quota: f64,
	/// Unix seconds of the last committed charge
	pub last_update: i64,
}

/// An in-process store. Every credential gets its own async lock, held from
/// the read to the write of a charge, standing in for the row lock a
/// relational store takes with `SELECT ... FOR UPDATE`.
pub struct MemoryStore {
	rows: Mutex<HashMap<Credential, Arc<tokio::sync::Mutex<Option<StoredQuota>>>>>,
	senders: RwLock<Vec<String>>,
	recipients: RwLock<Vec<String>>,
	clock: Clock,
	available: AtomicBool,
}

impl Default for MemoryStore {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::with_clock(|| OffsetDateTime::now_utc().unix_timestamp())
	}

	/// A store that reads the time, in unix seconds, from `clock`
	pub fn with_clock<F>(clock: F) -> Self
	where
		F: Fn() -> i64 + Send + Sync + 'static,
	{
		Self {
			rows: Mutex::new(HashMap::new()),
			senders: RwLock::new(vec![]),
			recipients: RwLock::new(vec![]),
			clock: Arc::new(clock),
			available: AtomicBool::new(true),
		}
	}

	pub fn block_sender<S: Into<String>>(&self, pattern: S) {
		self.senders
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.push(pattern.into());
	}

	pub fn block_recipient<S: Into<String>>(&self, pattern: S) {
		self.recipients
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.push(pattern.into());
	}

	/// While unavailable every operation fails, like a database that has
	/// gone away.
	pub fn set_available(&self, available: bool) {
		self.available.store(available, Ordering::SeqCst);
	}

	pub async fn insert(&self, credential: &Credential, stored: StoredQuota) {
		*self.row(credential).lock().await = Some(stored);
	}

	pub async fn get(&self, credential: &Credential) -> Option<StoredQuota> {
		let row = self
			.rows
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.get(credential)
			.cloned()?;

		let stored = *row.lock().await;
		stored
	}

	fn row(&self, credential: &Credential) -> Arc<tokio::sync::Mutex<Option<StoredQuota>>> {
		self.rows
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.entry(credential.clone())
			.or_default()
			.clone()
	}

	fn ensure_available(&self) -> Result<(), StoreError> {
		if self.available.load(Ordering::SeqCst) {
			Ok(())
		} else {
			Err(StoreError::Unavailable)
		}
	}

	fn matches_any(patterns: &RwLock<Vec<String>>, address: &str) -> bool {
		patterns
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.iter()
			.any(|pattern| like(address, pattern))
	}
}

impl QuotaStore for MemoryStore {
	async fn charge(&self, credential: &Credential, default_max: f64) -> Result<Charge, StoreError> {
		self.ensure_available()?;

		let row = self.row(credential);
		let mut row = row.lock().await;
		let now = (self.clock)();

		// Give other tasks a chance to run between the read and the write, the
		// way a round trip to a real database would.
		tokio::task::yield_now().await;

		let charge = match *row {
			Some(stored) => Charge::apply(
				QuotaRecord {
					max: stored.max,
					quota: stored.quota,
				},
				now - stored.last_update,
				false,
			),
			None => Charge::apply(QuotaRecord::fresh(default_max), 0, true),
		};

		*row = Some(StoredQuota {
			max: charge.max,
			quota: charge.quota,
			last_update: now,
		});

		Ok(charge)
	}
}

impl Blocklist for MemoryStore {
	async fn sender_blocked(&self, sender: &str) -> Result<bool, StoreError> {
		self.ensure_available()?;
		Ok(Self::matches_any(&self.senders, sender))
	}

	async fn recipient_blocked(&self, recipient: &str) -> Result<bool, StoreError> {
		self.ensure_available()?;
		Ok(Self::matches_any(&self.recipients, recipient))
	}
}
