//! Sender/IP reputation scores, read from a cache some other system fills.

use std::{collections::HashMap, future::Future};

use redis::{aio::MultiplexedConnection, AsyncCommands};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Scores at or below this are rejected.
pub const REPUTATION_THRESHOLD: f64 = 0.2;

/// What a lookup falls back to when nothing usable is found. Trusting the
/// client keeps mail flowing while the cache is down.
pub const DEFAULT_SCORE: f64 = 1.0;

pub fn passes(score: f64) -> bool {
	score > REPUTATION_THRESHOLD
}

pub trait Reputation: Send + Sync {
	/// The trust score for mail from `sender` relayed by `ip`. Never fails;
	/// lookup problems are logged and answered with [DEFAULT_SCORE].
	fn score(&self, sender: &str, ip: &str) -> impl Future<Output = f64> + Send;
}

/// Cache key for a sender/IP pair. The sender is stored in its SMTP path form.
pub fn pair_key(sender: &str, ip: &str) -> String {
	format!("TRACK:<{}>:{}", sender, ip)
}

/// Cache key for an IP on its own
pub fn ip_key(ip: &str) -> String {
	format!("TRACK:IP:{}", ip)
}

#[derive(Debug, Error)]
pub enum ReputationError {
	#[error("redis error: {0}")]
	Redis(#[from] redis::RedisError),
	#[error("no score stored under {0}")]
	Missing(String),
}

/// Scores kept in redis as plain float strings.
pub struct RedisReputation {
	client: redis::Client,
	connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisReputation {
	/// Accepts either a `redis://` URL or a bare `host:port`. No connection is
	/// made until the first lookup.
	pub fn open(address: &str) -> Result<Self, ReputationError> {
		let url = if address.contains("://") {
			address.to_owned()
		} else {
			format!("redis://{}/", address)
		};

		Ok(Self {
			client: redis::Client::open(url)?,
			connection: Mutex::new(None),
		})
	}

	async fn connection(&self) -> Result<MultiplexedConnection, ReputationError> {
		let mut cached = self.connection.lock().await;

		if let Some(conn) = cached.as_ref() {
			return Ok(conn.clone());
		}

		debug!("connecting to reputation cache");
		let conn = self.client.get_multiplexed_async_connection().await?;
		*cached = Some(conn.clone());
		Ok(conn)
	}

	async fn lookup(&self, key: &str) -> Result<f64, ReputationError> {
		let mut conn = self.connection().await?;

		let score: Option<f64> = match conn.get(key).await {
			Ok(score) => score,
			Err(err) => {
				// Drop a broken connection so the next lookup dials a fresh one
				if err.is_io_error() || err.is_connection_dropped() {
					self.connection.lock().await.take();
				}
				return Err(err.into());
			}
		};

		score.ok_or_else(|| ReputationError::Missing(key.to_owned()))
	}
}

impl Reputation for RedisReputation {
	async fn score(&self, sender: &str, ip: &str) -> f64 {
		debug!(sender, ip, "reputation lookup");

		let lookup = match self.lookup(&pair_key(sender, ip)).await {
			Ok(score) => Ok(score),
			Err(_) => self.lookup(&ip_key(ip)).await,
		};

		match lookup {
			Ok(score) => score,
			Err(err) => {
				warn!(sender, ip, "reputation lookup failed, assuming trusted: {}", err);
				DEFAULT_SCORE
			}
		}
	}
}

/// A fixed table of scores under the same keys the cache uses.
#[derive(Clone, Debug, Default)]
pub struct StaticReputation {
	scores: HashMap<String, f64>,
}

impl StaticReputation {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_pair(mut self, sender: &str, ip: &str, score: f64) -> Self {
		self.scores.insert(pair_key(sender, ip), score);
		self
	}

	pub fn with_ip(mut self, ip: &str, score: f64) -> Self {
		self.scores.insert(ip_key(ip), score);
		self
	}
}

impl Reputation for StaticReputation {
	async fn score(&self, sender: &str, ip: &str) -> f64 {
		self.scores
			.get(&pair_key(sender, ip))
			.or_else(|| self.scores.get(&ip_key(ip)))
			.copied()
			.unwrap_or(DEFAULT_SCORE)
	}
}
