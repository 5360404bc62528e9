//! Continuous-decay quota arithmetic.
//!
//! A quota row is a leaky bucket: the consumed level drains linearly at `max`
//! units per hour and every request adds [REQUEST_COST]. A request is over
//! budget when the level after charging exceeds `max`.

pub const SECONDS_PER_HOUR: f64 = 3600.0;
pub const REQUEST_COST: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuotaRecord {
	pub max: f64,
	pub quota: f64,
}

impl QuotaRecord {
	/// The row created the first time a credential is seen
	pub fn fresh(max: f64) -> Self {
		Self { max, quota: 0.0 }
	}

	/// The level after `elapsed` seconds without requests. Negative elapsed
	/// time (a clock that stepped backwards) drains nothing.
	pub fn decayed(&self, elapsed: i64) -> f64 {
		(self.quota - self.drain(elapsed)).max(0.0)
	}

	/// The level after `elapsed` seconds of decay plus one request.
	pub fn charge(&self, elapsed: i64) -> f64 {
		(self.quota - self.drain(elapsed) + REQUEST_COST).max(0.0)
	}

	fn drain(&self, elapsed: i64) -> f64 {
		elapsed.max(0) as f64 * self.max / SECONDS_PER_HOUR
	}
}

/// The result of one quota transaction, as committed by the store.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Charge {
	pub max: f64,
	/// The level after this request was charged
	pub quota: f64,
	/// Whether the row was created by this transaction
	pub created: bool,
}

impl Charge {
	/// Applies one request to `record`.
	pub fn apply(record: QuotaRecord, elapsed: i64, created: bool) -> Self {
		Self {
			max: record.max,
			quota: record.charge(elapsed),
			created,
		}
	}

	pub fn exceeded(&self) -> bool {
		self.quota > self.max
	}
}
