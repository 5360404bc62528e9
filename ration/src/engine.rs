//! The decision pipeline: blocklists, credential selection, reputation, and
//! finally the quota charge.

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
	credential::Credential,
	protocol::{DeferReason, PolicyRequest, RejectReason, Verdict},
	reputation::{self, RedisReputation, Reputation},
	store::{Blocklist, QuotaStore},
};

/// Target for the per-decision audit lines
pub const AUDIT: &str = "ration::audit";

/// How quota transactions are kept from stepping on each other.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QuotaLock {
	/// Rely on the store's row lock. Different credentials proceed in parallel.
	#[default]
	Row,
	/// Additionally funnel every quota transaction, whatever the credential,
	/// through one process-wide lock. Only for stores without usable row locks.
	Global,
}

impl std::str::FromStr for QuotaLock {
	type Err = ParseQuotaLockError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_lowercase().as_str() {
			"row" => Ok(Self::Row),
			"global" => Ok(Self::Global),
			_ => Err(ParseQuotaLockError(s.into())),
		}
	}
}

#[derive(Debug, Error, PartialEq)]
#[error("'{0}' is not a quota lock mode, expected 'row' or 'global'")]
pub struct ParseQuotaLockError(String);

#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
	/// `max` given to credentials seen for the first time
	pub default_max: f64,
	/// Whether the envelope sender may be used as a credential
	pub sender_accounting: bool,
	pub quota_lock: QuotaLock,
}

impl Default for EngineSettings {
	fn default() -> Self {
		Self {
			default_max: 100.0,
			sender_accounting: false,
			quota_lock: QuotaLock::Row,
		}
	}
}

pub struct Engine<S, R = RedisReputation> {
	store: S,
	reputation: Option<R>,
	settings: EngineSettings,
	global_lock: Mutex<()>,
}

impl<S, R> Engine<S, R>
where
	S: QuotaStore + Blocklist,
	R: Reputation,
{
	/// Without a reputation adapter every request passes the reputation step.
	pub fn new(store: S, reputation: Option<R>, settings: EngineSettings) -> Self {
		if settings.quota_lock == QuotaLock::Global {
			warn!("quota transactions are serialized behind a global lock");
		}

		Self {
			store,
			reputation,
			settings,
			global_lock: Mutex::new(()),
		}
	}

	pub fn store(&self) -> &S {
		&self.store
	}

	pub async fn decide(&self, request: &PolicyRequest) -> Verdict {
		let sender = request.sender().unwrap_or_default();
		let recipient = request.recipient().unwrap_or_default();
		let ip = request.ip_address().unwrap_or_default();
		let sasl = request.sasl_user().unwrap_or_default();

		// Selection has no side effects, doing it up front lets every audit
		// line name the credential.
		let credential = Credential::select(request, self.settings.sender_accounting);
		let label = credential
			.as_ref()
			.map(ToString::to_string)
			.unwrap_or_else(|| String::from("-"));

		if !sender.is_empty() && self.blocked(self.store.sender_blocked(sender), sender).await {
			let verdict = Verdict::Reject(RejectReason::BadSender);
			info!(target: AUDIT, verdict = %verdict, credential = %label, sender, "rejecting bad sender {}", sender);
			return verdict;
		}

		if !recipient.is_empty()
			&& self
				.blocked(self.store.recipient_blocked(recipient), recipient)
				.await
		{
			let verdict = Verdict::Reject(RejectReason::BadRecipient);
			info!(target: AUDIT, verdict = %verdict, credential = %label, recipient, "rejecting bad recipient {}", recipient);
			return verdict;
		}

		let credential = match credential {
			Some(credential) => credential,
			None => {
				let verdict = Verdict::Reject(RejectReason::NoCredentials);
				info!(target: AUDIT, verdict = %verdict, credential = %label, sender, ip, "rejecting request without credentials");
				return verdict;
			}
		};
		debug!(credential = %credential, "selected credential");

		let score = match &self.reputation {
			None => None,
			Some(reputation) => {
				let score = reputation.score(sender, ip).await;

				if !reputation::passes(score) {
					let verdict = Verdict::Reject(RejectReason::BadReputation);
					info!(
						target: AUDIT,
						verdict = %verdict,
						credential = %label,
						score,
						"rejecting bad sender {}:{} score {:.3}",
						sender,
						ip,
						score
					);
					return verdict;
				}

				debug!(sender, ip, score, "reputation accepted");
				Some(score)
			}
		};

		let charge = {
			let _serialized = match self.settings.quota_lock {
				QuotaLock::Global => Some(self.global_lock.lock().await),
				QuotaLock::Row => None,
			};

			match self.store.charge(&credential, self.settings.default_max).await {
				Ok(charge) => charge,
				Err(err) => {
					error!(credential = %credential, "quota transaction failed, letting the request through: {}", err);
					return Verdict::Dunno;
				}
			}
		};

		if charge.exceeded() {
			let verdict = Verdict::Defer(DeferReason::QuotaExceeded);
			info!(
				target: AUDIT,
				verdict = %verdict,
				credential = %label,
				quota = charge.quota,
				max = charge.max,
				"deferring over quota item {} [{:.2}/{:.2}]",
				credential,
				charge.quota,
				charge.max
			);
			return verdict;
		}

		let reputation_note = score
			.map(|score| format!(" reputation score {:.3}", score))
			.unwrap_or_default();
		let action = if charge.created { "creating" } else { "updating" };
		info!(
			target: AUDIT,
			verdict = %Verdict::Dunno,
			credential = %label,
			quota = charge.quota,
			max = charge.max,
			created = charge.created,
			"{} quota for item {} [{:.2}/{:.2}]. Sender: <{}>; Client IP: <{}>; SASL_username: <{}>{}",
			action,
			credential,
			charge.quota,
			charge.max,
			sender,
			ip,
			sasl,
			reputation_note
		);

		Verdict::Dunno
	}

	// Store trouble counts as "not listed"
	async fn blocked<F>(&self, lookup: F, address: &str) -> bool
	where
		F: std::future::Future<Output = Result<bool, crate::store::StoreError>>,
	{
		match lookup.await {
			Ok(blocked) => blocked,
			Err(err) => {
				error!(address, "blocklist lookup failed, treating as not listed: {}", err);
				false
			}
		}
	}
}
