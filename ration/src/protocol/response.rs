use std::fmt::Display;

/// The answer handed back to the MTA for one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
	/// No opinion. Deliberately not `OK`, so the MTA keeps evaluating the
	/// rest of its restriction list.
	Dunno,
	Defer(DeferReason),
	Reject(RejectReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeferReason {
	QuotaExceeded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
	BadSender,
	BadRecipient,
	NoCredentials,
	BadReputation,
}

impl Display for Verdict {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Dunno => write!(f, "DUNNO"),
			Self::Defer(reason) => write!(f, "DEFER {}", reason),
			Self::Reject(reason) => write!(f, "REJECT {}", reason),
		}
	}
}

impl Display for DeferReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::QuotaExceeded => write!(f, "quota exceeded"),
		}
	}
}

impl Display for RejectReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let reason = match self {
			Self::BadSender => "bad sender",
			Self::BadRecipient => "bad recipient",
			Self::NoCredentials => "no credentials",
			Self::BadReputation => "bad reputation",
		};

		write!(f, "{}", reason)
	}
}

pub struct Response {
	pub verdict: Verdict,
}

impl Response {
	pub fn new(verdict: Verdict) -> Self {
		Self { verdict }
	}

	/// The bytes written back on the wire: one action line and a blank line
	pub fn as_string(&self) -> String {
		format!("action={}\n\n", self.verdict)
	}
}

impl From<Verdict> for Response {
	fn from(verdict: Verdict) -> Self {
		Self::new(verdict)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn verdict_strings() {
		let cases = [
			(Verdict::Dunno, "DUNNO"),
			(Verdict::Defer(DeferReason::QuotaExceeded), "DEFER quota exceeded"),
			(Verdict::Reject(RejectReason::BadSender), "REJECT bad sender"),
			(Verdict::Reject(RejectReason::BadRecipient), "REJECT bad recipient"),
			(Verdict::Reject(RejectReason::NoCredentials), "REJECT no credentials"),
			(Verdict::Reject(RejectReason::BadReputation), "REJECT bad reputation"),
		];

		for (verdict, expected) in cases {
			assert_eq!(verdict.to_string(), expected);
		}
	}

	#[test]
	fn response_framing() {
		let response = Response::new(Verdict::Defer(DeferReason::QuotaExceeded));
		assert_eq!(response.as_string(), "action=DEFER quota exceeded\n\n");

		let response: Response = Verdict::Dunno.into();
		assert_eq!(response.as_string(), "action=DUNNO\n\n");
	}
}
