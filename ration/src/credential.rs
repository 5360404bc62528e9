use std::fmt::Display;

use crate::protocol::PolicyRequest;

/// Which identity a quota row is charged against. The single letter code
/// is what's stored in the `type` column of the policy table.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum CredentialKind {
	Sasl,
	Sender,
	IpAddress,
}

/// Selection order. The first rule that yields a value wins.
const RULES: [CredentialKind; 3] = [
	CredentialKind::Sasl,
	CredentialKind::Sender,
	CredentialKind::IpAddress,
];

impl CredentialKind {
	pub fn code(&self) -> &'static str {
		match self {
			Self::Sasl => "U",
			Self::Sender => "S",
			Self::IpAddress => "I",
		}
	}

	fn extract<'a>(&self, request: &'a PolicyRequest, sender_accounting: bool) -> Option<&'a str> {
		match self {
			Self::Sasl => request.sasl_user(),
			Self::Sender if sender_accounting => request.sender(),
			Self::Sender => None,
			Self::IpAddress => request.ip_address(),
		}
	}
}

impl Display for CredentialKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.code())
	}
}

/// The `(type, item)` pair that identifies one quota row.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Credential {
	pub kind: CredentialKind,
	pub item: String,
}

impl Credential {
	pub fn new<S: Into<String>>(kind: CredentialKind, item: S) -> Self {
		Self {
			kind,
			item: item.into(),
		}
	}

	/// Picks the credential a request is accounted against. `None` means the
	/// request carried nothing we can charge.
	pub fn select(request: &PolicyRequest, sender_accounting: bool) -> Option<Self> {
		RULES.iter().find_map(|kind| {
			kind.extract(request, sender_accounting)
				.filter(|item| !item.is_empty())
				.map(|item| Self::new(*kind, item))
		})
	}
}

impl Display for Credential {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}:{}", self.kind, self.item)
	}
}
