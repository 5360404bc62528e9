use thiserror::Error;

/// Characters stripped from both ends of lines, keys, and values
const TRIMMED: &[char] = &[' ', '\r', '\n'];

/// The attributes of one policy delegation request that the decision engine
/// cares about. Everything else the MTA sends is dropped while parsing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PolicyRequest {
	pub sasl_user: Option<String>,
	pub ip_address: Option<String>,
	pub sender: Option<String>,
	pub recipient: Option<String>,
}

/// What happened to a single line pushed into a [PolicyRequest].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineStatus {
	/// A recognized attribute was stored
	Attribute,
	/// Well formed, but not an attribute we track
	Ignored,
	/// No `=` on the line. Parsing carries on with the next one.
	Malformed,
	/// The blank line that terminates a request
	End,
}

impl PolicyRequest {
	pub fn new() -> Self {
		Self::default()
	}

	/// Feed one line of the request into the parser. The whole line is
	/// lowercased before it's split, values included.
	pub fn push_line(&mut self, line: &str) -> LineStatus {
		let line = line.trim_matches(TRIMMED);
		if line.is_empty() {
			return LineStatus::End;
		}

		let line = line.to_lowercase();
		let (key, value) = match line.split_once('=') {
			Some(split) => split,
			None => return LineStatus::Malformed,
		};

		let value = value.trim_matches(TRIMMED);
		let slot = match key.trim_matches(TRIMMED) {
			"sasl_username" => &mut self.sasl_user,
			"client_address" => &mut self.ip_address,
			"sender" => &mut self.sender,
			"recipient" => &mut self.recipient,
			_ => return LineStatus::Ignored,
		};

		// An empty value means the MTA had nothing for that attribute
		*slot = if value.is_empty() {
			None
		} else {
			Some(value.to_owned())
		};

		LineStatus::Attribute
	}

	pub fn sasl_user(&self) -> Option<&str> {
		self.sasl_user.as_deref()
	}

	pub fn ip_address(&self) -> Option<&str> {
		self.ip_address.as_deref()
	}

	pub fn sender(&self) -> Option<&str> {
		self.sender.as_deref()
	}

	pub fn recipient(&self) -> Option<&str> {
		self.recipient.as_deref()
	}
}

impl std::str::FromStr for PolicyRequest {
	type Err = ParseRequestError;

	/// Parses a complete attribute block, stopping at the first blank line.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.is_empty() {
			return Err(ParseRequestError::EmptyString);
		}

		let mut request = Self::new();
		for line in s.split('\n') {
			if request.push_line(line) == LineStatus::End {
				break;
			}
		}

		Ok(request)
	}
}

#[derive(Error, Debug, PartialEq)]
pub enum ParseRequestError {
	#[error("the request was empty")]
	EmptyString,
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn recognized_attributes() {
		let request: PolicyRequest = "request=smtpd_access_policy\n\
			protocol_state=RCPT\n\
			sasl_username=Alice\n\
			client_address=192.0.2.10\n\
			sender=Alice@Example.org\n\
			recipient=bob@example.net\n\
			\n"
		.parse()
		.unwrap();

		assert_eq!(request.sasl_user(), Some("alice"));
		assert_eq!(request.ip_address(), Some("192.0.2.10"));
		assert_eq!(request.sender(), Some("alice@example.org"));
		assert_eq!(request.recipient(), Some("bob@example.net"));
	}

	#[test]
	fn malformed_lines_are_skipped() {
		let mut request = PolicyRequest::new();

		assert_eq!(request.push_line("this line has no equals\n"), LineStatus::Malformed);
		assert_eq!(request.push_line("sender=a@b.c\n"), LineStatus::Attribute);
		assert_eq!(request.push_line("garbage"), LineStatus::Malformed);
		assert_eq!(request.push_line("client_address=10.1.1.1\r\n"), LineStatus::Attribute);
		assert_eq!(request.push_line("\r\n"), LineStatus::End);

		assert_eq!(request.sender(), Some("a@b.c"));
		assert_eq!(request.ip_address(), Some("10.1.1.1"));
	}

	#[test]
	fn splits_on_first_equals() {
		let mut request = PolicyRequest::new();
		request.push_line("sasl_username = user=with=equals ");

		assert_eq!(request.sasl_user(), Some("user=with=equals"));
	}

	#[test]
	fn empty_value_is_absent() {
		let request: PolicyRequest = "sender=\nsasl_username=\nclient_address=10.0.0.1\n\n"
			.parse()
			.unwrap();

		assert_eq!(request.sender(), None);
		assert_eq!(request.sasl_user(), None);
		assert_eq!(request.ip_address(), Some("10.0.0.1"));
	}

	#[test]
	fn unknown_keys_ignored() {
		let mut request = PolicyRequest::new();

		assert_eq!(request.push_line("helo_name=mx.example.org"), LineStatus::Ignored);
		assert_eq!(request, PolicyRequest::default());
	}

	#[test]
	fn stops_at_blank_line() {
		let request: PolicyRequest = "sender=first@example.org\n\nsender=second@example.org\n"
			.parse()
			.unwrap();

		assert_eq!(request.sender(), Some("first@example.org"));
	}

	#[test]
	fn empty_string() {
		assert_eq!(
			"".parse::<PolicyRequest>(),
			Err(ParseRequestError::EmptyString)
		);
	}
}
