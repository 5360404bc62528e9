/// SQL `LIKE` matching, the way the blocklist tables are queried: `%` matches
/// any run of characters, `_` exactly one, and `\` escapes the next character.
/// Comparison ignores case, as the default MySQL collations do.
pub fn like(candidate: &str, pattern: &str) -> bool {
	let candidate: Vec<char> = candidate.to_lowercase().chars().collect();
	let pattern = tokenize(&pattern.to_lowercase());

	matches(&candidate, &pattern)
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Token {
	Literal(char),
	One,
	Any,
}

fn tokenize(pattern: &str) -> Vec<Token> {
	let mut tokens = vec![];
	let mut chars = pattern.chars();

	while let Some(c) = chars.next() {
		let token = match c {
			'%' => Token::Any,
			'_' => Token::One,
			// A trailing backslash matches itself
			'\\' => Token::Literal(chars.next().unwrap_or('\\')),
			c => Token::Literal(c),
		};

		// Runs of % are equivalent to a single one
		if token == Token::Any && tokens.last() == Some(&Token::Any) {
			continue;
		}
		tokens.push(token);
	}

	tokens
}

// Iterative wildcard match with single-star backtracking
fn matches(candidate: &[char], pattern: &[Token]) -> bool {
	let (mut c, mut p) = (0, 0);
	let mut backtrack: Option<(usize, usize)> = None;

	while c < candidate.len() {
		match pattern.get(p) {
			Some(Token::Literal(l)) if *l == candidate[c] => {
				c += 1;
				p += 1;
			}
			Some(Token::One) => {
				c += 1;
				p += 1;
			}
			Some(Token::Any) => {
				backtrack = Some((p, c));
				p += 1;
			}
			_ => match backtrack {
				Some((star, from)) => {
					p = star + 1;
					c = from + 1;
					backtrack = Some((star, from + 1));
				}
				None => return false,
			},
		}
	}

	pattern[p..].iter().all(|token| *token == Token::Any)
}

#[cfg(test)]
mod test {
	use super::like;

	#[test]
	fn exact() {
		assert!(like("spam@example.org", "spam@example.org"));
		assert!(!like("spam@example.org", "spam@example.com"));
	}

	#[test]
	fn percent() {
		assert!(like("anyone@spammer.biz", "%@spammer.biz"));
		assert!(like("@spammer.biz", "%@spammer.biz"));
		assert!(like("bulk-sender@example.org", "bulk%"));
		assert!(like("a@b.c", "%"));
		assert!(like("", "%"));
		assert!(!like("anyone@spammer.biz.example", "%@spammer.biz"));
	}

	#[test]
	fn underscore() {
		assert!(like("a1@example.org", "a_@example.org"));
		assert!(!like("a@example.org", "a_@example.org"));
		assert!(!like("a12@example.org", "a_@example.org"));
	}

	#[test]
	fn backtracking() {
		assert!(like("xaaab", "%a%b"));
		assert!(like("mail.mail.example.org", "%mail.example.org"));
		assert!(!like("xaaac", "%a%b"));
	}

	#[test]
	fn escapes() {
		assert!(like("100%", "100\\%"));
		assert!(!like("1000", "100\\%"));
		assert!(like("a_b", "a\\_b"));
		assert!(!like("axb", "a\\_b"));
	}

	#[test]
	fn case_insensitive() {
		assert!(like("Spam@Example.ORG", "spam@example.org"));
		assert!(like("spam@example.org", "%@EXAMPLE.org"));
	}
}
