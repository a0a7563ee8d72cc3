//! Zeroized wrapper for signer key material.
//!
//! Every signing key enters the process through an environment variable
//! and leaves it exactly once, inside a key parser. `Secret` owns that
//! window: the raw value is whitespace-trimmed on intake (quoting and
//! shell interpolation routinely smuggle a stray newline into env
//! values, and key parsers reject it with baffling errors), zeroed on
//! drop, and redacted from every formatting path. There is no accessor
//! that returns the value; a parser borrows it through a closure and
//! the borrow cannot outlive the call.

use std::fmt;
use zeroize::Zeroizing;

/// Signer key material with a construct-then-parse surface.
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
	/// Takes ownership of a raw environment value.
	///
	/// Surrounding whitespace is stripped; the untrimmed original is
	/// zeroed before this returns.
	pub fn new(value: impl Into<String>) -> Self {
		let raw = Zeroizing::new(value.into());
		Self(Zeroizing::new(raw.trim().to_string()))
	}

	/// Lends the value to a key parser.
	pub fn with_exposed<R>(&self, parse: impl FnOnce(&str) -> R) -> R {
		parse(&self.0)
	}
}

impl fmt::Debug for Secret {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("Secret(<redacted>)")
	}
}

impl fmt::Display for Secret {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}
