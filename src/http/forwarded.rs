//! Proxy-mode origin discovery from forwarding headers.
//!
//! Precedence: `Forwarded` (RFC 7239), else `X-Forwarded-Host` /
//! `X-Forwarded-Proto`, else the plain `Host` header handled by the caller.
//! When `Forwarded` lists multiple hops the first (client-most) element is
//! authoritative.

// crates.io
use http::HeaderMap;
// self
use crate::{_prelude::*, error::Code};

/// Origin hints extracted from forwarding headers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ForwardedInfo {
	/// Host the client originally addressed.
	pub host: Option<String>,
	/// Protocol the client originally used.
	pub proto: Option<String>,
}

/// Extract forwarding hints from the request headers.
pub fn extract(headers: &HeaderMap) -> Result<ForwardedInfo> {
	if let Some(value) = headers.get(http::header::FORWARDED) {
		let raw = value.to_str().map_err(|_| invalid("Forwarded header is not ASCII."))?;

		return parse_forwarded(raw);
	}

	let host = single_value(headers, "x-forwarded-host");
	let proto = single_value(headers, "x-forwarded-proto");

	Ok(ForwardedInfo { host, proto })
}

/// Parse an RFC 7239 `Forwarded` header value.
pub fn parse_forwarded(raw: &str) -> Result<ForwardedInfo> {
	let first = raw.split(',').next().unwrap_or("").trim();

	if first.is_empty() {
		return Err(invalid("Forwarded header is empty."));
	}

	let mut info = ForwardedInfo::default();

	for pair in first.split(';') {
		let pair = pair.trim();

		if pair.is_empty() {
			continue;
		}

		let (name, value) = pair
			.split_once('=')
			.ok_or_else(|| invalid(format!("Forwarded parameter '{pair}' has no value.")))?;
		let value = value.trim().trim_matches('"');

		match name.trim().to_ascii_lowercase().as_str() {
			"host" => info.host = Some(value.to_string()),
			"proto" => info.proto = Some(value.to_ascii_lowercase()),
			// `for`/`by` and extension parameters are irrelevant here.
			_ => {},
		}
	}

	Ok(info)
}

fn single_value(headers: &HeaderMap, name: &str) -> Option<String> {
	let raw = headers.get(name)?.to_str().ok()?;
	let first = raw.split(',').next()?.trim();

	(!first.is_empty()).then(|| first.to_string())
}

fn invalid(message: impl Into<String>) -> Error {
	Error::client(Code::ClientInvalidHeader, message)
}

#[cfg(test)]
mod tests {
	// crates.io
	use http::HeaderValue;
	// self
	use super::*;

	#[test]
	fn forwarded_takes_the_first_hop() {
		let info = parse_forwarded("for=192.0.2.60;proto=https;host=example.com, for=10.0.0.1")
			.expect("parse");

		assert_eq!(info.host.as_deref(), Some("example.com"));
		assert_eq!(info.proto.as_deref(), Some("https"));
	}

	#[test]
	fn quoted_values_are_unwrapped() {
		let info = parse_forwarded("host=\"example.com:8443\";proto=HTTPS").expect("parse");

		assert_eq!(info.host.as_deref(), Some("example.com:8443"));
		assert_eq!(info.proto.as_deref(), Some("https"));
	}

	#[test]
	fn malformed_forwarded_parameters_are_rejected() {
		assert!(parse_forwarded("host").is_err());
		assert!(parse_forwarded("   ").is_err());
	}

	#[test]
	fn x_forwarded_headers_are_the_fallback() {
		let mut headers = HeaderMap::new();

		headers.insert("x-forwarded-host", HeaderValue::from_static("example.com, proxy.local"));
		headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));

		let info = extract(&headers).expect("extract");

		assert_eq!(info.host.as_deref(), Some("example.com"));
		assert_eq!(info.proto.as_deref(), Some("http"));
	}
}
