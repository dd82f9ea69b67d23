#![forbid(unsafe_code)]

pub mod endpoint {
	/// Parsed `https://host[:port]` backend endpoint with no trailing path.
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct BaseEndpoint {
		pub host: String,
		pub port: Option<u16>,
	}

	impl BaseEndpoint {
		/// Returns the endpoint as a URL prefix suitable for joining paths onto.
		pub fn url(&self) -> String {
			match self.port {
				Some(port) => format!("https://{}:{}", self.host, port),
				None => format!("https://{}", self.host),
			}
		}

		/// Parse a backend endpoint string in the form `https://host[:port]`.
		pub fn parse(s: &str) -> Result<Self, String> {
			let s = s.trim();
			if s.is_empty() {
				return Err("endpoint must be non-empty (expected https://host[:port])".to_string());
			}

			let rest = s
				.strip_prefix("https://")
				.ok_or_else(|| format!("invalid endpoint (expected https://host[:port]): {s}"))?;

			let rest = rest.strip_suffix('/').unwrap_or(rest);

			if rest.contains('/') || rest.contains('?') || rest.contains('#') {
				return Err(format!(
					"invalid endpoint (expected https://host[:port] without path/query/fragment): {s}"
				));
			}

			let (host, port) = match rest.rsplit_once(':') {
				Some((host, port_str)) if !host.contains(':') || (host.starts_with('[') && host.ends_with(']')) => {
					let port: u16 = port_str
						.trim()
						.parse()
						.map_err(|_| format!("invalid endpoint port (expected 1..=65535): {s}"))?;
					if port == 0 {
						return Err(format!("invalid endpoint port (expected 1..=65535): {s}"));
					}
					(host, Some(port))
				}
				_ => (rest, None),
			};

			let host = host.trim();
			if host.is_empty() {
				return Err(format!("invalid endpoint host (expected https://host[:port]): {s}"));
			}

			if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
				return Err(format!(
					"invalid endpoint host (IPv6 must be bracketed like https://[::1]:8443): {s}"
				));
			}

			Ok(Self {
				host: host.to_string(),
				port,
			})
		}
	}

	/// Validate `https://host[:port]`.
	pub fn validate_base_endpoint(s: &str) -> Result<(), String> {
		let _ = BaseEndpoint::parse(s)?;
		Ok(())
	}

	#[cfg(test)]
	mod tests {
		use super::*;

		#[test]
		fn parses_dns_hostname() {
			let e = BaseEndpoint::parse("https://db.bazaar.example.com").unwrap();
			assert_eq!(e.host, "db.bazaar.example.com");
			assert_eq!(e.port, None);
			assert_eq!(e.url(), "https://db.bazaar.example.com");
		}

		#[test]
		fn parses_hostname_with_port() {
			let e = BaseEndpoint::parse("https://localhost:54321").unwrap();
			assert_eq!(e.host, "localhost");
			assert_eq!(e.port, Some(54321));
			assert_eq!(e.url(), "https://localhost:54321");
		}

		#[test]
		fn strips_single_trailing_slash() {
			let e = BaseEndpoint::parse("https://db.bazaar.example.com/").unwrap();
			assert_eq!(e.url(), "https://db.bazaar.example.com");
		}

		#[test]
		fn parses_bracketed_ipv6() {
			let e = BaseEndpoint::parse("https://[::1]:8443").unwrap();
			assert_eq!(e.host, "[::1]");
			assert_eq!(e.port, Some(8443));
		}

		#[test]
		fn rejects_unbracketed_ipv6() {
			let err = BaseEndpoint::parse("https://::1:8443").unwrap_err();
			assert!(err.to_lowercase().contains("ipv6"));
		}

		#[test]
		fn rejects_http_and_bare_host() {
			assert!(BaseEndpoint::parse("http://db.bazaar.example.com").is_err());
			assert!(BaseEndpoint::parse("db.bazaar.example.com").is_err());
		}

		#[test]
		fn rejects_path_query_fragment() {
			assert!(BaseEndpoint::parse("https://x.example.com/rest").is_err());
			assert!(BaseEndpoint::parse("https://x.example.com?x=y").is_err());
			assert!(BaseEndpoint::parse("https://x.example.com#frag").is_err());
		}

		#[test]
		fn rejects_port_zero_and_empty() {
			assert!(BaseEndpoint::parse("https://x.example.com:0").is_err());
			assert!(BaseEndpoint::parse("").is_err());
			assert!(BaseEndpoint::parse("   ").is_err());
		}
	}
}

pub mod text {
	/// Truncate to at most `max` characters, respecting char boundaries.
	pub fn preview(s: &str, max: usize) -> String {
		s.chars().take(max).collect()
	}

	/// Returns the trimmed string when it contains any non-whitespace.
	pub fn trimmed_non_empty(s: &str) -> Option<&str> {
		let t = s.trim();
		if t.is_empty() { None } else { Some(t) }
	}

	/// First 6 characters of an identifier, for fallback display labels.
	pub fn short_id(id: &str) -> &str {
		let end = id
			.char_indices()
			.nth(6)
			.map(|(i, _)| i)
			.unwrap_or(id.len());
		&id[..end]
	}

}
