use std::str::FromStr;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Transport selector of a node address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scheme {
	/// In-process transport within one process
	Local,
	/// Plain TCP socket transport
	Socket,
	/// tarpc-backed transport
	Rpc
}

impl Scheme {
	pub fn as_str(&self) -> &'static str {
		match self {
			Scheme::Local => "local",
			Scheme::Socket => "socket",
			Scheme::Rpc => "rpc"
		}
	}
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum UrlError {
	#[error("Unknown scheme in url: {0}")]
	UnknownScheme(String),
	#[error("Malformed url: {0}")]
	Malformed(String)
}

/// Address of a node endpoint: scheme://host:port/path.
/// Immutable value type, used as pool and registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Url {
	pub scheme: Scheme,
	pub host: String,
	pub port: u16,
	pub path: String
}

impl Url {
	pub fn new(scheme: Scheme, host: &str, port: u16) -> Self {
		Url {
			scheme,
			host: host.to_string(),
			port,
			path: String::new()
		}
	}

	/// host:port form used to open TCP connections.
	pub fn socket_addr(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}
}

impl std::fmt::Display for Url {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}://{}:{}/{}", self.scheme.as_str(), self.host, self.port, self.path)
	}
}

impl FromStr for Url {
	type Err = UrlError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (scheme_str, rest) = s
			.split_once("://")
			.ok_or_else(|| UrlError::Malformed(s.to_string()))?;
		let scheme = match scheme_str {
			"local" => Scheme::Local,
			"socket" => Scheme::Socket,
			"rpc" => Scheme::Rpc,
			other => return Err(UrlError::UnknownScheme(other.to_string()))
		};
		let (authority, path) = match rest.split_once('/') {
			Some((a, p)) => (a, p.to_string()),
			None => (rest, String::new())
		};
		let (host, port_str) = authority
			.rsplit_once(':')
			.ok_or_else(|| UrlError::Malformed(s.to_string()))?;
		if host.is_empty() {
			return Err(UrlError::Malformed(s.to_string()));
		}
		let port = port_str
			.parse::<u16>()
			.map_err(|_| UrlError::Malformed(s.to_string()))?;
		Ok(Url {
			scheme,
			host: host.to_string(),
			port,
			path
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_and_display() {
		let url: Url = "socket://localhost:9800/".parse().unwrap();
		assert_eq!(url.scheme, Scheme::Socket);
		assert_eq!(url.host, "localhost");
		assert_eq!(url.port, 9800);
		assert_eq!(url.to_string(), "socket://localhost:9800/");

		let url: Url = "local://node-1:1/".parse().unwrap();
		assert_eq!(url.scheme, Scheme::Local);

		let url: Url = "rpc://127.0.0.1:9900/ring".parse().unwrap();
		assert_eq!(url.path, "ring");
		assert_eq!(url.to_string(), "rpc://127.0.0.1:9900/ring");
	}

	#[test]
	fn test_parse_errors() {
		assert!("http://h:1/".parse::<Url>().is_err());
		assert!("socket://h/".parse::<Url>().is_err());
		assert!("socket://:9000/".parse::<Url>().is_err());
		assert!("nonsense".parse::<Url>().is_err());
	}
}
