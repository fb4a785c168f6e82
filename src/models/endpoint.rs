use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::utils::errors::{StreamError, StreamResult};

/// Base URL of a server that can answer catalog, discovery or stream requests
///
/// Stored without a trailing slash so paths can be appended directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint(String);

impl Endpoint {
    pub fn parse(raw: &str) -> StreamResult<Self> {
        let url = Url::parse(raw.trim())
            .map_err(|e| StreamError::Configuration(format!("Invalid server URL '{}': {}", raw, e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(StreamError::Configuration(format!(
                "Unsupported scheme '{}' in server URL '{}'",
                url.scheme(),
                raw
            )));
        }
        if url.host_str().is_none() {
            return Err(StreamError::Configuration(format!(
                "Server URL '{}' has no host",
                raw
            )));
        }

        Ok(Self(url.as_str().trim_end_matches('/').to_string()))
    }

    /// Build an endpoint from a streamer node address.
    ///
    /// Accepts a full URL, `host:port`, or a bare IP/host which gets `default_port`.
    pub fn from_node_address(address: &str, default_port: u16) -> StreamResult<Self> {
        let address = address.trim();
        if address.contains("://") {
            Self::parse(address)
        } else if address.contains(':') {
            Self::parse(&format!("http://{}", address))
        } else {
            Self::parse(&format!("http://{}:{}", address, default_port))
        }
    }

    /// Append an absolute path (starting with `/`) to the base URL
    pub fn join(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.0, path)
        } else {
            format!("{}/{}", self.0, path)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = StreamError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.0
    }
}

/// A node reported by `/api/findStreamers/` as holding a given song
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamerNode {
    pub ip: String,
}
