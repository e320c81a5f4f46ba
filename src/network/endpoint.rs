//! Connection target construction

use url::Url;

use crate::constants::TOKEN_QUERY_PARAM;
use crate::error::NetworkError;

/// Ingest socket address with the session token attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    url: Url,
}

impl ConnectionTarget {
    /// Parse `endpoint` and append the token as `csrf_token`.
    ///
    /// The token is opaque: it is percent-encoded but never inspected.
    pub fn new(endpoint: &str, token: Option<&str>) -> Result<Self, NetworkError> {
        let mut url = Url::parse(endpoint)
            .map_err(|e| NetworkError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(NetworkError::InvalidEndpoint(format!(
                "expected ws:// or wss://, got {}",
                endpoint
            )));
        }

        if let Some(token) = token {
            url.query_pairs_mut().append_pair(TOKEN_QUERY_PARAM, token);
        }

        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// HTTP origin of the same host (`ws` → `http`, `wss` → `https`)
    pub fn http_origin(&self) -> Result<Url, NetworkError> {
        let mut origin = self.url.clone();
        let scheme = if self.url.scheme() == "wss" { "https" } else { "http" };
        origin
            .set_scheme(scheme)
            .map_err(|_| NetworkError::InvalidEndpoint(self.redacted()))?;
        origin.set_path("/");
        origin.set_query(None);
        origin.set_fragment(None);
        Ok(origin)
    }

    /// Address safe to log: the token value is masked
    pub fn redacted(&self) -> String {
        let mut url = self.url.clone();
        let pairs: Vec<(String, String)> = self
            .url
            .query_pairs()
            .map(|(k, v)| {
                let v = if k == TOKEN_QUERY_PARAM { "***".to_string() } else { v.into_owned() };
                (k.into_owned(), v)
            })
            .collect();

        if pairs.is_empty() {
            return url.to_string();
        }

        url.query_pairs_mut().clear().extend_pairs(pairs);
        url.to_string()
    }
}

impl std::fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redacted())
    }
}
