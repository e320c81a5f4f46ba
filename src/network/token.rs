//! Session token lookup from a page's `csrf-token` meta tag

use regex::Regex;

use crate::error::NetworkError;

/// Read `content` of `<meta name="csrf-token" content="...">`.
///
/// Attribute order and quote style do not matter.
pub fn extract_csrf_token(html: &str) -> Option<String> {
    let meta = Regex::new(r"(?is)<meta\b[^>]*>").ok()?;
    let name = Regex::new(r#"(?i)\bname\s*=\s*["']csrf-token["']"#).ok()?;
    let content = Regex::new(r#"(?i)\bcontent\s*=\s*(?:"([^"]*)"|'([^']*)')"#).ok()?;

    let token = meta
        .find_iter(html)
        .map(|tag| tag.as_str())
        .filter(|tag| name.is_match(tag))
        .find_map(|tag| {
            content
                .captures(tag)
                .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
                .map(|m| m.as_str().to_string())
        });
    token
}

/// Fetch a page and read its token
pub async fn fetch_csrf_token(page_url: &str) -> Result<String, NetworkError> {
    let response = reqwest::get(page_url)
        .await
        .map_err(|e| NetworkError::TokenLookup(e.to_string()))?
        .error_for_status()
        .map_err(|e| NetworkError::TokenLookup(e.to_string()))?;

    let body = response
        .text()
        .await
        .map_err(|e| NetworkError::TokenLookup(e.to_string()))?;

    extract_csrf_token(&body)
        .ok_or_else(|| NetworkError::TokenLookup(format!("no csrf-token meta tag at {}", page_url)))
}
