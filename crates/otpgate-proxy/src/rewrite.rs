//! Textual rewriting of upstream HTML and redirect targets.
//!
//! This is plain substring replacement, not HTML parsing. The table built in
//! [`Rewriter::new`] is the complete set of rules.

use crate::gate::AccessKey;

/// Attributes whose absolute upstream URLs are made proxy-relative.
const URL_ATTRIBUTES: &[&str] = &["action", "href", "src"];

/// Root-relative patterns prefixed with the access key.
const ROOT_RELATIVE_PATTERNS: &[&str] = &["URL=/", "action=\"/", "href=\"/", "src=\"/"];

/// Rewrites response bodies and `Location` headers for the client's view.
#[derive(Debug, Clone)]
pub struct Rewriter {
    base_url: String,
    key_prefix: Option<String>,
    substitutions: Vec<(String, String)>,
}

impl Rewriter {
    /// Build the substitution table for `base_url` (no trailing slash).
    pub fn new(base_url: &str, key: Option<&AccessKey>) -> Self {
        let key_prefix = key.map(AccessKey::prefix);
        let mut substitutions = Vec::new();

        match &key_prefix {
            Some(prefix) => {
                for pattern in ROOT_RELATIVE_PATTERNS {
                    let head = &pattern[..pattern.len() - 1];
                    substitutions.push((pattern.to_string(), format!("{head}{prefix}/")));
                }
                for attr in URL_ATTRIBUTES {
                    substitutions.push((
                        format!("{attr}=\"{base_url}/"),
                        format!("{attr}=\"{prefix}/"),
                    ));
                }
            }
            None => {
                for attr in URL_ATTRIBUTES {
                    substitutions.push((format!("{attr}=\"{base_url}/"), format!("{attr}=\"/")));
                }
            }
        }

        Self {
            base_url: base_url.to_string(),
            key_prefix,
            substitutions,
        }
    }

    /// The active substitution table, in application order.
    pub fn substitutions(&self) -> &[(String, String)] {
        &self.substitutions
    }

    /// Apply every substitution to an HTML body.
    pub fn rewrite_html(&self, body: &str) -> String {
        self.substitutions
            .iter()
            .fold(body.to_string(), |acc, (from, to)| acc.replace(from, to))
    }

    /// Rewrite a redirect target so it stays behind the proxy.
    pub fn rewrite_location(&self, location: &str) -> String {
        if let Some(rest) = location.strip_prefix(&self.base_url)
            && (rest.is_empty() || rest.starts_with(['/', '?', '#']))
        {
            if rest.starts_with('/') {
                return self.prefixed(rest);
            }
            return self.prefixed(&format!("/{rest}"));
        }
        if location.starts_with('/') {
            return self.prefixed(location);
        }
        location.to_string()
    }

    fn prefixed(&self, path: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{prefix}{path}"),
            None => path.to_string(),
        }
    }
}
