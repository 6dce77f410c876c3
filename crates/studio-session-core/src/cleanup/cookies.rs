use chrono::{DateTime, Utc};

/// Substrings (lowercase) marking a cookie as authentication-related.
const AUTH_COOKIE_MARKERS: &[&str] = &[
    "session",
    "token",
    "csrf",
    "next-auth",
    "authjs",
    "oauth",
    "pkce",
    "g_state",
    "callback-url",
];

/// Auth cookies expired even when enumeration does not show them.
/// Secure and host-prefixed cookies may be invisible to script access.
pub const WELL_KNOWN_AUTH_COOKIES: &[&str] = &[
    "next-auth.session-token",
    "next-auth.csrf-token",
    "next-auth.callback-url",
    "next-auth.pkce.code_verifier",
    "next-auth.state",
    "__Secure-next-auth.session-token",
    "__Secure-next-auth.callback-url",
    "__Secure-next-auth.pkce.code_verifier",
    "__Secure-next-auth.state",
    "__Host-next-auth.csrf-token",
];

pub fn is_auth_cookie(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    AUTH_COOKIE_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// A single cookie write that expires `name` at one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieExpiry {
    pub name: String,
    pub path: String,
    /// `None` targets the host-only cookie
    pub domain: Option<String>,
    pub expires: DateTime<Utc>,
}

impl CookieExpiry {
    fn new(name: &str, domain: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            path: "/".to_string(),
            domain,
            expires: DateTime::UNIX_EPOCH,
        }
    }

    /// `Set-Cookie` style rendering of the write.
    pub fn to_header_value(&self) -> String {
        let mut value = format!(
            "{}=; expires={}; path={}",
            self.name,
            self.expires.format("%a, %d %b %Y %H:%M:%S GMT"),
            self.path
        );
        if let Some(domain) = &self.domain {
            value.push_str("; domain=");
            value.push_str(domain);
        }
        value
    }
}

/// The three writes that expire `name`: bare path, current host, and the
/// dot-prefixed host.
pub fn expiry_writes(name: &str, host: &str) -> [CookieExpiry; 3] {
    let host = host.trim_start_matches('.');
    [
        CookieExpiry::new(name, None),
        CookieExpiry::new(name, Some(host.to_string())),
        CookieExpiry::new(name, Some(format!(".{}", host))),
    ]
}

/// Auth cookies among `observed`, followed by the well-known names not seen.
pub fn cookies_to_expire(observed: &[String]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let candidates = observed
        .iter()
        .map(String::as_str)
        .filter(|name| is_auth_cookie(name))
        .chain(WELL_KNOWN_AUTH_COOKIES.iter().copied());
    for name in candidates {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}
