//! Post-login redirect target validation.

use std::collections::HashSet;
use url::Url;

/// Accepts relative paths on this origin and absolute `http(s)` URLs whose
/// host is explicitly allowed.
#[derive(Clone, Debug, Default)]
pub struct RedirectPolicy {
    allowed_hosts: HashSet<String>,
}

impl RedirectPolicy {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_hosts: hosts
                .into_iter()
                .map(|host| host.as_ref().trim().to_lowercase())
                .filter(|host| !host.is_empty())
                .collect(),
        }
    }

    /// Add the host of `url`, if it has one.
    #[must_use]
    pub fn with_url_host(mut self, url: &str) -> Self {
        if let Some(host) = Url::parse(url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_lowercase))
        {
            self.allowed_hosts.insert(host);
        }
        self
    }

    /// Return the target unchanged when it is safe to redirect to.
    #[must_use]
    pub fn accept<'a>(&self, target: &'a str) -> Option<&'a str> {
        let target = target.trim();
        if target.is_empty() || target.chars().any(char::is_control) {
            return None;
        }
        if target.starts_with('/') {
            // `//host` and `/\host` are protocol-relative in browsers.
            let rest = &target[1..];
            if rest.starts_with('/') || rest.starts_with('\\') {
                return None;
            }
            return Some(target);
        }
        let url = Url::parse(target).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        let host = url.host_str()?.to_lowercase();
        self.allowed_hosts.contains(&host).then_some(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RedirectPolicy {
        RedirectPolicy::new(["extra.example.org"]).with_url_host("https://app.example.com")
    }

    #[test]
    fn accepts_relative_paths() {
        let policy = policy();
        assert_eq!(policy.accept("/"), Some("/"));
        assert_eq!(
            policy.accept("/clients?tab=open#top"),
            Some("/clients?tab=open#top")
        );
    }

    #[test]
    fn rejects_protocol_relative_and_schemes() {
        let policy = policy();
        assert_eq!(policy.accept("//evil.com"), None);
        assert_eq!(policy.accept("/\\evil.com"), None);
        assert_eq!(policy.accept("javascript:alert(1)"), None);
        assert_eq!(policy.accept("ftp://app.example.com/"), None);
        assert_eq!(policy.accept("relative/path"), None);
        assert_eq!(policy.accept(""), None);
        assert_eq!(policy.accept("/ok\n/evil"), None);
    }

    #[test]
    fn accepts_only_allowed_hosts() {
        let policy = policy();
        assert_eq!(
            policy.accept("https://app.example.com/dashboard"),
            Some("https://app.example.com/dashboard")
        );
        assert_eq!(
            policy.accept("http://EXTRA.example.org"),
            Some("http://EXTRA.example.org")
        );
        assert_eq!(policy.accept("https://evil.com/"), None);
        assert_eq!(policy.accept("https://app.example.com.evil.com/"), None);
        assert_eq!(policy.accept("https://evil.com@app.example.co/"), None);
    }
}
