//! Post-login redirect targets.
//!
//! Redirects only ever name a page of the front controller. A requested
//! target outside the allow-list falls back to the dashboard.

use std::collections::HashSet;

/// Landing page after login and registration.
pub const DEFAULT_PAGE: &str = "dashboard";

/// Allow-list of redirect pages and the front controller they live under.
#[derive(Debug, Clone)]
pub struct RedirectPolicy {
    front_controller: String,
    allowed: HashSet<String>,
}

impl RedirectPolicy {
    /// Create a policy.
    #[must_use]
    pub fn new(front_controller: impl Into<String>, allowed: &[String]) -> Self {
        Self {
            front_controller: front_controller.into(),
            allowed: allowed.iter().map(|p| p.trim().to_ascii_lowercase()).collect(),
        }
    }

    /// Page to land on for a requested target.
    #[must_use]
    pub fn resolve(&self, requested: Option<&str>) -> String {
        requested
            .map(|r| r.trim().trim_start_matches('/').to_ascii_lowercase())
            .filter(|page| self.allowed.contains(page))
            .unwrap_or_else(|| DEFAULT_PAGE.to_string())
    }

    /// Location of a page.
    #[must_use]
    pub fn page(&self, page: &str) -> String {
        format!("{}?page={page}", self.front_controller)
    }

    /// Location of a page with one extra query parameter.
    #[must_use]
    pub fn page_with(&self, page: &str, key: &str, value: &str) -> String {
        format!("{}&{key}={value}", self.page(page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn policy() -> RedirectPolicy {
        RedirectPolicy::new(
            "/index.php",
            &["dashboard".to_string(), "transfer".to_string()],
        )
    }

    #[test]
    fn test_allowed_target() {
        assert_eq!(policy().resolve(Some("transfer")), "transfer");
        assert_eq!(policy().resolve(Some(" /Transfer ")), "transfer");
    }

    #[test]
    fn test_open_redirect_falls_back() {
        let policy = policy();
        assert_eq!(policy.resolve(Some("https://evil.example/")), DEFAULT_PAGE);
        assert_eq!(policy.resolve(Some("//evil.example")), DEFAULT_PAGE);
        assert_eq!(policy.resolve(Some("transfer&next=evil")), DEFAULT_PAGE);
        assert_eq!(policy.resolve(None), DEFAULT_PAGE);
    }

    #[test]
    fn test_locations() {
        let policy = policy();
        assert_eq!(policy.page("dashboard"), "/index.php?page=dashboard");
        assert_eq!(
            policy.page_with("login", "error", "invalid"),
            "/index.php?page=login&error=invalid"
        );
    }
}
