//! Permission declarations
//!
//! A script declares what it may touch with `@permission` lines. Each value is
//! one of a URL match pattern, `browser.<namespace>`, or `native`. The parsed
//! form is consulted by the capability proxy on every call.

use crate::error::PatternError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Browser extension namespaces reachable through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BrowserNamespace {
    Bookmarks,
    Downloads,
    History,
    Sessions,
    Storage,
    System,
    Tabs,
    TopSites,
    WebNavigation,
    Windows,
}

impl BrowserNamespace {
    pub const ALL: [BrowserNamespace; 10] = [
        BrowserNamespace::Bookmarks,
        BrowserNamespace::Downloads,
        BrowserNamespace::History,
        BrowserNamespace::Sessions,
        BrowserNamespace::Storage,
        BrowserNamespace::System,
        BrowserNamespace::Tabs,
        BrowserNamespace::TopSites,
        BrowserNamespace::WebNavigation,
        BrowserNamespace::Windows,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserNamespace::Bookmarks => "bookmarks",
            BrowserNamespace::Downloads => "downloads",
            BrowserNamespace::History => "history",
            BrowserNamespace::Sessions => "sessions",
            BrowserNamespace::Storage => "storage",
            BrowserNamespace::System => "system",
            BrowserNamespace::Tabs => "tabs",
            BrowserNamespace::TopSites => "topSites",
            BrowserNamespace::WebNavigation => "webNavigation",
            BrowserNamespace::Windows => "windows",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|ns| ns.as_str() == s)
    }

    /// `tabs` and `windows` are usable without an explicit grant.
    pub fn is_implicit(&self) -> bool {
        matches!(self, BrowserNamespace::Tabs | BrowserNamespace::Windows)
    }
}

impl fmt::Display for BrowserNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheme part of a match pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SchemeFilter {
    /// `*` matches http and https (and their websocket counterparts).
    Web,
    Exact(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostFilter {
    Any,
    /// `*.example.com`: the domain itself or any subdomain.
    Suffix(String),
    Exact(String),
}

/// Chrome-style URL match pattern, e.g. `*://*.amazon.com/*` or `<all_urls>`.
#[derive(Debug, Clone)]
pub struct MatchPattern {
    source: String,
    kind: MatchKind,
}

#[derive(Debug, Clone)]
enum MatchKind {
    AllUrls,
    Pattern {
        scheme: SchemeFilter,
        host: HostFilter,
        path: Regex,
    },
}

const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "ws", "wss", "file", "ftp"];

impl MatchPattern {
    pub fn parse(source: &str) -> Result<Self, PatternError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(PatternError::Empty);
        }
        if trimmed == "<all_urls>" {
            return Ok(Self {
                source: trimmed.to_string(),
                kind: MatchKind::AllUrls,
            });
        }

        let (scheme, rest) = trimmed
            .split_once("://")
            .ok_or(PatternError::MissingScheme)?;
        let scheme = match scheme {
            "*" => SchemeFilter::Web,
            s if SUPPORTED_SCHEMES.contains(&s) => SchemeFilter::Exact(s.to_string()),
            other => return Err(PatternError::InvalidScheme(other.to_string())),
        };

        // A missing path is read as `/*`.
        let (host, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/*"),
        };

        let host = if host == "*" {
            HostFilter::Any
        } else if let Some(domain) = host.strip_prefix("*.") {
            if domain.is_empty() || domain.contains('*') {
                return Err(PatternError::InvalidHost(host.to_string()));
            }
            HostFilter::Suffix(domain.to_ascii_lowercase())
        } else if host.contains('*') {
            return Err(PatternError::InvalidHost(host.to_string()));
        } else if host.is_empty() && scheme != SchemeFilter::Exact("file".to_string()) {
            return Err(PatternError::InvalidHost(host.to_string()));
        } else {
            HostFilter::Exact(host.to_ascii_lowercase())
        };

        let glob = path
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let path = Regex::new(&format!("^{}$", glob))
            .map_err(|e| PatternError::InvalidHost(e.to_string()))?;

        Ok(Self {
            source: trimmed.to_string(),
            kind: MatchKind::Pattern { scheme, host, path },
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Does this pattern cover `url`?
    pub fn matches(&self, url: &Url) -> bool {
        let (scheme, host, path) = match &self.kind {
            MatchKind::AllUrls => {
                return SUPPORTED_SCHEMES.contains(&url.scheme());
            }
            MatchKind::Pattern { scheme, host, path } => (scheme, host, path),
        };

        let scheme_ok = match scheme {
            SchemeFilter::Web => matches!(url.scheme(), "http" | "https" | "ws" | "wss"),
            SchemeFilter::Exact(s) => url.scheme() == s,
        };
        if !scheme_ok {
            return false;
        }

        let url_host = url.host_str().unwrap_or("").to_ascii_lowercase();
        let host_ok = match host {
            HostFilter::Any => true,
            HostFilter::Exact(h) => url_host == *h,
            HostFilter::Suffix(domain) => {
                url_host == *domain || url_host.ends_with(&format!(".{}", domain))
            }
        };
        if !host_ok {
            return false;
        }

        let mut target = url.path().to_string();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }
        path.is_match(&target)
    }

    pub fn matches_str(&self, url: &str) -> bool {
        Url::parse(url).map(|u| self.matches(&u)).unwrap_or(false)
    }
}

impl PartialEq for MatchPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for MatchPattern {}

/// One `@permission` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionSpec {
    UrlMatch(MatchPattern),
    Browser(BrowserNamespace),
    Native,
}

impl FromStr for PermissionSpec {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value == "native" {
            return Ok(PermissionSpec::Native);
        }
        if let Some(ns) = value.strip_prefix("browser.") {
            return BrowserNamespace::parse(ns)
                .map(PermissionSpec::Browser)
                .ok_or_else(|| format!("unknown browser namespace '{}'", ns));
        }
        MatchPattern::parse(value)
            .map(PermissionSpec::UrlMatch)
            .map_err(|e| e.to_string())
    }
}

impl fmt::Display for PermissionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionSpec::UrlMatch(p) => f.write_str(p.as_str()),
            PermissionSpec::Browser(ns) => write!(f, "browser.{}", ns),
            PermissionSpec::Native => f.write_str("native"),
        }
    }
}

impl Serialize for PermissionSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Grants of one script, indexed for lookups on the proxy's hot path.
#[derive(Debug, Clone, Default)]
pub struct PermissionSet {
    browser: BTreeSet<BrowserNamespace>,
    url_patterns: Vec<MatchPattern>,
    native: bool,
}

impl PermissionSet {
    pub fn from_specs<'a>(specs: impl IntoIterator<Item = &'a PermissionSpec>) -> Self {
        let mut set = PermissionSet::default();
        for spec in specs {
            match spec {
                PermissionSpec::UrlMatch(p) => set.url_patterns.push(p.clone()),
                PermissionSpec::Browser(ns) => {
                    set.browser.insert(*ns);
                }
                PermissionSpec::Native => set.native = true,
            }
        }
        set
    }

    pub fn allows_namespace(&self, ns: BrowserNamespace) -> bool {
        ns.is_implicit() || self.browser.contains(&ns)
    }

    pub fn allows_url(&self, url: &Url) -> bool {
        self.url_patterns.iter().any(|p| p.matches(url))
    }

    pub fn allows_native(&self) -> bool {
        self.native
    }
}
