//! Request → caching strategy classification.
//!
//! Rules are matched against the path part of the key (query and fragment
//! stripped). When several rules match, the most specific wins: an exact
//! key beats any literal prefix/suffix, a longer literal beats a shorter one,
//! and a regex only wins when nothing literal matches. Ties keep rule order.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::models::{Request, Strategy};

/// Application shell: the critical files needed to boot offline.
pub const APP_SHELL: &[&str] = &[
    "/",
    "/index.html",
    "/app.css",
    "/toast.css",
    "/loading.css",
    "/theme-light.css",
    "/bootstrap.js",
    "/debug.js",
    "/data.js",
    "/storage.js",
    "/calc.js",
    "/app.js",
    "/ui.js",
    "/wizard.js",
    "/error-handler.js",
    "/accessibility.js",
    "/theme.js",
    "/manifest.json",
    "/favicon.png",
    "/icon-192.png",
    "/icon-512.png",
];

/// Modules loaded on demand; cached on first use, never pre-fetched.
pub const ON_DEMAND_MODULES: &[&str] = &[
    "/analytics.js",
    "/charts.js",
    "/invoice.js",
    "/import-export.js",
    "/export.js",
    "/photo-modal.js",
    "/templates.js",
    "/client-database.js",
    "/quote-workflow.js",
    "/photos.js",
];

const STATIC_EXTENSIONS: &[&str] = &[".css", ".html", ".json"];
const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".ico"];

static CROSS_ORIGIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^https?://").expect("static cross-origin pattern is valid"));

/// How a rule pattern is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Exact,
    Prefix,
    Suffix,
    Regex,
}

/// A compiled key pattern.
#[derive(Debug, Clone)]
pub enum KeyPattern {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Regex(Regex),
}

impl KeyPattern {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            KeyPattern::Exact(s) => path == s,
            KeyPattern::Prefix(s) => path.starts_with(s.as_str()),
            KeyPattern::Suffix(s) => path.ends_with(s.as_str()),
            KeyPattern::Regex(re) => re.is_match(path),
        }
    }

    /// Ordering key for "most specific": (class, literal length).
    fn specificity(&self) -> (u8, usize) {
        match self {
            KeyPattern::Exact(s) => (3, s.len()),
            KeyPattern::Prefix(s) | KeyPattern::Suffix(s) => (2, s.len()),
            KeyPattern::Regex(_) => (1, 0),
        }
    }
}

/// One `(pattern → strategy)` mapping.
#[derive(Debug, Clone)]
pub struct StrategyRule {
    pub pattern: KeyPattern,
    pub strategy: Strategy,
}

impl StrategyRule {
    pub fn exact(key: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            pattern: KeyPattern::Exact(key.into()),
            strategy,
        }
    }

    pub fn prefix(prefix: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            pattern: KeyPattern::Prefix(prefix.into()),
            strategy,
        }
    }

    pub fn suffix(suffix: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            pattern: KeyPattern::Suffix(suffix.into()),
            strategy,
        }
    }

    pub fn regex(pattern: &str, strategy: Strategy) -> Result<Self> {
        let re = Regex::new(pattern).map_err(|e| CacheError::Config {
            message: format!("Invalid rule pattern {:?}: {}", pattern, e),
        })?;
        Ok(Self {
            pattern: KeyPattern::Regex(re),
            strategy,
        })
    }
}

/// Serializable rule as it appears in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub pattern: String,
    pub kind: PatternKind,
    pub strategy: Strategy,
}

impl RuleConfig {
    pub fn compile(&self) -> Result<StrategyRule> {
        match self.kind {
            PatternKind::Exact => Ok(StrategyRule::exact(&self.pattern, self.strategy)),
            PatternKind::Prefix => Ok(StrategyRule::prefix(&self.pattern, self.strategy)),
            PatternKind::Suffix => Ok(StrategyRule::suffix(&self.pattern, self.strategy)),
            PatternKind::Regex => StrategyRule::regex(&self.pattern, self.strategy),
        }
    }
}

/// Maps request keys to caching strategies using an ordered rule list.
#[derive(Debug, Clone)]
pub struct ResourceClassifier {
    rules: Vec<StrategyRule>,
    default: Strategy,
}

impl Default for ResourceClassifier {
    fn default() -> Self {
        Self::application_defaults()
    }
}

impl ResourceClassifier {
    /// Classifier over `rules`, falling back to network-first.
    pub fn new(rules: Vec<StrategyRule>) -> Self {
        Self {
            rules,
            default: Strategy::NetworkFirst,
        }
    }

    /// Compile configuration rules; an empty list selects the built-in set.
    pub fn from_rule_configs(configs: &[RuleConfig]) -> Result<Self> {
        if configs.is_empty() {
            return Ok(Self::application_defaults());
        }
        let rules = configs.iter().map(RuleConfig::compile).collect::<Result<Vec<_>>>()?;
        Ok(Self::new(rules))
    }

    /// The quote engine's rule set.
    pub fn application_defaults() -> Self {
        let mut rules: Vec<StrategyRule> = APP_SHELL
            .iter()
            .chain(ON_DEMAND_MODULES)
            .map(|key| StrategyRule::exact(*key, Strategy::CacheFirst))
            .collect();

        rules.push(StrategyRule::prefix("/api/", Strategy::StaleWhileRevalidate));
        rules.extend(
            STATIC_EXTENSIONS
                .iter()
                .chain(IMAGE_EXTENSIONS)
                .map(|ext| StrategyRule::suffix(*ext, Strategy::CacheFirst)),
        );
        rules.push(StrategyRule {
            pattern: KeyPattern::Regex(CROSS_ORIGIN_RE.clone()),
            strategy: Strategy::StaleWhileRevalidate,
        });

        Self::new(rules)
    }

    pub fn rules(&self) -> &[StrategyRule] {
        &self.rules
    }

    /// Strategy for a key, by the most specific matching rule.
    pub fn classify(&self, key: &str) -> Strategy {
        let path = strip_query(key);
        let mut best: Option<&StrategyRule> = None;

        for rule in &self.rules {
            if !rule.pattern.matches(path) {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => rule.pattern.specificity() > current.pattern.specificity(),
            };
            if better {
                best = Some(rule);
            }
        }

        best.map(|r| r.strategy).unwrap_or(self.default)
    }

    /// Strategy for a full request; anything but a safe read is network-only.
    pub fn classify_request(&self, request: &Request) -> Strategy {
        if !request.method.is_safe_read() {
            return Strategy::NetworkOnly;
        }
        self.classify(&request.key)
    }
}

fn strip_query(key: &str) -> &str {
    let end = key.find(['?', '#']).unwrap_or(key.len());
    &key[..end]
}
