//! Path-scoped permission checks
//!
//! Authentication happens elsewhere; this only answers whether a caller
//! holding the configured permissions may touch a given path.

use crate::config::AccessConfig;

/// What the caller is about to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Create new objects (every upload operation needs this)
    Create,
    /// Overwrite an existing object
    Modify,
}

/// Permission checker consulted before any upload state changes
pub trait AccessChecker: Send + Sync {
    fn allows(&self, action: Action, path: &str) -> bool;
}

/// A path prefix that is allowed or denied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub prefix: String,
    pub allow: bool,
}

impl Rule {
    pub fn deny(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            allow: false,
        }
    }

    pub fn allow(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            allow: true,
        }
    }

    fn matches(&self, path: &str) -> bool {
        let prefix = self.prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return true;
        }
        path == prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Permission flags plus ordered path rules; the last matching rule wins
#[derive(Debug, Clone)]
pub struct RuleChecker {
    create: bool,
    modify: bool,
    rules: Vec<Rule>,
}

impl RuleChecker {
    pub fn new(create: bool, modify: bool, rules: Vec<Rule>) -> Self {
        Self {
            create,
            modify,
            rules,
        }
    }

    pub fn from_config(config: &AccessConfig) -> Self {
        Self::new(
            config.allow_create,
            config.allow_modify,
            config.deny_paths.iter().map(Rule::deny).collect(),
        )
    }

    fn path_allowed(&self, path: &str) -> bool {
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.matches(path))
            .map_or(true, |rule| rule.allow)
    }
}

impl AccessChecker for RuleChecker {
    fn allows(&self, action: Action, path: &str) -> bool {
        let permitted = match action {
            Action::Create => self.create,
            Action::Modify => self.create && self.modify,
        };
        permitted && self.path_allowed(path)
    }
}
