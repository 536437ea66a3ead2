//! Deployment environments and branch classification.
//!
//! Every version line is scoped to one [`Environment`]. A merge target is
//! classified with [`resolve_environment`], which never fails: branches the
//! map does not mention land in [`Environment::Development`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A logical deployment environment.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Integration branches where changes accumulate.
    #[default]
    Development,
    /// Pre-production verification.
    Staging,
    /// What users run.
    Production,
    /// Throwaway experiments.
    Sandbox,
}

impl Environment {
    /// All environments, in promotion order.
    pub const ALL: &[Self] = &[
        Self::Development,
        Self::Staging,
        Self::Production,
        Self::Sandbox,
    ];

    /// Returns the environment as a lowercase string slice.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
            Self::Sandbox => "sandbox",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            "sandbox" => Ok(Self::Sandbox),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Branch name to environment mapping.
pub type BranchEnvironmentMap = BTreeMap<String, Environment>;

/// The built-in branch map used when nothing overrides it.
pub fn default_branch_environments() -> BranchEnvironmentMap {
    [
        ("main", Environment::Production),
        ("master", Environment::Production),
        ("production", Environment::Production),
        ("develop", Environment::Development),
        ("development", Environment::Development),
        ("dev", Environment::Development),
        ("staging", Environment::Staging),
        ("uat", Environment::Staging),
        ("sandbox", Environment::Sandbox),
    ]
    .into_iter()
    .map(|(branch, env)| (branch.to_string(), env))
    .collect()
}

/// Classify a branch. Unknown branches are development branches.
pub fn resolve_environment(branch: &str, map: &BranchEnvironmentMap) -> Environment {
    map.get(branch).copied().unwrap_or(Environment::Development)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_map_covers_known_branches() {
        let map = default_branch_environments();
        assert_eq!(resolve_environment("main", &map), Environment::Production);
        assert_eq!(resolve_environment("master", &map), Environment::Production);
        assert_eq!(resolve_environment("dev", &map), Environment::Development);
        assert_eq!(resolve_environment("uat", &map), Environment::Staging);
        assert_eq!(resolve_environment("sandbox", &map), Environment::Sandbox);
    }

    #[test]
    fn unknown_branch_is_development() {
        let map = default_branch_environments();
        assert_eq!(
            resolve_environment("feature/login", &map),
            Environment::Development
        );
        assert_eq!(resolve_environment("", &map), Environment::Development);
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let map = default_branch_environments();
        assert_eq!(resolve_environment("MAIN", &map), Environment::Development);
    }

    #[test]
    fn parse_and_display_agree() {
        for env in Environment::ALL {
            assert_eq!(env.to_string().parse::<Environment>().unwrap(), *env);
        }
        assert!("qa".parse::<Environment>().is_err());
    }
}
