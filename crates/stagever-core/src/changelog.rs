//! Changelog generation for new versions.
//!
//! Generation is enrichment: the engine calls a [`ChangelogGenerator`] after
//! a version is committed and only logs its failures.

use thiserror::Error;

use crate::tracker::Issue;
use crate::version_file::{BUGFIX_TYPES, FEATURE_TYPES};

/// Errors from a changelog generator.
#[derive(Error, Debug)]
pub enum ChangelogError {
    /// The generator could not produce a changelog.
    #[error("changelog generation failed: {0}")]
    Generation(String),
}

/// Result alias for changelog operations.
pub type ChangelogResult<T> = Result<T, ChangelogError>;

/// Generated text for one issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueSummary {
    /// The issue this describes.
    pub issue_id: String,
    /// Short user-facing title.
    pub title: Option<String>,
    /// One-paragraph summary.
    pub summary: Option<String>,
}

/// A generated changelog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changelog {
    /// Full changelog text for the version.
    pub text: String,
    /// Per-issue annotations.
    pub issues: Vec<IssueSummary>,
}

/// Produces changelog text from a version and the issues it ships.
pub trait ChangelogGenerator: Send + Sync {
    /// Generate a changelog.
    fn generate(&self, version: &str, issues: &[Issue]) -> ChangelogResult<Changelog>;
}

fn is_any(issue: &Issue, types: &[&str]) -> bool {
    types
        .iter()
        .any(|t| t.eq_ignore_ascii_case(&issue.issue_type))
}

/// Deterministic generator listing issue keys and titles.
#[derive(Debug, Clone, Copy, Default)]
pub struct IssueListChangelog;

impl ChangelogGenerator for IssueListChangelog {
    fn generate(&self, version: &str, issues: &[Issue]) -> ChangelogResult<Changelog> {
        let (fixes, features): (Vec<&Issue>, Vec<&Issue>) = issues
            .iter()
            .filter(|i| is_any(i, FEATURE_TYPES) || is_any(i, BUGFIX_TYPES))
            .partition(|i| is_any(i, BUGFIX_TYPES));
        let other: Vec<&Issue> = issues
            .iter()
            .filter(|i| !is_any(i, FEATURE_TYPES) && !is_any(i, BUGFIX_TYPES))
            .collect();

        let mut text = format!("## {version}\n");
        for (heading, group) in [("Features", &features), ("Fixes", &fixes), ("Other", &other)] {
            if group.is_empty() {
                continue;
            }
            text.push_str(&format!("\n### {heading}\n\n"));
            for issue in group {
                text.push_str(&format!("- {}: {}\n", issue.issue_key, issue.title));
            }
        }

        Ok(Changelog {
            text,
            issues: issues
                .iter()
                .map(|i| IssueSummary {
                    issue_id: i.id.clone(),
                    title: Some(i.title.clone()),
                    summary: i.description.clone(),
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(key: &str, issue_type: &str, title: &str) -> Issue {
        Issue {
            id: key.to_lowercase(),
            issue_type: issue_type.into(),
            issue_key: key.into(),
            title: title.into(),
            description: None,
        }
    }

    #[test]
    fn groups_features_fixes_and_other() {
        let log = IssueListChangelog
            .generate(
                "0.3.1",
                &[
                    issue("PROJ-2", "BUG", "Crash on login"),
                    issue("PROJ-1", "STORY", "Dark mode"),
                    issue("PROJ-3", "SPIKE", "Research"),
                ],
            )
            .unwrap();
        assert_eq!(
            log.text,
            concat!(
                "## 0.3.1\n\n",
                "### Features\n\n- PROJ-1: Dark mode\n\n",
                "### Fixes\n\n- PROJ-2: Crash on login\n\n",
                "### Other\n\n- PROJ-3: Research\n",
            )
        );
        assert_eq!(log.issues.len(), 3);
        assert_eq!(log.issues[0].title.as_deref(), Some("Crash on login"));
    }

    #[test]
    fn empty_issue_list_has_only_heading() {
        let log = IssueListChangelog.generate("1.0.0", &[]).unwrap();
        assert_eq!(log.text, "## 1.0.0\n");
        assert!(log.issues.is_empty());
    }
}
