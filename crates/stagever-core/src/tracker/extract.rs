//! Issue references in commit messages.

use std::collections::HashSet;

use regex::{Regex, RegexBuilder};
use tracing::{debug, instrument};

use crate::policy::RepositoryConfig;
use crate::tracker::{IssueStore, TrackerResult};

/// Finds issue keys such as `PROJ-12` in free text.
#[derive(Debug, Clone)]
pub struct IssueRefExtractor {
    pattern: Regex,
}

impl IssueRefExtractor {
    /// Build an extractor for a key prefix. Matching ignores case.
    pub fn new(prefix: &str) -> Result<Self, regex::Error> {
        let pattern = RegexBuilder::new(&format!(r"{}-(\d+)", regex::escape(prefix)))
            .case_insensitive(true)
            .build()?;
        Ok(Self { pattern })
    }

    /// The first key in a message, upper-cased.
    pub fn first_key(&self, message: &str) -> Option<String> {
        self.pattern
            .find(message)
            .map(|m| m.as_str().to_ascii_uppercase())
    }
}

/// Resolve the issues referenced by a batch of messages.
///
/// Only the first key of each message counts. Keys that do not resolve to
/// an issue in the repository's project are skipped. The result holds each
/// issue id once, in first-seen order.
#[instrument(skip(config, messages, issues), fields(repository = %config.repository_id))]
pub fn extract_issue_ids<'a>(
    config: &RepositoryConfig,
    messages: impl IntoIterator<Item = &'a str>,
    issues: &dyn IssueStore,
) -> TrackerResult<Vec<String>> {
    let Some(ref prefix) = config.issue_prefix else {
        debug!("repository has no issue prefix");
        return Ok(Vec::new());
    };
    let extractor = IssueRefExtractor::new(prefix)
        .map_err(|e| crate::tracker::TrackerError::Backend(format!("issue pattern: {e}")))?;
    let project = config
        .project_id
        .as_deref()
        .unwrap_or(&config.repository_id);

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for message in messages {
        let Some(key) = extractor.first_key(message) else {
            continue;
        };
        match issues.find_issue_by_key(project, &key)? {
            Some(issue) => {
                if seen.insert(issue.id.clone()) {
                    ids.push(issue.id);
                }
            }
            None => debug!(%key, "issue key does not resolve, skipping"),
        }
    }
    debug!(count = ids.len(), "resolved issue references");
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{PolicyDefaults, resolve_repository_config};
    use crate::tracker::{Issue, RepositoryRecord, StaticTracker};

    fn issue(id: &str, key: &str) -> Issue {
        Issue {
            id: id.into(),
            issue_type: "BUG".into(),
            issue_key: key.into(),
            title: format!("{key} title"),
            description: None,
        }
    }

    fn setup() -> (RepositoryConfig, StaticTracker) {
        let record = RepositoryRecord {
            issue_prefix: Some("PROJ".into()),
            project_id: Some("p1".into()),
            ..RepositoryRecord::default()
        };
        let config = resolve_repository_config("web", &record, &PolicyDefaults::default()).unwrap();
        let tracker = StaticTracker::default()
            .with_issue("p1", issue("a", "PROJ-1"))
            .with_issue("p1", issue("b", "PROJ-2"))
            .with_issue("other", issue("c", "PROJ-3"));
        (config, tracker)
    }

    #[test]
    fn first_match_wins_and_is_uppercased() {
        let extractor = IssueRefExtractor::new("PROJ").unwrap();
        assert_eq!(
            extractor.first_key("fix proj-12 and PROJ-13").as_deref(),
            Some("PROJ-12")
        );
        assert_eq!(extractor.first_key("no reference here"), None);
    }

    #[test]
    fn prefix_is_escaped() {
        let extractor = IssueRefExtractor::new("A.B").unwrap();
        assert_eq!(extractor.first_key("AxB-1"), None);
        assert_eq!(extractor.first_key("A.B-1").as_deref(), Some("A.B-1"));
    }

    #[test]
    fn resolves_and_deduplicates() {
        let (config, tracker) = setup();
        let ids = extract_issue_ids(
            &config,
            ["PROJ-2 part one", "proj-1: fix", "PROJ-2 part two"],
            &tracker,
        )
        .unwrap();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn only_first_key_per_message_counts() {
        let (config, tracker) = setup();
        let ids = extract_issue_ids(&config, ["PROJ-1 and PROJ-2"], &tracker).unwrap();
        assert_eq!(ids, vec!["a".to_string()]);
    }

    #[test]
    fn unresolvable_and_foreign_keys_are_skipped() {
        let (config, tracker) = setup();
        let ids =
            extract_issue_ids(
                &config,
                ["PROJ-99 missing", "PROJ-3 other project", "chore"],
                &tracker,
            )
                .unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn repository_without_prefix_references_nothing() {
        let (mut config, tracker) = setup();
        config.issue_prefix = None;
        let ids = extract_issue_ids(&config, ["PROJ-1"], &tracker).unwrap();
        assert!(ids.is_empty());
    }
}
