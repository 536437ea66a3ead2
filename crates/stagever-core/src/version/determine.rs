//! Bump determination from issue types.

use tracing::trace;

use crate::policy::IssueTypeMap;
use crate::tracker::Issue;
use crate::version::BumpLevel;

/// Severity for a single issue type. Unmapped types are patches.
pub fn bump_for_type(issue_type: &str, mapping: &IssueTypeMap) -> BumpLevel {
    mapping
        .get(&issue_type.to_ascii_uppercase())
        .copied()
        .unwrap_or(BumpLevel::Patch)
}

/// Reduce a set of issues to the most severe bump they imply.
///
/// Returns `None` for an empty slice: with nothing to release there is no
/// bump, and callers skip calculation entirely.
pub fn determine_bump(issues: &[Issue], mapping: &IssueTypeMap) -> Option<BumpLevel> {
    let mut highest: Option<BumpLevel> = None;
    for issue in issues {
        let level = bump_for_type(&issue.issue_type, mapping);
        trace!(issue = %issue.issue_key, issue_type = %issue.issue_type, %level, "issue severity");
        if level == BumpLevel::Major {
            return Some(BumpLevel::Major);
        }
        highest = Some(highest.map_or(level, |h| h.max(level)));
    }
    highest
}
