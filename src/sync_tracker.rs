//! Gap detection for recent-items syncs
//!
//! A recent sync walks a provider's newest-first feed until it reaches the
//! release recorded by the previous sync (the [`SyncCursor`]). [`evaluate`] is
//! called once per page and decides whether paging can stop.

use crate::types::{Release, SyncCursor};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Limits for the cap-and-age stop condition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncLimits {
    /// Releases accumulated per sequence before the cap applies
    pub max_results: usize,
    /// Backlog older than this is not worth paging through
    pub max_backlog_age: Duration,
}

impl Default for SyncLimits {
    fn default() -> Self {
        Self {
            max_results: 1000,
            max_backlog_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Outcome of evaluating one recent-sync page
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncDecision {
    /// Coverage reaches back to the cursor (or there is no cursor).
    /// Only the first `keep` releases of the page are new.
    GapClosed {
        /// Number of page releases preceding the boundary
        keep: usize,
    },
    /// Cap reached on an old backlog; stop without full coverage
    CapReachedIncomplete,
    /// Keep paging
    Continue,
}

/// Decide whether a recent sync may stop after `page`
///
/// `accumulated` holds every release collected by the current sequence,
/// including this page. Conditions are checked in priority order: no cursor,
/// boundary reached, cap reached on a stale backlog.
pub fn evaluate(
    cursor: Option<&SyncCursor>,
    page: &[Release],
    accumulated: &[Release],
    limits: &SyncLimits,
    now: DateTime<Utc>,
) -> SyncDecision {
    let Some(cursor) = cursor else {
        return SyncDecision::GapClosed { keep: page.len() };
    };

    if let Some(boundary) = page.iter().position(|release| is_boundary(cursor, release)) {
        return SyncDecision::GapClosed { keep: boundary };
    }

    if accumulated.len() >= limits.max_results {
        let max_age = chrono::Duration::from_std(limits.max_backlog_age)
            .unwrap_or_else(|_| chrono::Duration::MAX);
        let oldest = accumulated.iter().map(|r| r.publish_date).min();
        if oldest.is_some_and(|oldest| now - oldest > max_age) {
            return SyncDecision::CapReachedIncomplete;
        }
    }

    SyncDecision::Continue
}

/// A release the previous sync already covered
fn is_boundary(cursor: &SyncCursor, release: &Release) -> bool {
    release.publish_date < cursor.publish_date
        || release.download_url == cursor.download_url
        || release.identity() == cursor.identity
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 18, 12, 0, 0).unwrap()
    }

    fn release(n: usize, minutes_ago: i64) -> Release {
        Release::new(
            format!("Release {n}"),
            format!("https://dl.example/{n}.nzb"),
            now() - chrono::Duration::minutes(minutes_ago),
        )
    }

    fn cursor_at(release: &Release) -> SyncCursor {
        SyncCursor::from_release(release, now())
    }

    #[test]
    fn no_cursor_closes_gap_after_first_page() {
        let page = vec![release(1, 1), release(2, 2)];
        let decision = evaluate(None, &page, &page, &SyncLimits::default(), now());
        assert_eq!(decision, SyncDecision::GapClosed { keep: 2 });
    }

    #[test]
    fn no_cursor_closes_gap_even_on_empty_page() {
        let decision = evaluate(None, &[], &[], &SyncLimits::default(), now());
        assert_eq!(decision, SyncDecision::GapClosed { keep: 0 });
    }

    #[test]
    fn older_release_closes_gap() {
        let cursor = cursor_at(&release(100, 60));
        let page = vec![release(1, 10), release(2, 20), release(3, 90)];
        let decision = evaluate(Some(&cursor), &page, &page, &SyncLimits::default(), now());
        assert_eq!(decision, SyncDecision::GapClosed { keep: 2 });
    }

    #[test]
    fn matching_download_url_closes_gap() {
        let known = release(7, 30);
        let cursor = cursor_at(&known);
        let page = vec![release(1, 5), known.clone(), release(8, 31)];
        let decision = evaluate(Some(&cursor), &page, &page, &SyncLimits::default(), now());
        assert_eq!(decision, SyncDecision::GapClosed { keep: 1 });
    }

    #[test]
    fn matching_guid_closes_gap_when_url_changed() {
        let mut known = release(7, 30);
        known.guid = Some("guid-7".into());
        let cursor = cursor_at(&known);

        let mut moved = known.clone();
        moved.download_url = "https://mirror.example/7.nzb".into();
        let page = vec![release(1, 5), moved];

        let decision = evaluate(Some(&cursor), &page, &page, &SyncLimits::default(), now());
        assert_eq!(decision, SyncDecision::GapClosed { keep: 1 });
    }

    #[test]
    fn page_newer_than_cursor_continues() {
        let cursor = cursor_at(&release(100, 600));
        let page = vec![release(1, 1), release(2, 2)];
        let decision = evaluate(Some(&cursor), &page, &page, &SyncLimits::default(), now());
        assert_eq!(decision, SyncDecision::Continue);
    }

    #[test]
    fn empty_page_with_cursor_continues() {
        let cursor = cursor_at(&release(100, 60));
        let decision = evaluate(Some(&cursor), &[], &[], &SyncLimits::default(), now());
        assert_eq!(decision, SyncDecision::Continue);
    }

    #[test]
    fn cap_on_stale_backlog_is_incomplete() {
        let cursor = cursor_at(&release(0, 10 * 24 * 60));
        let limits = SyncLimits {
            max_results: 3,
            ..SyncLimits::default()
        };
        // oldest accumulated release is 25 hours old
        let accumulated = vec![release(1, 60), release(2, 120), release(3, 25 * 60)];
        let page = &accumulated[1..];

        let decision = evaluate(Some(&cursor), page, &accumulated, &limits, now());
        assert_eq!(decision, SyncDecision::CapReachedIncomplete);
    }

    #[test]
    fn cap_on_fresh_burst_keeps_paging() {
        let cursor = cursor_at(&release(0, 10 * 24 * 60));
        let limits = SyncLimits {
            max_results: 3,
            ..SyncLimits::default()
        };
        let accumulated = vec![release(1, 1), release(2, 2), release(3, 3)];

        let decision = evaluate(Some(&cursor), &accumulated, &accumulated, &limits, now());
        assert_eq!(decision, SyncDecision::Continue);
    }

    #[test]
    fn boundary_takes_priority_over_cap() {
        let cursor = cursor_at(&release(0, 24 * 60));
        let limits = SyncLimits {
            max_results: 2,
            ..SyncLimits::default()
        };
        let page = vec![release(1, 30 * 60), release(2, 31 * 60)];

        let decision = evaluate(Some(&cursor), &page, &page, &limits, now());
        assert_eq!(decision, SyncDecision::GapClosed { keep: 0 });
    }
}
