//! Tier and page traversal for a single run

use crate::error::FetchError;
use crate::fetcher::PageFetcher;
use crate::provider::Provider;
use crate::request::{PageableRequestSequence, RequestChain};
use crate::sync_tracker::{self, SyncDecision, SyncLimits};
use crate::types::{FetchMode, Release, SyncCursor};
use chrono::Utc;
use tracing::debug;

/// What a traversal produced
#[derive(Debug, Default)]
pub(crate) struct WalkOutput {
    /// Valid releases in fetch order, not yet de-duplicated
    pub releases: Vec<Release>,
    /// Recent mode: whether a page confirmed coverage back to the cursor
    pub fully_updated: bool,
    /// Failure that stopped the traversal
    pub error: Option<FetchError>,
}

/// Traversal of one request chain
pub(crate) struct Walk<'a> {
    pub fetcher: &'a PageFetcher,
    pub provider: &'a Provider,
    pub mode: FetchMode,
    pub cursor: Option<&'a SyncCursor>,
    pub limits: SyncLimits,
}

impl Walk<'_> {
    /// Walk tiers in order and stop at the first one yielding a valid release
    ///
    /// A fetch error stops the whole traversal; releases gathered before it are
    /// kept.
    pub async fn run(&self, chain: RequestChain) -> WalkOutput {
        let mut output = WalkOutput::default();

        for (tier_index, tier) in chain.into_tiers().enumerate() {
            let mut tier_releases = Vec::new();

            for sequence in tier {
                let mut accumulated = Vec::new();
                let result = self
                    .walk_sequence(sequence, &mut accumulated, &mut output.fully_updated)
                    .await;

                tier_releases.extend(self.valid_only(accumulated));

                if let Err(err) = result {
                    debug!(tier = tier_index, error = %err, "page fetch failed, stopping run");
                    output.releases.extend(tier_releases);
                    output.error = Some(err);
                    return output;
                }
            }

            let found = !tier_releases.is_empty();
            debug!(tier = tier_index, count = tier_releases.len(), "tier finished");
            output.releases.extend(tier_releases);

            if found {
                break;
            }
        }

        output
    }

    /// Fetch pages of one sequence in order until a stop condition holds
    ///
    /// Releases are appended to `accumulated` page by page so they survive a
    /// later page failing.
    async fn walk_sequence(
        &self,
        sequence: PageableRequestSequence,
        accumulated: &mut Vec<Release>,
        fully_updated: &mut bool,
    ) -> Result<(), FetchError> {
        let page_size = self.provider.page_size();

        for (page_index, request) in sequence.enumerate() {
            let page = self.fetcher.fetch_page(self.provider, &request).await?;
            let page_len = page.len();
            let start = accumulated.len();
            accumulated.extend(page);

            match self.mode {
                FetchMode::Recent => {
                    let decision = sync_tracker::evaluate(
                        self.cursor,
                        &accumulated[start..],
                        &accumulated[..],
                        &self.limits,
                        Utc::now(),
                    );
                    match decision {
                        SyncDecision::GapClosed { keep } => {
                            accumulated.truncate(start + keep);
                            *fully_updated = true;
                            debug!(page = page_index, kept = keep, "sync gap closed");
                            return Ok(());
                        }
                        SyncDecision::CapReachedIncomplete => {
                            *fully_updated = false;
                            debug!(
                                page = page_index,
                                accumulated = accumulated.len(),
                                "result cap reached on an old backlog"
                            );
                            return Ok(());
                        }
                        SyncDecision::Continue => {}
                    }
                }
                FetchMode::Search => {
                    if accumulated.len() >= self.limits.max_results {
                        debug!(page = page_index, "search result cap reached");
                        return Ok(());
                    }
                }
            }

            if page_size > 0 && page_len < page_size {
                debug!(page = page_index, page_len, page_size, "under-full page, end of data");
                return Ok(());
            }
        }

        Ok(())
    }

    fn valid_only(&self, releases: Vec<Release>) -> impl Iterator<Item = Release> {
        releases.into_iter().filter(|release| {
            let valid = release.is_valid();
            if !valid {
                debug!(title = %release.title, "dropping release without a download URL");
            }
            valid
        })
    }
}
