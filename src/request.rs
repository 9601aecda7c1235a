//! Request plans handed to the orchestrator by provider-specific generators
//!
//! A [`RequestChain`] is an ordered list of [`Tier`]s. Each tier is a complete,
//! self-sufficient strategy (for example "search by series id", then "search by
//! title"); the orchestrator stops at the first tier that yields a valid release.
//! Each tier holds one or more [`PageableRequestSequence`]s, lazy single-use
//! iterators producing one [`PageRequest`] per page.
//!
//! Chains close over per-call parameters, so they are built fresh for every run
//! and never cached.

use crate::types::SearchCriteria;
use std::time::Duration;
use url::Url;

/// One HTTP page request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageRequest {
    /// Fully built request URL
    pub url: Url,
    /// Extra headers (cookies, API keys in headers, ...)
    pub headers: Vec<(String, String)>,
    /// Per-request timeout overriding the client default
    pub timeout: Option<Duration>,
}

impl PageRequest {
    /// GET request for `url` with no extra headers
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
            timeout: None,
        }
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Lazy, finite, single-use sequence of page requests
pub struct PageableRequestSequence {
    pages: Box<dyn Iterator<Item = PageRequest> + Send>,
}

impl PageableRequestSequence {
    /// Wrap any iterator of page requests
    pub fn new<I>(pages: I) -> Self
    where
        I: IntoIterator<Item = PageRequest>,
        I::IntoIter: Send + 'static,
    {
        Self {
            pages: Box::new(pages.into_iter()),
        }
    }

    /// Sequence of exactly one page
    pub fn single(request: PageRequest) -> Self {
        Self::new(std::iter::once(request))
    }
}

impl Iterator for PageableRequestSequence {
    type Item = PageRequest;

    fn next(&mut self) -> Option<PageRequest> {
        self.pages.next()
    }
}

impl std::fmt::Debug for PageableRequestSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageableRequestSequence").finish_non_exhaustive()
    }
}

/// One fallback strategy: independent sequences whose results are merged
#[derive(Debug, Default)]
pub struct Tier {
    sequences: Vec<PageableRequestSequence>,
}

impl Tier {
    /// Number of sequences in this tier
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// Whether this tier has no sequences
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

impl IntoIterator for Tier {
    type Item = PageableRequestSequence;
    type IntoIter = std::vec::IntoIter<PageableRequestSequence>;

    fn into_iter(self) -> Self::IntoIter {
        self.sequences.into_iter()
    }
}

/// Ordered tiers of pageable request sequences
#[derive(Debug)]
pub struct RequestChain {
    tiers: Vec<Tier>,
}

impl Default for RequestChain {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestChain {
    /// Chain with a single empty tier
    pub fn new() -> Self {
        Self {
            tiers: vec![Tier::default()],
        }
    }

    /// Add a sequence to the current (last) tier
    pub fn add(&mut self, sequence: PageableRequestSequence) -> &mut Self {
        if let Some(tier) = self.tiers.last_mut() {
            tier.sequences.push(sequence);
        }
        self
    }

    /// Start a new tier; later [`add`](Self::add) calls go into it.
    /// Calling this on an empty current tier is a no-op.
    pub fn add_tier(&mut self) -> &mut Self {
        if self.tiers.last().is_some_and(|t| !t.is_empty()) {
            self.tiers.push(Tier::default());
        }
        self
    }

    /// Number of non-empty tiers
    pub fn tier_count(&self) -> usize {
        self.tiers.iter().filter(|t| !t.is_empty()).count()
    }

    /// Consume the chain, yielding its non-empty tiers in order
    pub fn into_tiers(self) -> impl Iterator<Item = Tier> {
        self.tiers.into_iter().filter(|t| !t.is_empty())
    }
}

/// Builds request chains for one provider
///
/// Implementations own the provider-specific query rules; the orchestrator only
/// walks what they produce. Called once per run.
pub trait RequestGenerator: Send + Sync {
    /// Chain for an incremental "recent items" sync
    fn recent_requests(&self) -> RequestChain;

    /// Chain for a search
    fn search_requests(&self, criteria: &SearchCriteria) -> RequestChain;
}

/// Offset/limit paging over a base URL
///
/// Yields `max_pages` requests with `offset=n*page_size&limit=page_size` appended
/// to `base`, the convention used by Newznab and Torznab APIs.
#[derive(Clone, Debug)]
pub struct OffsetPaging {
    base: Url,
    page_size: usize,
    max_pages: usize,
    headers: Vec<(String, String)>,
}

impl OffsetPaging {
    /// Paging plan over `base`
    pub fn new(base: Url, page_size: usize, max_pages: usize) -> Self {
        Self {
            base,
            page_size,
            max_pages,
            headers: Vec::new(),
        }
    }

    /// Header sent with every page
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Turn the plan into a lazy sequence
    pub fn into_sequence(self) -> PageableRequestSequence {
        let OffsetPaging {
            base,
            page_size,
            max_pages,
            headers,
        } = self;

        PageableRequestSequence::new((0..max_pages).map(move |page| {
            let mut url = base.clone();
            url.query_pairs_mut()
                .append_pair("offset", &(page * page_size).to_string())
                .append_pair("limit", &page_size.to_string());
            PageRequest {
                url,
                headers: headers.clone(),
                timeout: None,
            }
        }))
    }
}
