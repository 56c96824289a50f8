//! Listing with pagination
//!
//! Pages are fetched strictly one after another, each with the previous
//! page's continuation token, until the store stops returning one. Every page
//! fetch is retried on its own. The caller's filter runs on each page before
//! its keys are accumulated; the final sequence is sorted (lexicographically
//! unless a comparator is given) and, in grouped mode, deduplicated.
//!
//! # Example
//!
//! ```no_run
//! # use conveyor::orchestrator::TransferOrchestrator;
//! # use conveyor::listing::ListQuery;
//! # async fn demo(engine: &TransferOrchestrator) -> conveyor::error::TransferResult<()> {
//! let logs = engine
//!     .list_all(
//!         ListQuery::new("logs/2024/")
//!             .filter(|key| key.ends_with(".gz"))
//!             .sort_by(|a, b| b.cmp(a)),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::error::TransferResult;
use crate::orchestrator::TransferOrchestrator;
use crate::store::ListRequest;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

/// What a listing returns
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ListMode {
    /// Every object key under the prefix
    #[default]
    Flat,

    /// Directory-like prefixes one level below the prefix
    Grouped { delimiter: String },
}

impl ListMode {
    /// Grouped by `/`
    pub fn grouped() -> Self {
        ListMode::Grouped {
            delimiter: "/".to_string(),
        }
    }

    fn delimiter(&self) -> Option<String> {
        match self {
            ListMode::Flat => None,
            ListMode::Grouped { delimiter } => Some(delimiter.clone()),
        }
    }
}

type KeyFilter<'a> = Box<dyn Fn(&str) -> bool + Send + Sync + 'a>;
type KeyComparator<'a> = Box<dyn Fn(&str, &str) -> Ordering + Send + Sync + 'a>;

/// Parameters of [`TransferOrchestrator::list_all`]
pub struct ListQuery<'a> {
    prefix: String,
    mode: ListMode,
    filter: Option<KeyFilter<'a>>,
    comparator: Option<KeyComparator<'a>>,
    page_size: Option<u32>,
}

impl<'a> ListQuery<'a> {
    /// Flat listing of `prefix`, unfiltered, sorted ascending
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            mode: ListMode::Flat,
            filter: None,
            comparator: None,
            page_size: None,
        }
    }

    pub fn mode(mut self, mode: ListMode) -> Self {
        self.mode = mode;
        self
    }

    /// Group by `/`
    pub fn grouped(self) -> Self {
        self.mode(ListMode::grouped())
    }

    /// Keep only keys for which `filter` returns `true`
    pub fn filter(mut self, filter: impl Fn(&str) -> bool + Send + Sync + 'a) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Sort the result with `comparator` instead of lexicographically
    pub fn sort_by(
        mut self,
        comparator: impl Fn(&str, &str) -> Ordering + Send + Sync + 'a,
    ) -> Self {
        self.comparator = Some(Box::new(comparator));
        self
    }

    /// Page size hint passed to the store
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

impl fmt::Debug for ListQuery<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListQuery")
            .field("prefix", &self.prefix)
            .field("mode", &self.mode)
            .field("filtered", &self.filter.is_some())
            .field("custom_order", &self.comparator.is_some())
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl TransferOrchestrator {
    /// Run a listing to completion
    pub async fn list_all(&self, query: ListQuery<'_>) -> TransferResult<Vec<String>> {
        let ListQuery {
            prefix,
            mode,
            filter,
            comparator,
            page_size,
        } = query;

        let store = self.ctx.store();
        let mut request = ListRequest {
            prefix: prefix.clone(),
            delimiter: mode.delimiter(),
            continuation_token: None,
            max_keys: page_size,
        };
        let mut keys = Vec::new();
        let mut pages = 0u32;
        let mut seen_tokens = HashSet::new();

        loop {
            let current = &request;
            let page = self
                .retried_required("list_page", &prefix, move |_| store.list_page(current))
                .await?;
            pages += 1;

            let entries: Vec<String> = match mode {
                ListMode::Flat => page.objects.into_iter().map(|o| o.key).collect(),
                ListMode::Grouped { .. } => page.common_prefixes,
            };
            keys.extend(
                entries
                    .into_iter()
                    .filter(|key| filter.as_ref().map_or(true, |keep| keep(key))),
            );

            match page.next_token {
                None => break,
                Some(token) if !seen_tokens.insert(token.clone()) => {
                    self.ctx.logger().warn(&format!(
                        "listing {} revisited continuation token {}; stopping",
                        prefix, token
                    ));
                    break;
                }
                Some(token) => request.continuation_token = Some(token),
            }
        }

        if matches!(mode, ListMode::Grouped { .. }) {
            let mut seen = HashSet::new();
            keys.retain(|key| seen.insert(key.clone()));
        }

        match &comparator {
            Some(compare) => keys.sort_by(|a, b| compare(a, b)),
            None => keys.sort(),
        }

        tracing::debug!(prefix = %prefix, pages, count = keys.len(), "listing complete");
        Ok(keys)
    }

    /// Every object key under `prefix`, sorted
    pub async fn list_files(&self, prefix: &str) -> TransferResult<Vec<String>> {
        self.list_all(ListQuery::new(prefix)).await
    }

    /// Folder-like prefixes directly under `prefix`, sorted
    pub async fn list_folders(&self, prefix: &str) -> TransferResult<Vec<String>> {
        self.list_all(ListQuery::new(prefix).grouped()).await
    }
}
