//! Query engine.
//!
//! A [`TableQuery`] describes a filter, a projection and an optional total
//! take count. Queries run either one segment at a time, with the caller
//! carrying the [`ContinuationToken`] between calls, or as a lazy stream
//! that follows the tokens itself.

pub mod filter;

use std::future::Future;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::debug;

use crate::continuation::ContinuationToken;
use crate::error::{TableError, TableResult};

pub use filter::{
    QueryComparison, TableOperator, combine_filters, generate_filter_condition,
    generate_filter_condition_for_binary, generate_filter_condition_for_bool,
    generate_filter_condition_for_date, generate_filter_condition_for_double,
    generate_filter_condition_for_guid, generate_filter_condition_for_int,
    generate_filter_condition_for_long,
};

/// Filter, projection and take count of an entity query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableQuery {
    filter: Option<String>,
    select: Option<Vec<String>>,
    take_count: Option<u32>,
}

impl TableQuery {
    /// A query returning every entity of the table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `$filter` expression, see [`filter`].
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        let filter = filter.into();
        self.filter = (!filter.trim().is_empty()).then_some(filter);
        self
    }

    /// Restricts the returned properties. Keys and timestamp are always
    /// returned.
    pub fn with_select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Limits the total number of entities returned across all segments.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when `count` is zero.
    pub fn take(mut self, count: u32) -> TableResult<Self> {
        if count == 0 {
            return Err(TableError::invalid_argument(
                "take_count",
                "Take count must be positive and greater than 0.",
            ));
        }
        self.take_count = Some(count);
        Ok(self)
    }

    pub fn filter_string(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn select_columns(&self) -> Option<&[String]> {
        self.select.as_deref()
    }

    pub fn take_count(&self) -> Option<u32> {
        self.take_count
    }
}

/// One page of results.
///
/// `continuation_token` is `None` on the last page.
#[derive(Debug, Clone)]
pub struct TableQuerySegment<T> {
    pub results: Vec<T>,
    pub continuation_token: Option<ContinuationToken>,
}

impl<T> TableQuerySegment<T> {
    pub fn has_more(&self) -> bool {
        self.continuation_token.is_some()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl<T> IntoIterator for TableQuerySegment<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

struct Pager<F> {
    fetch: F,
    token: Option<ContinuationToken>,
    remaining: Option<u32>,
    done: bool,
}

/// Flattens successive segments into a stream of items.
///
/// `fetch(token, remaining)` retrieves one segment. Empty segments that
/// still carry a token are followed; the stream ends when a segment has no
/// token or `take` items have been produced.
pub(crate) fn paged<T, F, Fut>(take: Option<u32>, fetch: F) -> BoxStream<'static, TableResult<T>>
where
    T: Send + 'static,
    F: FnMut(Option<ContinuationToken>, Option<u32>) -> Fut + Send + 'static,
    Fut: Future<Output = TableResult<TableQuerySegment<T>>> + Send + 'static,
{
    let pager = Pager {
        fetch,
        token: None,
        remaining: take,
        done: false,
    };

    stream::try_unfold(pager, |mut pager| async move {
        if pager.done || pager.remaining == Some(0) {
            return Ok(None);
        }
        let segment = (pager.fetch)(pager.token.take(), pager.remaining).await?;
        let mut results = segment.results;
        if let Some(remaining) = pager.remaining {
            results.truncate(remaining as usize);
            pager.remaining = Some(remaining - results.len() as u32);
        }
        pager.done = segment.continuation_token.is_none();
        pager.token = segment.continuation_token;
        debug!(count = results.len(), has_more = !pager.done, "fetched query segment");
        Ok::<_, TableError>(Some((stream::iter(results.into_iter().map(Ok)), pager)))
    })
    .try_flatten()
    .boxed()
}
