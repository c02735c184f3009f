//! Cursor-based pagination

use super::{ApiResult, Page, RetryExecutor};
use crate::error::{ApiError, OptimizerError, Result};
use std::collections::HashSet;
use std::future::Future;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PaginationConfig {
    /// Hard stop for providers that never stop returning cursors
    pub max_pages: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self { max_pages: 1_000 }
    }
}

/// Fetch pages until the provider stops returning a cursor.
///
/// Each page is retried independently under `retry`; a failed page does not
/// restart the listing.
pub async fn paginate<T, F, Fut>(
    retry: &RetryExecutor,
    operation: &str,
    config: &PaginationConfig,
    mut fetch: F,
) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = ApiResult<Page<T>>>,
{
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    let mut seen = HashSet::new();
    let mut pages = 0usize;

    loop {
        let page = retry
            .execute(operation, || fetch(cursor.clone()))
            .await?;
        pages += 1;
        items.extend(page.items);

        match page.next {
            None => break,
            Some(next) if next.is_empty() => break,
            Some(next) => {
                if !seen.insert(next.clone()) {
                    return Err(pagination_error(operation, "provider repeated a cursor"));
                }
                if pages >= config.max_pages {
                    return Err(pagination_error(operation, "page limit reached"));
                }
                cursor = Some(next);
            }
        }
    }

    debug!(operation, pages, items = items.len(), "Pagination complete");
    Ok(items)
}

fn pagination_error(operation: &str, reason: &str) -> OptimizerError {
    OptimizerError::Api {
        operation: operation.to_string(),
        source: ApiError::Unexpected(reason.to_string()),
    }
}
