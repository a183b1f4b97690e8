//! Header-driven pagination: `X-Offset` and `X-Base` in, page plus total count out.

use crate::config::ResolvedEntity;
use crate::error::AppError;
use crate::extractors::RestRequest;
use crate::filter::ListQuery;
use crate::store::{Row, Transaction};

pub const X_OFFSET: &str = "x-offset";
pub const X_BASE: &str = "x-base";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageSettings {
    pub page_size: u64,
    pub max_page_size: u64,
}

impl Default for PageSettings {
    fn default() -> Self {
        PageSettings {
            page_size: 20,
            max_page_size: 100,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Paginator {
    pub offset: u64,
    pub base: u64,
}

impl Paginator {
    /// Missing or non-numeric headers fall back to offset 0 and the default page size; the
    /// page size is capped at the maximum.
    pub fn from_request(request: &RestRequest, settings: PageSettings) -> Self {
        let offset = request
            .header(X_OFFSET)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let base = request
            .header(X_BASE)
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|b| *b > 0)
            .unwrap_or(settings.page_size)
            .min(settings.max_page_size);
        Paginator { offset, base }
    }

    /// Rows of the current page and the total number of rows matching `query`.
    pub async fn page(
        &self,
        tx: &mut dyn Transaction,
        entity: &ResolvedEntity,
        mut query: ListQuery,
    ) -> Result<(Vec<Row>, u64), AppError> {
        let total = tx.count(entity, &query.conditions).await?;
        query.offset = self.offset;
        query.limit = Some(self.base);
        let rows = if self.offset >= total {
            Vec::new()
        } else {
            tx.select(entity, &query).await?
        };
        Ok((rows, total))
    }
}
