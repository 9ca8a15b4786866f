//! `skip`/`limit` paging shared by the ledger history and artifact catalogue.

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use utoipa::{IntoParams, ToSchema};

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;

/// Query parameters for list endpoints. Out-of-range values are clamped rather than rejected:
/// `skip` floors at 0 and `limit` is kept within `1..=100`.
#[serde_as]
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct Pagination {
    /// Items to skip, newest first
    #[param(default = 0, minimum = 0)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub skip: Option<i64>,

    /// Page size
    #[param(default = 10, minimum = 1, maximum = 100)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub limit: Option<i64>,
}

impl Pagination {
    /// Effective `(skip, limit)` after defaults and clamping.
    pub fn params(&self) -> (i64, i64) {
        let skip = self.skip.unwrap_or(0).max(0);
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        (skip, limit)
    }
}

/// One page of results plus the total number of matching rows.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T: ToSchema> {
    pub data: Vec<T>,
    /// Rows matching the query before paging
    pub total_count: i64,
    pub skip: i64,
    pub limit: i64,
}

impl<T: ToSchema> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total_count: i64, skip: i64, limit: i64) -> Self {
        Self {
            data,
            total_count,
            skip,
            limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(skip: Option<i64>, limit: Option<i64>) -> (i64, i64) {
        Pagination { skip, limit }.params()
    }

    #[test]
    fn defaults_apply_when_absent() {
        assert_eq!(Pagination::default().params(), (0, DEFAULT_LIMIT));
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        assert_eq!(page(Some(-10), Some(0)), (0, 1));
        assert_eq!(page(None, Some(-5)), (0, 1));
        assert_eq!(page(Some(40), Some(1000)), (40, MAX_LIMIT));
        assert_eq!(page(Some(20), Some(50)), (20, 50));
    }

    #[test]
    fn query_values_arrive_as_strings() {
        let parsed: Pagination = serde_json::from_value(serde_json::json!({ "skip": "5", "limit": "25" })).unwrap();
        assert_eq!(parsed.params(), (5, 25));
    }
}
