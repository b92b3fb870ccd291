//! Pagination shared by the history endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

/// Query string accepted by every paginated listing.
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
pub struct PageQuery {
    /// Page number (default 1)
    pub page: Option<u32>,
    /// Page size (default 20, at most 100)
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct PaginationParams {
    pub page: i64,
    pub page_size: i64,
}

impl PaginationParams {
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.map(|p| p as i64).unwrap_or(1).max(1),
            page_size: per_page
                .map(|p| p as i64)
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn get_offset(&self) -> u64 {
        ((self.page - 1) * self.page_size) as u64
    }

    pub fn get_limit(&self) -> u64 {
        self.page_size as u64
    }
}

impl From<&PageQuery> for PaginationParams {
    fn from(query: &PageQuery) -> Self {
        Self::new(query.page, query.per_page)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, params: &PaginationParams, total: i64) -> Self {
        let total_pages = (total + params.page_size - 1) / params.page_size;
        Self {
            data,
            page: params.page,
            page_size: params.page_size,
            total,
            total_pages,
        }
    }
}
