use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 500;

/// Offset pagination over an already sorted list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
}

impl Pagination {
    /// Missing limit means the default; oversized limits are capped.
    pub fn new(limit: Option<usize>, offset: Option<usize>) -> Self {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        Self {
            limit,
            offset: offset.unwrap_or(0),
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

impl<T> Page<T> {
    pub fn slice(items: Vec<T>, pagination: Pagination) -> Self {
        let total = items.len();
        let items = items
            .into_iter()
            .skip(pagination.offset)
            .take(pagination.limit)
            .collect();
        Self {
            items,
            total,
            limit: pagination.limit,
            offset: pagination.offset,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_and_caps() {
        assert_eq!(Pagination::new(None, None).limit, DEFAULT_PAGE_LIMIT);
        assert_eq!(Pagination::new(Some(10_000), None).limit, MAX_PAGE_LIMIT);
        assert_eq!(Pagination::new(Some(0), None).limit, 1);
    }

    #[test]
    fn slice_reports_total_before_windowing() {
        let page = Page::slice((1..=7).collect::<Vec<_>>(), Pagination::new(Some(3), Some(5)));
        assert_eq!(page.items, vec![6, 7]);
        assert_eq!(page.total, 7);
    }
}
