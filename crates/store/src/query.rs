/// Default page size for list accessors.
pub const DEFAULT_LIMIT: i64 = 50;

/// Limit/offset window for list accessors. Rows are always ordered by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListParams {
    /// Maximum number of rows to return.
    pub limit: i64,

    /// Number of rows to skip.
    pub offset: i64,
}

impl ListParams {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: limit.max(0),
            offset: offset.max(0),
        }
    }

    /// Sets the maximum number of rows to return.
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit.max(0);
        self
    }

    /// Sets the number of rows to skip.
    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset.max(0);
        self
    }

    /// Applies the window to an already ordered iterator.
    pub(crate) fn window<T>(&self, rows: impl Iterator<Item = T>) -> Vec<T> {
        rows.skip(self.offset as usize)
            .take(self.limit as usize)
            .collect()
    }
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_window_starts_at_zero() {
        let params = ListParams::default();
        assert_eq!(params.limit, DEFAULT_LIMIT);
        assert_eq!(params.offset, 0);
    }

    #[test]
    fn negative_bounds_are_clamped() {
        let params = ListParams::new(-1, -5);
        assert_eq!(params, ListParams::new(0, 0));
    }

    #[test]
    fn window_skips_then_takes() {
        let params = ListParams::default().limit(2).offset(1);
        assert_eq!(params.window(1..=5), vec![2, 3]);
    }
}
