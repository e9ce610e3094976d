//! Typed query model for the document store.
//!
//! A [`DocQuery`] is a conjunction of filters plus pagination and sort. The
//! filter vocabulary mirrors what the indexed document engine supports:
//! exact terms over keyword fields, term sets, half-bounded ranges,
//! substring matches over free-text fields, and containment over nested
//! documents (devices). Each backend interprets the same query identically;
//! fields a backend has no index for are a hard error rather than a silent
//! full scan.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

#[derive(Debug, Clone)]
pub enum Filter {
    /// Exact match on a keyword field.
    Term { field: String, value: Value },
    /// Membership in a value set (`IN`).
    Terms { field: String, values: Vec<Value> },
    /// Case-insensitive substring match on a free-text field.
    Match { field: String, query: String },
    /// Half-bounded or doubly-bounded range. Values compare numerically,
    /// chronologically for RFC 3339 timestamps, lexicographically otherwise.
    Range {
        field: String,
        gte: Option<Value>,
        lte: Option<Value>,
    },
    /// Containment within a nested document array, e.g. a device with a
    /// given platform inside `devices`.
    Nested { path: String, value: Value },
}

#[derive(Debug, Clone, Default)]
pub struct DocQuery {
    pub filters: Vec<Filter>,
    pub from: u64,
    pub size: u64,
    pub sort: Option<Sort>,
}

impl DocQuery {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
            from: 0,
            size: 50,
            sort: None,
        }
    }

    pub fn term(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Term {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn terms(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.filters.push(Filter::Terms {
            field: field.into(),
            values,
        });
        self
    }

    pub fn matches(mut self, field: impl Into<String>, query: impl Into<String>) -> Self {
        self.filters.push(Filter::Match {
            field: field.into(),
            query: query.into(),
        });
        self
    }

    pub fn range(
        mut self,
        field: impl Into<String>,
        gte: Option<Value>,
        lte: Option<Value>,
    ) -> Self {
        self.filters.push(Filter::Range {
            field: field.into(),
            gte,
            lte,
        });
        self
    }

    pub fn nested(mut self, path: impl Into<String>, value: Value) -> Self {
        self.filters.push(Filter::Nested {
            path: path.into(),
            value,
        });
        self
    }

    pub fn paginate(mut self, from: u64, size: u64) -> Self {
        self.from = from;
        self.size = size;
        self
    }

    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some(Sort {
            field: field.into(),
            order,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_accumulates_filters() {
        let query = DocQuery::new()
            .term("status", "queued")
            .range("created_at", Some(json!("2025-01-01T00:00:00Z")), None)
            .paginate(10, 25)
            .sort("created_at", SortOrder::Desc);
        assert_eq!(query.filters.len(), 2);
        assert_eq!(query.from, 10);
        assert_eq!(query.size, 25);
        assert!(matches!(query.sort, Some(Sort { ref field, .. }) if field == "created_at"));
    }
}
