//! Data source collaborator interface.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One exported record: cell values already formatted for output, in column
/// order.
pub type Row = Vec<String>;

/// Opaque dataset filter owned by the report configuration.
///
/// The core never interprets it; it is passed through to the data source
/// verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataQuery(pub serde_json::Value);

impl DataQuery {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Pageable dataset behind the export pipeline.
pub trait DataSource: Send + Sync {
    /// Total records matching the query.
    fn count(&self, query: &DataQuery) -> anyhow::Result<usize>;

    /// One page of records. Must be stable across calls within a single
    /// export (same query, same ordering).
    fn page(&self, query: &DataQuery, offset: usize, limit: usize) -> anyhow::Result<Vec<Row>>;
}

/// Fixed-rows source for tests/dev; ignores the query.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataSource {
    rows: Arc<Vec<Row>>,
}

impl InMemoryDataSource {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows: Arc::new(rows) }
    }

    /// `count` numbered rows of the shape `["<n>", "name-<n>"]`.
    pub fn numbered(count: usize) -> Self {
        Self::new(
            (0..count)
                .map(|n| vec![n.to_string(), format!("name-{n}")])
                .collect(),
        )
    }
}

impl DataSource for InMemoryDataSource {
    fn count(&self, _query: &DataQuery) -> anyhow::Result<usize> {
        Ok(self.rows.len())
    }

    fn page(&self, _query: &DataQuery, offset: usize, limit: usize) -> anyhow::Result<Vec<Row>> {
        Ok(self
            .rows
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_is_offset_limit() {
        let source = InMemoryDataSource::numbered(5);
        let query = DataQuery::default();

        assert_eq!(source.count(&query).unwrap(), 5);

        let page = source.page(&query, 2, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0][0], "2");
        assert_eq!(page[1][0], "3");

        // Final short page.
        let page = source.page(&query, 4, 2).unwrap();
        assert_eq!(page.len(), 1);

        // Past the end.
        assert!(source.page(&query, 10, 2).unwrap().is_empty());
    }
}
