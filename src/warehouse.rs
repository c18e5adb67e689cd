//! The narrow capability surface the rest of the crate needs from a warehouse.
use anyhow::{anyhow, Result};
use std::collections::HashMap;

/// Handle to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryJob {
    pub project: String,
    pub job_id: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Running,
    Completed,
    Failed(String),
}

pub trait QueryEngine {
    /// Bytes the engine would scan if the query ran. Must bypass the result cache.
    async fn dry_run(self: &Self, query: &str) -> Result<u64>;

    /// Submits the query for execution and returns without waiting.
    async fn execute(self: &Self, query: &str) -> Result<QueryJob>;
}

pub trait ResultReader {
    /// Blocks until the job is terminal and returns every result row.
    async fn wait_for_results(self: &Self, job: &QueryJob) -> Result<ResultSet>;
}

/// Rows of nullable cells, addressed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(self: &Self) -> &[String] {
        &self.columns
    }

    pub fn len(self: &Self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(self: &Self) -> bool {
        self.rows.is_empty()
    }

    pub fn index(self: &Self) -> ColumnIndex {
        ColumnIndex(
            self.columns
                .iter()
                .enumerate()
                .map(|(i, c)| (c.to_owned(), i))
                .collect(),
        )
    }
}

pub struct ColumnIndex(HashMap<String, usize>);

impl ColumnIndex {
    fn cell<'a>(self: &Self, row: &'a [Option<String>], column: &str) -> Result<Option<&'a str>> {
        let i = self
            .0
            .get(column)
            .ok_or(anyhow!("Column not found: {}", column))?;
        Ok(row.get(*i).and_then(|c| c.as_deref()))
    }

    pub fn get_str<'a>(self: &Self, row: &'a [Option<String>], column: &str) -> Result<&'a str> {
        self.cell(row, column)?
            .ok_or(anyhow!("Null value in column: {}", column))
    }

    pub fn get_i64(self: &Self, row: &[Option<String>], column: &str) -> Result<i64> {
        Ok(self.get_str(row, column)?.parse()?)
    }

    pub fn get_f64(self: &Self, row: &[Option<String>], column: &str) -> Result<f64> {
        Ok(self.get_str(row, column)?.parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results() -> ResultSet {
        ResultSet::new(
            vec!["SPACECRAFT_ID".to_string(), "scenes".to_string()],
            vec![
                vec![Some("LANDSAT_8".to_string()), Some("1200".to_string())],
                vec![Some("LANDSAT_9".to_string()), None],
            ],
        )
    }

    #[test]
    fn test_typed_access() {
        let results = results();
        let index = results.index();
        assert_eq!(index.get_str(&results.rows[0], "SPACECRAFT_ID").unwrap(), "LANDSAT_8");
        assert_eq!(index.get_i64(&results.rows[0], "scenes").unwrap(), 1200);
        assert_eq!(index.get_f64(&results.rows[0], "scenes").unwrap(), 1200.0);
    }

    #[test]
    fn test_null_and_missing_columns() {
        let results = results();
        let index = results.index();
        assert!(index.get_i64(&results.rows[1], "scenes").is_err());
        assert!(index.get_str(&results.rows[0], "year").is_err());
    }
}
