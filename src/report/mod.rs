//! The three reporting queries and the artifacts they produce.
use crate::config::TableId;
use crate::cost_guard::{CostGuard, Prompter};
use crate::geometry::Point;
use crate::warehouse::{QueryEngine, ResultReader, ResultSet};
use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub mod animation;
pub mod chart;

pub const CUMULATIVE_SCENES_FILE: &str = "cumulative_scenes.svg";
pub const CLEAR_SCENES_FILE: &str = "clear_scenes_1972-2023.svg";

pub fn total_scenes_query(table: &TableId) -> String {
    format!(
        "SELECT
    COUNT(*) AS scenes
FROM
    `{table}`"
    )
}

pub fn cumulative_scenes_query(table: &TableId) -> String {
    format!(
        "-- Count the number of scenes acquired by each spacecraft in each year
WITH year_count AS (
SELECT
    SPACECRAFT_ID,
    EXTRACT(YEAR FROM PARSE_DATE('%Y-%m-%d', DATE_ACQUIRED)) AS year_acquired,
    COUNT(*) AS scenes
FROM
    `{table}`
GROUP BY
    SPACECRAFT_ID, year_acquired
)
SELECT
SPACECRAFT_ID,
year_acquired,
SUM(scenes) OVER (
    PARTITION BY SPACECRAFT_ID
    ORDER BY year_acquired
    ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW
) AS cumulative_count
FROM
year_count
ORDER BY
SPACECRAFT_ID, year_acquired"
    )
}

pub fn clear_scenes_query(table: &TableId) -> String {
    format!(
        "SELECT
    EXTRACT(YEAR FROM PARSE_DATE('%Y-%m-%d', DATE_ACQUIRED)) AS year,
    COUNT(*) AS num_scenes,
    WRS_PATH, WRS_ROW,
    -- Get the centroid of all scenes in the path/row
    ST_CENTROID(ST_UNION_AGG(geo)) AS geo
FROM `{table}`
WHERE
    -- Exclude ocean scenes
    CLOUD_COVER_LAND <> -1
    -- Exclude night scenes
    AND SUN_ELEVATION > 0
    -- Exclude cloudy scenes
    AND CLOUD_COVER < 20
GROUP BY year, WRS_PATH, WRS_ROW"
    )
}

/// Cumulative scene counts with one value per spacecraft for every year.
#[derive(Debug, Clone, PartialEq)]
pub struct CumulativeScenes {
    pub years: Vec<i32>,
    /// `(spacecraft, counts)` in stacking order; `counts` is aligned with `years`.
    pub series: Vec<(String, Vec<u64>)>,
}

impl CumulativeScenes {
    /// Expands to every spacecraft × observed year. A spacecraft keeps its last
    /// cumulative count in years it acquired nothing, and is zero before its first year.
    pub fn from_results(results: &ResultSet) -> Result<Self> {
        let index = results.index();
        let mut counts: BTreeMap<String, BTreeMap<i32, u64>> = BTreeMap::new();
        let mut years = BTreeSet::new();
        for row in &results.rows {
            let spacecraft = index.get_str(row, "SPACECRAFT_ID")?.to_string();
            let year: i32 = index.get_i64(row, "year_acquired")?.try_into()?;
            let count: u64 = index.get_i64(row, "cumulative_count")?.try_into()?;
            years.insert(year);
            *counts.entry(spacecraft).or_default().entry(year).or_default() += count;
        }

        let years: Vec<i32> = years.into_iter().collect();
        let series = counts
            .into_iter()
            .map(|(spacecraft, by_year)| {
                let mut last = 0;
                let filled = years
                    .iter()
                    .map(|year| {
                        match by_year.get(year) {
                            Some(&count) if count > 0 => last = count,
                            _ => {}
                        }
                        last
                    })
                    .collect();
                (spacecraft, filled)
            })
            .collect();
        Ok(Self { years, series })
    }

    pub fn totals(self: &Self) -> Vec<u64> {
        (0..self.years.len())
            .map(|i| self.series.iter().map(|(_, counts)| counts[i]).sum())
            .collect()
    }
}

/// Clear-scene count for one WRS path/row in one year.
#[derive(Debug, Clone, PartialEq)]
pub struct ClearScenes {
    pub year: i32,
    pub num_scenes: u64,
    pub wrs_path: u16,
    pub wrs_row: u16,
    pub geo: Point,
}

impl ClearScenes {
    pub fn from_results(results: &ResultSet) -> Result<Vec<Self>> {
        let index = results.index();
        results
            .rows
            .iter()
            .map(|row| -> Result<Self> {
                let geo = index.get_str(row, "geo")?;
                Ok(Self {
                    year: index.get_i64(row, "year")?.try_into()?,
                    num_scenes: index.get_i64(row, "num_scenes")?.try_into()?,
                    wrs_path: index.get_i64(row, "WRS_PATH")?.try_into()?,
                    wrs_row: index.get_i64(row, "WRS_ROW")?.try_into()?,
                    geo: Point::from_wkt(geo).ok_or(anyhow!("Expected a WKT point: {}", geo))?,
                })
            })
            .collect()
    }
}

/// Formats with comma thousands separators, e.g. `1,234,567`.
pub fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

pub struct Reporter<E, P> {
    guard: CostGuard<E, P>,
    table: TableId,
    output_dir: PathBuf,
}

impl<E: QueryEngine + ResultReader, P: Prompter> Reporter<E, P> {
    pub fn new(guard: CostGuard<E, P>, table: TableId, output_dir: &Path) -> Self {
        Self {
            guard,
            table,
            output_dir: output_dir.to_path_buf(),
        }
    }

    async fn query(self: &mut Self, query: &str) -> Result<ResultSet> {
        let job = self.guard.run(query).await?;
        let results = self.guard.engine().wait_for_results(&job).await?;
        info!(job_id = %job.job_id, rows = results.len(), "Query complete");
        Ok(results)
    }

    fn output_path(self: &Self, file: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;
        Ok(self.output_dir.join(file))
    }

    pub async fn count_total_scenes(self: &mut Self) -> Result<u64> {
        println!("\nQuerying total scenes...");
        let results = self.query(&total_scenes_query(&self.table)).await?;
        let row = results
            .rows
            .first()
            .ok_or(anyhow!("Count query returned no rows"))?;
        let total: u64 = results.index().get_i64(row, "scenes")?.try_into()?;
        println!("Total scenes: {}", thousands(total));
        Ok(total)
    }

    pub async fn plot_cumulative_scenes(self: &mut Self) -> Result<PathBuf> {
        println!("\nQuerying cumulative scenes by spacecraft...");
        let results = self.query(&cumulative_scenes_query(&self.table)).await?;
        let scenes = CumulativeScenes::from_results(&results)?;

        let dst = self.output_path(CUMULATIVE_SCENES_FILE)?;
        chart::write(&scenes, &dst)?;
        println!("Wrote figure to {}.", dst.display());
        Ok(dst)
    }

    pub async fn visualize_clear_scenes_by_location(self: &mut Self) -> Result<PathBuf> {
        println!("\nQuerying clear scenes by path and row...");
        let results = self.query(&clear_scenes_query(&self.table)).await?;
        let scenes = ClearScenes::from_results(&results)?;

        let dst = self.output_path(CLEAR_SCENES_FILE)?;
        animation::write(&scenes, &dst)?;
        println!("Wrote animation to {}.", dst.display());
        Ok(dst)
    }

    pub async fn run_all(self: &mut Self) -> Result<()> {
        self.count_total_scenes().await?;
        self.plot_cumulative_scenes().await?;
        self.visualize_clear_scenes_by_location().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost_guard::{accept_cancellation, FixedAnswer};
    use crate::error::QueryError;
    use crate::warehouse::QueryJob;
    use std::cell::RefCell;

    const TEST_OUTPUT_DIR: &str = "/tmp/landsat-bq/report";

    fn table() -> TableId {
        "proj.landsat.scenes".parse().unwrap()
    }

    fn cells(values: &[&str]) -> Vec<Option<String>> {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn cumulative_results() -> ResultSet {
        ResultSet::new(
            columns(&["SPACECRAFT_ID", "year_acquired", "cumulative_count"]),
            vec![
                cells(&["LANDSAT_1", "1972", "100"]),
                cells(&["LANDSAT_1", "1973", "250"]),
                cells(&["LANDSAT_1", "1975", "300"]),
                cells(&["LANDSAT_2", "1975", "80"]),
                cells(&["LANDSAT_2", "1976", "200"]),
            ],
        )
    }

    fn clear_results() -> ResultSet {
        ResultSet::new(
            columns(&["year", "num_scenes", "WRS_PATH", "WRS_ROW", "geo"]),
            vec![
                cells(&["1972", "3", "44", "34", "POINT(-121 38)"]),
                cells(&["2023", "60", "100", "60", "POINT(130.5 -1.25)"]),
            ],
        )
    }

    /// Answers each query by matching its text, and records submissions.
    struct FakeWarehouse {
        bytes: u64,
        submitted: RefCell<Vec<String>>,
    }

    impl FakeWarehouse {
        fn new(bytes: u64) -> Self {
            Self {
                bytes,
                submitted: RefCell::new(vec![]),
            }
        }
    }

    impl QueryEngine for FakeWarehouse {
        async fn dry_run(self: &Self, _query: &str) -> Result<u64> {
            Ok(self.bytes)
        }

        async fn execute(self: &Self, query: &str) -> Result<QueryJob> {
            let mut submitted = self.submitted.borrow_mut();
            submitted.push(query.to_string());
            Ok(QueryJob {
                project: "proj".to_string(),
                job_id: format!("job_{}", submitted.len() - 1),
                location: None,
            })
        }
    }

    impl ResultReader for FakeWarehouse {
        async fn wait_for_results(self: &Self, job: &QueryJob) -> Result<ResultSet> {
            let i: usize = job.job_id.trim_start_matches("job_").parse()?;
            let query = self.submitted.borrow()[i].clone();
            let results = if query.contains("cumulative_count") {
                cumulative_results()
            } else if query.contains("ST_UNION_AGG") {
                clear_results()
            } else {
                ResultSet::new(columns(&["scenes"]), vec![cells(&["2654321"])])
            };
            Ok(results)
        }
    }

    #[test]
    fn test_queries_reference_table() {
        let table = table();
        for query in [
            total_scenes_query(&table),
            cumulative_scenes_query(&table),
            clear_scenes_query(&table),
        ] {
            assert!(query.contains("`proj.landsat.scenes`"));
        }
        assert!(clear_scenes_query(&table).contains("CLOUD_COVER < 20"));
    }

    #[test]
    fn test_forward_fill() {
        let scenes = CumulativeScenes::from_results(&cumulative_results()).unwrap();
        assert_eq!(scenes.years, vec![1972, 1973, 1975, 1976]);
        assert_eq!(
            scenes.series,
            vec![
                ("LANDSAT_1".to_string(), vec![100, 250, 300, 300]),
                ("LANDSAT_2".to_string(), vec![0, 0, 80, 200]),
            ]
        );
        assert_eq!(scenes.totals(), vec![100, 250, 380, 500]);
    }

    #[test]
    fn test_clear_scenes_from_results() {
        let scenes = ClearScenes::from_results(&clear_results()).unwrap();
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[1].geo, Point::new(130.5, -1.25));
        assert_eq!(scenes[1].wrs_row, 60);

        let bad = ResultSet::new(
            columns(&["year", "num_scenes", "WRS_PATH", "WRS_ROW", "geo"]),
            vec![cells(&["1972", "3", "44", "34", "POLYGON((0 0, 1 0, 1 1, 0 0))"])],
        );
        assert!(ClearScenes::from_results(&bad).is_err());

        let out_of_range = ResultSet::new(
            columns(&["year", "num_scenes", "WRS_PATH", "WRS_ROW", "geo"]),
            vec![cells(&["1972", "-3", "44", "70000", "POINT(0 0)"])],
        );
        assert!(ClearScenes::from_results(&out_of_range).is_err());
    }

    #[test]
    fn test_negative_cumulative_count_is_rejected() {
        let results = ResultSet::new(
            columns(&["SPACECRAFT_ID", "year_acquired", "cumulative_count"]),
            vec![cells(&["LANDSAT_1", "1972", "-1"])],
        );
        assert!(CumulativeScenes::from_results(&results).is_err());
    }

    #[test]
    fn test_thousands() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(2654321), "2,654,321");
    }

    #[tokio::test]
    async fn test_run_all() {
        let guard = CostGuard::new(FakeWarehouse::new(0), FixedAnswer("n".to_string()));
        let mut reporter = Reporter::new(guard, table(), Path::new(TEST_OUTPUT_DIR));

        assert_eq!(reporter.count_total_scenes().await.unwrap(), 2654321);
        let chart = reporter.plot_cumulative_scenes().await.unwrap();
        let video = reporter.visualize_clear_scenes_by_location().await.unwrap();

        assert!(chart.ends_with(CUMULATIVE_SCENES_FILE));
        assert!(fs::read_to_string(chart).unwrap().starts_with("<svg"));
        assert!(fs::read_to_string(video).unwrap().contains("<animate"));
        assert_eq!(reporter.guard.engine().submitted.borrow().len(), 3);
    }

    #[tokio::test]
    async fn test_declined_query_is_not_submitted() {
        let guard = CostGuard::new(FakeWarehouse::new(1 << 40), FixedAnswer("n".to_string()));
        let mut reporter = Reporter::new(guard, table(), Path::new(TEST_OUTPUT_DIR));

        let err = reporter.count_total_scenes().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<QueryError>(),
            Some(QueryError::Cancelled { .. })
        ));
        assert!(reporter.guard.engine().submitted.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_declined_report_finishes_cleanly() {
        let guard = CostGuard::new(FakeWarehouse::new(1 << 40), FixedAnswer("n".to_string()));
        let mut reporter = Reporter::new(guard, table(), Path::new(TEST_OUTPUT_DIR));

        let outcome = accept_cancellation(reporter.run_all().await).unwrap();
        assert!(outcome.is_none());
        assert!(reporter.guard.engine().submitted.borrow().is_empty());
    }
}
