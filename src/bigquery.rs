//! BigQuery REST v2 client implementing the warehouse traits.
use crate::config::TableId;
use crate::error::WarehouseError;
use crate::export::{schema_fields, EXPORT_DESCRIPTION};
use crate::warehouse::{JobState, QueryEngine, QueryJob, ResultReader, ResultSet};
use anyhow::{anyhow, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;

/// How long each results request waits server-side for the job to finish.
const RESULTS_TIMEOUT_MS: &str = "10000";

const MULTIPART_BOUNDARY: &str = "landsat_bq_load_boundary";

pub struct BigQueryClient {
    client: reqwest::Client,
    base_url: Url,
    project: String,
    access_token: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: Option<JobReference>,
    status: Option<JobStatus>,
    statistics: Option<JobStatistics>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    location: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    error_result: Option<ErrorProto>,
}

#[derive(Deserialize, Debug)]
struct ErrorProto {
    reason: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct JobStatistics {
    // int64 values are encoded as JSON strings
    total_bytes_processed: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct QueryResultsPage {
    #[serde(default)]
    job_complete: bool,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Deserialize, Debug)]
struct TableSchema {
    fields: Vec<TableField>,
}

#[derive(Deserialize, Debug)]
struct TableField {
    name: String,
}

#[derive(Deserialize, Debug)]
struct TableRow {
    f: Vec<TableCell>,
}

#[derive(Deserialize, Debug)]
struct TableCell {
    v: Value,
}

impl TableCell {
    fn into_string(self) -> Option<String> {
        match self.v {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Deserialize, Debug)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize, Debug)]
struct ApiErrorDetail {
    message: String,
}

fn api_error(status: u16, body: &str) -> WarehouseError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    WarehouseError::Api { status, message }
}

async fn parse_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(api_error(status.as_u16(), &body).into());
    }
    Ok(serde_json::from_str(&body)?)
}

impl Job {
    fn into_query_job(self) -> Result<QueryJob> {
        if let Some(error) = self.status.as_ref().and_then(|s| s.error_result.as_ref()) {
            let job_id = self
                .job_reference
                .as_ref()
                .map(|r| r.job_id.to_owned())
                .unwrap_or_default();
            return Err(failed(job_id, error).into());
        }
        let reference = self
            .job_reference
            .ok_or(WarehouseError::MissingField("jobReference"))?;
        Ok(QueryJob {
            project: reference.project_id,
            job_id: reference.job_id,
            location: reference.location,
        })
    }

    fn bytes_processed(self: &Self) -> Result<u64> {
        let bytes = self
            .statistics
            .as_ref()
            .and_then(|s| s.total_bytes_processed.as_deref())
            .ok_or(WarehouseError::MissingField("statistics.totalBytesProcessed"))?;
        Ok(bytes.parse()?)
    }

    fn state(self: &Self) -> Result<JobState> {
        let status = self
            .status
            .as_ref()
            .ok_or(WarehouseError::MissingField("status"))?;
        let state = match (status.state.as_str(), &status.error_result) {
            (_, Some(error)) => JobState::Failed(
                error
                    .message
                    .to_owned()
                    .unwrap_or_else(|| "unknown error".to_string()),
            ),
            ("PENDING", None) => JobState::Submitted,
            ("RUNNING", None) => JobState::Running,
            ("DONE", None) => JobState::Completed,
            (other, None) => return Err(anyhow!("Unknown job state: {}", other)),
        };
        Ok(state)
    }
}

fn failed(job_id: String, error: &ErrorProto) -> WarehouseError {
    WarehouseError::JobFailed {
        job_id,
        reason: error.reason.to_owned().unwrap_or_default(),
        message: error.message.to_owned().unwrap_or_default(),
    }
}

impl QueryResultsPage {
    fn columns(self: &Self) -> Vec<String> {
        self.schema
            .as_ref()
            .map(|s| s.fields.iter().map(|f| f.name.to_owned()).collect())
            .unwrap_or_default()
    }

    fn into_rows(self) -> Vec<Vec<Option<String>>> {
        self.rows
            .into_iter()
            .map(|row| row.f.into_iter().map(TableCell::into_string).collect())
            .collect()
    }
}

pub fn query_body(query: &str, dry_run: bool) -> Value {
    let mut query_config = json!({ "query": query, "useLegacySql": false });
    if dry_run {
        // A cached hit would report zero bytes for a query that ran before
        query_config["useQueryCache"] = json!(false);
    }
    json!({
        "configuration": {
            "dryRun": dry_run,
            "query": query_config,
        }
    })
}

pub fn load_metadata(table: &TableId) -> Value {
    json!({
        "configuration": {
            "load": {
                "destinationTable": {
                    "projectId": table.project,
                    "datasetId": table.dataset,
                    "tableId": table.table,
                },
                "sourceFormat": "NEWLINE_DELIMITED_JSON",
                "schema": schema_fields(),
                "createDisposition": "CREATE_IF_NEEDED",
                "writeDisposition": "WRITE_EMPTY",
            },
            "labels": { "description": EXPORT_DESCRIPTION },
        }
    })
}

/// `multipart/related` upload body for a load job. The job metadata part is written
/// up front and rows are appended to the data part as they arrive.
pub struct LoadUpload {
    table: TableId,
    body: String,
    rows: usize,
}

impl LoadUpload {
    pub fn new(table: &TableId) -> Self {
        let body = format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
             --{b}\r\nContent-Type: application/octet-stream\r\n\r\n",
            b = MULTIPART_BOUNDARY,
            metadata = load_metadata(table),
        );
        Self {
            table: table.clone(),
            body,
            rows: 0,
        }
    }

    /// Appends one newline-delimited JSON row.
    pub fn push_line(self: &mut Self, line: &str) {
        self.body.push_str(line);
        self.body.push('\n');
        self.rows += 1;
    }

    pub fn rows(self: &Self) -> usize {
        self.rows
    }

    fn finish(mut self) -> String {
        self.body.push_str("\r\n--");
        self.body.push_str(MULTIPART_BOUNDARY);
        self.body.push_str("--\r\n");
        self.body
    }
}

pub fn console_url(job: &QueryJob) -> String {
    format!(
        "https://console.cloud.google.com/bigquery?project={}&j=bq:{}:{}&page=queryresults",
        job.project,
        job.location.as_deref().unwrap_or("US"),
        job.job_id
    )
}

impl BigQueryClient {
    pub fn new(base_url: &str, project: &str, access_token: &str) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: Url::parse(base_url)?,
            project: project.to_string(),
            access_token: access_token.to_string(),
        })
    }

    pub fn project(self: &Self) -> &str {
        &self.project
    }

    fn endpoint(self: &Self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Base url cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn jobs_url(self: &Self) -> Result<Url> {
        self.endpoint(&["bigquery", "v2", "projects", &self.project, "jobs"])
    }

    fn authorized(self: &Self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.access_token)
    }

    async fn insert_job(self: &Self, body: &Value) -> Result<Job> {
        let response = self
            .authorized(self.client.post(self.jobs_url()?))
            .json(body)
            .send()
            .await?;
        parse_response(response).await
    }

    async fn get_query_results(
        self: &Self,
        job: &QueryJob,
        page_token: Option<&str>,
    ) -> Result<QueryResultsPage> {
        let mut url = self.endpoint(&["bigquery", "v2", "projects", &job.project, "queries", &job.job_id])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("timeoutMs", RESULTS_TIMEOUT_MS);
            if let Some(location) = &job.location {
                pairs.append_pair("location", location);
            }
            if let Some(token) = page_token {
                pairs.append_pair("pageToken", token);
            }
        }
        let response = self.authorized(self.client.get(url)).send().await?;
        parse_response(response).await
    }

    pub async fn job_state(self: &Self, job_id: &str, location: Option<&str>) -> Result<JobState> {
        let mut url = self.endpoint(&["bigquery", "v2", "projects", &self.project, "jobs", job_id])?;
        if let Some(location) = location {
            url.query_pairs_mut().append_pair("location", location);
        }
        let response = self.authorized(self.client.get(url)).send().await?;
        let job: Job = parse_response(response).await?;
        job.state()
    }

    /// Submits the load job and returns without waiting for it to finish.
    pub async fn submit_load(self: &Self, upload: LoadUpload) -> Result<QueryJob> {
        let mut url = self.endpoint(&["upload", "bigquery", "v2", "projects", &self.project, "jobs"])?;
        url.query_pairs_mut().append_pair("uploadType", "multipart");

        info!(table = %upload.table, rows = upload.rows, "Submitting load job");
        let body = upload.finish();
        let response = self
            .authorized(self.client.post(url))
            .header(
                CONTENT_TYPE,
                format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
            )
            .body(body)
            .send()
            .await?;
        let job: Job = parse_response(response).await?;
        job.into_query_job()
    }
}

impl QueryEngine for BigQueryClient {
    async fn dry_run(self: &Self, query: &str) -> Result<u64> {
        let job = self.insert_job(&query_body(query, true)).await?;
        job.bytes_processed()
    }

    async fn execute(self: &Self, query: &str) -> Result<QueryJob> {
        let job = self.insert_job(&query_body(query, false)).await?;
        job.into_query_job()
    }
}

impl ResultReader for BigQueryClient {
    async fn wait_for_results(self: &Self, job: &QueryJob) -> Result<ResultSet> {
        let mut columns = None;
        let mut rows = vec![];
        let mut page_token: Option<String> = None;
        loop {
            let page = self.get_query_results(job, page_token.as_deref()).await?;
            if !page.job_complete {
                debug!(job_id = %job.job_id, "Waiting for job to complete");
                continue;
            }
            if columns.is_none() {
                columns = Some(page.columns());
            }
            page_token = page.page_token.clone();
            rows.extend(page.into_rows());
            if page_token.is_none() {
                break;
            }
        }
        Ok(ResultSet::new(columns.unwrap_or_default(), rows))
    }
}
