use thiserror::Error;

/// Outcome of a guarded query that did not produce a job.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The operator declined to run a query above the cost threshold. Not a fault.
    #[error("Query cancelled (estimated cost ${estimated_cost:.4})")]
    Cancelled { estimated_cost: f64 },
    /// No answer could be read, so nothing was submitted.
    #[error("Could not read the cost confirmation: {0}")]
    Prompt(anyhow::Error),
    #[error(transparent)]
    Estimate(anyhow::Error),
    #[error(transparent)]
    Execute(anyhow::Error),
}

#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("BigQuery API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Job {job_id} failed ({reason}): {message}")]
    JobFailed {
        job_id: String,
        reason: String,
        message: String,
    },
    #[error("Response is missing field '{0}'")]
    MissingField(&'static str),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid table id '{0}', expected 'project.dataset.table'")]
    InvalidTableId(String),
    #[error("Missing required configuration: {0}")]
    MissingRequired(&'static str),
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Unrecognized Landsat product id: {0}")]
    InvalidProductId(String),
    #[error("Item {0} has no usable footprint geometry")]
    MissingGeometry(String),
}
