//! Dry-run cost estimation and confirmation before running a query for real.
use crate::error::QueryError;
use crate::warehouse::{QueryEngine, QueryJob};
use anyhow::Result;
use dialoguer::console::Term;
use dialoguer::Input;
use std::io::{self, BufRead, IsTerminal, Write};
use tracing::info;

/// Bytes in one tebibyte, the unit warehouse prices are quoted in.
pub const BYTES_PER_TIB: f64 = 1_099_511_627_776.0;

pub const DEFAULT_PRICE_PER_TIB: f64 = 6.25;

pub const DEFAULT_WARNING_THRESHOLD: f64 = 0.001;

pub const AFFIRMATIVE: &str = "y";

/// Follows the question on every prompt. dialoguer's theme appends it for terminals.
pub const PROMPT_SUFFIX: &str = ": ";

pub const CANCELLED_MESSAGE: &str = "Query cancelled.";

/// Supplies the operator's raw answer to a confirmation prompt.
pub trait Prompter {
    fn ask(self: &mut Self, message: &str) -> Result<String>;
}

impl<F> Prompter for F
where
    F: FnMut(&str) -> Result<String>,
{
    fn ask(self: &mut Self, message: &str) -> Result<String> {
        self(message)
    }
}

/// Reads the answer from the terminal, or one line of stdin when it is piped.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(self: &mut Self, message: &str) -> Result<String> {
        if !(Term::stderr().is_term() && io::stdin().is_terminal()) {
            return read_answer(&mut io::stdin().lock(), &mut io::stderr(), message);
        }
        let answer = Input::<String>::new()
            .with_prompt(message)
            .allow_empty(true)
            .interact_text()?;
        Ok(answer)
    }
}

/// Writes the prompt to `output` and reads one line of `input`. End of input is an
/// empty answer.
pub fn read_answer<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    message: &str,
) -> Result<String> {
    write!(output, "{}{}", message, PROMPT_SUFFIX)?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Answers every prompt the same way without blocking.
pub struct FixedAnswer(pub String);

impl FixedAnswer {
    pub fn yes() -> Self {
        Self(AFFIRMATIVE.to_string())
    }
}

impl Prompter for FixedAnswer {
    fn ask(self: &mut Self, message: &str) -> Result<String> {
        info!("{}{}{}", message, PROMPT_SUFFIX, self.0);
        Ok(self.0.clone())
    }
}

pub fn bytes_to_cost(bytes: u64, price_per_tib: f64) -> f64 {
    (bytes as f64 / BYTES_PER_TIB) * price_per_tib
}

pub fn is_affirmative(answer: &str) -> bool {
    answer.eq_ignore_ascii_case(AFFIRMATIVE)
}

/// Treats a declined confirmation as a clean finish: `Ok(None)` when the operator
/// cancelled, the result unchanged otherwise.
pub fn accept_cancellation<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if matches!(e.downcast_ref::<QueryError>(), Some(QueryError::Cancelled { .. })) => {
            info!("{e}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

pub struct CostGuard<E, P> {
    engine: E,
    prompter: P,
    price_per_tib: f64,
    warning_threshold: f64,
}

impl<E: QueryEngine, P: Prompter> CostGuard<E, P> {
    pub fn new(engine: E, prompter: P) -> Self {
        Self {
            engine,
            prompter,
            price_per_tib: DEFAULT_PRICE_PER_TIB,
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
        }
    }

    pub fn with_price_per_tib(mut self, price_per_tib: f64) -> Self {
        self.price_per_tib = price_per_tib;
        self
    }

    pub fn with_warning_threshold(mut self, warning_threshold: f64) -> Self {
        self.warning_threshold = warning_threshold;
        self
    }

    pub fn engine(self: &Self) -> &E {
        &self.engine
    }

    pub fn prompter(self: &Self) -> &P {
        &self.prompter
    }

    pub fn warning_threshold(self: &Self) -> f64 {
        self.warning_threshold
    }

    pub async fn estimate(self: &Self, query: &str) -> Result<f64, QueryError> {
        let bytes = self
            .engine
            .dry_run(query)
            .await
            .map_err(QueryError::Estimate)?;
        let cost = bytes_to_cost(bytes, self.price_per_tib);
        info!(bytes, cost, "Estimated query cost");
        Ok(cost)
    }

    /// Runs the query after a dry-run estimate, asking first when the estimate exceeds
    /// the warning threshold. Returns the job handle without waiting for completion.
    pub async fn run(self: &mut Self, query: &str) -> Result<QueryJob, QueryError> {
        let estimated_cost = self.estimate(query).await?;

        if estimated_cost > self.warning_threshold {
            let message = format!("Estimated query cost: ${estimated_cost:.4}. Continue? (y/N)");
            let answer = self.prompter.ask(&message).map_err(QueryError::Prompt)?;
            if !is_affirmative(&answer) {
                return Err(QueryError::Cancelled { estimated_cost });
            }
        }

        let job = self
            .engine
            .execute(query)
            .await
            .map_err(QueryError::Execute)?;
        info!(job_id = %job.job_id, "Submitted query");
        Ok(job)
    }
}
