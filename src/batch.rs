//! Batch API client and status poller.
//!
//! A thin blocking client for the OpenAI-compatible Batch API: upload the
//! JSONL input, create a batch job, poll it until it reaches a terminal
//! status, and download the output and error files. [`watch`] and
//! [`fetch_results`] are written against the [`BatchService`] trait so the
//! polling and result-availability rules do not depend on HTTP.
//!
//! # Example
//!
//! ```no_run
//! use handcontact::batch::{BatchClient, WatchOptions, fetch_results, watch};
//!
//! let client = BatchClient::from_env()?;
//! let file_id = client.upload_file("batch/batch_input.jsonl")?;
//! let job = client.create_batch(&file_id)?;
//! let job = watch(&client, &job.id, &WatchOptions::default(), |job| {
//!     println!("{}: {}", job.id, job.status);
//! })?;
//! let results = fetch_results(&client, &job.id)?;
//! println!("{} record(s)", results.output.len());
//! # Ok::<(), handcontact::AnnotationError>(())
//! ```

use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, multipart::Form};
use serde::Deserialize;
use serde_json::json;

use crate::error::AnnotationError;
use crate::progress::CancellationToken;
use crate::request::CHAT_COMPLETIONS_ENDPOINT;

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Completion window requested for every batch.
pub const COMPLETION_WINDOW: &str = "24h";

/// Lifecycle status of a batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum BatchStatus {
    /// Input file is being validated.
    Validating,
    /// Validation failed; no requests were run.
    Failed,
    /// Requests are being processed.
    InProgress,
    /// Results are being prepared.
    Finalizing,
    /// Finished; output is available.
    Completed,
    /// Did not finish within the completion window.
    Expired,
    /// Cancellation requested.
    Cancelling,
    /// Cancelled.
    Cancelled,
    /// A status this client does not know about.
    #[serde(other)]
    Unknown,
}

impl BatchStatus {
    /// Returns `true` once the job will not change status anymore.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed
                | BatchStatus::Failed
                | BatchStatus::Cancelled
                | BatchStatus::Expired
        )
    }

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Validating => "validating",
            BatchStatus::Failed => "failed",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Finalizing => "finalizing",
            BatchStatus::Completed => "completed",
            BatchStatus::Expired => "expired",
            BatchStatus::Cancelling => "cancelling",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Unknown => "unknown",
        }
    }
}

impl Display for BatchStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Per-request counters reported by the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct RequestCounts {
    /// Requests in the batch.
    #[serde(default)]
    pub total: u64,
    /// Requests that completed.
    #[serde(default)]
    pub completed: u64,
    /// Requests that failed.
    #[serde(default)]
    pub failed: u64,
}

impl RequestCounts {
    /// Completion percentage, if the total is known.
    pub fn percentage(&self) -> Option<f32> {
        (self.total > 0).then(|| self.completed as f32 / self.total as f32 * 100.0)
    }
}

/// A batch job as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BatchJob {
    /// Batch identifier.
    pub id: String,
    /// Current status.
    pub status: BatchStatus,
    /// Output file, available once completed.
    #[serde(default)]
    pub output_file_id: Option<String>,
    /// File of failed requests, if any failed.
    #[serde(default)]
    pub error_file_id: Option<String>,
    /// Unix timestamp of creation.
    #[serde(default)]
    pub created_at: Option<i64>,
    /// Unix timestamp the job started processing.
    #[serde(default)]
    pub in_progress_at: Option<i64>,
    /// Unix timestamp of completion.
    #[serde(default)]
    pub completed_at: Option<i64>,
    /// Unix timestamp of failure.
    #[serde(default)]
    pub failed_at: Option<i64>,
    /// Unix timestamp the job expires.
    #[serde(default)]
    pub expires_at: Option<i64>,
    /// Request counters.
    #[serde(default)]
    pub request_counts: Option<RequestCounts>,
}

/// Operations the poller and result fetcher need from the service.
pub trait BatchService {
    /// Fetch the current state of a batch job.
    fn retrieve_batch(&self, batch_id: &str) -> Result<BatchJob, AnnotationError>;

    /// Download the text content of a file.
    fn file_content(&self, file_id: &str) -> Result<String, AnnotationError>;
}

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

/// Blocking HTTP client for the Batch API.
#[derive(Debug, Clone)]
pub struct BatchClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl BatchClient {
    /// Client for `base_url` authenticated with `api_key`.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Client configured from `OPENAI_API_KEY` and, optionally,
    /// `OPENAI_BASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns [`AnnotationError::MissingApiKey`] if the key is unset or empty.
    pub fn from_env() -> Result<Self, AnnotationError> {
        let api_key = env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(AnnotationError::MissingApiKey)?;
        let base_url = env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self::new(api_key, base_url))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Upload a JSONL input file with `purpose=batch`, returning its file id.
    ///
    /// # Errors
    ///
    /// Returns I/O errors reading the file or HTTP errors.
    pub fn upload_file<P: AsRef<Path>>(&self, path: P) -> Result<String, AnnotationError> {
        let path = path.as_ref();
        log::debug!("Uploading {}", path.display());
        let form = Form::new().text("purpose", "batch").file("file", path)?;
        let file: FileObject = self
            .client
            .post(self.url("files"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()?
            .error_for_status()?
            .json()?;
        Ok(file.id)
    }

    /// Create a chat-completions batch over an uploaded input file.
    ///
    /// # Errors
    ///
    /// Returns HTTP errors.
    pub fn create_batch(&self, input_file_id: &str) -> Result<BatchJob, AnnotationError> {
        let body = json!({
            "input_file_id": input_file_id,
            "endpoint": CHAT_COMPLETIONS_ENDPOINT,
            "completion_window": COMPLETION_WINDOW,
        });
        let job = self
            .client
            .post(self.url("batches"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?
            .error_for_status()?
            .json()?;
        Ok(job)
    }
}

impl BatchService for BatchClient {
    fn retrieve_batch(&self, batch_id: &str) -> Result<BatchJob, AnnotationError> {
        let job = self
            .client
            .get(self.url(&format!("batches/{batch_id}")))
            .bearer_auth(&self.api_key)
            .send()?
            .error_for_status()?
            .json()?;
        Ok(job)
    }

    fn file_content(&self, file_id: &str) -> Result<String, AnnotationError> {
        let text = self
            .client
            .get(self.url(&format!("files/{file_id}/content")))
            .bearer_auth(&self.api_key)
            .send()?
            .error_for_status()?
            .text()?;
        Ok(text)
    }
}

/// Polling settings for [`watch`].
#[derive(Debug, Clone)]
#[must_use]
pub struct WatchOptions {
    /// Pause between polls.
    pub interval: Duration,
    /// Stop after this many polls even if the job is still running.
    /// `None` polls until a terminal status.
    pub max_polls: Option<u32>,
    /// Stop early when cancelled.
    pub cancellation: Option<CancellationToken>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_polls: None,
            cancellation: None,
        }
    }
}

impl WatchOptions {
    /// Poll every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    /// Limit the number of polls.
    pub fn with_max_polls(mut self, max_polls: Option<u32>) -> Self {
        self.max_polls = max_polls;
        self
    }

    /// Attach a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Poll a batch job until it reaches a terminal status.
///
/// `observer` sees every snapshot, including the last one. Returns the
/// last snapshot, which is non-terminal only when `max_polls` ran out.
///
/// # Errors
///
/// Returns service errors or [`AnnotationError::Cancelled`].
pub fn watch<S, F>(
    service: &S,
    batch_id: &str,
    options: &WatchOptions,
    mut observer: F,
) -> Result<BatchJob, AnnotationError>
where
    S: BatchService + ?Sized,
    F: FnMut(&BatchJob),
{
    let mut polls = 0_u32;
    loop {
        if options
            .cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            return Err(AnnotationError::Cancelled);
        }

        let job = service.retrieve_batch(batch_id)?;
        polls += 1;
        observer(&job);

        if job.status.is_terminal() {
            log::debug!("Batch {} finished with status {}", job.id, job.status);
            return Ok(job);
        }
        if options.max_polls.is_some_and(|max| polls >= max) {
            return Ok(job);
        }
        thread::sleep(options.interval);
    }
}

/// Downloaded batch results.
#[derive(Debug, Clone)]
pub struct BatchResults {
    /// The job snapshot the files were fetched for.
    pub job: BatchJob,
    /// Raw JSONL of completion records.
    pub output: String,
    /// Raw JSONL of failed requests (empty when there were none).
    pub errors: String,
}

/// Download the output and error files of a finished batch.
///
/// # Errors
///
/// Returns [`AnnotationError::BatchNotReady`] while the job is still
/// running, [`AnnotationError::UpstreamJobFailed`] if it ended without an
/// output file, or service errors. Expired and cancelled jobs that still
/// carry an output file return their partial results.
pub fn fetch_results<S>(service: &S, batch_id: &str) -> Result<BatchResults, AnnotationError>
where
    S: BatchService + ?Sized,
{
    let job = service.retrieve_batch(batch_id)?;

    let output_file_id = match (&job.output_file_id, job.status) {
        (Some(file_id), status) if status.is_terminal() => {
            if status != BatchStatus::Completed {
                log::warn!(
                    "Batch {} ended as {status}; fetching the partial output",
                    job.id
                );
            }
            file_id.clone()
        }
        (_, status) if !status.is_terminal() => {
            return Err(AnnotationError::BatchNotReady {
                id: job.id.clone(),
                status,
            });
        }
        (_, status) => {
            return Err(AnnotationError::UpstreamJobFailed {
                id: job.id.clone(),
                status,
            });
        }
    };

    let output = service.file_content(&output_file_id)?;
    let errors = match &job.error_file_id {
        Some(file_id) => service.file_content(file_id)?,
        None => String::new(),
    };

    Ok(BatchResults {
        job,
        output,
        errors,
    })
}

/// File inside the batch directory that remembers the last submitted job.
pub const BATCH_ID_FILE: &str = "batch_id.txt";

/// Remember `batch_id` in `batch_dir`.
///
/// # Errors
///
/// Returns I/O errors.
pub fn save_batch_id<P: AsRef<Path>>(batch_dir: P, batch_id: &str) -> Result<(), AnnotationError> {
    let batch_dir = batch_dir.as_ref();
    fs::create_dir_all(batch_dir)?;
    fs::write(batch_dir.join(BATCH_ID_FILE), format!("{batch_id}\n"))?;
    Ok(())
}

/// Read the job id saved by [`save_batch_id`].
///
/// # Errors
///
/// Returns I/O errors, or [`AnnotationError::InvalidMetadata`] if the file
/// is empty.
pub fn load_batch_id<P: AsRef<Path>>(batch_dir: P) -> Result<String, AnnotationError> {
    let path = batch_dir.as_ref().join(BATCH_ID_FILE);
    let text = fs::read_to_string(&path)?;
    let batch_id = text.trim();
    if batch_id.is_empty() {
        return Err(AnnotationError::InvalidMetadata {
            path,
            reason: "no batch id recorded".to_string(),
        });
    }
    Ok(batch_id.to_string())
}
