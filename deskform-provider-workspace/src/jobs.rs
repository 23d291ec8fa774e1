//! Job polling
//!
//! Most mutating Workspace calls answer with a job id and finish in the
//! background. The helpers here poll the matching job endpoint until the job
//! reaches a terminal status and report the outcome, including which
//! sub-jobs failed.
//!
//! | Helper | Endpoint | Delay / poll |
//! |---|---|---|
//! | [`wait_for_job_completed`] | `v2/{project_id}/workspace-jobs/{job_id}` | 10s / 20s |
//! | [`wait_for_workspace_job_completed`] | `v2/{project_id}/workspace-sub-jobs` | 10s / 15s |
//! | [`wait_for_app_server_job_completed`] | `v2/{project_id}/job/{job_id}` | 10s / 30s |
//! | [`wait_for_image_server_job_completed`] | `v1/{project_id}/image-server-jobs/{job_id}` | 10s / 30s |
//! | [`wait_for_workspace_pool_status_completed`] | `v2/{project_id}/desktop-pools` | 10s / 15s |

use std::fmt;
use std::future::Future;
use std::time::Duration;

use deskform_core::waiter::{Refresh, StateWaiter, WaitError};
use log::{debug, trace, warn};
use serde_json::Value as JsonValue;

use crate::client::{JsonExt, ServiceClient, with_query};
use crate::error::{ApiError, ApiResult};

/// Delay before the first poll and interval between polls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    pub delay: Duration,
    pub interval: Duration,
}

impl PollTiming {
    pub const fn secs(delay: u64, interval: u64) -> Self {
        Self {
            delay: Duration::from_secs(delay),
            interval: Duration::from_secs(interval),
        }
    }

    /// Build a waiter, letting the client's poll override win
    pub fn waiter(
        self,
        client: &ServiceClient,
        pending: &[&str],
        target: &[&str],
        timeout: Duration,
    ) -> StateWaiter {
        StateWaiter::new(pending, target, timeout)
            .delay(self.delay)
            .poll_interval(self.interval)
            .with_override(client.poll_override())
    }
}

pub const GENERIC_JOB_TIMING: PollTiming = PollTiming::secs(10, 20);
pub const WORKSPACE_JOB_TIMING: PollTiming = PollTiming::secs(10, 15);
pub const APP_SERVER_JOB_TIMING: PollTiming = PollTiming::secs(10, 30);
pub const IMAGE_SERVER_JOB_TIMING: PollTiming = PollTiming::secs(10, 30);
pub const POOL_STATUS_TIMING: PollTiming = PollTiming::secs(10, 15);

const PENDING: &str = "PENDING";
const TERMINAL: &[&str] = &["SUCCESS", "COMPLETE", "FAIL"];

/// Status reported by a job endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Any non-terminal status, e.g. WAITING or RUNNING
    Pending(String),
    Success,
    Complete,
    Fail,
}

impl JobStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "SUCCESS" => JobStatus::Success,
            "COMPLETE" => JobStatus::Complete,
            "FAIL" | "FAILED" => JobStatus::Fail,
            other => JobStatus::Pending(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Pending(status) => status,
            JobStatus::Success => "SUCCESS",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Fail => "FAIL",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sub-job whose status was not SUCCESS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubJobFailure {
    pub id: String,
    pub job_type: String,
    pub reason: String,
}

impl fmt::Display for SubJobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sub-job {} ({}) failed: {}",
            self.id, self.job_type, self.reason
        )
    }
}

impl SubJobFailure {
    fn from_json(job: &JsonValue) -> Self {
        let field = |key: &str| job.str_at(key).unwrap_or_default().to_string();
        let reason = ["/fail_reason", "/error_message", "/message"]
            .iter()
            .find_map(|key| job.str_at(key).filter(|s| !s.is_empty()))
            .unwrap_or("unknown")
            .to_string();
        Self {
            id: field("/id"),
            job_type: field("/job_type"),
            reason,
        }
    }
}

/// Terminal result of a polled job
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub status: JobStatus,
    /// Job (or sub-job) document observed with the terminal status
    pub body: JsonValue,
    pub failures: Vec<SubJobFailure>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.status != JobStatus::Fail
    }

    /// Turn a failed outcome into `ApiError::JobFailed`
    pub fn into_result(self, job_id: &str) -> ApiResult<JsonValue> {
        if self.is_success() {
            debug!("The job ({}) has been completed", job_id);
            return Ok(self.body);
        }
        Err(ApiError::JobFailed {
            job_id: job_id.to_string(),
            status: self.status.to_string(),
            failures: self.failures,
        })
    }

    /// `sub_jobs[0].job_resource_info.resource_id` of app and image server jobs
    pub fn resource_id(&self) -> Option<&str> {
        self.body
            .array_at("/sub_jobs")
            .first()
            .and_then(|job| job.str_at("/job_resource_info/resource_id"))
    }
}

/// Classify a job document that carries `status` and optionally `sub_jobs`.
///
/// A terminal status is demoted to FAIL when any sub-job did not succeed.
pub fn classify_job(body: JsonValue) -> JobOutcome {
    let status = JobStatus::parse(body.str_at("/status").unwrap_or_default());
    if !status.is_terminal() {
        return JobOutcome {
            status,
            body,
            failures: Vec::new(),
        };
    }

    let failures = failed_sub_jobs(body.array_at("/sub_jobs"));
    let status = if failures.is_empty() {
        status
    } else {
        JobStatus::Fail
    };
    JobOutcome {
        status,
        body,
        failures,
    }
}

/// Sub-jobs that finished without succeeding; unfinished ones are skipped
fn failed_sub_jobs(jobs: &[JsonValue]) -> Vec<SubJobFailure> {
    jobs.iter()
        .filter(|job| {
            let status = JobStatus::parse(job.str_at("/status").unwrap_or_default());
            status.is_terminal() && status != JobStatus::Success
        })
        .map(|job| {
            let failure = SubJobFailure::from_json(job);
            warn!(
                "The sub-job ({}) failed, job type: {}, reason: {}",
                failure.id, failure.job_type, failure.reason
            );
            failure
        })
        .collect()
}

/// Run a waiter over an API refresh, surfacing refresh errors unwrapped
pub async fn wait_until<T, F, Fut>(waiter: &StateWaiter, refresh: F) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<Refresh<T>>>,
{
    waiter.wait(refresh).await.map_err(unwrap_wait_error)
}

fn unwrap_wait_error(err: WaitError) -> ApiError {
    match err {
        WaitError::Refresh(inner) => match inner.downcast::<ApiError>() {
            Ok(api) => *api,
            Err(other) => ApiError::Wait(WaitError::Refresh(other)),
        },
        other => ApiError::Wait(other),
    }
}

/// Poll a job document until its classified status is terminal
async fn wait_for_terminal<F, Fut>(
    client: &ServiceClient,
    timing: PollTiming,
    timeout: Duration,
    continuous_target_occurrence: u32,
    mut fetch: F,
) -> ApiResult<JobOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<JobOutcome>>,
{
    let waiter = timing
        .waiter(client, &[PENDING], TERMINAL, timeout)
        .continuous_target_occurrence(continuous_target_occurrence);

    wait_until(&waiter, || {
        let fetched = fetch();
        async move {
            let outcome = fetched.await?;
            trace!("job status: {}", outcome.status);
            let state = if outcome.status.is_terminal() {
                outcome.status.to_string()
            } else {
                PENDING.to_string()
            };
            Ok(Refresh::found(outcome, state))
        }
    })
    .await
}

async fn fetch_job(client: &ServiceClient, path: &str) -> ApiResult<JobOutcome> {
    let body = client.get(path).await?;
    Ok(classify_job(body))
}

/// Wait for a generic Workspace job
pub async fn wait_for_job_completed(
    client: &ServiceClient,
    job_id: &str,
    timeout: Duration,
) -> ApiResult<JobOutcome> {
    wait_for_job_completed_with(client, job_id, timeout, 1).await
}

/// Like [`wait_for_job_completed`], requiring the terminal status on
/// `continuous_target_occurrence` consecutive polls
pub async fn wait_for_job_completed_with(
    client: &ServiceClient,
    job_id: &str,
    timeout: Duration,
    continuous_target_occurrence: u32,
) -> ApiResult<JobOutcome> {
    let path = format!("v2/{{project_id}}/workspace-jobs/{}", job_id);
    wait_for_terminal(
        client,
        GENERIC_JOB_TIMING,
        timeout,
        continuous_target_occurrence,
        || fetch_job(client, &path),
    )
    .await
}

/// Wait for a desktop job tracked through `workspace-sub-jobs`.
///
/// The outcome body is the first unfinished sub-job, or the first sub-job
/// once all succeeded; its `entities.desktop_id` names the desktop.
pub async fn wait_for_workspace_job_completed(
    client: &ServiceClient,
    job_id: &str,
    desktop_pool_id: Option<&str>,
    timeout: Duration,
) -> ApiResult<JobOutcome> {
    let path = with_query(
        "v2/{project_id}/workspace-sub-jobs",
        &[
            ("job_id", job_id.to_string()),
            ("desktop_pool_id", desktop_pool_id.unwrap_or_default().to_string()),
        ],
    );
    wait_for_terminal(client, WORKSPACE_JOB_TIMING, timeout, 1, || {
        fetch_workspace_sub_jobs(client, &path)
    })
    .await
}

async fn fetch_workspace_sub_jobs(client: &ServiceClient, path: &str) -> ApiResult<JobOutcome> {
    let body = client.get(path).await?;
    let jobs = body.array_at("/jobs");
    let Some(first) = jobs.first() else {
        return Err(ApiError::MissingField("jobs"));
    };

    let unfinished = jobs
        .iter()
        .find(|job| job.str_at("/status") != Some("SUCCESS"));
    let Some(job) = unfinished else {
        return Ok(JobOutcome {
            status: JobStatus::Success,
            body: first.clone(),
            failures: Vec::new(),
        });
    };

    let status = JobStatus::parse(job.str_at("/status").unwrap_or_default());
    let failures = if status.is_terminal() {
        failed_sub_jobs(jobs)
    } else {
        Vec::new()
    };
    let status = if failures.is_empty() {
        status
    } else {
        JobStatus::Fail
    };
    Ok(JobOutcome {
        status,
        body: job.clone(),
        failures,
    })
}

/// Wait for an app server job (appstream service)
pub async fn wait_for_app_server_job_completed(
    client: &ServiceClient,
    job_id: &str,
    timeout: Duration,
) -> ApiResult<JobOutcome> {
    let path = format!("v2/{{project_id}}/job/{}", job_id);
    wait_for_terminal(client, APP_SERVER_JOB_TIMING, timeout, 1, || {
        fetch_job(client, &path)
    })
    .await
}

/// Wait for an image server job (appstream service)
pub async fn wait_for_image_server_job_completed(
    client: &ServiceClient,
    job_id: &str,
    timeout: Duration,
) -> ApiResult<JobOutcome> {
    let path = format!("v1/{{project_id}}/image-server-jobs/{}", job_id);
    wait_for_terminal(client, IMAGE_SERVER_JOB_TIMING, timeout, 1, || {
        fetch_job(client, &path)
    })
    .await
}

/// Wait until the desktop pool named `pool_name` is STEADY, returning its id.
///
/// A pool in ERROR aborts the wait. A pool not listed yet counts as not found.
pub async fn wait_for_workspace_pool_status_completed(
    client: &ServiceClient,
    pool_name: &str,
    timeout: Duration,
) -> ApiResult<String> {
    let waiter = POOL_STATUS_TIMING.waiter(client, &[PENDING], &["COMPLETED"], timeout);
    let pool = wait_until(&waiter, || async move {
        let Some(pool) = find_desktop_pool_by_name(client, pool_name).await? else {
            return Ok(Refresh::missing());
        };
        match pool.str_at("/status").unwrap_or_default() {
            "STEADY" => Ok(Refresh::found(pool, "COMPLETED")),
            "ERROR" => Err(ApiError::Validation(format!(
                "desktop pool ({}) entered unexpected status (ERROR)",
                pool_name
            ))),
            _ => Ok(Refresh::found(pool, PENDING)),
        }
    })
    .await?;

    pool.str_at("/id")
        .map(str::to_string)
        .ok_or(ApiError::MissingField("id"))
}

/// Page through desktop pools filtered by name (a fuzzy match on the
/// server side) until one matches exactly
pub async fn find_desktop_pool_by_name(
    client: &ServiceClient,
    pool_name: &str,
) -> ApiResult<Option<JsonValue>> {
    let mut offset = 0usize;
    loop {
        let path = with_query(
            "v2/{project_id}/desktop-pools",
            &[("name", pool_name.to_string()), ("offset", offset.to_string())],
        );
        let body = client.get(&path).await?;
        let pools = body.array_at("/desktop_pools");
        if pools.is_empty() {
            return Ok(None);
        }
        if let Some(pool) = pools.iter().find(|p| p.str_at("/name") == Some(pool_name)) {
            return Ok(Some(pool.clone()));
        }
        offset += pools.len();
    }
}
