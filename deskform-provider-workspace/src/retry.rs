//! Retry of calls rejected while the target is busy

use std::future::Future;
use std::time::Duration;

use log::debug;

use crate::client::ServiceClient;
use crate::error::{ApiError, ApiResult};
use crate::jobs::PollTiming;

pub const RETRY_TIMING: PollTiming = PollTiming::secs(10, 20);

/// 409 WKS.00010032: the pool or one of its desktops is in a conflicting state
pub fn is_operation_conflict(err: &ApiError) -> bool {
    err.has_status_and_code(409, "WKS.00010032")
}

/// 400 WKS.0407: disks are still being added to the desktop
pub fn is_volume_busy(err: &ApiError) -> bool {
    err.has_status_and_code(400, "WKS.0407")
}

/// Call `op` until it succeeds or fails with an error `retryable` rejects.
///
/// The first attempt is immediate; retries wait the delay once and then the
/// poll interval, until `timeout` elapses.
pub async fn retry_on<T, F, Fut, P>(
    client: &ServiceClient,
    timeout: Duration,
    retryable: P,
    mut op: F,
) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
    P: Fn(&ApiError) -> bool,
{
    let (delay, interval) = match client.poll_override() {
        Some(interval) => (interval, interval),
        None => (RETRY_TIMING.delay, RETRY_TIMING.interval),
    };

    let mut last_error = None;
    let attempts = async {
        let mut wait = delay;
        loop {
            match op().await {
                Err(err) if retryable(&err) => {
                    debug!("operation rejected ({}), retrying in {:?}", err, wait);
                    last_error = Some(err);
                    tokio::time::sleep(wait).await;
                    wait = interval;
                }
                result => return result,
            }
        }
    };

    let outcome = tokio::time::timeout(timeout, attempts).await;
    match outcome {
        Ok(result) => result,
        Err(_) => Err(last_error.unwrap_or_else(|| {
            ApiError::Validation(format!("timeout after {:?} while retrying", timeout))
        })),
    }
}
