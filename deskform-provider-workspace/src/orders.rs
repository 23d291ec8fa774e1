//! Prepaid order tracking
//!
//! A prepaid purchase answers with an order id instead of a job id. The
//! order is paid automatically; once the billing service reports it
//! completed, the order's main resource names the created object.

use std::time::Duration;

use deskform_core::waiter::Refresh;
use log::debug;
use serde_json::{Value as JsonValue, json};

use crate::client::{JsonExt, ServiceClient};
use crate::error::{ApiError, ApiResult};
use crate::jobs::{PollTiming, wait_until};

pub const ORDER_TIMING: PollTiming = PollTiming::secs(5, 5);

/// Order status codes of the billing service
const ORDER_COMPLETED: i64 = 5;
const ORDER_CANCELLED: &[i64] = &[2, 4];

/// Wait until the order is completed, then for its main resource id
pub async fn wait_for_order_resource(
    client: &ServiceClient,
    order_id: &str,
    timeout: Duration,
) -> ApiResult<String> {
    let orders = client.orders();
    wait_for_order_completed(&orders, order_id, timeout).await?;
    let resource_id = wait_for_main_resource(&orders, order_id, timeout).await?;
    debug!("The order ({}) created resource ({})", order_id, resource_id);
    Ok(resource_id)
}

/// Poll `v2/orders/customer-orders/details/{order_id}` until status 5
pub async fn wait_for_order_completed(
    client: &ServiceClient,
    order_id: &str,
    timeout: Duration,
) -> ApiResult<()> {
    let path = &format!("v2/orders/customer-orders/details/{}", order_id);
    let waiter = ORDER_TIMING.waiter(client, &["PENDING"], &["COMPLETED"], timeout);
    wait_until(&waiter, || async move {
        let detail = client.get(path).await?;
        let status = detail
            .pointer("/order_info/status")
            .and_then(JsonValue::as_i64)
            .ok_or(ApiError::MissingField("/order_info/status"))?;
        if ORDER_CANCELLED.contains(&status) {
            return Err(ApiError::Validation(format!(
                "order ({}) was cancelled (status {})",
                order_id, status
            )));
        }
        let state = if status == ORDER_COMPLETED {
            "COMPLETED"
        } else {
            "PENDING"
        };
        Ok(Refresh::found((), state))
    })
    .await
}

/// Poll the order's resources until the main resource is listed
async fn wait_for_main_resource(
    client: &ServiceClient,
    order_id: &str,
    timeout: Duration,
) -> ApiResult<String> {
    let body = &json!({"order_id": order_id, "only_main_resource": 1});
    let waiter = ORDER_TIMING.waiter(client, &["PENDING"], &["COMPLETED"], timeout);
    wait_until(&waiter, || async move {
        let resources = client
            .post("v2/orders/suscriptions/resources/query", body)
            .await?;
        match resources
            .array_at("/data")
            .first()
            .and_then(|r| r.str_at("/resource_id"))
            .filter(|id| !id.is_empty())
        {
            Some(id) => Ok(Refresh::found(id.to_string(), "COMPLETED")),
            None => Ok(Refresh::found(String::new(), "PENDING")),
        }
    })
    .await
}
