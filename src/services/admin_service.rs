use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait};
use sea_orm::ActiveValue::Set;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::UpdateOrderStatusRequest,
    entity::orders::{ActiveModel as OrderActive, Entity as Orders},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_staff},
    models::{Order, OrderStatus},
    notify::StatusEmail,
    response::{ApiResponse, Meta},
    services::order_service::order_from_entity,
    state::AppState,
};

/// Transition an order's status and notify the buyer.
///
/// The notification is enqueued only after the new status is persisted, and
/// it is strictly fire-and-forget: a failure to look up the recipient or to
/// enqueue is logged and swallowed, never rolling back the status change or
/// blocking the response.
pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_staff(user)?;

    let status = OrderStatus::parse(&payload.status)
        .ok_or_else(|| AppError::Validation("Invalid order status".into()))?;

    let existing = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut active: OrderActive = existing.into();
    active.status = Set(status.to_string());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&state.orm).await?;

    match sqlx::query_as::<_, (String,)>("SELECT email FROM users WHERE id = $1")
        .bind(order.user_id)
        .fetch_optional(&state.pool)
        .await
    {
        Ok(Some((email,))) => state.notifier.enqueue(StatusEmail {
            order_id: order.id,
            recipient: email,
            status,
        }),
        Ok(None) => {
            tracing::warn!(order_id = %order.id, "order user missing, skipping notification")
        }
        Err(err) => {
            tracing::warn!(order_id = %order.id, error = %err, "recipient lookup failed, skipping notification")
        }
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_status_update",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "status": order.status })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order updated",
        order_from_entity(order)?,
        Some(Meta::empty()),
    ))
}
