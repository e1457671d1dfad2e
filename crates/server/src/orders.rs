//! Orders taken by the agents, for dashboard users.
//!
//! Routes:
//! - `GET /api/v1/agents/{id}/orders?status&start_date&end_date` - orders of an agent, newest
//!   first; the window defaults to today (UTC)
//! - `POST /api/v1/agents/{id}/orders`     - enter an order by hand (owner/editor)
//! - `GET /api/v1/orders/{id}`             - one order with its items
//! - `PUT /api/v1/orders/{id}`             - edit customer details or status (owner/editor)
//! - `PUT /api/v1/orders/{id}/status`      - move an order along (owner/editor)
//! - `PATCH /api/v1/order-items/{id}`      - edit a line, the total follows (owner/editor)
//! - `DELETE /api/v1/order-items/{id}`     - remove a line, the total follows (owner/editor)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, put},
    Json, Router,
};
use chrono::{Days, NaiveDate, NaiveTime, Utc};
use rollwise_core::domain::conversation::ConversationId;
use rollwise_core::domain::order::{
    NewOrder, NewOrderLine, Order, OrderFilter, OrderId, OrderItem, OrderItemPatch, OrderPatch,
    OrderStatus,
};
use rollwise_core::domain::user::User;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::access::{agent_access, AgentAccess};
use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub pickup_time: Option<String>,
    #[serde(default)]
    pub special_requests: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub order_items: Vec<NewOrderLine>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateOrderRequest {
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub pickup_time: Option<String>,
    #[serde(default)]
    pub special_requests: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize)]
pub struct ItemChange {
    #[serde(flatten)]
    pub item: OrderItem,
    pub order_total: Decimal,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/agents/{id}/orders", get(list_orders).post(create_order))
        .route("/api/v1/orders/{id}", get(get_order).put(update_order))
        .route("/api/v1/orders/{id}/status", put(update_status))
        .route("/api/v1/order-items/{id}", patch(update_order_item).delete(delete_order_item))
}

fn parse_status(raw: Option<&str>) -> Result<Option<OrderStatus>, ApiError> {
    Ok(raw
        .map(str::trim)
        .filter(|status| !status.is_empty())
        .map(str::parse::<OrderStatus>)
        .transpose()?)
}

/// `[start 00:00, end + 1 day 00:00)` in UTC, both ends defaulting to today.
fn creation_window(query: &OrderListQuery) -> Result<OrderFilter, ApiError> {
    let today = Utc::now().date_naive();
    let start = query.start_date.unwrap_or(today);
    let end = query.end_date.unwrap_or(today);
    if end < start {
        return Err(ApiError::bad_request("end_date must not be before start_date"));
    }
    let after_end = end
        .checked_add_days(Days::new(1))
        .ok_or_else(|| ApiError::bad_request("end_date is out of range"))?;
    Ok(OrderFilter {
        status: parse_status(query.status.as_deref())?,
        created_from: Some(start.and_time(NaiveTime::MIN).and_utc()),
        created_before: Some(after_end.and_time(NaiveTime::MIN).and_utc()),
    })
}

pub async fn list_orders(
    Path(agent_id): Path<String>,
    Query(query): Query<OrderListQuery>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Order>>, ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    let filter = creation_window(&query)?;
    Ok(Json(state.orders.list_for_agent(&access.agent.id, &filter).await?))
}

pub async fn create_order(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderDetail>), ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    access.require_editor()?;

    if body.order_items.is_empty() {
        return Err(ApiError::bad_request("Cannot create an order with no items"));
    }
    for line in &body.order_items {
        line.validate()?;
    }
    let status = parse_status(body.status.as_deref())?.unwrap_or(OrderStatus::New);

    let conversation_id = match body.conversation_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => {
            let conversation = state
                .conversations
                .find(&ConversationId(id))
                .await?
                .filter(|conversation| conversation.agent_id == access.agent.id)
                .ok_or_else(|| ApiError::bad_request("Conversation not found for this agent"))?;
            Some(conversation.id)
        }
        None => None,
    };

    let order = state
        .orders
        .create_order_with_items(
            NewOrder {
                agent_id: access.agent.id.clone(),
                conversation_id,
                customer_phone: body.customer_phone,
                customer_name: body.customer_name,
                pickup_time: body.pickup_time,
                special_requests: body.special_requests,
            },
            status,
            &body.order_items,
        )
        .await?;
    let items = state.orders.list_items(&order.id).await?;
    info!(
        event_name = "order.created",
        agent_id = %access.agent.id.0,
        order_id = %order.id.0,
        items = items.len(),
        "order entered from the dashboard"
    );
    Ok((StatusCode::CREATED, Json(OrderDetail { order, items })))
}

/// The order and the caller's access to its agent.
async fn visible_order(
    state: &AppState,
    order_id: String,
    user: &User,
) -> Result<(Order, AgentAccess), ApiError> {
    let order = state
        .orders
        .find_order(&OrderId(order_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Order not found"))?;
    let access = agent_access(state, &order.agent_id.0, user).await.map_err(|error| {
        if error.status == StatusCode::NOT_FOUND {
            ApiError::not_found("Order not found")
        } else {
            error
        }
    })?;
    Ok((order, access))
}

/// The line with the caller's editor access to its order checked.
async fn editable_line(state: &AppState, item_id: &str, user: &User) -> Result<OrderItem, ApiError> {
    let item = state
        .orders
        .find_item(item_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Order item not found"))?;
    let (_, access) = visible_order(state, item.order_id.0.clone(), user).await.map_err(|error| {
        if error.status == StatusCode::NOT_FOUND {
            ApiError::not_found("Order item not found")
        } else {
            error
        }
    })?;
    access.require_editor()?;
    Ok(item)
}

pub async fn get_order(
    Path(order_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<OrderDetail>, ApiError> {
    let (order, _) = visible_order(&state, order_id, &user).await?;
    let items = state.orders.list_items(&order.id).await?;
    Ok(Json(OrderDetail { order, items }))
}

pub async fn update_order(
    Path(order_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<UpdateOrderRequest>,
) -> Result<Json<OrderDetail>, ApiError> {
    let status = parse_status(body.status.as_deref())?;
    let (order, access) = visible_order(&state, order_id, &user).await?;
    access.require_editor()?;

    let patch = OrderPatch {
        customer_name: body.customer_name,
        customer_phone: body.customer_phone,
        pickup_time: body.pickup_time,
        special_requests: body.special_requests,
        status,
    };
    let updated = state
        .orders
        .update_order(&order.id, patch)
        .await?
        .ok_or_else(|| ApiError::not_found("Order not found"))?;
    let items = state.orders.list_items(&updated.id).await?;
    info!(event_name = "order.updated", order_id = %updated.id.0, "order details updated");
    Ok(Json(OrderDetail { order: updated, items }))
}

pub async fn update_status(
    Path(order_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<StatusUpdate>,
) -> Result<Json<Order>, ApiError> {
    let status = body.status.parse::<OrderStatus>()?;
    let (order, access) = visible_order(&state, order_id, &user).await?;
    access.require_editor()?;

    let updated = state
        .orders
        .update_status(&order.id, status)
        .await?
        .ok_or_else(|| ApiError::not_found("Order not found"))?;
    info!(
        event_name = "order.status_changed",
        order_id = %updated.id.0,
        from = order.status.as_str(),
        to = updated.status.as_str(),
        "order status changed"
    );
    Ok(Json(updated))
}

pub async fn update_order_item(
    Path(item_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(patch): Json<OrderItemPatch>,
) -> Result<Json<ItemChange>, ApiError> {
    patch.validate()?;
    editable_line(&state, &item_id, &user).await?;

    let changed = state
        .orders
        .update_item(&item_id, patch)
        .await?
        .ok_or_else(|| ApiError::not_found("Order item not found"))?;
    info!(
        event_name = "order.item_updated",
        order_id = %changed.item.order_id.0,
        item_id = %item_id,
        order_total = %changed.order_total,
        "order line updated"
    );
    Ok(Json(ItemChange { item: changed.item, order_total: changed.order_total }))
}

pub async fn delete_order_item(
    Path(item_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<StatusCode, ApiError> {
    let item = editable_line(&state, &item_id, &user).await?;

    let order_total = state
        .orders
        .delete_item(&item_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Order item not found"))?;
    info!(
        event_name = "order.item_deleted",
        order_id = %item.order_id.0,
        item_id = %item_id,
        order_total = %order_total,
        "order line removed"
    );
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::{
        extract::{Path, Query, State},
        http::StatusCode,
        Json,
    };
    use rollwise_core::domain::order::{NewMenuItem, NewOrder, OrderStatus};
    use rust_decimal::Decimal;

    use chrono::{Days, Utc};
    use rollwise_core::domain::order::OrderItemPatch;

    use super::{
        create_order, delete_order_item, get_order, list_orders, update_order, update_order_item,
        update_status, CreateOrderRequest, OrderListQuery, StatusUpdate, UpdateOrderRequest,
    };
    use crate::state::testing::harness;

    #[tokio::test]
    async fn order_lifecycle_through_the_dashboard() {
        let harness = harness(Vec::new()).await;
        let owner = harness.user("owner@example.com").await;
        let stranger = harness.user("stranger@example.com").await;
        let agent = harness.agent(&owner.0).await;

        let order = harness
            .state
            .orders
            .create_order(NewOrder {
                agent_id: agent.id.clone(),
                conversation_id: None,
                customer_phone: Some("+15550123".into()),
                customer_name: Some("Sam".into()),
                pickup_time: None,
                special_requests: None,
            })
            .await
            .expect("order");
        let pizza = harness
            .state
            .orders
            .create_menu_item(
                &agent.id,
                NewMenuItem {
                    number: Some(1),
                    name: "Margherita".into(),
                    description: None,
                    category: Some("Pizza".into()),
                    price: Decimal::new(1150, 2),
                    allergens: vec!["gluten".into()],
                    available: true,
                    is_popular: true,
                },
            )
            .await
            .expect("menu item");
        harness.state.orders.add_item(&order.id, &pizza, 2, None).await.expect("item");

        let Json(detail) =
            get_order(Path(order.id.0.clone()), State(harness.state.clone()), owner.clone())
                .await
                .expect("detail");
        assert_eq!(detail.items.len(), 1);
        assert_eq!(detail.order.total_price, Decimal::new(2300, 2));

        let Json(updated) = update_status(
            Path(order.id.0.clone()),
            State(harness.state.clone()),
            owner.clone(),
            Json(StatusUpdate { status: "ready".into() }),
        )
        .await
        .expect("status");
        assert_eq!(updated.status, OrderStatus::Ready);

        let Json(ready) = list_orders(
            Path(agent.id.0.clone()),
            Query(OrderListQuery { status: Some("ready".into()), ..OrderListQuery::default() }),
            State(harness.state.clone()),
            owner.clone(),
        )
        .await
        .expect("filtered");
        assert_eq!(ready.len(), 1);

        let error = list_orders(
            Path(agent.id.0.clone()),
            Query(OrderListQuery { status: Some("shipped".into()), ..OrderListQuery::default() }),
            State(harness.state.clone()),
            owner.clone(),
        )
        .await
        .expect_err("unknown status");
        assert_eq!(error.status, StatusCode::BAD_REQUEST);

        let error = get_order(Path(order.id.0.clone()), State(harness.state.clone()), stranger)
            .await
            .expect_err("stranger");
        assert_eq!(error.status, StatusCode::NOT_FOUND);
    }

    fn order_request(body: serde_json::Value) -> CreateOrderRequest {
        serde_json::from_value(body).expect("order request")
    }

    #[tokio::test]
    async fn hand_entered_order_keeps_its_total_in_step_with_the_lines() {
        let harness = harness(Vec::new()).await;
        let owner = harness.user("owner@example.com").await;
        let agent = harness.agent(&owner.0).await;

        let (code, Json(created)) = create_order(
            Path(agent.id.0.clone()),
            State(harness.state.clone()),
            owner.clone(),
            Json(order_request(serde_json::json!({
                "customer_name": "Robin",
                "customer_phone": "+15550177",
                "order_items": [
                    {"name": "Margherita", "quantity": 2, "price": "11.50"},
                    {"name": "Lemonade", "quantity": 1, "price": "3.25", "note": "no ice"}
                ]
            }))),
        )
        .await
        .expect("create");
        assert_eq!(code, StatusCode::CREATED);
        assert_eq!(created.order.status, OrderStatus::New);
        assert_eq!(created.order.total_price, Decimal::new(2625, 2));
        assert_eq!(created.items.len(), 2);

        let lemonade = created.items.iter().find(|item| item.name == "Lemonade").expect("lemonade");
        let pizza = created.items.iter().find(|item| item.name == "Margherita").expect("pizza");

        let Json(changed) = update_order_item(
            Path(lemonade.id.clone()),
            State(harness.state.clone()),
            owner.clone(),
            Json(OrderItemPatch { quantity: Some(3), ..OrderItemPatch::default() }),
        )
        .await
        .expect("edit line");
        assert_eq!(changed.order_total, Decimal::new(3275, 2));

        let code = delete_order_item(Path(pizza.id.clone()), State(harness.state.clone()), owner.clone())
            .await
            .expect("delete line");
        assert_eq!(code, StatusCode::NO_CONTENT);

        let Json(detail) =
            get_order(Path(created.order.id.0.clone()), State(harness.state.clone()), owner.clone())
                .await
                .expect("detail");
        assert_eq!(detail.items.len(), 1);
        assert_eq!(detail.order.total_price, Decimal::new(975, 2));

        let error = delete_order_item(Path(pizza.id.clone()), State(harness.state.clone()), owner.clone())
            .await
            .expect_err("already removed");
        assert_eq!(error.status, StatusCode::NOT_FOUND);

        let Json(renamed) = update_order(
            Path(created.order.id.0.clone()),
            State(harness.state.clone()),
            owner.clone(),
            Json(UpdateOrderRequest {
                customer_name: Some("Robin Lee".into()),
                status: Some("in_progress".into()),
                ..UpdateOrderRequest::default()
            }),
        )
        .await
        .expect("update order");
        assert_eq!(renamed.order.customer_name.as_deref(), Some("Robin Lee"));
        assert_eq!(renamed.order.status, OrderStatus::InProgress);
        assert_eq!(renamed.order.total_price, Decimal::new(975, 2));
    }

    #[tokio::test]
    async fn hand_entered_orders_are_validated_and_gated() {
        let harness = harness(Vec::new()).await;
        let owner = harness.user("owner@example.com").await;
        let stranger = harness.user("stranger@example.com").await;
        let agent = harness.agent(&owner.0).await;

        let error = create_order(
            Path(agent.id.0.clone()),
            State(harness.state.clone()),
            owner.clone(),
            Json(order_request(serde_json::json!({"customer_name": "Robin"}))),
        )
        .await
        .expect_err("no items");
        assert_eq!(error.status, StatusCode::BAD_REQUEST);

        let error = create_order(
            Path(agent.id.0.clone()),
            State(harness.state.clone()),
            owner.clone(),
            Json(order_request(serde_json::json!({
                "order_items": [{"name": "Soda", "quantity": 0, "price": "2.00"}]
            }))),
        )
        .await
        .expect_err("zero quantity");
        assert_eq!(error.status, StatusCode::BAD_REQUEST);

        let error = create_order(
            Path(agent.id.0.clone()),
            State(harness.state.clone()),
            owner.clone(),
            Json(order_request(serde_json::json!({
                "conversation_id": "elsewhere",
                "order_items": [{"name": "Soda", "quantity": 1, "price": "2.00"}]
            }))),
        )
        .await
        .expect_err("unknown conversation");
        assert_eq!(error.status, StatusCode::BAD_REQUEST);

        let error = create_order(
            Path(agent.id.0.clone()),
            State(harness.state.clone()),
            stranger,
            Json(order_request(serde_json::json!({
                "order_items": [{"name": "Soda", "quantity": 1, "price": "2.00"}]
            }))),
        )
        .await
        .expect_err("stranger");
        assert_eq!(error.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listing_defaults_to_orders_created_today() {
        let harness = harness(Vec::new()).await;
        let owner = harness.user("owner@example.com").await;
        let agent = harness.agent(&owner.0).await;
        harness
            .state
            .orders
            .create_order(NewOrder {
                agent_id: agent.id.clone(),
                conversation_id: None,
                customer_phone: None,
                customer_name: Some("Kai".into()),
                pickup_time: None,
                special_requests: None,
            })
            .await
            .expect("order");

        let Json(today) = list_orders(
            Path(agent.id.0.clone()),
            Query(OrderListQuery::default()),
            State(harness.state.clone()),
            owner.clone(),
        )
        .await
        .expect("today");
        assert_eq!(today.len(), 1);

        let last_week = Utc::now().date_naive().checked_sub_days(Days::new(7)).expect("date");
        let Json(earlier) = list_orders(
            Path(agent.id.0.clone()),
            Query(OrderListQuery {
                start_date: Some(last_week),
                end_date: Some(last_week),
                ..OrderListQuery::default()
            }),
            State(harness.state.clone()),
            owner.clone(),
        )
        .await
        .expect("last week");
        assert!(earlier.is_empty());

        let error = list_orders(
            Path(agent.id.0.clone()),
            Query(OrderListQuery {
                start_date: Some(Utc::now().date_naive()),
                end_date: Some(last_week),
                ..OrderListQuery::default()
            }),
            State(harness.state.clone()),
            owner,
        )
        .await
        .expect_err("reversed window");
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
    }
}
