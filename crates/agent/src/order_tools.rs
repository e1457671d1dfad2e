use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{error, info};

use rollwise_core::domain::agent::Agent;
use rollwise_core::domain::order::{MenuItemId, NewOrder, OrderId};
use rollwise_core::errors::DomainError;
use rollwise_db::repositories::{AgentRepository, OrderRepository};

use crate::tools::{failure, optional_str, required_str, Tool, ToolContext, ToolDefinition};

pub fn ensure_ordering_enabled(agent: &Agent) -> Result<(), DomainError> {
    if agent.ordering_enabled {
        Ok(())
    } else {
        Err(DomainError::OrderingDisabled)
    }
}

/// Starts an order for the caller of the current conversation.
pub struct CreateOrderTool {
    agents: Arc<dyn AgentRepository>,
    orders: Arc<dyn OrderRepository>,
}

impl CreateOrderTool {
    pub fn new(agents: Arc<dyn AgentRepository>, orders: Arc<dyn OrderRepository>) -> Self {
        Self { agents, orders }
    }
}

#[async_trait]
impl Tool for CreateOrderTool {
    fn name(&self) -> &'static str {
        "create_order"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "Start a new order for the current caller. Use the returned order_id with add_order_item.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "customer_name": {"type": "string", "description": "Name the order is for"},
                    "pickup_time": {"type": "string", "description": "Requested pickup time as said by the caller"},
                    "special_requests": {"type": "string", "description": "Notes for the whole order"}
                },
                "required": []
            }),
        }
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<Value> {
        let Some(agent) = self.agents.find_active(&ctx.agent_id).await? else {
            return Ok(failure(DomainError::AgentNotFound.to_string()));
        };
        if let Err(error) = ensure_ordering_enabled(&agent) {
            return Ok(failure(error.to_string()));
        }

        let order = self
            .orders
            .create_order(NewOrder {
                agent_id: agent.id.clone(),
                conversation_id: ctx.conversation_id.clone(),
                customer_phone: ctx.caller_phone.clone(),
                customer_name: optional_str(&input, "customer_name"),
                pickup_time: optional_str(&input, "pickup_time"),
                special_requests: optional_str(&input, "special_requests"),
            })
            .await?;

        info!(event_name = "order.created", agent_id = %agent.id.0, order_id = %order.id.0);
        Ok(json!({
            "success": true,
            "order_id": order.id,
            "status": order.status.as_str(),
            "message": format!("Created order {}", order.id.0),
        }))
    }
}

/// Lists what can be ordered right now.
pub struct ListMenuItemsTool {
    orders: Arc<dyn OrderRepository>,
}

impl ListMenuItemsTool {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl Tool for ListMenuItemsTool {
    fn name(&self) -> &'static str {
        "list_menu_items"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "List the menu items that are currently available, with their IDs and prices.".to_string(),
            parameters: json!({ "type": "object", "properties": {}, "required": [] }),
        }
    }

    async fn execute(&self, ctx: &ToolContext, _input: Value) -> Result<Value> {
        let items: Vec<Value> = self
            .orders
            .list_menu(&ctx.agent_id)
            .await?
            .into_iter()
            .filter(|item| item.orderable())
            .map(|item| {
                json!({
                    "menu_item_id": item.id,
                    "number": item.number,
                    "name": item.name,
                    "category": item.category,
                    "description": item.description,
                    "price": item.price,
                    "allergens": item.allergens,
                })
            })
            .collect();
        Ok(json!({ "success": true, "total_items": items.len(), "items": items }))
    }
}

/// Links an existing menu item to an existing order.
pub struct AddOrderItemTool {
    orders: Arc<dyn OrderRepository>,
}

impl AddOrderItemTool {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl Tool for AddOrderItemTool {
    fn name(&self) -> &'static str {
        "add_order_item"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "Attach an existing menu item to an existing order. The order and menu item already exist at this point, so this action only needs to link them together with a quantity.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "order_id": {"type": "string", "description": "The unique ID of the order that the item should be added to."},
                    "menu_item_id": {"type": "string", "description": "The unique ID of the menu item being added. This must match an existing menu item."},
                    "quantity": {"type": "integer", "description": "How many units of this menu item to add to the order.", "minimum": 1},
                    "note": {"type": "string", "description": "Preparation note for this line (optional)"}
                },
                "required": ["order_id", "menu_item_id", "quantity"]
            }),
        }
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<Value> {
        let (order_id, menu_item_id) =
            match (required_str(&input, "order_id"), required_str(&input, "menu_item_id")) {
                (Ok(order_id), Ok(menu_item_id)) => {
                    (OrderId(order_id.to_string()), MenuItemId(menu_item_id.to_string()))
                }
                _ => return Ok(failure("order_id, menu_item_id, and quantity are required")),
            };
        let Some(quantity) = input.get("quantity").and_then(Value::as_i64) else {
            return Ok(failure("order_id, menu_item_id, and quantity are required"));
        };
        let quantity = match u32::try_from(quantity) {
            Ok(quantity) if quantity >= 1 => quantity,
            _ => return Ok(failure("Quantity must be at least 1")),
        };

        let order = self.orders.find_order(&order_id).await?;
        if !order.is_some_and(|order| order.agent_id == ctx.agent_id) {
            return Ok(failure(format!("Order with ID {} not found", order_id.0)));
        }
        let menu_item = self
            .orders
            .find_available_menu_item(&menu_item_id)
            .await?
            .filter(|item| item.agent_id == ctx.agent_id);
        let Some(menu_item) = menu_item else {
            return Ok(failure(format!(
                "Menu item with ID {} not found or unavailable",
                menu_item_id.0
            )));
        };

        let note = optional_str(&input, "note");
        let added = match self.orders.add_item(&order_id, &menu_item, quantity, note.as_deref()).await {
            Ok(added) => added,
            Err(error) => {
                error!(event_name = "order.add_item_failed", order_id = %order_id.0, error = %error);
                return Ok(failure(format!("Failed to add order item: {error}")));
            }
        };

        info!(
            event_name = "order.item_added",
            order_id = %order_id.0,
            menu_item_id = %menu_item.id.0,
            quantity,
            order_total = %added.order_total
        );
        Ok(json!({
            "success": true,
            "order_item_id": added.item.id,
            "order_id": order_id,
            "item_name": menu_item.name,
            "quantity": quantity,
            "unit_price": menu_item.price,
            "item_total": added.item.line_total(),
            "order_total": added.order_total,
            "message": format!("Added {quantity}x {} to order {}", menu_item.name, order_id.0),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal::Decimal;
    use serde_json::json;

    use rollwise_core::domain::agent::{AgentId, NewAgent};
    use rollwise_core::domain::conversation::ConversationId;
    use rollwise_core::domain::order::{NewMenuItem, OrderId};
    use rollwise_db::repositories::{
        AgentRepository, OrderRepository, SqlAgentRepository, SqlOrderRepository,
        SqlUserRepository, UserRepository,
    };
    use rollwise_db::{connect_with_settings, migrations};

    use super::{AddOrderItemTool, CreateOrderTool, ListMenuItemsTool};
    use crate::tools::{Tool, ToolContext};

    struct Fixture {
        agents: Arc<SqlAgentRepository>,
        orders: Arc<SqlOrderRepository>,
        agent_id: AgentId,
    }

    async fn fixture(ordering_enabled: bool) -> Fixture {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let owner = SqlUserRepository::new(pool.clone())
            .upsert_by_email("owner@example.com", "Owner", None)
            .await
            .expect("owner");
        let mut agent = NewAgent::with_defaults("Pizzeria", None, None, "owner@example.com")
            .into_agent(AgentId("agent-1".into()), Utc::now());
        agent.ordering_enabled = ordering_enabled;
        let agents = Arc::new(SqlAgentRepository::new(pool.clone()));
        agents.create(&agent, &owner.id).await.expect("agent");
        Fixture { agents, orders: Arc::new(SqlOrderRepository::new(pool)), agent_id: agent.id }
    }

    fn item(name: &str, cents: i64, available: bool) -> NewMenuItem {
        NewMenuItem {
            number: None,
            name: name.into(),
            description: None,
            category: None,
            price: Decimal::new(cents, 2),
            allergens: Vec::new(),
            available,
            is_popular: false,
        }
    }

    #[tokio::test]
    async fn create_order_then_add_items() {
        let fx = fixture(true).await;
        let ctx = ToolContext::new(fx.agent_id.clone())
            .with_caller(Some("+15550100".into()))
            .with_conversation(ConversationId("conv-1".into()));
        let pizza =
            fx.orders.create_menu_item(&fx.agent_id, item("Margherita", 1250, true)).await.expect("item");

        let created = CreateOrderTool::new(fx.agents.clone(), fx.orders.clone())
            .execute(&ToolContext { conversation_id: None, ..ctx.clone() }, json!({"customer_name": "Ada"}))
            .await
            .expect("create");
        assert_eq!(created["success"], true);
        let order_id = created["order_id"].as_str().expect("order id").to_string();
        let order = fx.orders.find_order(&OrderId(order_id.clone())).await.expect("find").expect("order");
        assert_eq!(order.customer_phone.as_deref(), Some("+15550100"));

        let added = AddOrderItemTool::new(fx.orders.clone())
            .execute(&ctx, json!({"order_id": order_id, "menu_item_id": pizza.id.0, "quantity": 2}))
            .await
            .expect("add");
        assert_eq!(added["success"], true);
        assert_eq!(added["item_total"], json!("25.00"));
        assert_eq!(added["order_total"], json!("25.00"));
        assert_eq!(added["message"], format!("Added 2x Margherita to order {order_id}"));
    }

    #[tokio::test]
    async fn add_item_validates_quantity_order_and_menu_item() {
        let fx = fixture(true).await;
        let ctx = ToolContext::new(fx.agent_id.clone());
        let tool = AddOrderItemTool::new(fx.orders.clone());
        let soldout =
            fx.orders.create_menu_item(&fx.agent_id, item("Calzone", 1500, false)).await.expect("item");
        let created = CreateOrderTool::new(fx.agents.clone(), fx.orders.clone())
            .execute(&ctx, json!({}))
            .await
            .expect("create");
        let order_id = created["order_id"].as_str().expect("order id").to_string();

        let zero = tool
            .execute(&ctx, json!({"order_id": order_id, "menu_item_id": soldout.id.0, "quantity": 0}))
            .await
            .expect("zero");
        assert_eq!(zero["error"], "Quantity must be at least 1");

        let missing = tool
            .execute(&ctx, json!({"order_id": "ord-404", "menu_item_id": soldout.id.0, "quantity": 1}))
            .await
            .expect("missing order");
        assert_eq!(missing["error"], "Order with ID ord-404 not found");

        let unavailable = tool
            .execute(&ctx, json!({"order_id": order_id, "menu_item_id": soldout.id.0, "quantity": 1}))
            .await
            .expect("unavailable");
        assert_eq!(
            unavailable["error"],
            format!("Menu item with ID {} not found or unavailable", soldout.id.0)
        );

        let menu = ListMenuItemsTool::new(fx.orders.clone()).execute(&ctx, json!({})).await.expect("menu");
        assert_eq!(menu["total_items"], 0);
    }

    #[tokio::test]
    async fn ordering_gate_blocks_new_orders() {
        let fx = fixture(false).await;
        let result = CreateOrderTool::new(fx.agents.clone(), fx.orders.clone())
            .execute(&ToolContext::new(fx.agent_id.clone()), json!({}))
            .await
            .expect("result");
        assert_eq!(result, json!({"success": false, "error": "Ordering is disabled for this agent"}));
    }
}
