use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use rollwise_core::domain::agent::AgentId;
use rollwise_core::domain::conversation::ConversationId;
use rollwise_core::domain::new_id;
use rollwise_core::domain::order::{
    MenuItem, MenuItemId, MenuItemPatch, NewMenuItem, NewOrder, NewOrderLine, Order, OrderFilter,
    OrderId, OrderItem, OrderItemPatch, OrderPatch, OrderStatus,
};

use super::{
    column, decode_decimal, decode_json, decode_timestamp, encode_json, encode_timestamp,
    parse_column, AddedItem, OrderRepository, RepositoryError,
};
use crate::DbPool;

const ORDER_COLUMNS: &str = "id, agent_id, conversation_id, customer_phone, customer_name, status,
    total_price, pickup_time, special_requests, payment_status, payment_method, created_at,
    updated_at";

const MENU_COLUMNS: &str = "id, agent_id, number, name, description, category, price,
    allergens_json, available, is_popular, active";

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_order(row: &SqliteRow) -> Result<Order, RepositoryError> {
    let total: String = column(row, "total_price")?;
    let created_at: String = column(row, "created_at")?;
    let updated_at: String = column(row, "updated_at")?;
    let conversation_id: Option<String> = column(row, "conversation_id")?;
    Ok(Order {
        id: OrderId(column(row, "id")?),
        agent_id: AgentId(column(row, "agent_id")?),
        conversation_id: conversation_id.map(ConversationId),
        customer_phone: column(row, "customer_phone")?,
        customer_name: column(row, "customer_name")?,
        status: parse_column(row, "status")?,
        total_price: decode_decimal(&total, "total_price")?,
        pickup_time: column(row, "pickup_time")?,
        special_requests: column(row, "special_requests")?,
        payment_status: parse_column(row, "payment_status")?,
        payment_method: column(row, "payment_method")?,
        created_at: decode_timestamp(&created_at)?,
        updated_at: decode_timestamp(&updated_at)?,
    })
}

fn row_to_item(row: &SqliteRow) -> Result<OrderItem, RepositoryError> {
    let price: String = column(row, "price")?;
    let quantity: i64 = column(row, "quantity")?;
    Ok(OrderItem {
        id: column(row, "id")?,
        order_id: OrderId(column(row, "order_id")?),
        name: column(row, "name")?,
        quantity: u32::try_from(quantity)
            .map_err(|_| RepositoryError::Decode(format!("quantity out of range: {quantity}")))?,
        price: decode_decimal(&price, "price")?,
        note: column(row, "note")?,
    })
}

const ITEM_COLUMNS: &str = "id, order_id, name, quantity, price, note";

/// Sums the order's lines and stores the result on the order row.
async fn recompute_total(
    conn: &mut SqliteConnection,
    order_id: &str,
    now: &str,
) -> Result<Decimal, RepositoryError> {
    let rows = sqlx::query("SELECT quantity, price FROM order_items WHERE order_id = ?")
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;
    let mut total = Decimal::ZERO;
    for row in &rows {
        let quantity: i64 = column(row, "quantity")?;
        let price: String = column(row, "price")?;
        total += decode_decimal(&price, "price")? * Decimal::from(quantity);
    }

    sqlx::query("UPDATE orders SET total_price = ?, updated_at = ? WHERE id = ?")
        .bind(total.to_string())
        .bind(now)
        .bind(order_id)
        .execute(&mut *conn)
        .await?;
    Ok(total)
}

async fn write_menu_item(conn: &mut SqliteConnection, item: &MenuItem) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE menu_items SET number = ?, name = ?, description = ?, category = ?, price = ?,
                               allergens_json = ?, available = ?, is_popular = ?,
                               updated_at = ?
         WHERE id = ?",
    )
    .bind(item.number)
    .bind(&item.name)
    .bind(&item.description)
    .bind(&item.category)
    .bind(item.price.to_string())
    .bind(encode_json(&item.allergens)?)
    .bind(item.available)
    .bind(item.is_popular)
    .bind(encode_timestamp(&Utc::now()))
    .bind(&item.id.0)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn row_to_menu_item(row: &SqliteRow) -> Result<MenuItem, RepositoryError> {
    let price: String = column(row, "price")?;
    let allergens: String = column(row, "allergens_json")?;
    Ok(MenuItem {
        id: MenuItemId(column(row, "id")?),
        agent_id: AgentId(column(row, "agent_id")?),
        number: column(row, "number")?,
        name: column(row, "name")?,
        description: column(row, "description")?,
        category: column(row, "category")?,
        price: decode_decimal(&price, "price")?,
        allergens: decode_json(&allergens, "allergens_json")?,
        available: column(row, "available")?,
        is_popular: column(row, "is_popular")?,
        active: column(row, "active")?,
    })
}

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn create_order(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        let id = OrderId(new_id());
        let now = encode_timestamp(&Utc::now());
        sqlx::query(
            "INSERT INTO orders (id, agent_id, conversation_id, customer_phone, customer_name,
                                 status, total_price, pickup_time, special_requests,
                                 payment_status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 'new', '0', ?, ?, 'unpaid', ?, ?)",
        )
        .bind(&id.0)
        .bind(&order.agent_id.0)
        .bind(order.conversation_id.as_ref().map(|conversation| conversation.0.as_str()))
        .bind(&order.customer_phone)
        .bind(&order.customer_name)
        .bind(&order.pickup_time)
        .bind(&order.special_requests)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.find_order(&id)
            .await?
            .ok_or_else(|| RepositoryError::Decode(format!("order `{}` missing after insert", id.0)))
    }

    async fn create_order_with_items(
        &self,
        order: NewOrder,
        status: OrderStatus,
        lines: &[NewOrderLine],
    ) -> Result<Order, RepositoryError> {
        let id = OrderId(new_id());
        let now = encode_timestamp(&Utc::now());
        let total: Decimal = lines.iter().map(|line| line.price * Decimal::from(line.quantity)).sum();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO orders (id, agent_id, conversation_id, customer_phone, customer_name,
                                 status, total_price, pickup_time, special_requests,
                                 payment_status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'unpaid', ?, ?)",
        )
        .bind(&id.0)
        .bind(&order.agent_id.0)
        .bind(order.conversation_id.as_ref().map(|conversation| conversation.0.as_str()))
        .bind(&order.customer_phone)
        .bind(&order.customer_name)
        .bind(status.as_str())
        .bind(total.to_string())
        .bind(&order.pickup_time)
        .bind(&order.special_requests)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        for line in lines {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, menu_item_id, name, quantity, price, note,
                                          created_at)
                 VALUES (?, ?, NULL, ?, ?, ?, ?, ?)",
            )
            .bind(new_id())
            .bind(&id.0)
            .bind(line.name.trim())
            .bind(i64::from(line.quantity))
            .bind(line.price.to_string())
            .bind(&line.note)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.find_order(&id)
            .await?
            .ok_or_else(|| RepositoryError::Decode(format!("order `{}` missing after insert", id.0)))
    }

    async fn find_order(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn list_items(&self, order_id: &OrderId) -> Result<Vec<OrderItem>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM order_items
             WHERE order_id = ? ORDER BY created_at ASC, id ASC"
        ))
        .bind(&order_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_item).collect()
    }

    async fn recent_orders_for_customer(
        &self,
        agent_id: &AgentId,
        customer_phone: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE agent_id = ? AND customer_phone = ? AND created_at >= ?
             ORDER BY created_at DESC
             LIMIT ?"
        ))
        .bind(&agent_id.0)
        .bind(customer_phone)
        .bind(encode_timestamp(&since))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_order).collect()
    }

    async fn list_for_agent(
        &self,
        agent_id: &AgentId,
        filter: &OrderFilter,
    ) -> Result<Vec<Order>, RepositoryError> {
        let status = filter.status.map(|status| status.as_str());
        let created_from = filter.created_from.as_ref().map(encode_timestamp);
        let created_before = filter.created_before.as_ref().map(encode_timestamp);
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE agent_id = ?
               AND (? IS NULL OR status = ?)
               AND (? IS NULL OR created_at >= ?)
               AND (? IS NULL OR created_at < ?)
             ORDER BY created_at DESC"
        ))
        .bind(&agent_id.0)
        .bind(status)
        .bind(status)
        .bind(&created_from)
        .bind(&created_from)
        .bind(&created_before)
        .bind(&created_before)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_order).collect()
    }

    async fn update_order(
        &self,
        id: &OrderId,
        patch: OrderPatch,
    ) -> Result<Option<Order>, RepositoryError> {
        let Some(mut order) = self.find_order(id).await? else {
            return Ok(None);
        };
        patch.apply_to(&mut order);

        sqlx::query(
            "UPDATE orders SET customer_name = ?, customer_phone = ?, pickup_time = ?,
                               special_requests = ?, status = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&order.customer_name)
        .bind(&order.customer_phone)
        .bind(&order.pickup_time)
        .bind(&order.special_requests)
        .bind(order.status.as_str())
        .bind(encode_timestamp(&Utc::now()))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;
        self.find_order(id).await
    }

    async fn update_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
    ) -> Result<Option<Order>, RepositoryError> {
        let result = sqlx::query("UPDATE orders SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(encode_timestamp(&Utc::now()))
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_order(id).await
    }

    async fn add_item(
        &self,
        order_id: &OrderId,
        menu_item: &MenuItem,
        quantity: u32,
        note: Option<&str>,
    ) -> Result<AddedItem, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let total: Option<String> = sqlx::query_scalar("SELECT total_price FROM orders WHERE id = ?")
            .bind(&order_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let total = total
            .ok_or_else(|| RepositoryError::Decode(format!("order `{}` not found", order_id.0)))?;
        let current_total = decode_decimal(&total, "total_price")?;

        let item = OrderItem {
            id: new_id(),
            order_id: order_id.clone(),
            name: menu_item.name.clone(),
            quantity,
            price: menu_item.price,
            note: note.map(str::to_string),
        };
        let order_total: Decimal = current_total + item.line_total();
        let now = encode_timestamp(&Utc::now());

        sqlx::query(
            "INSERT INTO order_items (id, order_id, menu_item_id, name, quantity, price, note,
                                      created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.id)
        .bind(&order_id.0)
        .bind(&menu_item.id.0)
        .bind(&item.name)
        .bind(i64::from(quantity))
        .bind(item.price.to_string())
        .bind(&item.note)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE orders SET total_price = ?, updated_at = ? WHERE id = ?")
            .bind(order_total.to_string())
            .bind(&now)
            .bind(&order_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(AddedItem { item, order_total })
    }

    async fn find_item(&self, item_id: &str) -> Result<Option<OrderItem>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM order_items WHERE id = ?"))
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn update_item(
        &self,
        item_id: &str,
        patch: OrderItemPatch,
    ) -> Result<Option<AddedItem>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM order_items WHERE id = ?"))
            .bind(item_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut item = row_to_item(&row)?;
        patch.apply_to(&mut item);

        sqlx::query("UPDATE order_items SET name = ?, quantity = ?, price = ?, note = ? WHERE id = ?")
            .bind(&item.name)
            .bind(i64::from(item.quantity))
            .bind(item.price.to_string())
            .bind(&item.note)
            .bind(item_id)
            .execute(&mut *tx)
            .await?;
        let now = encode_timestamp(&Utc::now());
        let order_total = recompute_total(&mut *tx, &item.order_id.0, &now).await?;

        tx.commit().await?;
        Ok(Some(AddedItem { item, order_total }))
    }

    async fn delete_item(&self, item_id: &str) -> Result<Option<Decimal>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let order_id: Option<String> =
            sqlx::query_scalar("SELECT order_id FROM order_items WHERE id = ?")
                .bind(item_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(order_id) = order_id else {
            return Ok(None);
        };

        sqlx::query("DELETE FROM order_items WHERE id = ?").bind(item_id).execute(&mut *tx).await?;
        let now = encode_timestamp(&Utc::now());
        let order_total = recompute_total(&mut *tx, &order_id, &now).await?;

        tx.commit().await?;
        Ok(Some(order_total))
    }

    async fn create_menu_item(
        &self,
        agent_id: &AgentId,
        item: NewMenuItem,
    ) -> Result<MenuItem, RepositoryError> {
        let id = MenuItemId(new_id());
        let now = encode_timestamp(&Utc::now());
        sqlx::query(
            "INSERT INTO menu_items (id, agent_id, number, name, description, category, price,
                                     allergens_json, available, is_popular, active, created_at,
                                     updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(&id.0)
        .bind(&agent_id.0)
        .bind(item.number)
        .bind(item.name.trim())
        .bind(&item.description)
        .bind(&item.category)
        .bind(item.price.to_string())
        .bind(encode_json(&item.allergens)?)
        .bind(item.available)
        .bind(item.is_popular)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.find_menu_item(&id).await?.ok_or_else(|| {
            RepositoryError::Decode(format!("menu item `{}` missing after insert", id.0))
        })
    }

    async fn list_menu(&self, agent_id: &AgentId) -> Result<Vec<MenuItem>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {MENU_COLUMNS} FROM menu_items
             WHERE agent_id = ? AND active = 1
             ORDER BY number IS NULL, number ASC, name ASC"
        ))
        .bind(&agent_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_menu_item).collect()
    }

    async fn find_menu_item(&self, id: &MenuItemId) -> Result<Option<MenuItem>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {MENU_COLUMNS} FROM menu_items WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_menu_item).transpose()
    }

    async fn find_available_menu_item(
        &self,
        id: &MenuItemId,
    ) -> Result<Option<MenuItem>, RepositoryError> {
        Ok(self.find_menu_item(id).await?.filter(MenuItem::orderable))
    }

    async fn update_menu_item(
        &self,
        id: &MenuItemId,
        patch: MenuItemPatch,
    ) -> Result<Option<MenuItem>, RepositoryError> {
        let Some(mut item) = self.find_menu_item(id).await?.filter(|item| item.active) else {
            return Ok(None);
        };
        patch.apply_to(&mut item);

        let mut conn = self.pool.acquire().await?;
        write_menu_item(&mut *conn, &item).await?;
        Ok(Some(item))
    }

    async fn delete_menu_item(&self, id: &MenuItemId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE menu_items SET active = 0, updated_at = ? WHERE id = ? AND active = 1",
        )
        .bind(encode_timestamp(&Utc::now()))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn toggle_menu_item_availability(
        &self,
        id: &MenuItemId,
    ) -> Result<Option<MenuItem>, RepositoryError> {
        let result = sqlx::query(
            "UPDATE menu_items SET available = NOT available, updated_at = ?
             WHERE id = ? AND active = 1",
        )
        .bind(encode_timestamp(&Utc::now()))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_menu_item(id).await
    }

    async fn bulk_update_menu_items(
        &self,
        agent_id: &AgentId,
        ids: &[MenuItemId],
        patch: MenuItemPatch,
    ) -> Result<Option<Vec<MenuItem>>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query(&format!(
                "SELECT {MENU_COLUMNS} FROM menu_items WHERE id = ? AND agent_id = ? AND active = 1"
            ))
            .bind(&id.0)
            .bind(&agent_id.0)
            .fetch_optional(&mut *tx)
            .await?;
            let Some(row) = row else {
                return Ok(None);
            };
            let mut item = row_to_menu_item(&row)?;
            patch.clone().apply_to(&mut item);
            write_menu_item(&mut *tx, &item).await?;
            updated.push(item);
        }
        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn menu_categories(&self, agent_id: &AgentId) -> Result<Vec<String>, RepositoryError> {
        Ok(sqlx::query_scalar(
            "SELECT DISTINCT category FROM menu_items
             WHERE agent_id = ? AND active = 1 AND category IS NOT NULL AND TRIM(category) <> ''
             ORDER BY category ASC",
        )
        .bind(&agent_id.0)
        .fetch_all(&self.pool)
        .await?)
    }
}
