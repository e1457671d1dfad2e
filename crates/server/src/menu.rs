//! Menu management.
//!
//! Routes:
//! - `GET    /api/v1/agents/{id}/menu-items`             - active menu items
//! - `POST   /api/v1/agents/{id}/menu-items`             - add an item (owner/editor)
//! - `POST   /api/v1/agents/{id}/menu-items/bulk-update` - one patch over many items (owner/editor)
//! - `GET    /api/v1/agents/{id}/menu/categories`        - distinct categories
//! - `POST   /api/v1/agents/{id}/menu/upload-csv`        - import a CSV body (owner/editor)
//! - `GET    /api/v1/agents/{id}/menu/download-csv`      - export, with optional filters
//! - `GET    /api/v1/agents/{id}/menu/csv-template`      - example file for imports
//! - `GET    /api/v1/menu-items/{id}`                    - one active item
//! - `PUT    /api/v1/menu-items/{id}`                    - partial update (owner/editor)
//! - `DELETE /api/v1/menu-items/{id}`                    - retire an item (owner/editor)
//! - `PUT    /api/v1/menu-items/{id}/toggle-availability` - flip `available` (owner/editor)

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use rollwise_core::domain::order::{MenuItem, MenuItemId, MenuItemPatch, NewMenuItem};
use rollwise_core::domain::user::User;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::access::{agent_access, AgentAccess};
use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::menu_csv::{self, MenuCsvError};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub message: String,
    pub menu_item_id: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkUpdateRequest {
    pub item_ids: Vec<String>,
    pub updates: MenuItemPatch,
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadOptions {
    #[serde(default)]
    pub skip_errors: bool,
}

#[derive(Debug, Serialize)]
pub struct UploadReport {
    pub success: bool,
    pub total_processed: usize,
    pub items_created: usize,
    pub errors_count: usize,
    pub created_items: Vec<MenuItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportFilter {
    pub category: Option<String>,
    pub available: Option<bool>,
    pub is_popular: Option<bool>,
    pub search: Option<String>,
}

impl ExportFilter {
    fn matches(&self, item: &MenuItem) -> bool {
        let category = self.category.as_deref().map(str::trim).filter(|value| !value.is_empty());
        if let Some(category) = category {
            let same = item.category.as_deref().is_some_and(|own| own.eq_ignore_ascii_case(category));
            if !same {
                return false;
            }
        }
        if self.available.is_some_and(|available| available != item.available) {
            return false;
        }
        if self.is_popular.is_some_and(|popular| popular != item.is_popular) {
            return false;
        }
        match self.search.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
            Some(needle) => {
                let needle = needle.to_lowercase();
                item.name.to_lowercase().contains(&needle)
                    || item.description.as_deref().is_some_and(|text| text.to_lowercase().contains(&needle))
            }
            None => true,
        }
    }
}

/// A CSV attachment.
#[derive(Debug)]
pub struct CsvFile {
    pub filename: String,
    pub body: String,
}

impl IntoResponse for CsvFile {
    fn into_response(self) -> Response {
        let disposition = format!("attachment; filename={}", self.filename);
        (
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            self.body,
        )
            .into_response()
    }
}

impl From<MenuCsvError> for ApiError {
    fn from(error: MenuCsvError) -> Self {
        match error {
            MenuCsvError::Write(_) => ApiError::internal(error.to_string()),
            MenuCsvError::MissingColumns(_) | MenuCsvError::Malformed(_) => {
                ApiError::bad_request(error.to_string())
            }
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/agents/{id}/menu-items", get(list_menu_items).post(create_menu_item))
        .route("/api/v1/agents/{id}/menu-items/bulk-update", post(bulk_update_menu_items))
        .route("/api/v1/agents/{id}/menu/categories", get(list_categories))
        .route("/api/v1/agents/{id}/menu/upload-csv", post(upload_menu_csv))
        .route("/api/v1/agents/{id}/menu/download-csv", get(download_menu_csv))
        .route("/api/v1/agents/{id}/menu/csv-template", get(menu_csv_template))
        .route(
            "/api/v1/menu-items/{id}",
            get(get_menu_item).put(update_menu_item).delete(delete_menu_item),
        )
        .route("/api/v1/menu-items/{id}/toggle-availability", put(toggle_availability))
}

pub async fn list_menu_items(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<MenuItem>>, ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    Ok(Json(state.orders.list_menu(&access.agent.id).await?))
}

pub async fn create_menu_item(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<NewMenuItem>,
) -> Result<Json<MenuItem>, ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    access.require_editor()?;
    body.validate()?;

    let item = state.orders.create_menu_item(&access.agent.id, body).await?;
    info!(
        event_name = "menu.item_created",
        agent_id = %access.agent.id.0,
        menu_item_id = %item.id.0,
        "menu item created"
    );
    Ok(Json(item))
}

pub async fn bulk_update_menu_items(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<BulkUpdateRequest>,
) -> Result<Json<Vec<MenuItem>>, ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    access.require_editor()?;
    if body.item_ids.is_empty() {
        return Err(ApiError::bad_request("item_ids must not be empty"));
    }
    body.updates.validate()?;

    let ids: Vec<MenuItemId> = body.item_ids.into_iter().map(MenuItemId).collect();
    let mut missing = Vec::new();
    for id in &ids {
        let owned = state
            .orders
            .find_menu_item(id)
            .await?
            .is_some_and(|item| item.active && item.agent_id == access.agent.id);
        if !owned {
            missing.push(id.0.clone());
        }
    }
    if !missing.is_empty() {
        return Err(ApiError::bad_request(format!("Menu items not found: {}", missing.join(", "))));
    }

    let updated = state
        .orders
        .bulk_update_menu_items(&access.agent.id, &ids, body.updates)
        .await?
        .ok_or_else(|| ApiError::conflict("Menu items changed during the update"))?;
    info!(
        event_name = "menu.items_bulk_updated",
        agent_id = %access.agent.id.0,
        count = updated.len(),
        "menu items updated together"
    );
    Ok(Json(updated))
}

pub async fn list_categories(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<String>>, ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    Ok(Json(state.orders.menu_categories(&access.agent.id).await?))
}

/// Imports a CSV request body. Without `skip_errors` the first bad row rejects
/// the whole file and nothing is created.
pub async fn upload_menu_csv(
    Path(agent_id): Path<String>,
    Query(options): Query<UploadOptions>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    body: String,
) -> Result<Json<UploadReport>, ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    access.require_editor()?;

    let rows = menu_csv::read_menu(body.as_bytes())?;
    let total_processed = rows.len();
    let mut accepted = Vec::new();
    let mut errors = Vec::new();
    for (row_number, row) in rows {
        match row {
            Ok(item) => accepted.push(item),
            Err(reason) => {
                let message = format!("Row {row_number}: {reason}");
                if !options.skip_errors {
                    return Err(ApiError::bad_request(message));
                }
                warn!(event_name = "menu.csv_row_skipped", agent_id = %access.agent.id.0, %message);
                errors.push(message);
            }
        }
    }

    let mut created_items = Vec::with_capacity(accepted.len());
    for item in accepted {
        created_items.push(state.orders.create_menu_item(&access.agent.id, item).await?);
    }
    info!(
        event_name = "menu.csv_imported",
        agent_id = %access.agent.id.0,
        created = created_items.len(),
        skipped = errors.len(),
        "menu imported from csv"
    );
    Ok(Json(UploadReport {
        success: true,
        total_processed,
        items_created: created_items.len(),
        errors_count: errors.len(),
        created_items,
        errors,
    }))
}

pub async fn download_menu_csv(
    Path(agent_id): Path<String>,
    Query(filter): Query<ExportFilter>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<CsvFile, ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    let items: Vec<MenuItem> = state
        .orders
        .list_menu(&access.agent.id)
        .await?
        .into_iter()
        .filter(|item| filter.matches(item))
        .collect();
    if items.is_empty() {
        return Err(ApiError::not_found("No menu items found"));
    }
    Ok(CsvFile {
        filename: format!("menu_items_{}.csv", access.agent.id.0),
        body: menu_csv::write_menu(&items)?,
    })
}

pub async fn menu_csv_template(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<CsvFile, ApiError> {
    agent_access(&state, &agent_id, &user).await?;
    Ok(CsvFile { filename: "menu_items_template.csv".to_string(), body: menu_csv::template()? })
}

/// An active menu item the caller can see.
async fn visible_item(
    state: &AppState,
    item_id: String,
    user: &User,
) -> Result<(MenuItem, AgentAccess), ApiError> {
    let item = state
        .orders
        .find_menu_item(&MenuItemId(item_id))
        .await?
        .filter(|item| item.active)
        .ok_or_else(|| ApiError::not_found("Menu item not found"))?;
    let access = agent_access(state, &item.agent_id.0, user).await.map_err(|error| {
        if error.status == StatusCode::NOT_FOUND {
            ApiError::not_found("Menu item not found")
        } else {
            error
        }
    })?;
    Ok((item, access))
}

/// An active menu item the caller may edit.
async fn editable_item(
    state: &AppState,
    item_id: String,
    user: &User,
) -> Result<(MenuItem, AgentAccess), ApiError> {
    let (item, access) = visible_item(state, item_id, user).await?;
    access.require_editor()?;
    Ok((item, access))
}

pub async fn get_menu_item(
    Path(item_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<MenuItem>, ApiError> {
    let (item, _) = visible_item(&state, item_id, &user).await?;
    Ok(Json(item))
}

pub async fn update_menu_item(
    Path(item_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(patch): Json<MenuItemPatch>,
) -> Result<Json<MenuItem>, ApiError> {
    patch.validate()?;
    let (item, _) = editable_item(&state, item_id, &user).await?;

    let updated = state
        .orders
        .update_menu_item(&item.id, patch)
        .await?
        .ok_or_else(|| ApiError::not_found("Menu item not found"))?;
    Ok(Json(updated))
}

pub async fn toggle_availability(
    Path(item_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<MenuItem>, ApiError> {
    let (item, access) = editable_item(&state, item_id, &user).await?;

    let toggled = state
        .orders
        .toggle_menu_item_availability(&item.id)
        .await?
        .ok_or_else(|| ApiError::not_found("Menu item not found"))?;
    info!(
        event_name = "menu.item_availability_toggled",
        agent_id = %access.agent.id.0,
        menu_item_id = %toggled.id.0,
        available = toggled.available,
        "menu item availability toggled"
    );
    Ok(Json(toggled))
}

pub async fn delete_menu_item(
    Path(item_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<DeletedResponse>, ApiError> {
    let (item, access) = editable_item(&state, item_id, &user).await?;
    state.orders.delete_menu_item(&item.id).await?;
    info!(
        event_name = "menu.item_deleted",
        agent_id = %access.agent.id.0,
        menu_item_id = %item.id.0,
        "menu item deleted"
    );
    Ok(Json(DeletedResponse {
        message: "Menu item deleted successfully".to_string(),
        menu_item_id: item.id.0,
    }))
}
