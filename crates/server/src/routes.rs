use axum::Router;
use rollwise_db::DbPool;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{agents, auth, calendar, conversations, health, menu, orders, statistics, telephony};

/// Dashboard API, telephony webhooks and `/health` on one router.
pub fn app(state: AppState, db_pool: DbPool) -> Router {
    Router::new()
        .merge(auth::router())
        .merge(agents::router())
        .merge(conversations::router())
        .merge(calendar::router())
        .merge(orders::router())
        .merge(menu::router())
        .merge(statistics::router())
        .merge(telephony::router())
        .with_state(state)
        .merge(health::router(db_pool))
        .layer(TraceLayer::new_for_http())
}
