//! Renewal visibility and manual runs.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use tracing::info;

use crate::error::Result;
use crate::middleware::RequireAdmin;
use crate::models::Subscription;
use crate::services::renewal::RenewalSummary;
use crate::services::subscriptions;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct DueQuery {
    pub limit: Option<i64>,
}

/// `GET /v1/admin/subscriptions/due`
pub async fn due(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Query(query): Query<DueQuery>,
) -> Result<Json<Vec<Subscription>>> {
    Ok(Json(subscriptions::list_due(state.pool(), query.limit).await?))
}

/// `POST /v1/admin/renewals/run`
///
/// One pass of the same runner the scheduler uses. Safe alongside the
/// scheduler: due rows are claimed with `SKIP LOCKED`.
pub async fn run(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
) -> Result<Json<RenewalSummary>> {
    info!(admin_id = %admin.id, "Manual renewal run");
    let summary = state.renewal_service().run_once().await?;
    Ok(Json(summary))
}
