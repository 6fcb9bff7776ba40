//! Request handlers for the notifier admin API
//!
//! - Health and metrics handlers
//! - Manual sweep handlers
//! - Per-user reminder preview

use crate::error::{NotifierError, Result};
use crate::manager::NotifierManager;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

pub mod sweeps_handler {
    use super::*;
    use crate::driver::SweepOptions;

    #[derive(Debug, Default, Deserialize)]
    pub struct SweepRequest {
        pub date: Option<NaiveDate>,
        #[serde(default)]
        pub dry_run: bool,
    }

    /// Run a sweep now
    pub async fn run_sweep(
        State(manager): State<Arc<NotifierManager>>,
        request: Option<Json<SweepRequest>>,
    ) -> Result<impl IntoResponse> {
        let request = request.map(|Json(r)| r).unwrap_or_default();
        info!(date = ?request.date, dry_run = request.dry_run, "Manual sweep requested");

        match manager
            .run_sweep(
                request.date,
                SweepOptions {
                    dry_run: request.dry_run,
                },
            )
            .await
        {
            Ok(report) => Ok((StatusCode::OK, Json(report))),
            Err(e) => {
                error!("Manual sweep failed: {}", e);
                Err(e)
            }
        }
    }

    /// Report of the most recent sweep
    pub async fn last_sweep(
        State(manager): State<Arc<NotifierManager>>,
    ) -> Result<impl IntoResponse> {
        manager
            .last_sweep()
            .await
            .map(Json)
            .ok_or_else(|| NotifierError::not_found("sweep report"))
    }
}

pub mod users_handler {
    use super::*;
    use crate::rules::Reminder;

    #[derive(Debug, Deserialize)]
    pub struct PendingQuery {
        pub date: Option<NaiveDate>,
    }

    #[derive(Debug, Serialize)]
    pub struct PendingResponse {
        pub uid: String,
        pub date: NaiveDate,
        pub reminders: Vec<Reminder>,
    }

    /// Reminders that would fire for a user
    pub async fn pending_reminders(
        State(manager): State<Arc<NotifierManager>>,
        Path(uid): Path<String>,
        Query(query): Query<PendingQuery>,
    ) -> Result<impl IntoResponse> {
        let date = query.date.unwrap_or_else(|| manager.today());
        let reminders = manager.pending_for_user(&uid, Some(date)).await?;
        Ok(Json(PendingResponse {
            uid,
            date,
            reminders,
        }))
    }
}

pub mod health_handler {
    use super::*;

    /// Health check endpoint
    pub async fn health_check(
        State(manager): State<Arc<NotifierManager>>,
    ) -> impl IntoResponse {
        let health = manager.health().await;
        let status = if health.is_healthy() {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (status, Json(health))
    }
}

pub mod metrics_handler {
    use super::*;

    /// Prometheus metrics endpoint
    pub async fn get_metrics(
        State(manager): State<Arc<NotifierManager>>,
    ) -> Result<impl IntoResponse> {
        let body = manager.render_metrics()?;
        Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ))
    }
}
