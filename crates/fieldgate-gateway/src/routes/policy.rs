//! Policy decision endpoints.
//!
//! The external query builder asks for the row filter before running a
//! query and posts the result rows back for masking afterwards.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query,
    },
    routing::{get, post},
    Extension, Json, Router,
};
use fieldgate_core::SecurityContext;

use crate::error::AppError;
use crate::json::{FilterParams, FilterResponse, MaskBody, MaskResponse};
use crate::AppState;

/// Policy routes. Mounted behind the authentication middleware.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/policy/:schema/:table/filter", get(row_filter))
        .route("/policy/:schema/:table/mask", post(mask_rows))
}

/// Plain SQL identifier: a letter or underscore, then letters, digits or
/// underscores.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Reject names that would be substituted into a predicate unless they are
/// plain identifiers.
fn require_identifier(kind: &str, name: &str) -> Result<(), AppError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "{} must be a plain identifier: {:?}",
            kind, name
        )))
    }
}

async fn row_filter(
    Extension(ctx): Extension<SecurityContext>,
    Path((schema, table)): Path<(String, String)>,
    params: Result<Query<FilterParams>, QueryRejection>,
) -> Result<Json<FilterResponse>, AppError> {
    let Query(params) = params?;
    require_identifier("schema", &schema)?;
    require_identifier("table", &table)?;
    if let Some(primary_key) = &params.primary_key {
        require_identifier("primary_key", primary_key)?;
    }

    let filter = ctx
        .row_filter(&schema, &table, params.primary_key.as_deref())
        .await;
    Ok(Json(FilterResponse::from(&filter)))
}

async fn mask_rows(
    Extension(ctx): Extension<SecurityContext>,
    Path((schema, table)): Path<(String, String)>,
    body: Result<Json<MaskBody>, JsonRejection>,
) -> Result<Json<MaskResponse>, AppError> {
    let Json(MaskBody { mut rows }) = body?;
    let changed = ctx.mask_rows(&schema, &table, &mut rows).await;
    Ok(Json(MaskResponse { rows, changed }))
}
