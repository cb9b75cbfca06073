use super::common::{map_service_error, success_response};
use crate::{errors::ApiError, handlers::AppState, services::reports::ProductionReportQuery};
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};

pub fn report_routes() -> Router<AppState> {
    Router::new().route("/production", get(production_report))
}

/// Production efficiency per manufacturing order, optionally bounded by `from`/`to`
async fn production_report(
    State(state): State<AppState>,
    Query(query): Query<ProductionReportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return Err(ApiError::ValidationError(
                "Report window start must not be after its end".to_string(),
            ));
        }
    }

    let rows = state
        .services
        .reports
        .production_report(query)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(rows))
}
