use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use vanline_core::EngineError;

#[derive(Debug)]
pub enum ApiError {
    AuthenticationError(String),
    Engine(EngineError),
    Anyhow(anyhow::Error),
}

impl ApiError {
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::AuthenticationError(msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Engine(err) => {
                let status = match &err {
                    EngineError::Unauthorized { .. } => StatusCode::FORBIDDEN,
                    EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                    EngineError::NotPostable(_)
                    | EngineError::InvalidTransition { .. }
                    | EngineError::EquipmentMismatch(_)
                    | EngineError::Validation(_) => StatusCode::BAD_REQUEST,
                    EngineError::RequestNotPending(_)
                    | EngineError::RequestTerminal { .. }
                    | EngineError::CarrierAlreadyAssigned(_)
                    | EngineError::CannotCancelAtStage { .. } => StatusCode::CONFLICT,
                    EngineError::StoreUnavailable(_) => {
                        tracing::error!("ledger store unavailable: {}", err);
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                };
                (status, err.to_string())
            }
            ApiError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}
