use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use stockpulse_core::error::PipelineError;

#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    /// The configured price source could not be initialised at startup.
    Unavailable(String),
    /// A discovery lookup matched nothing.
    NoMatches(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Pipeline(err) => match err {
                PipelineError::DataUnavailable { not_found: true, .. } => StatusCode::NOT_FOUND,
                PipelineError::DataUnavailable { .. } => StatusCode::BAD_GATEWAY,
                PipelineError::InsufficientHistory { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                PipelineError::ModelTrainingError(_) => StatusCode::UNPROCESSABLE_ENTITY,
                PipelineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            },
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NoMatches(_) => StatusCode::NOT_FOUND,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Pipeline(err) => err.kind(),
            Self::Unavailable(_) => "service_unavailable",
            Self::NoMatches(_) => "not_found",
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self::Pipeline(err)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rej: QueryRejection) -> Self {
        Self::Pipeline(PipelineError::invalid(rej.body_text()))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rej: JsonRejection) -> Self {
        Self::Pipeline(PipelineError::invalid(rej.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Pipeline(err) => err.to_string(),
            Self::Unavailable(msg) | Self::NoMatches(msg) => msg.clone(),
        };

        if status.is_server_error() {
            let err = match &self {
                Self::Pipeline(err) => anyhow::Error::new(err.clone()),
                Self::Unavailable(msg) | Self::NoMatches(msg) => anyhow::anyhow!("{msg}"),
            };
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(kind = self.kind(), %status, error = %message, "request failed");
        } else {
            tracing::debug!(kind = self.kind(), %status, error = %message, "request rejected");
        }

        let body = Json(json!({
            "error": self.kind(),
            "message": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_pipeline_errors_to_statuses() {
        let cases = [
            (PipelineError::not_found("ZZZZ", "unknown"), StatusCode::NOT_FOUND),
            (PipelineError::data_unavailable("AAPL", "timeout"), StatusCode::BAD_GATEWAY),
            (
                PipelineError::InsufficientHistory {
                    required: 50,
                    available: 5,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                PipelineError::ModelTrainingError("flat".to_string()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (PipelineError::invalid("bad"), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
        assert_eq!(
            ApiError::Unavailable("no db".to_string()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::NoMatches("nothing".to_string()).status(),
            StatusCode::NOT_FOUND
        );
    }
}
