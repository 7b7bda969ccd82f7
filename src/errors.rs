use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::{DbErr, SqlErr};
use serde::{Deserialize, Serialize};

/// JSON body returned for every failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Unprocessable Entity")
    pub error: String,
    /// Machine-readable error code (e.g., "insufficient_stock")
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Insufficient reserved quantity: {0}")]
    InsufficientReservedQuantity(String),

    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

/// True when the database rejected a write on a unique index.
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

impl ServiceError {
    pub fn db_error(error: DbErr) -> Self {
        ServiceError::StorageUnavailable(error)
    }

    /// Rejects zero or negative quantities.
    pub fn ensure_positive(field: &str, quantity: i32) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::InvalidQuantity(format!(
                "{} must be greater than zero, got {}",
                field, quantity
            )));
        }
        Ok(())
    }

    /// `ReservationNotFound` is the expected outcome of releasing a hold twice;
    /// cleanup paths treat it as a no-op rather than a failure.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::ReservationNotFound(_))
    }

    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::InsufficientStock(_) => "insufficient_stock",
            Self::InsufficientReservedQuantity(_) => "insufficient_reserved_quantity",
            Self::ReservationNotFound(_) => "reservation_not_found",
            Self::InvalidQuantity(_) => "invalid_quantity",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InsufficientStock(_) | Self::InsufficientReservedQuantity(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::ReservationNotFound(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidQuantity(_) | Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Storage and internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::StorageUnavailable(_) => "Storage unavailable".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::InsufficientStock("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::InsufficientReservedQuantity("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::ReservationNotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::InvalidQuantity("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::db_error(DbErr::Custom("connection refused".into())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn storage_errors_hide_details() {
        let err = ServiceError::db_error(DbErr::Custom(
            "password authentication failed for user".into(),
        ));
        assert_eq!(err.response_message(), "Storage unavailable");
        assert_eq!(
            ServiceError::InsufficientStock("70 available".into()).response_message(),
            "Insufficient stock: 70 available"
        );
    }

    #[test]
    fn only_reservation_not_found_is_soft() {
        assert!(ServiceError::ReservationNotFound("gone".into()).is_soft());
        assert!(!ServiceError::InsufficientStock("x".into()).is_soft());
        assert!(!ServiceError::db_error(DbErr::Custom("down".into())).is_soft());
    }

    #[test]
    fn ensure_positive_rejects_zero_and_negative() {
        assert!(ServiceError::ensure_positive("quantity", 1).is_ok());
        assert!(matches!(
            ServiceError::ensure_positive("quantity", 0),
            Err(ServiceError::InvalidQuantity(_))
        ));
        assert!(matches!(
            ServiceError::ensure_positive("quantity", -3),
            Err(ServiceError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn custom_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&DbErr::Custom("duplicate".into())));
        assert!(!is_unique_violation(&DbErr::RecordNotInserted));
    }

    #[tokio::test]
    async fn error_response_carries_code() {
        let response = ServiceError::InsufficientStock("none left".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.code, "insufficient_stock");
        assert_eq!(payload.error, "Unprocessable Entity");
    }
}
