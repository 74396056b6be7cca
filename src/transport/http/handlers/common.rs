use crate::app::{IssuanceStage, ServiceError};
use crate::infra::ledger::LedgerError;
use crate::transport::http::types::ApiResponse;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use validator::{ValidationErrors, ValidationErrorsKind};

pub fn ok<T: Serialize>(status: StatusCode, data: T) -> Response {
    match serde_json::to_value(data) {
        Ok(data) => (
            status,
            Json(ApiResponse {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response(),
        Err(e) => fail(&ServiceError::Internal(e.into()), false),
    }
}

pub fn status_of(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::Validation(_) | ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
        ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Conflict(_) | ServiceError::AlreadyRevoked(_) => StatusCode::CONFLICT,
        ServiceError::Issuance { stage, .. } => match stage {
            IssuanceStage::PinDocument | IssuanceStage::PinMetadata | IssuanceStage::LedgerSubmit => {
                StatusCode::BAD_GATEWAY
            }
            IssuanceStage::LedgerConfirm => StatusCode::GATEWAY_TIMEOUT,
            IssuanceStage::Reserve | IssuanceStage::Persist => StatusCode::INTERNAL_SERVER_ERROR,
        },
        ServiceError::Ledger(e) if e.is_ambiguous() => StatusCode::GATEWAY_TIMEOUT,
        ServiceError::Pinning(_) | ServiceError::Ledger(_) => StatusCode::BAD_GATEWAY,
        ServiceError::RevocationDiverged { .. }
        | ServiceError::Repository(_)
        | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn code_of(err: &ServiceError) -> &'static str {
    match err {
        ServiceError::Validation(_) => "VALIDATION_ERROR",
        ServiceError::BadRequest(_) => "BAD_REQUEST",
        ServiceError::Unauthorized(_) => "UNAUTHORIZED",
        ServiceError::Forbidden(_) => "FORBIDDEN",
        ServiceError::NotFound(_) => "NOT_FOUND",
        ServiceError::Conflict(_) => "CONFLICT",
        ServiceError::AlreadyRevoked(_) => "ALREADY_REVOKED",
        ServiceError::Issuance {
            stage: IssuanceStage::LedgerConfirm,
            ..
        } => "LEDGER_UNCONFIRMED",
        ServiceError::Issuance { .. } => "ISSUANCE_FAILED",
        ServiceError::RevocationDiverged { .. } => "REVOCATION_DIVERGED",
        ServiceError::Pinning(_) => "PINNING_FAILED",
        ServiceError::Ledger(LedgerError::Unconfirmed { .. }) => "LEDGER_UNCONFIRMED",
        ServiceError::Ledger(_) => "LEDGER_FAILED",
        ServiceError::Repository(_) | ServiceError::Internal(_) => "INTERNAL_ERROR",
    }
}

/// Builds the error envelope. `data` always carries a machine-readable `code`, plus field
/// details, issuance stage and transaction reference when they apply.
pub fn fail(err: &ServiceError, development: bool) -> Response {
    fail_as(status_of(err), err, development)
}

/// Like [`fail`], with the HTTP status chosen by the route. `data.code` still names the error.
pub fn fail_as(status: StatusCode, err: &ServiceError, development: bool) -> Response {
    let mut data = Map::new();
    data.insert("code".into(), json!(code_of(err)));

    match err {
        ServiceError::Validation(errors) => {
            data.insert("details".into(), validation_details(errors));
        }
        ServiceError::Issuance { stage, .. } => {
            data.insert("stage".into(), json!(stage.as_ref()));
        }
        ServiceError::RevocationDiverged { token_id, .. } | ServiceError::AlreadyRevoked(token_id) => {
            data.insert("tokenId".into(), json!(token_id));
        }
        _ => {}
    }
    if let Some(transaction) = err.transaction() {
        data.insert("transactionHash".into(), json!(transaction));
    }

    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), error = %err.chain(), "request failed");
        if development {
            data.insert("cause".into(), json!(err.chain()));
        }
    }

    (
        status,
        Json(ApiResponse {
            success: false,
            data: Some(JsonValue::Object(data)),
            error: Some(err.to_string()),
        }),
    )
        .into_response()
}

/// `{ field: [message, ...] }`, using the validator's message when it has one.
pub fn validation_details(errors: &ValidationErrors) -> JsonValue {
    let mut out = Map::new();
    for (field, kind) in errors.errors() {
        let messages: Vec<String> = match kind {
            ValidationErrorsKind::Field(list) => list
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("invalid {}", e.code))
                })
                .collect(),
            ValidationErrorsKind::Struct(_) | ValidationErrorsKind::List(_) => {
                vec!["invalid value".to_string()]
            }
        };
        out.insert(field.to_string(), json!(messages));
    }
    JsonValue::Object(out)
}

pub fn parse_token_id(raw: &str, development: bool) -> Result<u64, Response> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| {
            fail(
                &ServiceError::BadRequest(format!("Invalid token id: {}", raw)),
                development,
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::ValidationError;

    #[test]
    fn issuance_stages_map_to_gateway_statuses() {
        let confirm = ServiceError::Issuance {
            stage: IssuanceStage::LedgerConfirm,
            transaction: Some("sig".into()),
            source: anyhow::anyhow!("timeout"),
        };
        assert_eq!(status_of(&confirm), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(code_of(&confirm), "LEDGER_UNCONFIRMED");

        let pin = ServiceError::issuance(IssuanceStage::PinMetadata, anyhow::anyhow!("x"));
        assert_eq!(status_of(&pin), StatusCode::BAD_GATEWAY);

        let persist = ServiceError::issuance(IssuanceStage::Persist, anyhow::anyhow!("x"));
        assert_eq!(status_of(&persist), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn route_status_keeps_error_code() {
        let resp = fail_as(
            StatusCode::BAD_REQUEST,
            &ServiceError::Conflict("Email already registered".into()),
            false,
        );
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn validation_details_use_messages() {
        let mut errors = ValidationErrors::new();
        let mut e = ValidationError::new("required");
        e.message = Some("Search query is required".into());
        errors.add("query", e);
        errors.add("other", ValidationError::new("email"));

        let details = validation_details(&errors);
        assert_eq!(details["query"][0], "Search query is required");
        assert_eq!(details["other"][0], "invalid email");
    }

    #[test]
    fn token_ids_must_be_positive_integers() {
        assert_eq!(parse_token_id("12", false).unwrap(), 12);
        assert!(parse_token_id("0", false).is_err());
        assert!(parse_token_id("abc", false).is_err());
    }
}
