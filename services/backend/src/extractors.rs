use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRef, FromRequest, FromRequestParts, Request},
    http::{header::AUTHORIZATION, request::Parts},
    Json,
};
use serde::de::DeserializeOwned;
use shared::Msisdn;
use std::sync::Arc;
use validator::Validate;

use crate::errors::AppError;
use crate::repository::SessionStore;

/// JSON body that is both deserialized and validated
///
/// Parse failures and `validator` failures are turned into the standard
/// envelope with a short message instead of axum's plain-text rejection.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(json_rejection)?;

        value.validate().map_err(|errors| {
            let mut fields: Vec<&str> = errors.field_errors().keys().copied().collect();
            fields.sort_unstable();
            AppError::invalid_input(format!("Invalid {}", fields.join(", ")))
        })?;

        Ok(ValidatedJson(value))
    }
}

fn json_rejection(rejection: JsonRejection) -> AppError {
    let error_message = rejection.body_text();

    let message = if let Some(field) = error_message
        .split("missing field `")
        .nth(1)
        .and_then(|s| s.split('`').next())
    {
        format!("Missing required field: {}", field)
    } else if let Some(detail) = error_message
        .split("Invalid amount:")
        .nth(1)
        .and_then(|s| s.split(" at line").next())
    {
        format!("Invalid amount: {}", detail.trim())
    } else if matches!(rejection, JsonRejection::MissingJsonContentType(_)) {
        "Expected a JSON body".to_string()
    } else {
        "Invalid request body".to_string()
    };

    tracing::warn!(
        error_message = %message,
        original_error = %error_message,
        "Request body rejected"
    );

    AppError::InvalidInput(message)
}

/// Caller identity from a `Bearer` session token
#[derive(Debug, Clone)]
pub struct AuthenticatedMsisdn(pub Msisdn);

/// Session lookup for [`AuthenticatedMsisdn`]
#[derive(Clone)]
pub struct Sessions(pub Arc<dyn SessionStore>);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedMsisdn
where
    Sessions: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

        let Sessions(sessions) = Sessions::from_ref(state);
        sessions
            .resolve_session(token)
            .await?
            .map(AuthenticatedMsisdn)
            .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".to_string()))
    }
}
