//! Bearer-token authentication extractors.
//!
//! Clients send `Authorization: Bearer lrd_...`. The token is hashed and
//! looked up against unrevoked rows in `api_tokens`; the raw value is never
//! stored.
//!
//! ```rust,ignore
//! async fn handler(RequireUser(user): RequireUser) -> impl IntoResponse {
//!     Json(user)
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::debug;

use crate::db::UserRepository;
use crate::error::{AppError, set_sentry_user};
use crate::models::User;
use crate::services::auth::{hash_token, parse_bearer};
use crate::state::AppState;

/// Any authenticated user. Rejects with 401.
pub struct RequireUser(pub User);

/// An authenticated admin. Rejects with 401 without a token and 403 for
/// non-admins.
pub struct RequireAdmin(pub User);

/// The user if a token was sent. A token that is sent but invalid still
/// rejects with 401.
pub struct OptionalUser(pub Option<User>);

async fn resolve(parts: &Parts, state: &AppState) -> Result<Option<User>, AppError> {
    let Some(header) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let token = header
        .to_str()
        .ok()
        .and_then(parse_bearer)
        .ok_or_else(|| AppError::Unauthorized("malformed authorization header".to_string()))?;

    let user = UserRepository::new(state.pool())
        .authenticate(&hash_token(token))
        .await?
        .ok_or_else(|| {
            debug!("Rejected unknown or revoked token");
            AppError::Unauthorized("invalid or revoked token".to_string())
        })?;

    set_sentry_user(&user.id, Some(user.email.as_str()));
    Ok(Some(user))
}

impl FromRequestParts<AppState> for RequireUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        resolve(parts, state)
            .await?
            .map(Self)
            .ok_or_else(|| AppError::Unauthorized("authentication required".to_string()))
    }
}

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let RequireUser(user) = RequireUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(AppError::Forbidden("admin access required".to_string()));
        }
        Ok(Self(user))
    }
}

impl FromRequestParts<AppState> for OptionalUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        resolve(parts, state).await.map(Self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::{Request, StatusCode};
    use axum::response::IntoResponse;

    use super::*;
    use crate::state::test_support::lazy_state;

    fn parts(authorization: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/v1/cart");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let state = lazy_state();
        let err = RequireUser::from_request_parts(&mut parts(None), &state)
            .await
            .err()
            .unwrap();
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_malformed_header_is_unauthorized() {
        let state = lazy_state();
        let err = RequireAdmin::from_request_parts(&mut parts(Some("Basic dXNlcjpwYXNz")), &state)
            .await
            .err()
            .unwrap();
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_optional_user_without_header() {
        let state = lazy_state();
        let OptionalUser(user) = OptionalUser::from_request_parts(&mut parts(None), &state)
            .await
            .unwrap();
        assert!(user.is_none());
    }
}
