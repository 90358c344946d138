//! Collector identity extracted from request headers.
//!
//! The authentication layer in front of this service resolves the staff
//! member and forwards `X-User-ID` and `X-User-Name`. Requests without a
//! numeric user id are rejected.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

use crate::services::Collector;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const USER_NAME_HEADER: &str = "X-User-Name";

#[derive(Debug, Clone)]
pub struct CollectorContext(pub Collector);

#[async_trait]
impl<S> FromRequestParts<S> for CollectorContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Missing X-User-ID header")))?;

        let id: i64 = raw_id.trim().parse().map_err(|_| {
            AppError::AuthError(anyhow::anyhow!("X-User-ID must be a numeric user id"))
        })?;

        // Fall back to the id so receipts always name someone.
        let name = parts
            .headers
            .get(USER_NAME_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("user-{}", id));

        tracing::Span::current().record("collector_id", id);

        Ok(Self(Collector { id, name }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(builder: axum::http::request::Builder) -> Result<CollectorContext, AppError> {
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        CollectorContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_id_and_name() {
        let ctx = extract(
            Request::builder()
                .header(USER_ID_HEADER, "9")
                .header(USER_NAME_HEADER, "Amina"),
        )
        .await
        .unwrap();
        assert_eq!(ctx.0.id, 9);
        assert_eq!(ctx.0.name, "Amina");
    }

    #[tokio::test]
    async fn missing_name_falls_back_to_id() {
        let ctx = extract(Request::builder().header(USER_ID_HEADER, "12"))
            .await
            .unwrap();
        assert_eq!(ctx.0.name, "user-12");
    }

    #[tokio::test]
    async fn rejects_missing_or_malformed_id() {
        assert!(extract(Request::builder()).await.is_err());
        assert!(extract(Request::builder().header(USER_ID_HEADER, "abc"))
            .await
            .is_err());
    }
}
