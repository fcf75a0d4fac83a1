use crate::extractors::RejectionType;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

/// Identity of an authenticated subscriber, forwarded by the upstream
/// authentication proxy as `x-auth-*` request headers. The broker itself
/// never authenticates anyone; a request without the headers is simply an
/// anonymous subscriber (extract with `Option<RemoteSession>`).
#[derive(Debug, Clone)]
pub(crate) struct RemoteSession {
    pub user_id: String,
    pub user_name: String,
    pub display_name: String,
    pub profile_url: String,
    pub session_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for RemoteSession
where
    S: Send + Sync,
{
    type Rejection = RejectionType;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.to_string())
        };

        let Some(user_id) = header("x-auth-user-id").filter(|id| !id.is_empty()) else {
            return Err((StatusCode::UNAUTHORIZED, "Unauthorized".to_string()));
        };

        Ok(RemoteSession {
            user_name: header("x-auth-user-name").unwrap_or_default(),
            display_name: header("x-auth-display-name").unwrap_or_else(|| user_id.clone()),
            profile_url: header("x-auth-profile-url").unwrap_or_default(),
            session_id: header("x-auth-session-id").unwrap_or_default(),
            user_id,
        })
    }
}
