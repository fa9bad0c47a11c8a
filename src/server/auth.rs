use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::server::ApiError;
use crate::state::State;
use crate::storage::entities::User;

const SCHEME: &str = "ApiKey";
const API_KEY_LEN: usize = 64;

/// Extracts the API key from an `Authorization: ApiKey <key>` header.
pub fn api_key(headers: &HeaderMap) -> Result<&str, &'static str> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or("API key is not found")?
        .to_str()
        .map_err(|_| "Invalid API key")?;

    match value.split(' ').collect::<Vec<_>>()[..] {
        [SCHEME, key] if key.len() == API_KEY_LEN => Ok(key),
        _ => Err("Invalid API key"),
    }
}

/// The user owning the request's API key.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<State> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &State) -> Result<Self, Self::Rejection> {
        let key = api_key(&parts.headers).map_err(ApiError::unauthorized)?;

        let mut tx = state.storage.begin().await?;
        let user = tx.get_user_by_api_key(key).await?;
        tx.commit().await?;

        user.map(AuthUser)
            .ok_or_else(|| ApiError::unauthorized("User not found"))
    }
}
