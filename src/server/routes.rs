use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::server::auth::AuthUser;
use crate::server::responses::{
    self, FeedFollowResponse, FeedResponse, PostResponse, PrivateUserResponse, UserResponse,
};
use crate::server::ApiError;
use crate::state::State as AppState;

const MAX_POST_COUNT: u32 = 10;

type ApiResult<T> = Result<T, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(params)| params)
        .map_err(|_| ApiError::bad_request("Invalid JSON: unable to parse request body"))
}

fn parse_feed_id(feed_id: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(feed_id.trim()).map_err(|_| ApiError::bad_request("Invalid feed_id"))
}

pub async fn healthz() -> Json<Value> {
    Json(json!({}))
}

pub async fn error() -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({})))
}

#[derive(Deserialize, Debug)]
pub struct CreateUserParams {
    #[serde(default)]
    name: String,
}

pub async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserParams>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<PrivateUserResponse>)> {
    let params = body(payload)?;
    let name = params.name.trim();

    if name.is_empty() {
        return Err(ApiError::bad_request("Missing required field: name"));
    }

    let mut tx = state.storage.begin().await?;
    let user = tx.create_user(name).await?;
    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(user.into())))
}

pub async fn get_user(AuthUser(user): AuthUser) -> Json<PrivateUserResponse> {
    Json(user.into())
}

pub async fn get_users(State(state): State<AppState>) -> ApiResult<Json<Vec<UserResponse>>> {
    let mut tx = state.storage.begin().await?;
    let users = tx.get_users().await?;
    tx.commit().await?;

    Ok(Json(responses::collect(users)))
}

#[derive(Deserialize, Debug)]
pub struct CreateFeedParams {
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
}

pub async fn create_feed(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<CreateFeedParams>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<FeedResponse>)> {
    let params = body(payload)?;
    let name = params.name.trim();
    let url = params.url.trim();

    if name.is_empty() || url.is_empty() {
        return Err(ApiError::bad_request("name and url are required fields"));
    }

    match Url::parse(url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        _ => return Err(ApiError::bad_request(format!("`{url}` is not an HTTP(S) URL"))),
    }

    let mut tx = state.storage.begin().await?;
    let feed = tx.create_feed(user.id, name, url).await?;
    tx.commit().await?;

    let feed = feed.ok_or_else(|| ApiError::bad_request("A feed with this url already exists"))?;

    Ok((StatusCode::CREATED, Json(feed.into())))
}

pub async fn get_feeds(State(state): State<AppState>) -> ApiResult<Json<Vec<FeedResponse>>> {
    let mut tx = state.storage.begin().await?;
    let feeds = tx.get_feeds().await?;
    tx.commit().await?;

    Ok(Json(responses::collect(feeds)))
}

pub async fn get_posts(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Vec<PostResponse>>> {
    let mut tx = state.storage.begin().await?;
    let posts = tx.get_posts_for_user(user.id, MAX_POST_COUNT).await?;
    tx.commit().await?;

    Ok(Json(responses::collect(posts)))
}

#[derive(Deserialize, Debug)]
pub struct CreateFeedFollowParams {
    #[serde(default)]
    feed_id: String,
}

pub async fn create_feed_follow(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<CreateFeedFollowParams>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<FeedFollowResponse>)> {
    let params = body(payload)?;

    if params.feed_id.is_empty() {
        return Err(ApiError::bad_request("feed_id is a required field"));
    }

    let feed_id = parse_feed_id(&params.feed_id)?;

    let mut tx = state.storage.begin().await?;

    if tx.get_feed(feed_id).await?.is_none() {
        return Err(ApiError::bad_request("Feed not found"));
    }

    let follow = tx.create_feed_follow(user.id, feed_id).await?;
    tx.commit().await?;

    let follow = follow.ok_or_else(|| ApiError::bad_request("Feed is already followed"))?;

    Ok((StatusCode::CREATED, Json(follow.into())))
}

pub async fn get_feed_follows(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Vec<FeedFollowResponse>>> {
    let mut tx = state.storage.begin().await?;
    let follows = tx.get_feed_follows(user.id).await?;
    tx.commit().await?;

    Ok(Json(responses::collect(follows)))
}

pub async fn delete_feed_follow(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(feed_id): Path<String>,
) -> ApiResult<Json<&'static str>> {
    let feed_id = parse_feed_id(&feed_id)?;

    let mut tx = state.storage.begin().await?;
    tx.delete_feed_follow(user.id, feed_id).await?;
    tx.commit().await?;

    Ok(Json("Unfollowed successfully!"))
}
