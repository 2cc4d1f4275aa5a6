//! # mk-api Handlers
//!
//! Each handler parses the space code from the path, makes one directory
//! or feed call, and shapes the result as JSON.

use std::sync::Arc;

use actix_web::http::header;
use actix_web::web::{self, Bytes};
use actix_web::HttpResponse;
use futures_util::stream;
use mk_core::{DocumentStore, Identity, SpaceCode};
use mk_sync::{PostFeed, SpaceDirectory};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ApiError;

type ApiResult = Result<HttpResponse, ApiError>;

/// State shared across all Actix-web workers.
pub struct AppState {
    pub directory: SpaceDirectory,
    pub feed: PostFeed,
    /// Origin share links are built from, e.g. `https://mask.example`
    pub public_origin: String,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, public_origin: impl Into<String>) -> Self {
        Self {
            directory: SpaceDirectory::new(store.clone()),
            feed: PostFeed::with_identity(store, Identity::anonymous()),
            public_origin: public_origin.into(),
        }
    }

    fn space_response(&self, code: SpaceCode) -> SpaceResponse {
        SpaceResponse {
            share_url: code.share_url(&self.public_origin),
            code,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceResponse {
    pub code: SpaceCode,
    pub share_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ContentBody {
    pub content: String,
}

/// The `liked` flag of the client's current copy of the post.
#[derive(Debug, Deserialize)]
pub struct LikeBody {
    pub liked: bool,
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: String,
}

/// `POST /spaces`: mints a code and registers it.
pub async fn host_space(data: web::Data<AppState>) -> ApiResult {
    let code = data.directory.host_space().await?;
    Ok(HttpResponse::Created().json(data.space_response(code)))
}

/// `PUT /spaces/{code}`
pub async fn create_space(data: web::Data<AppState>, path: web::Path<String>) -> ApiResult {
    let code = SpaceCode::parse(&path)?;
    data.directory.create_space(&code).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// `POST /spaces/{code}/join`
pub async fn join_space(data: web::Data<AppState>, path: web::Path<String>) -> ApiResult {
    let code = SpaceCode::parse(&path)?;
    data.directory.join_space(&code).await?;
    Ok(HttpResponse::Ok().json(data.space_response(code)))
}

/// `GET /spaces/{code}/posts`: the current list, newest first.
pub async fn list_posts(data: web::Data<AppState>, path: web::Path<String>) -> ApiResult {
    let code = SpaceCode::parse(&path)?;
    let mut feed = data.feed.watch(&code).await?;
    let posts = feed.next().await.unwrap_or_default();
    feed.close();
    Ok(HttpResponse::Ok().json(posts))
}

/// `GET /spaces/{code}/posts/stream`: one `snapshot` event per delivery.
///
/// The subscription lives as long as the response body; a client hanging
/// up drops it and releases the listener.
pub async fn stream_posts(data: web::Data<AppState>, path: web::Path<String>) -> ApiResult {
    let code = SpaceCode::parse(&path)?;
    let feed = data.feed.watch(&code).await?;
    debug!(space = %code, "snapshot stream opened");

    let events = stream::unfold(feed, |mut feed| async move {
        let posts = feed.next().await?;
        let event = serde_json::to_string(&posts)
            .map(|json| Bytes::from(format!("event: snapshot\ndata: {json}\n\n")));
        Some((event, feed))
    });

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(events))
}

/// `POST /spaces/{code}/posts`
pub async fn add_post(
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ContentBody>,
) -> ApiResult {
    let code = SpaceCode::parse(&path)?;
    let id = data.feed.add_post(&code, &body.content).await?;
    Ok(HttpResponse::Created().json(CreatedResponse { id }))
}

/// `POST /spaces/{code}/posts/{post_id}/like`
///
/// A toggle arriving while another for the same post is still being
/// applied is dropped and still answers 204; clients read the outcome
/// from the next snapshot.
pub async fn toggle_like(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Json<LikeBody>,
) -> ApiResult {
    let (code, post_id) = path.into_inner();
    let code = SpaceCode::parse(&code)?;
    data.feed
        .toggle_like_by_id(&code, &post_id, body.liked)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// `POST /spaces/{code}/posts/{post_id}/replies`
pub async fn add_reply(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Json<ContentBody>,
) -> ApiResult {
    let (code, post_id) = path.into_inner();
    let code = SpaceCode::parse(&code)?;
    data.feed.add_reply(&code, &post_id, &body.content).await?;
    Ok(HttpResponse::NoContent().finish())
}
