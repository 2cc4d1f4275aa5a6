//! # mk-api
//!
//! HTTP surface for Mask spaces. Handlers translate requests into
//! `SpaceDirectory` and `PostFeed` calls; live feeds go out as
//! server-sent events.

pub mod error;
pub mod handlers;
pub mod middleware;

pub use error::ApiError;
pub use handlers::AppState;

use actix_web::web;

/// Mounts the space routes.
///
/// The caller registers `web::Data<AppState>`; the scope can be nested
/// under a prefix such as `/api`.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/spaces")
            .route("", web::post().to(handlers::host_space))
            .route("/{code}", web::put().to(handlers::create_space))
            .route("/{code}/join", web::post().to(handlers::join_space))
            .route("/{code}/posts", web::get().to(handlers::list_posts))
            .route("/{code}/posts", web::post().to(handlers::add_post))
            .route("/{code}/posts/stream", web::get().to(handlers::stream_posts))
            .route(
                "/{code}/posts/{post_id}/like",
                web::post().to(handlers::toggle_like),
            )
            .route(
                "/{code}/posts/{post_id}/replies",
                web::post().to(handlers::add_reply),
            ),
    );
}
