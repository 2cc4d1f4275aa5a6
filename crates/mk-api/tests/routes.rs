//! Route-level checks against the in-memory store.

use std::pin::pin;
use std::sync::Arc;

use actix_web::body::MessageBody;
use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use futures_util::future::poll_fn;
use mk_api::{configure_routes, AppState};
use mk_store_memory::MemoryDocumentStore;
use serde_json::{json, Value};

const ORIGIN: &str = "https://mask.example";

fn state() -> web::Data<AppState> {
    web::Data::new(AppState::new(Arc::new(MemoryDocumentStore::new()), ORIGIN))
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(App::new().app_data($state.clone()).configure(configure_routes)).await
    };
}

#[actix_web::test]
async fn hosting_returns_code_and_share_url() {
    let data = state();
    let app = app!(data);

    let resp = test::call_service(&app, test::TestRequest::post().uri("/spaces").to_request()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let body: Value = test::read_body_json(resp).await;
    let code = body["code"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 8);
    assert_eq!(body["shareUrl"], format!("{ORIGIN}?space={code}"));

    let join = test::TestRequest::post()
        .uri(&format!("/spaces/{code}/join"))
        .to_request();
    assert_eq!(test::call_service(&app, join).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn joining_an_unknown_space_is_404() {
    let data = state();
    let app = app!(data);

    let req = test::TestRequest::post().uri("/spaces/NOPE1234/join").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let body: Value = test::read_body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("NOPE1234"));
}

#[actix_web::test]
async fn malformed_code_is_400() {
    let data = state();
    let app = app!(data);

    let req = test::TestRequest::put().uri("/spaces/not-a-code!").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn post_like_reply_round() {
    let data = state();
    let app = app!(data);

    let req = test::TestRequest::put().uri("/spaces/ROOM0001").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::post()
        .uri("/spaces/ROOM0001/posts")
        .set_json(json!({ "content": "hello world" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = test::read_body_json(resp).await;
    let id = created["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri(&format!("/spaces/ROOM0001/posts/{id}/like"))
        .set_json(json!({ "liked": false }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::post()
        .uri(&format!("/spaces/ROOM0001/posts/{id}/replies"))
        .set_json(json!({ "content": "hi" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::get().uri("/spaces/room0001/posts").to_request();
    let posts: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(posts.as_array().unwrap().len(), 1);
    assert_eq!(posts[0]["content"], "hello world");
    assert_eq!(posts[0]["likes"], 1);
    assert_eq!(posts[0]["liked"], true);
    assert_eq!(posts[0]["replies"][0]["content"], "hi");
}

#[actix_web::test]
async fn blank_post_is_400() {
    let data = state();
    let app = app!(data);

    let req = test::TestRequest::post()
        .uri("/spaces/ROOM0002/posts")
        .set_json(json!({ "content": "   " }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn liking_a_missing_post_is_404() {
    let data = state();
    let app = app!(data);

    let req = test::TestRequest::post()
        .uri("/spaces/ROOM0003/posts/ghost/like")
        .set_json(json!({ "liked": false }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn stream_opens_with_current_snapshot() {
    let data = state();
    let app = app!(data);

    data.feed
        .add_post(&mk_core::SpaceCode::parse("LIVE0001").unwrap(), "already here")
        .await
        .unwrap();

    let req = test::TestRequest::get().uri("/spaces/LIVE0001/posts/stream").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let mut body = pin!(resp.into_body());
    let chunk = poll_fn(|cx| body.as_mut().poll_next(cx))
        .await
        .unwrap()
        .unwrap();
    let text = String::from_utf8(chunk.to_vec()).unwrap();
    assert!(text.starts_with("event: snapshot\ndata: "));
    assert!(text.contains("already here"));
}
