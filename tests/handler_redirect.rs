mod common;

use axum::{Router, routing::get};
use axum_test::TestServer;
use common::MockConnectInfoLayer;
use shortlink_core::api::handlers::redirect_handler;
use shortlink_core::domain::access_event::AccessEvent;
use shortlink_core::infrastructure::transport::EventTransport;
use std::time::Duration;

fn server(app: &common::TestApp) -> TestServer {
    let router = Router::new()
        .route("/{code}", get(redirect_handler))
        .layer(MockConnectInfoLayer)
        .with_state(app.state.clone());

    TestServer::new(router).unwrap()
}

async fn next_event(app: &common::TestApp) -> AccessEvent {
    let delivery = app
        .transport
        .receive(Duration::from_secs(2))
        .await
        .unwrap()
        .expect("access event published");
    AccessEvent::from_json(&delivery.payload).unwrap()
}

#[tokio::test]
async fn test_redirect_success() {
    let app = common::create_test_app().await;
    app.state
        .link_service
        .create("https://example.com/target", Some("redirect1".to_string()))
        .await
        .unwrap();

    let response = server(&app).get("/redirect1").await;

    assert_eq!(response.status_code(), 307);
    assert_eq!(response.header("location"), "https://example.com/target");
}

#[tokio::test]
async fn test_redirect_not_found() {
    let app = common::create_test_app().await;

    let response = server(&app).get("/notfound").await;

    response.assert_status_not_found();
    // Bloom negative: the store is never asked.
    assert_eq!(app.links.lookups(), 0);
}

#[tokio::test]
async fn test_redirect_publishes_access_event() {
    let app = common::create_test_app().await;
    app.state
        .link_service
        .create("https://example.com", Some("track".to_string()))
        .await
        .unwrap();

    let response = server(&app)
        .get("/track")
        .add_header("User-Agent", "Mozilla/5.0")
        .add_header("Referer", "https://google.com")
        .add_header("Cookie", "theme=dark; uid=visitor-42")
        .await;
    assert_eq!(response.status_code(), 307);

    let event = next_event(&app).await;
    assert_eq!(event.code, "track");
    assert_eq!(event.long_url, "https://example.com/");
    assert_eq!(event.headers.user_agent.as_deref(), Some("Mozilla/5.0"));
    assert_eq!(event.headers.referer.as_deref(), Some("https://google.com"));
    assert_eq!(event.client_ip.as_deref(), Some("127.0.0.1"));
    assert_eq!(event.client_uid.as_deref(), Some("visitor-42"));
}

#[tokio::test]
async fn test_forwarded_for_ignored_without_proxy() {
    let app = common::create_test_app().await;
    app.state
        .link_service
        .create("https://example.com", Some("direct".to_string()))
        .await
        .unwrap();

    server(&app)
        .get("/direct")
        .add_header("X-Forwarded-For", "203.0.113.7")
        .await;

    let event = next_event(&app).await;
    assert_eq!(event.client_ip.as_deref(), Some("127.0.0.1"));
    assert!(event.client_uid.unwrap().starts_with("anon-"));
}

#[tokio::test]
async fn test_deleted_link_stops_redirecting() {
    let app = common::create_test_app().await;
    app.state
        .link_service
        .create("https://example.com", Some("gone1".to_string()))
        .await
        .unwrap();
    let server = server(&app);

    assert_eq!(server.get("/gone1").await.status_code(), 307);

    app.state.link_service.delete("gone1").await.unwrap();

    server.get("/gone1").await.assert_status_not_found();
}
