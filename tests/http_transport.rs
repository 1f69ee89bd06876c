//! reqwest transport against a mock HTTP server.

use std::sync::Arc;
use std::time::Duration;

use httpmock::MockServer;
use quarry::config::TransportSettings;
use quarry::{
    FilterSet, HttpTransport, MutationMethod, MutationOptions, QueryClient, QueryContext,
    QueryError, QueryOptions, Transport, TransportRequest,
};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize, PartialEq)]
struct Post {
    id: i64,
    title: String,
}

fn transport(server: &MockServer) -> HttpTransport {
    HttpTransport::new(&TransportSettings {
        base_url: server.base_url(),
        timeout: Duration::from_secs(5),
    })
    .expect("transport")
}

#[tokio::test]
async fn get_sends_query_parameters() -> Result<(), QueryError> {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET")
            .path("/api/posts")
            .query_param("status", "published")
            .query_param("limit", "10")
            .header("accept", "application/json");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"[{"id":1,"title":"hello"}]"#);
    });

    let payload = transport(&server)
        .send(TransportRequest::get("/api/posts").params(vec![
            ("limit".into(), "10".into()),
            ("status".into(), "published".into()),
        ]))
        .await?;

    mock.assert();
    assert_eq!(payload, json!([{ "id": 1, "title": "hello" }]));
    Ok(())
}

#[tokio::test]
async fn error_status_keeps_status_and_body() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/api/posts");
        then.status(500).body(r#"{"error":"database unavailable"}"#);
    });

    let err = transport(&server)
        .send(TransportRequest::get("/api/posts"))
        .await
        .expect_err("500 should fail");

    match err {
        QueryError::Transport { status, body, .. } => {
            assert_eq!(status, Some(500));
            assert_eq!(body.as_deref(), Some(r#"{"error":"database unavailable"}"#));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn post_sends_json_body() -> Result<(), QueryError> {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("POST")
            .path("/api/posts")
            .header("content-type", "application/json")
            .json_body_includes(r#"{"title":"draft"}"#);
        then.status(201)
            .header("content-type", "application/json")
            .body(r#"{"id":7,"title":"draft"}"#);
    });

    let payload = transport(&server)
        .send(TransportRequest::new(Method::POST, "api/posts").body(json!({ "title": "draft" })))
        .await?;

    mock.assert();
    assert_eq!(payload["id"], 7);
    Ok(())
}

#[tokio::test]
async fn empty_body_is_null() -> Result<(), QueryError> {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("DELETE").path("/api/posts/7");
        then.status(204);
    });

    let payload = transport(&server)
        .send(TransportRequest::new(Method::DELETE, "/api/posts/7"))
        .await?;

    mock.assert();
    assert_eq!(payload, Value::Null);
    Ok(())
}

#[tokio::test]
async fn invalid_json_is_payload_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/api/posts");
        then.status(200).body("<html>not json</html>");
    });

    let err = transport(&server)
        .send(TransportRequest::get("/api/posts"))
        .await
        .expect_err("html should not decode");
    assert!(matches!(err, QueryError::Payload { .. }));
}

#[tokio::test]
async fn relative_url_without_base_is_rejected() {
    let transport = HttpTransport::new(&TransportSettings::default()).expect("transport");

    let err = transport
        .send(TransportRequest::get("/api/posts"))
        .await
        .expect_err("relative URL needs a base");
    assert!(matches!(err, QueryError::Configuration { .. }));
}

#[tokio::test]
async fn cancelled_signal_aborts_request() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/api/slow");
        then.status(200).delay(Duration::from_secs(2)).body("[]");
    });

    let token = CancellationToken::new();
    token.cancel();
    let err = transport(&server)
        .send(TransportRequest::get("/api/slow").signal(Some(token)))
        .await
        .expect_err("cancelled");
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn bindings_round_trip_through_http() -> Result<(), QueryError> {
    let server = MockServer::start();
    let list = server.mock(|when, then| {
        when.method("GET").path("/api/posts").query_param("tag", "rust");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"[{"id":1,"title":"hello"}]"#);
    });
    let update = server.mock(|when, then| {
        when.method("PUT")
            .path("/api/posts/1")
            .json_body_includes(r#"{"title":"renamed"}"#);
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"id":1,"title":"renamed"}"#);
    });

    let client = QueryClient::default();
    let context = QueryContext::new(Arc::new(client), Arc::new(transport(&server)));
    let posts = context.query::<Vec<Post>>(
        QueryOptions::new("posts", "/api/posts").filters(FilterSet::new().with("tag", "rust")),
    );

    let state = posts.run().await;
    assert_eq!(
        state.data.as_deref(),
        Some(&vec![Post {
            id: 1,
            title: "hello".into()
        }])
    );
    posts.run().await;
    list.assert_hits(1);

    let replace = context.mutation::<Post, Value>(
        MutationOptions::new()
            .url("/api/posts/1")
            .method(MutationMethod::Replace)
            .invalidates(["posts"]),
    )?;
    replace.mutate(json!({ "title": "renamed" })).await?;
    update.assert();

    assert!(posts.state().is_stale);
    posts.run().await;
    list.assert_hits(2);
    Ok(())
}
