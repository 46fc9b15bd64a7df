use pvd_monitoring::{ExtraInfoFetcher, HttpFetcher, MonitorError, extra_info_url};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(Duration::from_secs(5)).expect("http client")
}

#[tokio::test]
async fn fetches_document_and_expires_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.example"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Expires", "Tue, 01 Jan 2030 00:00:00 GMT")
                .set_body_string(r#"{"name": "a.example", "expires": "2030-01-01T00:00:00Z"}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let template = format!("{}/{{pvd}}", server.uri());
    let url = extra_info_url(true, &template, "a.example");
    let response = fetcher().fetch(&url).await.expect("fetch");

    assert_eq!(response.status, 200);
    assert_eq!(response.expires.as_deref(), Some("Tue, 01 Jan 2030 00:00:00 GMT"));
    let (document, _) = response.into_document().expect("json body");
    assert_eq!(document["name"], json!("a.example"));
}

#[tokio::test]
async fn legacy_expire_header_is_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/b.example"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Expire", "2031-01-01T00:00:00Z")
                .set_body_string("{}"),
        )
        .mount(&server)
        .await;

    let response = fetcher()
        .fetch(&format!("{}/b.example", server.uri()))
        .await
        .expect("fetch");
    assert_eq!(response.expires.as_deref(), Some("2031-01-01T00:00:00Z"));
}

#[tokio::test]
async fn error_status_is_reported_by_into_document() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let response = fetcher()
        .fetch(&format!("{}/missing", server.uri()))
        .await
        .expect("response received");
    assert_eq!(response.status, 404);
    assert!(matches!(response.into_document(), Err(MonitorError::Status(404))));
}

#[tokio::test]
async fn unreachable_host_is_a_fetch_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let result = fetcher()
        .fetch(&format!("http://127.0.0.1:{}/pvd.json", port))
        .await;
    assert!(matches!(result, Err(MonitorError::Fetch(_))));
}
