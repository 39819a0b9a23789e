//! HttpClient behavior against a local axum server.

use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    http::{header, HeaderMap, StatusCode},
    routing::get,
    Router,
};
use gondola_net::{Headers, HttpClient, NetError, NetOptions, RetryPolicy};
use tokio::net::TcpListener;
use url::Url;

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://127.0.0.1:{}", addr.port())
}

fn fast_retry_options() -> NetOptions {
    NetOptions {
        request_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
    }
}

#[tokio::test]
async fn get_returns_status_headers_and_body() {
    let base = serve(Router::new().route(
        "/manifest",
        get(|| async {
            (
                [
                    (header::CONTENT_TYPE, "application/json"),
                    (
                        header::HeaderName::from_static("expo-manifest-filters"),
                        "branch=main",
                    ),
                ],
                "{\"ok\":true}",
            )
        }),
    ))
    .await;

    let client = HttpClient::new(NetOptions::default());
    let url = Url::parse(&format!("{base}/manifest")).unwrap();
    let resp = client.get(url, None).await.unwrap();

    assert_eq!(resp.status, 200);
    assert_eq!(resp.content_type(), Some("application/json"));
    assert_eq!(resp.headers.get("expo-manifest-filters"), Some("branch=main"));
    assert_eq!(&resp.body[..], b"{\"ok\":true}");
}

#[tokio::test]
async fn request_headers_reach_the_server() {
    let base = serve(Router::new().route(
        "/echo",
        get(|headers: HeaderMap| async move {
            headers
                .get("expo-runtime-version")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("missing")
                .to_string()
        }),
    ))
    .await;

    let client = HttpClient::new(NetOptions::default());
    let mut headers = Headers::new();
    headers.insert("expo-runtime-version", "7.3");
    let url = Url::parse(&format!("{base}/echo")).unwrap();
    let resp = client.get(url, Some(&headers)).await.unwrap();
    assert_eq!(&resp.body[..], b"7.3");
}

#[tokio::test]
async fn client_error_status_is_not_retried() {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&hits);
    let base = serve(Router::new().route(
        "/missing",
        get(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                StatusCode::NOT_FOUND
            }
        }),
    ))
    .await;

    let client = HttpClient::new(fast_retry_options());
    let url = Url::parse(&format!("{base}/missing")).unwrap();
    let err = client.get(url, None).await.unwrap_err();
    assert!(matches!(err, NetError::HttpStatus { status: 404, .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn server_errors_are_retried_until_success() {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&hits);
    let base = serve(Router::new().route(
        "/flaky",
        get(move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    (StatusCode::SERVICE_UNAVAILABLE, String::new())
                } else {
                    (StatusCode::OK, "recovered".to_string())
                }
            }
        }),
    ))
    .await;

    let client = HttpClient::new(fast_retry_options());
    let url = Url::parse(&format!("{base}/flaky")).unwrap();
    let resp = client.get(url, None).await.unwrap();
    assert_eq!(&resp.body[..], b"recovered");
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}
