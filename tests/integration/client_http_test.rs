// Watermark service client over real HTTP
//
// A raw TCP stub plays the DLP service: it records each request and answers
// with a canned status and body.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use shirushi::client::{
    RemoteServiceError, RemoteTaskStatus, WatermarkService, WatermarkServiceClient,
};
use shirushi::signing::{sign, RequestSigner};

const ACCESS_KEY: &str = "ak-stub";
const SECRET_KEY: &str = "sk-stub";

#[derive(Debug, Clone)]
struct Captured {
    method: String,
    target: String,
    headers: HashMap<String, String>,
    body: String,
}

enum Reply {
    Respond(u16, String),
    Hang,
}

type Log = Arc<Mutex<Vec<Captured>>>;

async fn read_request(stream: &mut TcpStream) -> Option<Captured> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();

    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).into_owned();

    Some(Captured {
        method,
        target,
        headers,
        body,
    })
}

/// Serve `replies` in order, one connection each
async fn stub(replies: Vec<Reply>) -> (String, Log) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let seen = log.clone();

    tokio::spawn(async move {
        for reply in replies {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            if let Some(captured) = read_request(&mut stream).await {
                seen.lock().push(captured);
            }
            match reply {
                Reply::Respond(status, body) => {
                    let response = format!(
                        "HTTP/1.1 {} STUB\r\nContent-Type: application/json\r\n\
                         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                }
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    });

    (endpoint, log)
}

fn client(endpoint: &str, timeout_ms: u64) -> WatermarkServiceClient {
    let signer = RequestSigner::new(ACCESS_KEY, SECRET_KEY).unwrap();
    WatermarkServiceClient::builder(endpoint, signer)
        .timeout_ms(timeout_ms)
        .build()
        .unwrap()
}

fn ok(body: Value) -> Reply {
    Reply::Respond(200, body.to_string())
}

#[tokio::test]
async fn test_embed_creation_is_signed_and_posted() {
    let (endpoint, log) = stub(vec![ok(json!({"code": 0, "data": {"task_id": "r-77"}}))]).await;

    let task_id = client(&endpoint, 2_000)
        .create_embed_task("http://files/plan.docx", "CONFIDENTIAL", "WMabc")
        .await
        .unwrap();
    assert_eq!(task_id, "r-77");

    let request = log.lock()[0].clone();
    assert_eq!(request.method, "POST");
    assert_eq!(request.target, "/dlp/file_process/add_watermark_task");
    assert_eq!(request.headers["content-type"], "application/json");
    assert_eq!(request.headers["x-hmac-algorithm"], "hmac-sha256");
    assert_eq!(request.headers["x-hmac-access-key"], ACCESS_KEY);

    let date = &request.headers["date"];
    assert!(date.ends_with(" GMT"));
    let expected = sign(
        "POST",
        "/dlp/file_process/add_watermark_task",
        "",
        ACCESS_KEY,
        date,
        SECRET_KEY,
    )
    .unwrap();
    assert_eq!(request.headers["x-hmac-signature"], expected);

    let body: Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(
        body,
        json!({"file_url": "http://files/plan.docx", "content": "CONFIDENTIAL", "biz_id": "WMabc"})
    );
}

#[tokio::test]
async fn test_extract_creation_accepts_numeric_task_id() {
    let (endpoint, log) = stub(vec![ok(json!({"task_id": 42}))]).await;

    let task_id = client(&endpoint, 2_000)
        .create_extract_task("http://files/leak.pdf", "local-1")
        .await
        .unwrap();

    assert_eq!(task_id, "42");
    let request = log.lock()[0].clone();
    assert_eq!(request.target, "/dlp/file_process/extract_watermark_task");
    let body: Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(body["biz_id"], "local-1");
    assert!(body.get("content").is_none());
}

#[tokio::test]
async fn test_query_signs_canonical_query() {
    let (endpoint, log) = stub(vec![ok(json!({
        "data": {"status": "FINISHED", "result": {"content": "owner: finance"}}
    }))])
    .await;

    let state = client(&endpoint, 2_000).query_task("r 1/2").await.unwrap();
    assert_eq!(state.status, RemoteTaskStatus::Finished);
    assert_eq!(state.extracted_text().as_deref(), Some("owner: finance"));

    let request = log.lock()[0].clone();
    assert_eq!(request.method, "GET");
    assert_eq!(request.target, "/dlp/file_process/task?task_id=r%201%2F2");
    let expected = sign(
        "GET",
        "/dlp/file_process/task",
        "task_id=r%201%2F2",
        ACCESS_KEY,
        &request.headers["date"],
        SECRET_KEY,
    )
    .unwrap();
    assert_eq!(request.headers["x-hmac-signature"], expected);
}

#[tokio::test]
async fn test_unparsable_query_body_is_unknown_status() {
    let (endpoint, _log) = stub(vec![Reply::Respond(200, "<html>gateway</html>".into())]).await;

    let state = client(&endpoint, 2_000).query_task("r-1").await.unwrap();
    assert!(matches!(state.status, RemoteTaskStatus::Unknown(_)));
    assert!(!state.status.is_settled());
}

#[tokio::test]
async fn test_error_statuses_keep_body_and_classification() {
    let (endpoint, _log) = stub(vec![
        Reply::Respond(503, r#"{"message":"overloaded"}"#.into()),
        Reply::Respond(401, r#"{"message":"bad signature"}"#.into()),
    ])
    .await;
    let client = client(&endpoint, 2_000);

    let err = client.query_task("r-1").await.unwrap_err();
    assert!(matches!(err, RemoteServiceError::Status { status: 503, .. }));
    assert!(err.is_transient());

    let err = client
        .create_embed_task("http://f/a.docx", "x", "b")
        .await
        .unwrap_err();
    assert!(!err.is_transient());
    assert!(err.to_string().contains("401"));
    assert!(err.to_string().contains("bad signature"));
}

#[tokio::test]
async fn test_creation_without_task_id_is_rejected() {
    let (endpoint, _log) = stub(vec![ok(json!({"code": 0, "data": {}}))]).await;

    let err = client(&endpoint, 2_000)
        .create_extract_task("http://f/a.pdf", "b")
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteServiceError::MissingTaskId(_)));
}

#[tokio::test]
async fn test_slow_service_times_out() {
    let (endpoint, _log) = stub(vec![Reply::Hang]).await;

    let err = client(&endpoint, 150).query_task("r-1").await.unwrap_err();
    assert!(
        matches!(err, RemoteServiceError::Timeout { timeout_ms: 150, .. }),
        "{err}"
    );
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_refused_connection_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let err = client(&endpoint, 1_000).query_task("r-1").await.unwrap_err();
    assert!(matches!(err, RemoteServiceError::Transport(_)), "{err}");
    assert!(err.is_transient());
}
