use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use reqflow::prelude::{ErrorKind, MultipartForm, RetryPolicy, TransportClient};
use reqflow::{HyperTransport, MemorySessionStore, UploadProgress};
use serde_json::{Value, json};

#[derive(Clone)]
struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    delay: Duration,
}

impl MockResponse {
    fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_owned(), "application/json".to_owned())],
            body: body.to_string().into_bytes(),
            delay: Duration::ZERO,
        }
    }

    fn gzip_json(body: Value) -> Self {
        Self {
            status: 200,
            headers: vec![
                ("Content-Type".to_owned(), "application/json".to_owned()),
                ("Content-Encoding".to_owned(), "gzip".to_owned()),
            ],
            body: gzip_bytes(body.to_string().as_bytes()),
            delay: Duration::ZERO,
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone, Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

struct MockServer {
    base_url: String,
    served: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    join: Option<JoinHandle<()>>,
}

impl MockServer {
    fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let address = listener.local_addr().expect("read local address");
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let served = Arc::new(AtomicUsize::new(0));
        let captured = Arc::new(Mutex::new(Vec::new()));
        let served_clone = Arc::clone(&served);
        let captured_clone = Arc::clone(&captured);

        let join = thread::spawn(move || {
            let deadline = std::time::Instant::now() + Duration::from_secs(3);
            let mut response_index = 0;

            while response_index < responses.len() && std::time::Instant::now() < deadline {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        if let Ok(request) = read_request(&mut stream) {
                            captured_clone
                                .lock()
                                .expect("lock captured requests")
                                .push(request);
                        }

                        served_clone.fetch_add(1, Ordering::SeqCst);
                        let response = &responses[response_index];
                        response_index += 1;

                        if !response.delay.is_zero() {
                            thread::sleep(response.delay);
                        }

                        let _ = write_response(&mut stream, response);
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            base_url: format!("http://{address}"),
            served,
            captured,
            join: Some(join),
        }
    }

    fn requests(&self) -> Vec<CapturedRequest> {
        self.captured
            .lock()
            .expect("lock captured requests")
            .clone()
    }

    fn served_count(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<CapturedRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;

    let mut raw = Vec::new();
    loop {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);
        if find_header_end(&raw).is_some() {
            break;
        }
    }

    let header_end = find_header_end(&raw).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "malformed request without header terminator",
        )
    })?;

    let header_text = String::from_utf8_lossy(&raw[..header_end]);
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "missing request line")
    })?;
    let mut request_line_parts = request_line.split_whitespace();
    let method = request_line_parts.next().unwrap_or_default().to_owned();
    let path = request_line_parts.next().unwrap_or_default().to_owned();

    let mut headers = BTreeMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
        }
    }

    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = raw[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}

fn write_response(stream: &mut TcpStream, response: &MockResponse) -> std::io::Result<()> {
    let mut raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        status_text(response.status),
        response.body.len()
    );
    for (name, value) in &response.headers {
        raw.push_str(name);
        raw.push_str(": ");
        raw.push_str(value);
        raw.push_str("\r\n");
    }
    raw.push_str("\r\n");

    stream.write_all(raw.as_bytes())?;
    stream.write_all(&response.body)?;
    stream.flush()
}

fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .expect("write gzip source bytes should succeed");
    encoder.finish().expect("finish gzip stream should succeed")
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        401 => "Unauthorized",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn client_for(base_url: &str, retry_policy: RetryPolicy) -> TransportClient {
    TransportClient::builder(base_url)
        .retry_policy(retry_policy)
        .request_timeout(Duration::from_secs(2))
        .session_store(Arc::new(MemorySessionStore::with_token("live-token")))
        .try_build()
        .expect("client builds")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gzip_envelope_is_decoded_and_headers_are_sent() {
    let server = MockServer::start(vec![MockResponse::gzip_json(json!({
        "code": 200,
        "message": "ok",
        "data": {"id": 9, "title": "Trail run"}
    }))]);
    let client = client_for(&server.base_url, RetryPolicy::disabled());

    let activity: Value = client
        .get("/activities/9")
        .param("expand", "owner")
        .send()
        .await
        .expect("gzip response decodes");

    assert_eq!(activity, json!({"id": 9, "title": "Trail run"}));
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/activities/9?expand=owner");
    assert_eq!(
        requests[0].headers.get("authorization").map(String::as_str),
        Some("Bearer live-token")
    );
    assert_eq!(
        requests[0].headers.get("accept-encoding").map(String::as_str),
        Some("gzip, deflate")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn json_body_is_posted_with_content_type() {
    let server = MockServer::start(vec![MockResponse::json(
        200,
        json!({"code": 200, "data": {"joined": true}}),
    )]);
    let client = client_for(&server.base_url, RetryPolicy::disabled());

    let joined: Value = client
        .post("/activities/9/join")
        .json(json!({"note": "see you there"}))
        .send()
        .await
        .expect("join succeeds");

    assert_eq!(joined["joined"], true);
    let request = &server.requests()[0];
    assert_eq!(request.method, "POST");
    assert_eq!(
        request.headers.get("content-type").map(String::as_str),
        Some("application/json")
    );
    let body: Value = serde_json::from_slice(&request.body).expect("json body");
    assert_eq!(body, json!({"note": "see you there"}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_error_is_retried_over_the_wire() {
    let server = MockServer::start(vec![
        MockResponse::json(503, json!({"code": 503, "message": "warming up"})),
        MockResponse::json(200, json!({"code": 200, "data": "ready"})),
    ]);
    let client = client_for(
        &server.base_url,
        RetryPolicy::standard()
            .max_retries(2)
            .base_delay(Duration::from_millis(20)),
    );

    let status: String = client.get("/health").send().await.expect("retry succeeds");

    assert_eq!(status, "ready");
    assert_eq!(server.served_count(), 2);
    assert_eq!(client.metrics_snapshot().retries, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_server_hits_request_timeout() {
    let server = MockServer::start(vec![
        MockResponse::json(200, json!({"code": 200, "data": 1})).delayed(Duration::from_millis(500)),
    ]);
    let client = TransportClient::builder(&server.base_url)
        .retry_policy(RetryPolicy::disabled())
        .request_timeout(Duration::from_millis(100))
        .try_build()
        .expect("client builds");

    let error = client
        .get("/slow")
        .send::<u32>()
        .await
        .expect_err("request times out");

    assert_eq!(error.kind(), ErrorKind::Timeout);
    assert!(error.retryable());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_connection_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind throwaway listener");
    let address = listener.local_addr().expect("read throwaway address");
    drop(listener);

    let client = client_for(&format!("http://{address}"), RetryPolicy::disabled());
    let error = client
        .get("/unreachable")
        .send::<Value>()
        .await
        .expect_err("connection refused");

    assert_eq!(error.kind(), ErrorKind::Network);
    assert_eq!(error.code(), reqflow::TRANSPORT_FAILURE_CODE);
    assert!(error.retryable());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_response_body_is_rejected() {
    let server = MockServer::start(vec![MockResponse::json(
        200,
        json!({"code": 200, "data": "x".repeat(256)}),
    )]);
    let transport = HyperTransport::builder()
        .max_response_body_bytes(64)
        .try_build()
        .expect("transport builds");
    let client = TransportClient::builder(&server.base_url)
        .transport(Arc::new(transport))
        .retry_policy(RetryPolicy::disabled())
        .try_build()
        .expect("client builds");

    let error = client
        .get("/large")
        .send::<String>()
        .await
        .expect_err("body exceeds limit");

    assert_eq!(error.kind(), ErrorKind::Network);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn multipart_upload_streams_with_progress() {
    let server = MockServer::start(vec![MockResponse::json(
        200,
        json!({"code": 200, "data": {"url": "/files/report.csv"}}),
    )]);
    let client = client_for(&server.base_url, RetryPolicy::disabled());
    let progress = Arc::new(Mutex::new(Vec::<UploadProgress>::new()));
    let sink = Arc::clone(&progress);

    let form = MultipartForm::new()
        .text("folder", "reports")
        .bytes("file", "report.csv", "text/csv", "a,b\n1,2\n".repeat(4096));
    let uploaded: Value = client
        .upload("/files", form)
        .on_progress(move |event| sink.lock().expect("lock progress").push(event))
        .send()
        .await
        .expect("upload succeeds");

    assert_eq!(uploaded["url"], "/files/report.csv");
    let request = &server.requests()[0];
    assert!(
        request
            .headers
            .get("content-type")
            .is_some_and(|value| value.starts_with("multipart/form-data; boundary="))
    );
    let declared = request
        .headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .expect("content length is declared");
    assert_eq!(declared, request.body.len());

    let events = progress.lock().expect("lock progress").clone();
    assert!(events.len() > 1);
    let last = events.last().copied().expect("progress reported");
    assert_eq!(last.sent, declared as u64);
    assert_eq!(last.total, declared as u64);
}
