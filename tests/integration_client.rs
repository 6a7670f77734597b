use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use reqbuild::prelude::{Client, Error, ErrorCode, MemoryCookieStore, TransportErrorKind};
use serde::Deserialize;
use serde_json::{Value, json};

struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    delay: Duration,
}

impl MockResponse {
    fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into().into_bytes(),
            delay: Duration::ZERO,
        }
    }

    fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

enum Action {
    Respond(MockResponse),
    /// Accept the connection, read the request, then close without
    /// answering: a transport-level failure from the client's view.
    DropConnection,
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
    fn start(actions: Vec<Action>) -> Self {
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
            let deadline = Instant::now() + Duration::from_secs(3);
            let mut action_index = 0;

            while action_index < actions.len() && Instant::now() < deadline {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        if let Ok(request) = read_request(&mut stream) {
                            captured_clone
                                .lock()
                                .expect("lock captured requests")
                                .push(request);
                        }

                        served_clone.fetch_add(1, Ordering::SeqCst);
                        let action = &actions[action_index];
                        action_index += 1;

                        match action {
                            Action::Respond(response) => {
                                if !response.delay.is_zero() {
                                    thread::sleep(response.delay);
                                }
                                let _ = write_response(&mut stream, response);
                            }
                            Action::DropConnection => drop(stream),
                        }
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
        if line.is_empty() {
            continue;
        }
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

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn quick_client(base_url: &str) -> Client {
    Client::builder(base_url)
        .timeout(Duration::from_secs(2))
        .retry_wait(Duration::ZERO)
        .try_build()
        .expect("build client")
}

#[test]
fn get_with_query_targets_the_resolved_url() {
    let server = MockServer::start(vec![Action::Respond(MockResponse::new(200, "[]"))]);
    let client = quick_client(&server.base_url);

    let response = client
        .get("users")
        .query_param("page", "1")
        .send()
        .expect("send");

    assert!(response.is_ok());
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/users?page=1");
}

#[test]
fn json_record_body_is_negotiated_and_sent_canonically() {
    let server = MockServer::start(vec![Action::Respond(MockResponse::new(201, "{}"))]);
    let client = quick_client(&server.base_url);

    client
        .post("users")
        .json(&json!({"name": "John", "age": 30}))
        .expect("json body")
        .send()
        .expect("send");

    let requests = server.requests();
    assert_eq!(requests[0].headers.get("content-type").unwrap(), "application/json");
    let sent: Value = serde_json::from_slice(&requests[0].body).expect("sent body is json");
    assert_eq!(sent, json!({"age": 30, "name": "John"}));
}

#[test]
fn form_fields_are_sent_as_an_alphabetical_urlencoded_body() {
    let server = MockServer::start(vec![Action::Respond(MockResponse::new(200, "{}"))]);
    let client = quick_client(&server.base_url);

    client
        .post("login")
        .form_field("user", "john doe")
        .form_field("pass", "a&b")
        .send()
        .expect("send");

    let requests = server.requests();
    assert_eq!(
        requests[0].headers.get("content-type").unwrap(),
        "application/x-www-form-urlencoded"
    );
    assert_eq!(requests[0].body, b"pass=a%26b&user=john+doe");
}

#[test]
fn default_headers_cookies_and_auth_ride_every_request() {
    let server = MockServer::start(vec![Action::Respond(MockResponse::new(200, "{}"))]);
    let client = Client::builder(&server.base_url)
        .timeout(Duration::from_secs(2))
        .try_default_header("x-client", "integration")
        .expect("default header")
        .bearer_auth("token-123")
        .expect("bearer auth")
        .cookie("session", "abc")
        .try_build()
        .expect("build client");

    client.get("me").cookie("theme", "dark").send().expect("send");

    let requests = server.requests();
    let headers = &requests[0].headers;
    assert_eq!(headers.get("x-client").unwrap(), "integration");
    assert_eq!(headers.get("authorization").unwrap(), "Bearer token-123");
    assert_eq!(headers.get("cookie").unwrap(), "session=abc; theme=dark");
    assert!(headers.get("user-agent").unwrap().starts_with("reqbuild/"));
}

#[test]
fn transient_connection_drops_are_retried_until_success() {
    let server = MockServer::start(vec![
        Action::DropConnection,
        Action::DropConnection,
        Action::Respond(MockResponse::new(200, "recovered")),
    ]);
    let client = Client::builder(&server.base_url)
        .timeout(Duration::from_secs(2))
        .retry_count(3)
        .retry_wait(Duration::ZERO)
        .try_build()
        .expect("build client");

    let response = client.get("flaky").send().expect("third attempt succeeds");
    assert_eq!(response.text().expect("text"), "recovered");
    assert_eq!(server.served_count(), 3);
}

#[test]
fn permanent_connection_drops_exhaust_the_retry_budget() {
    let server = MockServer::start(vec![
        Action::DropConnection,
        Action::DropConnection,
        Action::DropConnection,
    ]);
    let client = Client::builder(&server.base_url)
        .timeout(Duration::from_secs(2))
        .retry_count(3)
        .retry_wait(Duration::ZERO)
        .try_build()
        .expect("build client");

    match client.get("down").send() {
        Err(Error::RequestExecution { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected RequestExecution, got {other:?}"),
    }
    assert_eq!(server.served_count(), 3);
}

#[test]
fn error_statuses_are_successful_exchanges_not_retries() {
    let server = MockServer::start(vec![Action::Respond(MockResponse::new(
        503,
        r#"{"error":"overloaded"}"#,
    ))]);
    let client = Client::builder(&server.base_url)
        .timeout(Duration::from_secs(2))
        .retry_count(3)
        .retry_wait(Duration::ZERO)
        .try_build()
        .expect("build client");

    let response = client.get("busy").send().expect("response is not an error");
    assert_eq!(response.status().as_u16(), 503);
    assert!(!response.is_ok());
    assert_eq!(server.served_count(), 1, "received statuses must not retry");

    let body: Value = response.json().expect("body decodes");
    assert_eq!(body["error"], "overloaded");
}

#[test]
fn slow_responses_time_out_as_transport_failures() {
    let server = MockServer::start(vec![Action::Respond(
        MockResponse::new(200, "too late").delayed(Duration::from_millis(800)),
    )]);
    let client = Client::builder(&server.base_url)
        .timeout(Duration::from_millis(150))
        .retry_count(1)
        .try_build()
        .expect("build client");

    match client.get("slow").send() {
        Err(error) => {
            assert_eq!(error.code(), ErrorCode::RequestExecution);
            assert_eq!(error.transport_kind(), Some(TransportErrorKind::Timeout));
        }
        Ok(_) => panic!("expected a timeout"),
    }
}

#[test]
fn cookie_store_carries_server_cookies_to_the_next_request() {
    let server = MockServer::start(vec![
        Action::Respond(MockResponse::new(200, "{}").header("Set-Cookie", "session=xyz; Path=/")),
        Action::Respond(MockResponse::new(200, "{}")),
    ]);
    let client = Client::builder(&server.base_url)
        .timeout(Duration::from_secs(2))
        .cookie_store(Arc::new(MemoryCookieStore::new()))
        .try_build()
        .expect("build client");

    let login = client.get("login").send().expect("login");
    assert_eq!(login.cookies().len(), 1);

    client.get("me").send().expect("follow-up");
    let requests = server.requests();
    assert_eq!(requests[1].headers.get("cookie").unwrap(), "session=xyz");
}

#[test]
fn typed_decode_and_result_transform_compose() {
    #[derive(Debug, Deserialize)]
    struct Wrapped {
        name: String,
    }

    let server = MockServer::start(vec![Action::Respond(MockResponse::new(
        200,
        r#"{"data":{"name":"John"}}"#,
    ))]);
    let client = Client::builder(&server.base_url)
        .timeout(Duration::from_secs(2))
        .result_transform(|body| {
            let envelope: Value = serde_json::from_str(body)?;
            Ok(envelope["data"].to_string())
        })
        .try_build()
        .expect("build client");

    let unwrapped: Wrapped = client.get("user").send_json().expect("decode");
    assert_eq!(unwrapped.name, "John");
}
