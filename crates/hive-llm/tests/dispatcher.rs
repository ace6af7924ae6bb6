//! Integration tests for the LLM dispatcher against stub HTTP backends
//! on localhost.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::indexing_slicing,
    clippy::panic
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use hive_llm::{
    BackendConfig, LlmConfig, LlmDispatcher, LlmError, LlmEvent, LlmRequest,
};

/// Behavior: (method, path) -> (status, body, delay before responding).
type Behavior = Arc<dyn Fn(&str, &str) -> (u16, String, u64) + Send + Sync>;

/// Spawn a minimal HTTP/1.1 stub server; every connection serves one
/// request and closes.
async fn stub_server(behavior: Behavior) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let behavior = Arc::clone(&behavior);
            tokio::spawn(async move {
                let mut buffer = Vec::new();
                let mut chunk = [0_u8; 4096];
                // Read headers.
                let header_end = loop {
                    let Ok(n) = socket.read(&mut chunk).await else {
                        return;
                    };
                    if n == 0 {
                        return;
                    }
                    buffer.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = find_header_end(&buffer) {
                        break pos;
                    }
                };
                let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
                let mut lines = head.lines();
                let request_line = lines.next().unwrap_or_default().to_string();
                let mut parts = request_line.split_whitespace();
                let method = parts.next().unwrap_or_default().to_string();
                let path = parts.next().unwrap_or_default().to_string();

                let content_length: usize = head
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        if name.eq_ignore_ascii_case("content-length") {
                            value.trim().parse().ok()
                        } else {
                            None
                        }
                    })
                    .unwrap_or(0);

                // Consume the body.
                let mut body_read = buffer.len() - header_end - 4;
                while body_read < content_length {
                    let Ok(n) = socket.read(&mut chunk).await else {
                        return;
                    };
                    if n == 0 {
                        break;
                    }
                    body_read += n;
                }

                let (status, body, delay_ms) = behavior(&method, &path);
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                let reason = if status < 400 { "OK" } else { "Error" };
                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.flush().await;
            });
        }
    });
    addr
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

fn config_for(addr: SocketAddr, max_retries: u32, retry_delay_ms: u64) -> LlmConfig {
    LlmConfig {
        backends: vec![BackendConfig {
            id: String::from("stub"),
            base_url: format!("http://{addr}"),
            weight: 1,
            max_concurrent: 10,
            enabled: true,
        }],
        max_retries,
        retry_delay_ms,
        health_check_interval_secs: 3600,
        request_timeout_ms: 5_000,
        ..LlmConfig::default()
    }
}

#[tokio::test]
async fn retry_exhaustion_delivers_max_retries_exceeded() {
    // S6: the backend 500s every generate; with max_retries=2 we expect
    // exactly 3 attempts separated by at least retry_delay, then a
    // terminal failure.
    let attempts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&attempts);
    let behavior: Behavior = Arc::new(move |method, path| {
        if method == "POST" && path == "/generate" {
            record.lock().unwrap().push(Instant::now());
            (500, String::new(), 0)
        } else {
            (200, String::from("{}"), 0)
        }
    });
    let addr = stub_server(behavior).await;

    let dispatcher = LlmDispatcher::new(config_for(addr, 2, 100));
    dispatcher.start();

    let (request_id, mut events) = dispatcher
        .submit(LlmRequest::new("hello"))
        .expect("submit");

    let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("terminal event in time")
        .expect("channel open");

    match event {
        LlmEvent::Failed { request_id: id, error } => {
            assert_eq!(id, request_id);
            assert_eq!(error, LlmError::MaxRetriesExceeded { attempts: 3 });
        }
        other => unreachable_event(&other),
    }

    let times = attempts.lock().unwrap().clone();
    assert_eq!(times.len(), 3, "expected exactly 3 attempts");
    for pair in times.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(
            gap >= Duration::from_millis(100),
            "attempts only {gap:?} apart"
        );
    }

    let stats = dispatcher.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.successful, 0);

    dispatcher.stop(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn streaming_chunks_then_completed() {
    let behavior: Behavior = Arc::new(|method, path| {
        if method == "POST" && path == "/generate" {
            let body = concat!(
                "{\"response\":\"Hello \",\"done\":false}\n",
                "{\"response\":\"world\",\"done\":true,\"eval_count\":42}\n"
            );
            (200, body.to_string(), 0)
        } else {
            (200, String::from("{}"), 0)
        }
    });
    let addr = stub_server(behavior).await;

    let dispatcher = LlmDispatcher::new(config_for(addr, 0, 100));
    dispatcher.start();

    let mut request = LlmRequest::new("stream me");
    request.stream = true;
    let (_, mut events) = dispatcher.submit(request).expect("submit");

    let mut chunks = Vec::new();
    let completed = loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("event in time")
            .expect("channel open");
        match event {
            LlmEvent::Chunk { text, .. } => chunks.push(text),
            LlmEvent::Completed { text, tokens, .. } => break (text, tokens),
            LlmEvent::Failed { error, .. } => panic_on_error(&error),
        }
    };

    assert_eq!(chunks, vec![String::from("Hello "), String::from("world")]);
    assert_eq!(completed.0, "Hello world");
    assert_eq!(completed.1, 42);

    dispatcher.stop(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn single_shot_completion() {
    let behavior: Behavior = Arc::new(|method, path| {
        if method == "POST" && path == "/generate" {
            (
                200,
                String::from("{\"response\":\"pong\",\"done\":true,\"eval_count\":7}"),
                0,
            )
        } else {
            (200, String::from("{}"), 0)
        }
    });
    let addr = stub_server(behavior).await;

    let dispatcher = LlmDispatcher::new(config_for(addr, 0, 100));
    dispatcher.start();

    let (_, mut events) = dispatcher.submit(LlmRequest::new("ping")).expect("submit");
    let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("event in time")
        .expect("channel open");

    match event {
        LlmEvent::Completed { text, tokens, .. } => {
            assert_eq!(text, "pong");
            assert_eq!(tokens, 7);
        }
        other => unreachable_event(&other),
    }

    let stats = dispatcher.stats();
    assert_eq!(stats.successful, 1);
    assert_eq!(stats.model_usage.get("llama3:latest").copied(), Some(1));

    dispatcher.stop(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn ingress_overflow_is_queue_full() {
    // Never started: nothing drains the ingress queue.
    let mut config = config_for("127.0.0.1:9".parse().unwrap(), 0, 100);
    config.queue_capacity = 1;
    let dispatcher = LlmDispatcher::new(config);

    assert!(dispatcher.submit(LlmRequest::new("one")).is_ok());
    assert_eq!(
        dispatcher.submit(LlmRequest::new("two")).err(),
        Some(LlmError::QueueFull)
    );
}

#[tokio::test]
async fn concurrency_cap_is_respected() {
    let behavior: Behavior = Arc::new(|method, path| {
        if method == "POST" && path == "/generate" {
            (
                200,
                String::from("{\"response\":\"slow\",\"done\":true}"),
                200,
            )
        } else {
            (200, String::from("{}"), 0)
        }
    });
    let addr = stub_server(behavior).await;

    let mut config = config_for(addr, 0, 100);
    if let Some(backend) = config.backends.first_mut() {
        backend.max_concurrent = 2;
    }
    let dispatcher = LlmDispatcher::new(config);
    dispatcher.start();

    let mut receivers = Vec::new();
    for index in 0..6 {
        receivers.push(
            dispatcher
                .submit(LlmRequest::new(&format!("req {index}")))
                .expect("submit"),
        );
    }

    // Sample in-flight while the batch processes.
    let mut max_observed = 0_u32;
    let sampler = async {
        let mut completed = 0_usize;
        let mut pending: Vec<_> = receivers.into_iter().map(|(_, rx)| rx).collect();
        while completed < 6 {
            let observed = dispatcher
                .in_flight()
                .get("stub")
                .copied()
                .unwrap_or(0);
            max_observed = max_observed.max(observed);
            for rx in &mut pending {
                if let Ok(event) = rx.try_recv() {
                    if matches!(event, LlmEvent::Completed { .. } | LlmEvent::Failed { .. }) {
                        completed += 1;
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(15), sampler)
        .await
        .expect("batch completes");

    assert!(max_observed >= 1, "sampler never saw work in flight");
    assert!(max_observed <= 2, "cap exceeded: {max_observed}");
    assert_eq!(dispatcher.stats().successful, 6);

    dispatcher.stop(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn cancel_before_dispatch_fails_with_cancelled() {
    let dispatcher = LlmDispatcher::new(config_for("127.0.0.1:9".parse().unwrap(), 0, 100));

    let (request_id, mut events) = dispatcher.submit(LlmRequest::new("doomed")).expect("submit");
    dispatcher.cancel(request_id);
    dispatcher.start();

    let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("event in time")
        .expect("channel open");
    match event {
        LlmEvent::Failed { error, .. } => assert_eq!(error, LlmError::Cancelled),
        other => unreachable_event(&other),
    }

    dispatcher.stop(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn disabled_backends_mean_no_backend_available() {
    let mut config = config_for("127.0.0.1:9".parse().unwrap(), 0, 100);
    if let Some(backend) = config.backends.first_mut() {
        backend.enabled = false;
    }
    let dispatcher = LlmDispatcher::new(config);
    dispatcher.start();

    let (_, mut events) = dispatcher.submit(LlmRequest::new("nowhere")).expect("submit");
    let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("event in time")
        .expect("channel open");
    match event {
        LlmEvent::Failed { error, .. } => assert_eq!(error, LlmError::NoBackendAvailable),
        other => unreachable_event(&other),
    }

    dispatcher.stop(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn refresh_models_merges_catalog() {
    let behavior: Behavior = Arc::new(|method, path| {
        if method == "GET" && path == "/models" {
            (
                200,
                String::from("{\"models\":[{\"name\":\"llama3\"},{\"name\":\"phi3\"}]}"),
                0,
            )
        } else {
            (200, String::from("{}"), 0)
        }
    });
    let addr = stub_server(behavior).await;

    let dispatcher = LlmDispatcher::new(config_for(addr, 0, 100));
    let catalog = dispatcher.refresh_models().await;
    assert_eq!(catalog.len(), 2);
    assert!(catalog.iter().any(|m| m.name == "llama3"));
    assert_eq!(dispatcher.catalog().len(), 2);
}

/// Fail the test with a readable message for an unexpected event.
fn unreachable_event(event: &LlmEvent) -> ! {
    panic!("unexpected event: {event:?}");
}

/// Fail the test with a readable message for an unexpected error.
fn panic_on_error(error: &LlmError) -> ! {
    panic!("unexpected error: {error:?}");
}
