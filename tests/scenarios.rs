use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use resilient_fetch::modules::events::{EventHandler, FetchEvent};
use resilient_fetch::{
    BackoffPolicy, FetchError, Identity, IdentityRotator, PacingWindow, ResilientFetcher,
    SessionWarmup, Transport, TransportError, TransportRequest, TransportResponse, WarmupContext,
};

type Reply = Result<(u16, &'static str), &'static str>;

/// Plays back scripted replies in order; the final reply repeats.
struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    sent: Arc<Mutex<Vec<TransportRequest>>>,
}

impl ScriptedTransport {
    fn new(replies: Vec<Reply>) -> (Self, Arc<Mutex<Vec<TransportRequest>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = Self {
            replies: Mutex::new(replies.into()),
            sent: sent.clone(),
        };
        (transport, sent)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        self.sent.lock().unwrap().push(request.clone());
        let reply = {
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                *replies.front().unwrap()
            }
        };
        match reply {
            Ok((status, body)) => Ok(TransportResponse {
                status,
                body: body.to_string(),
                url: request.url.clone(),
            }),
            Err(message) => Err(TransportError::Network(message.to_string())),
        }
    }

    async fn close(&mut self) {}
}

struct CountingRotator {
    rotations: Arc<AtomicUsize>,
}

#[async_trait]
impl IdentityRotator for CountingRotator {
    fn current(&self) -> Identity {
        let generation = self.rotations.load(Ordering::SeqCst) as u64;
        Identity::via_proxy(format!("socks5h://127.0.0.1:{}", 9000 + generation), generation)
    }

    async fn rotate(&mut self) {
        self.rotations.fetch_add(1, Ordering::SeqCst);
    }
}

struct CountingWarmup {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl SessionWarmup for CountingWarmup {
    async fn warm(&self, _ctx: WarmupContext<'_>) {
        self.runs.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct EventLog(Mutex<Vec<String>>);

impl EventHandler for EventLog {
    fn handle(&self, event: &FetchEvent) {
        let label = match event {
            FetchEvent::PreRequest(_) => "pre",
            FetchEvent::PostResponse(_) => "post",
            FetchEvent::Retry(_) => "retry",
            FetchEvent::IdentityRotated(_) => "rotate",
            FetchEvent::WarmedUp(_) => "warm",
            FetchEvent::Failed(_) => "failed",
        };
        self.0.lock().unwrap().push(label.to_string());
    }
}

struct Harness {
    fetcher: ResilientFetcher,
    sent: Arc<Mutex<Vec<TransportRequest>>>,
    rotations: Arc<AtomicUsize>,
    warmups: Arc<AtomicUsize>,
    events: Arc<EventLog>,
}

async fn harness(replies: Vec<Reply>, max_attempts: usize) -> Harness {
    let (transport, sent) = ScriptedTransport::new(replies);
    let rotations = Arc::new(AtomicUsize::new(0));
    let warmups = Arc::new(AtomicUsize::new(0));
    let events = Arc::new(EventLog::default());

    let fetcher = ResilientFetcher::builder()
        .with_max_attempts(max_attempts)
        .with_transport(Box::new(transport))
        .with_identity_rotator(Box::new(CountingRotator {
            rotations: rotations.clone(),
        }))
        .with_warmup(Box::new(CountingWarmup {
            runs: warmups.clone(),
        }))
        .with_event_handler(events.clone())
        .build()
        .await
        .unwrap();

    Harness {
        fetcher,
        sent,
        rotations,
        warmups,
        events,
    }
}

const URL: &str = "https://shop.example/item/42";

#[tokio::test(start_paused = true)]
async fn first_attempt_success_returns_body() {
    let mut h = harness(vec![Ok((200, "<html><body>ok</body></html>"))], 3).await;

    let body = h.fetcher.fetch(URL, true, None).await.unwrap();

    assert_eq!(body, "<html><body>ok</body></html>");
    assert_eq!(h.sent.lock().unwrap().len(), 1);
    assert_eq!(h.rotations.load(Ordering::SeqCst), 0);
    assert_eq!(h.warmups.load(Ordering::SeqCst), 0);
    assert_eq!(*h.events.0.lock().unwrap(), vec!["pre", "post"]);
}

#[tokio::test(start_paused = true)]
async fn transient_errors_rotate_and_rewarm_before_success() {
    let mut h = harness(
        vec![Ok((503, "")), Ok((503, "")), Ok((200, "ok"))],
        4,
    )
    .await;

    let body = h.fetcher.fetch(URL, true, None).await.unwrap();

    assert_eq!(body, "ok");
    assert_eq!(h.sent.lock().unwrap().len(), 3);
    assert_eq!(h.rotations.load(Ordering::SeqCst), 2);
    assert_eq!(h.warmups.load(Ordering::SeqCst), 2);

    let identities: Vec<u64> = h
        .sent
        .lock()
        .unwrap()
        .iter()
        .map(|request| request.identity.generation())
        .collect();
    assert_eq!(identities, vec![0, 1, 2]);

    assert_eq!(
        *h.events.0.lock().unwrap(),
        vec![
            "pre", "post", "rotate", "warm", "retry", "pre", "post", "rotate", "warm", "retry",
            "pre", "post",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn captcha_page_is_a_soft_block_after_budget() {
    let mut h = harness(
        vec![Ok((200, "Please complete the captcha to continue"))],
        3,
    )
    .await;

    let err = h.fetcher.fetch(URL, true, None).await.unwrap_err();

    assert!(err.is_soft_block());
    assert_eq!(err.attempts(), Some(3));
    assert_eq!(err.status(), Some(200));
    assert_eq!(h.sent.lock().unwrap().len(), 3);
    assert_eq!(h.rotations.load(Ordering::SeqCst), 2);
    assert_eq!(h.events.0.lock().unwrap().last().map(String::as_str), Some("failed"));
}

#[tokio::test(start_paused = true)]
async fn persistent_network_errors_carry_no_status() {
    let mut h = harness(vec![Err("connection refused")], 2).await;

    let err = h.fetcher.fetch(URL, true, None).await.unwrap_err();

    match &err {
        FetchError::Network {
            attempts,
            last_status,
            message,
            ..
        } => {
            assert_eq!(*attempts, 2);
            assert_eq!(*last_status, None);
            assert!(message.contains("connection refused"));
        }
        other => panic!("expected network failure, got {other:?}"),
    }
    assert_eq!(err.status(), None);
    assert_eq!(h.sent.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn not_found_fails_immediately() {
    let mut h = harness(vec![Ok((404, "missing")), Ok((200, "unreachable"))], 5).await;

    let err = h.fetcher.fetch(URL, true, None).await.unwrap_err();

    assert!(matches!(
        err,
        FetchError::FatalHttp {
            status: 404,
            attempts: 1,
            ..
        }
    ));
    assert_eq!(h.sent.lock().unwrap().len(), 1);
    assert_eq!(h.rotations.load(Ordering::SeqCst), 0);
    assert_eq!(h.warmups.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn no_rotation_when_caller_opts_out() {
    let mut h = harness(vec![Ok((502, "")), Ok((200, "ok"))], 3).await;

    let body = h.fetcher.fetch(URL, false, None).await.unwrap();

    assert_eq!(body, "ok");
    assert_eq!(h.rotations.load(Ordering::SeqCst), 0);
    assert_eq!(h.warmups.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn attempts_never_exceed_budget() {
    for max_attempts in 1..=4 {
        let mut h = harness(vec![Ok((500, ""))], max_attempts).await;
        let err = h.fetcher.fetch(URL, true, None).await.unwrap_err();

        assert!(matches!(err, FetchError::RetryableHttp { status: 500, .. }));
        assert_eq!(err.attempts(), Some(max_attempts));
        assert_eq!(h.sent.lock().unwrap().len(), max_attempts);
        assert_eq!(h.rotations.load(Ordering::SeqCst), max_attempts - 1);
    }
}

#[tokio::test(start_paused = true)]
async fn referer_shapes_navigation_headers() {
    let mut h = harness(vec![Ok((200, "ok"))], 1).await;

    h.fetcher
        .fetch(URL, true, Some("https://shop.example/search?q=42"))
        .await
        .unwrap();
    h.fetcher
        .fetch(URL, true, Some("https://search.example/"))
        .await
        .unwrap();
    h.fetcher.fetch(URL, true, None).await.unwrap();

    let sent = h.sent.lock().unwrap();
    assert_eq!(
        sent[0].headers.get("referer"),
        Some("https://shop.example/search?q=42")
    );
    assert_eq!(sent[0].headers.get("sec-fetch-site"), Some("same-origin"));
    assert_eq!(sent[1].headers.get("sec-fetch-site"), Some("cross-site"));
    assert_eq!(sent[2].headers.get("referer"), Some("https://shop.example/"));
    assert_eq!(sent[2].headers.get("sec-fetch-site"), Some("none"));
    for request in sent.iter() {
        assert!(request.headers.contains("user-agent"));
        assert_eq!(request.headers.get("sec-fetch-mode"), Some("navigate"));
    }
}

#[tokio::test(start_paused = true)]
async fn pacing_and_backoff_elapse_before_retries() {
    let (transport, sent) = ScriptedTransport::new(vec![Ok((503, "")), Ok((200, "ok"))]);
    let mut fetcher = ResilientFetcher::builder()
        .with_pacing(PacingWindow::new(
            Duration::from_secs(2),
            Duration::from_secs(2),
        ))
        .with_backoff(BackoffPolicy::new(2.0, Duration::from_secs(30)).with_jitter(Duration::ZERO))
        .with_transport(Box::new(transport))
        .disable_warmup()
        .build()
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    fetcher.fetch(URL, false, None).await.unwrap();

    // 2s pacing plus 2^1 backoff after the first failure.
    assert_eq!(started.elapsed(), Duration::from_secs(4));
    assert_eq!(sent.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn fetch_after_close_is_rejected() {
    let mut h = harness(vec![Ok((200, "ok"))], 3).await;

    h.fetcher.close().await;
    let err = h.fetcher.fetch(URL, true, None).await.unwrap_err();

    assert!(matches!(err, FetchError::Closed));
    assert!(h.sent.lock().unwrap().is_empty());
}
