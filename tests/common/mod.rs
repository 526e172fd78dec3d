#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{HeaderMap, Method, StatusCode, Uri};
use reqflow::{
    Navigator, Notifier, RawResponse, Transport, TransportClient, TransportError,
    TransportErrorKind, TransportRequest,
};
use serde_json::{Value, json};
use tokio::time::Instant;

pub const BASE_URL: &str = "https://api.example.com/v1";

pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Clone, Debug)]
pub enum Reply {
    Respond { status: u16, body: Value },
    Fail(TransportErrorKind),
}

#[derive(Clone, Debug)]
pub struct Step {
    pub delay: Duration,
    pub reply: Reply,
}

impl Step {
    pub fn ok(data: Value) -> Self {
        Self::status(200, json!({"code": 200, "message": "ok", "data": data}))
    }

    pub fn business(code: i64, message: &str) -> Self {
        Self::status(200, json!({"code": code, "message": message, "data": null}))
    }

    pub fn status(status: u16, body: Value) -> Self {
        Self {
            delay: Duration::ZERO,
            reply: Reply::Respond { status, body },
        }
    }

    pub fn fail(kind: TransportErrorKind) -> Self {
        Self {
            delay: Duration::ZERO,
            reply: Reply::Fail(kind),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone, Debug)]
pub struct Recorded {
    pub at: Instant,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Recorded {
    pub fn query(&self) -> String {
        self.uri.query().unwrap_or_default().to_owned()
    }
}

/// Replays queued steps in order, then repeats `fallback`.
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    recorded: Mutex<Vec<Recorded>>,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            fallback,
            recorded: Mutex::new(Vec::new()),
        })
    }

    pub fn always(step: Step) -> Arc<Self> {
        Self::new([], step)
    }

    /// Echoes the request query back as `data`.
    pub fn echo_query() -> Arc<Self> {
        Self::always(Step::status(200, Value::Null))
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        lock_unpoisoned(&self.recorded).clone()
    }

    pub fn calls(&self) -> usize {
        lock_unpoisoned(&self.recorded).len()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: TransportRequest) -> BoxFuture<'_, Result<RawResponse, TransportError>> {
        let step = lock_unpoisoned(&self.steps)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        lock_unpoisoned(&self.recorded).push(Recorded {
            at: Instant::now(),
            method: request.method.clone(),
            uri: request.uri.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        });

        Box::pin(async move {
            if let Some(progress) = &request.progress {
                let total = request.body.len() as u64;
                let half = total / 2;
                progress(reqflow::UploadProgress { sent: half, total });
                progress(reqflow::UploadProgress { sent: total, total });
            }
            if !step.delay.is_zero() {
                tokio::time::sleep(step.delay).await;
            }
            match step.reply {
                Reply::Respond { status, body } => {
                    // A null script body echoes the request query.
                    let body = match body {
                        Value::Null => {
                            let query = request.uri.query().unwrap_or_default().to_owned();
                            json!({"code": 200, "data": {"query": query}})
                        }
                        other => other,
                    };
                    Ok(RawResponse {
                        status: StatusCode::from_u16(status)
                            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                        headers: HeaderMap::new(),
                        body: Bytes::from(body.to_string()),
                    })
                }
                Reply::Fail(kind) => Err(TransportError::new(kind, "scripted failure")),
            }
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<String> {
        lock_unpoisoned(&self.events).clone()
    }

    fn push(&self, event: String) {
        lock_unpoisoned(&self.events).push(event);
    }
}

impl Notifier for RecordingNotifier {
    fn loading(&self, visible: bool) {
        self.push(format!("loading:{visible}"));
    }

    fn error(&self, error: &reqflow::ApiError) {
        self.push(format!("error:{}", error.message()));
    }

    fn success(&self, message: &str) {
        self.push(format!("success:{message}"));
    }

    fn notice(&self, message: &str) {
        self.push(format!("notice:{message}"));
    }
}

#[derive(Default)]
pub struct CountingNavigator {
    count: Mutex<usize>,
}

impl CountingNavigator {
    pub fn count(&self) -> usize {
        *lock_unpoisoned(&self.count)
    }
}

impl Navigator for CountingNavigator {
    fn to_login(&self) {
        *lock_unpoisoned(&self.count) += 1;
    }
}

pub fn client_with(transport: Arc<ScriptedTransport>) -> TransportClient {
    TransportClient::builder(BASE_URL)
        .transport(transport)
        .try_build()
        .expect("client builds")
}
