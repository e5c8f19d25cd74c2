//! Progress events and the side channel that carries them.
//!
//! The orchestrator reports every state transition and per-article step as a
//! [`ProgressEvent`] to an optional [`Observer`]. [`channel`] pairs a
//! [`BroadcastObserver`] with an [`EventStream`] over a bounded
//! `tokio::sync::broadcast` queue:
//!
//! - the producer never blocks; when the queue is full the oldest events are
//!   overwritten and the consumer is told how many it missed
//! - a consumer that waits longer than the keep-alive interval receives a
//!   synthetic `ping` event
//!
//! Events render as Server-Sent-Events frames (`data: {json}\n\n`) and as run
//! log lines (`[<rfc3339>] step | status | message | detail`).

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::tools::Tool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Start,
    Done,
    Error,
    Info,
    /// Keep-alive for idle consumers; never produced by the pipeline.
    Ping,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Done => "done",
            Self::Error => "error",
            Self::Info => "info",
            Self::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub step_id: String,
    pub status: EventStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl ProgressEvent {
    pub fn new(step_id: impl Into<String>, status: EventStatus, message: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn ping() -> Self {
        Self::new("ping", EventStatus::Ping, "")
    }

    pub fn is_ping(&self) -> bool {
        self.status == EventStatus::Ping
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// One Server-Sent-Events frame.
    pub fn sse_frame(&self) -> String {
        format!("data: {}\n\n", self.to_json())
    }

    /// Last event a run produces: `complete` on success, `error` otherwise.
    pub fn ends_run(&self) -> bool {
        matches!(self.step_id.as_str(), "complete" | "error")
    }

    /// One line of the per-run log file.
    pub fn log_line(&self, at: DateTime<Utc>) -> String {
        let detail = self
            .detail
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_default();
        format!(
            "[{}] {} | {} | {} | {}",
            at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.step_id,
            self.status.as_str(),
            self.message,
            detail
        )
    }
}

/// Receives progress events synchronously from the pipeline.
pub trait Observer {
    fn notify(&self, event: &ProgressEvent);
}

impl<F: Fn(&ProgressEvent)> Observer for F {
    fn notify(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Emits events to an optional observer, swallowing observer panics.
#[derive(Clone, Copy)]
pub struct Emitter<'a> {
    observer: Option<&'a dyn Observer>,
}

impl<'a> Emitter<'a> {
    pub fn new(observer: Option<&'a dyn Observer>) -> Self {
        Self { observer }
    }

    pub fn silent() -> Self {
        Self { observer: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        let Some(observer) = self.observer else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| observer.notify(&event))).is_err() {
            warn!(step_id = %event.step_id, "Progress observer panicked; event ignored");
        }
    }

    pub fn start(&self, step_id: impl Into<String>, message: impl Into<String>) {
        self.emit(ProgressEvent::new(step_id, EventStatus::Start, message));
    }

    pub fn done(&self, step_id: impl Into<String>, message: impl Into<String>) {
        self.emit(ProgressEvent::new(step_id, EventStatus::Done, message));
    }

    pub fn done_with(&self, step_id: impl Into<String>, message: impl Into<String>, detail: Value) {
        self.emit(ProgressEvent::new(step_id, EventStatus::Done, message).with_detail(detail));
    }

    pub fn error(&self, step_id: impl Into<String>, message: impl Into<String>) {
        self.emit(ProgressEvent::new(step_id, EventStatus::Error, message));
    }

    pub fn info(&self, step_id: impl Into<String>, message: impl Into<String>) {
        self.emit(ProgressEvent::new(step_id, EventStatus::Info, message));
    }

    /// Announce a tool call made on behalf of `step_id`.
    pub fn tool_call<T: Tool>(&self, step_id: impl Into<String>, tool: &T, target: &str) {
        self.info(step_id, format!("{}: {target}", tool.capability()));
    }
}

/// Producer half of [`channel`].
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    tx: broadcast::Sender<ProgressEvent>,
}

impl Observer for BroadcastObserver {
    fn notify(&self, event: &ProgressEvent) {
        // No subscriber is not an error: events are simply not observed.
        let _ = self.tx.send(event.clone());
    }
}

impl BroadcastObserver {
    /// A new consumer that sees events sent from now on.
    pub fn subscribe(&self, keepalive: Duration) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
            keepalive,
        }
    }
}

/// Consumer half of [`channel`].
#[derive(Debug)]
pub struct EventStream {
    rx: broadcast::Receiver<ProgressEvent>,
    keepalive: Duration,
}

/// A bounded drop-oldest event channel.
pub fn channel(capacity: usize, keepalive: Duration) -> (BroadcastObserver, EventStream) {
    let (tx, rx) = broadcast::channel(capacity.max(1));
    (BroadcastObserver { tx }, EventStream { rx, keepalive })
}

impl EventStream {
    /// Next event, a `ping` after an idle keep-alive interval, or `None`
    /// once every producer is gone.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        match timeout(self.keepalive, self.rx.recv()).await {
            Err(_) => Some(ProgressEvent::ping()),
            Ok(Ok(event)) => Some(event),
            Ok(Err(RecvError::Lagged(skipped))) => {
                warn!(skipped, "Event consumer lagged; oldest events dropped");
                Some(
                    ProgressEvent::new(
                        "stream",
                        EventStatus::Info,
                        format!("{skipped} events dropped"),
                    )
                    .with_detail(serde_json::json!({ "dropped": skipped })),
                )
            }
            Ok(Err(RecvError::Closed)) => None,
        }
    }
}

/// Drain `stream` until the producer side closes.
///
/// Non-ping events are appended to `log_path` and handed to `on_event`.
/// Returns the number of events logged.
pub async fn consume<F>(mut stream: EventStream, log_path: &Path, mut on_event: F) -> Result<usize>
where
    F: FnMut(&ProgressEvent),
{
    if let Some(parent) = log_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::io(parent, e))?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await
        .map_err(|e| PipelineError::io(log_path, e))?;

    let mut logged = 0;
    while let Some(event) = stream.next().await {
        if event.is_ping() {
            debug!("keep-alive");
            continue;
        }
        let line = format!("{}\n", event.log_line(Utc::now()));
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| PipelineError::io(log_path, e))?;
        on_event(&event);
        logged += 1;
    }
    file.flush().await.map_err(|e| PipelineError::io(log_path, e))?;
    Ok(logged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::file::FileReader;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[test]
    fn sse_frame_and_log_line_formats() {
        let event = ProgressEvent::new("article_1_verify", EventStatus::Done, "3 claims")
            .with_detail(serde_json::json!({"claims": 3}));
        assert_eq!(
            event.sse_frame(),
            "data: {\"step_id\":\"article_1_verify\",\"status\":\"done\",\"message\":\"3 claims\",\"detail\":{\"claims\":3}}\n\n"
        );
        let at = Utc.with_ymd_and_hms(2025, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(
            event.log_line(at),
            "[2025-05-06T07:08:09Z] article_1_verify | done | 3 claims | {\"claims\":3}"
        );
    }

    #[test]
    fn observer_panics_are_swallowed() {
        let seen = Mutex::new(Vec::new());
        let observer = |e: &ProgressEvent| {
            if e.step_id == "boom" {
                panic!("observer failure");
            }
            seen.lock().unwrap().push(e.step_id.clone());
        };
        let emitter = Emitter::new(Some(&observer));
        emitter.start("boom", "x");
        emitter.done("after", "y");
        assert_eq!(*seen.lock().unwrap(), vec!["after".to_string()]);
    }

    #[test]
    fn tool_calls_are_info_events_named_by_capability() {
        let seen = Mutex::new(Vec::new());
        let observer = |e: &ProgressEvent| seen.lock().unwrap().push(e.clone());
        Emitter::new(Some(&observer)).tool_call("article_1_analyze", &FileReader, "plan.md");
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].status, EventStatus::Info);
        assert_eq!(seen[0].message, "file_read: plan.md");
    }

    #[tokio::test]
    async fn full_queue_drops_oldest_and_reports_lag() {
        let (tx, mut stream) = channel(2, Duration::from_secs(5));
        for i in 0..5 {
            tx.notify(&ProgressEvent::new(format!("s{i}"), EventStatus::Info, ""));
        }
        let lag = stream.next().await.unwrap();
        assert_eq!(lag.step_id, "stream");
        assert_eq!(lag.detail, Some(serde_json::json!({"dropped": 3})));
        assert_eq!(stream.next().await.unwrap().step_id, "s3");
        assert_eq!(stream.next().await.unwrap().step_id, "s4");
        drop(tx);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn late_subscribers_see_only_new_events() {
        let (tx, _first) = channel(4, Duration::from_secs(5));
        tx.notify(&ProgressEvent::new("before", EventStatus::Info, ""));
        let mut late = tx.subscribe(Duration::from_secs(5));
        tx.notify(&ProgressEvent::new("complete", EventStatus::Done, "finished"));
        let event = late.next().await.unwrap();
        assert_eq!(event.step_id, "complete");
        assert!(event.ends_run());
    }

    #[tokio::test]
    async fn idle_consumer_gets_ping() {
        let (_tx, mut stream) = channel(4, Duration::from_millis(10));
        assert!(stream.next().await.unwrap().is_ping());
    }

    #[tokio::test]
    async fn consume_writes_log_until_closed() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("runs").join("run_test.log");
        let (tx, stream) = channel(8, Duration::from_secs(5));
        tx.notify(&ProgressEvent::new("run_dir", EventStatus::Done, "created"));
        tx.notify(&ProgressEvent::new("complete", EventStatus::Done, "finished"));
        drop(tx);

        let mut seen = Vec::new();
        let logged = consume(stream, &log_path, |e| seen.push(e.step_id.clone()))
            .await
            .unwrap();
        assert_eq!(logged, 2);
        assert_eq!(seen, vec!["run_dir", "complete"]);
        let log = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(log.lines().next().unwrap().contains("] run_dir | done | created | "));
    }
}
