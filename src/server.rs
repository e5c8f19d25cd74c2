//! Local monitoring server: start runs over HTTP and watch their progress.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /run` | start a run on a background worker (one at a time) |
//! | `GET /events` | Server-Sent-Events stream of the current run |
//! | `GET /api/file?path=` | read a report or run log under the output dirs |
//! | `GET /api/config` | model and search settings in use |
//!
//! Each run gets its own bounded event channel. A consumer writes the run
//! log and forwards every event to the server-wide hub that `/events`
//! subscribers read from, so a slow browser never blocks the pipeline. The
//! stream ends after the run's `complete` or `error` event; an idle stream
//! receives a `ping` every keep-alive interval.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, instrument, warn};

use crate::api::AskAsync;
use crate::cli::{DEFAULT_MAX_ARTICLES, DEFAULT_PORTAL, clamp_articles};
use crate::config::{LlmConfig, Settings};
use crate::error::{PipelineError, Result};
use crate::events::{self, BroadcastObserver, EventStatus, Observer, ProgressEvent};
use crate::orchestrator::{MAX_ARTICLES, Orchestrator, RunMode, RunOutcome, RunRequest};
use crate::utils::{display_path, run_timestamp};

/// Model details shown by `/api/config`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LlmInfo {
    pub model: String,
    pub endpoint: String,
}

impl From<&LlmConfig> for LlmInfo {
    fn from(llm: &LlmConfig) -> Self {
        Self {
            model: llm.config.model.clone(),
            endpoint: llm.config.api_base.clone(),
        }
    }
}

/// At most one run at a time.
#[derive(Debug, Clone, Default)]
pub struct RunSlot(Arc<AtomicBool>);

/// Frees the [`RunSlot`] when dropped.
#[derive(Debug)]
pub struct RunGuard(Arc<AtomicBool>);

impl RunSlot {
    pub fn try_acquire(&self) -> Option<RunGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(Arc::clone(&self.0)))
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Shared state behind every route.
pub struct AppState<A> {
    asker: Arc<A>,
    settings: Settings,
    /// Base that `/api/file` paths are relative to.
    root: PathBuf,
    llm: LlmInfo,
    hub: BroadcastObserver,
    slot: RunSlot,
}

impl<A> AppState<A> {
    pub fn new(asker: A, settings: Settings, root: PathBuf, llm: LlmInfo) -> Self {
        let (hub, _) = events::channel(
            settings.events.queue_capacity,
            Duration::from_secs(settings.events.keepalive_secs),
        );
        Self {
            asker: Arc::new(asker),
            settings,
            root,
            llm,
            hub,
            slot: RunSlot::default(),
        }
    }

    fn keepalive(&self) -> Duration {
        Duration::from_secs(self.settings.events.keepalive_secs)
    }

    /// Directories `/api/file` may read from.
    fn readable_dirs(&self) -> [PathBuf; 2] {
        [
            self.root.join(&self.settings.dirs.reports_dir),
            self.root.join(&self.settings.dirs.runs_dir),
        ]
    }
}

/// Body of `POST /run`. Blank fields take the CLI defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunBody {
    #[serde(default)]
    pub portal_url: String,
    #[serde(default, alias = "user_interest_desc")]
    pub interests: String,
    #[serde(default)]
    pub max_articles: Option<usize>,
    #[serde(default)]
    pub mode: RunMode,
}

impl RunBody {
    pub fn into_request(self) -> std::result::Result<(RunMode, RunRequest), &'static str> {
        let interests = self.interests.trim();
        if interests.is_empty() {
            return Err("interests are required");
        }
        let portal_url = match self.portal_url.trim() {
            "" => DEFAULT_PORTAL.to_string(),
            url => url.to_string(),
        };
        let request = RunRequest {
            portal_url,
            interests: interests.to_string(),
            max_articles: clamp_articles(self.max_articles.unwrap_or(DEFAULT_MAX_ARTICLES)),
        };
        Ok((self.mode, request))
    }
}

/// Why `/api/file` refused a path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FileDenied {
    #[error("missing path")]
    Missing,
    #[error("invalid path")]
    Invalid,
    #[error("path not allowed")]
    NotAllowed,
    #[error("not found")]
    NotFound,
}

impl FileDenied {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Missing | Self::Invalid => StatusCode::BAD_REQUEST,
            Self::NotAllowed => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

/// Parse a client path: relative, `/` or `\` separated, no `..`.
pub fn relative_path(raw: &str) -> std::result::Result<PathBuf, FileDenied> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(FileDenied::Missing);
    }
    let path = PathBuf::from(raw.replace('\\', "/"));
    let plain = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if plain { Ok(path) } else { Err(FileDenied::Invalid) }
}

/// Resolve `raw` under `root` to an existing file inside one of `dirs`.
///
/// The check runs twice: on the joined path, then on the canonical one so a
/// symlink cannot lead outside the allowed directories.
pub async fn resolve_artifact(
    root: &Path,
    dirs: &[PathBuf],
    raw: &str,
) -> std::result::Result<PathBuf, FileDenied> {
    let full = root.join(relative_path(raw)?);
    if !dirs.iter().any(|d| full.starts_with(d)) {
        return Err(FileDenied::NotAllowed);
    }
    let real = tokio::fs::canonicalize(&full)
        .await
        .map_err(|_| FileDenied::NotFound)?;
    let mut inside = false;
    for dir in dirs {
        if let Ok(dir) = tokio::fs::canonicalize(dir).await {
            inside |= real.starts_with(&dir);
        }
    }
    if !inside {
        return Err(FileDenied::NotAllowed);
    }
    match tokio::fs::metadata(&real).await {
        Ok(meta) if meta.is_file() => Ok(real),
        _ => Err(FileDenied::NotFound),
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("md") => "text/markdown; charset=utf-8",
        Some("log" | "txt") => "text/plain; charset=utf-8",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

/// Event that closes a run which did not complete.
fn closing_event(outcome: &Result<RunOutcome>) -> Option<ProgressEvent> {
    match outcome {
        Ok(RunOutcome::Completed(_)) => None,
        Ok(RunOutcome::Halted { stage, message }) => Some(
            ProgressEvent::new("error", EventStatus::Error, message.as_str())
                .with_detail(json!({ "stage": stage })),
        ),
        Err(e) => Some(ProgressEvent::new("error", EventStatus::Error, e.to_string())),
    }
}

/// One run on the current thread's runtime, logging to `runs_dir`.
async fn run_once<A: AskAsync>(state: &AppState<A>, mode: RunMode, request: &RunRequest) {
    let settings = &state.settings;
    let log_path = settings
        .dirs
        .runs_dir
        .join(format!("run_{}.log", run_timestamp()));
    let (observer, stream) = events::channel(settings.events.queue_capacity, state.keepalive());
    let closer = observer.clone();
    closer.notify(
        &ProgressEvent::new("run_params", EventStatus::Info, "Run parameters").with_detail(json!({
            "portal_url": request.portal_url,
            "interests": request.interests.chars().take(200).collect::<String>(),
            "max_articles": request.max_articles,
            "mode": format!("{mode:?}"),
            "llm_model": state.llm.model,
            "log": display_path(&log_path),
        })),
    );

    let pipeline = async {
        let observer: Box<dyn Observer> = Box::new(observer);
        let outcome = match Orchestrator::new(Arc::clone(&state.asker), settings.clone(), Some(observer)) {
            Ok(orchestrator) => orchestrator.run(mode, request).await,
            Err(e) => Err(e),
        };
        if let Some(event) = closing_event(&outcome) {
            closer.notify(&event);
        }
        // Dropping the last sender closes the run channel.
        drop(closer);
        outcome
    };
    let consumer = events::consume(stream, &log_path, |event| state.hub.notify(event));
    let (outcome, logged) = tokio::join!(pipeline, consumer);

    match logged {
        Ok(n) => info!(events = n, path = %display_path(&log_path), "Run log written"),
        Err(e) => warn!(error = %e, "Run log could not be written"),
    }
    match outcome {
        Ok(RunOutcome::Completed(report)) => {
            info!(summary = %display_path(&report.summary_path), "Served run complete")
        }
        Ok(RunOutcome::Halted { stage, message }) => warn!(%stage, %message, "Served run halted"),
        Err(e) => error!(error = %e, "Served run failed"),
    }
}

/// Run on a dedicated thread with its own runtime; LLM calls are not `Send`.
fn spawn_run<A>(
    state: Arc<AppState<A>>,
    mode: RunMode,
    request: RunRequest,
    guard: RunGuard,
) -> std::io::Result<()>
where
    A: AskAsync + Send + Sync + 'static,
{
    std::thread::Builder::new()
        .name("news-verify-run".to_string())
        .spawn(move || {
            let _guard = guard;
            match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime.block_on(run_once(&state, mode, &request)),
                Err(e) => {
                    error!(error = %e, "Run runtime could not start");
                    state
                        .hub
                        .notify(&ProgressEvent::new("error", EventStatus::Error, e.to_string()));
                }
            }
        })
        .map(|_| ())
}

async fn start_run<A>(State(state): State<Arc<AppState<A>>>, Json(body): Json<RunBody>) -> Response
where
    A: AskAsync + Send + Sync + 'static,
{
    let (mode, request) = match body.into_request() {
        Ok(parsed) => parsed,
        Err(reason) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "ok": false, "message": reason })))
                .into_response();
        }
    };
    let Some(guard) = state.slot.try_acquire() else {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "ok": false, "message": "a run is already in progress" })),
        )
            .into_response();
    };
    info!(portal = %request.portal_url, ?mode, "Starting run");
    match spawn_run(Arc::clone(&state), mode, request, guard) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({ "ok": true, "message": "run started" })),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Run worker could not start");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false, "message": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn event_stream<A>(State(state): State<Arc<AppState<A>>>) -> impl IntoResponse
where
    A: Send + Sync + 'static,
{
    let stream = state.hub.subscribe(state.keepalive());
    let frames = futures::stream::unfold(Some(stream), |pending| async move {
        let mut stream = pending?;
        let event = stream.next().await?;
        let frame = Event::default().data(event.to_json());
        let rest = (!event.ends_run()).then_some(stream);
        Some((Ok::<_, Infallible>(frame), rest))
    });
    ([("X-Accel-Buffering", "no")], Sse::new(frames))
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    #[serde(default)]
    path: String,
}

async fn read_file<A>(State(state): State<Arc<AppState<A>>>, Query(query): Query<FileQuery>) -> Response
where
    A: Send + Sync + 'static,
{
    let denied = |d: FileDenied| (d.status(), Json(json!({ "error": d.to_string() }))).into_response();
    let path = match resolve_artifact(&state.root, &state.readable_dirs(), &query.path).await {
        Ok(path) => path,
        Err(d) => return denied(d),
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type(&path))], bytes).into_response(),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "Artifact could not be read");
            denied(FileDenied::NotFound)
        }
    }
}

async fn show_config<A>(State(state): State<Arc<AppState<A>>>) -> Json<serde_json::Value>
where
    A: Send + Sync + 'static,
{
    let settings = &state.settings;
    Json(json!({
        "llm_model": state.llm.model,
        "llm_endpoint": state.llm.endpoint,
        "template": settings.template,
        "search_endpoint": settings.search.endpoint,
        "search_key_set": settings.search.api_key.as_deref().is_some_and(|k| !k.trim().is_empty()),
        "reports_dir": display_path(&settings.dirs.reports_dir),
        "runs_dir": display_path(&settings.dirs.runs_dir),
        "max_articles": MAX_ARTICLES,
        "busy": state.slot.is_busy(),
    }))
}

pub fn router<A>(state: Arc<AppState<A>>) -> Router
where
    A: AskAsync + Send + Sync + 'static,
{
    Router::new()
        .route("/run", post(start_run::<A>))
        .route("/events", get(event_stream::<A>))
        .route("/api/file", get(read_file::<A>))
        .route("/api/config", get(show_config::<A>))
        .with_state(state)
}

/// Serve until the process is stopped.
#[instrument(level = "info", skip(state))]
pub async fn serve<A>(state: AppState<A>, addr: SocketAddr) -> Result<()>
where
    A: AskAsync + Send + Sync + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| PipelineError::config(format!("bind {addr}: {e}")))?;
    let local = listener
        .local_addr()
        .map_err(|e| PipelineError::config(format!("bind {addr}: {e}")))?;
    info!(addr = %local, "Monitoring server listening on http://{local}/");
    axum::serve(listener, router(Arc::new(state)))
        .await
        .map_err(|e| PipelineError::config(format!("server: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::LlmError;
    use crate::testing::{RoutedAsk, scripted};
    use reqwest::Client;
    use tempfile::{TempDir, tempdir};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    type Route = Box<dyn Fn(&str, &str) -> std::result::Result<String, LlmError> + Send + Sync>;

    fn state_in(dir: &TempDir, search: &str) -> AppState<RoutedAsk<Route>> {
        let search_uri = search.to_string();
        let mut settings = Settings::default();
        settings.search.endpoint = format!("{search_uri}/search");
        settings.search.api_key = Some("test-key".to_string());
        settings.clean_articles = false;
        settings.dirs.reports_dir = dir.path().join("reports");
        settings.dirs.runs_dir = dir.path().join("runs");
        let route: Route = Box::new(move |task, prompt| match task {
            "interest_extract" => Ok(r#"{"interests": ["technology"]}"#.to_string()),
            "news_select" => Ok(format!(
                r#"[{{"title": "Chip export rules tighten", "url": "{search_uri}/news/2025/05/06/chip-export-rules"}}]"#
            )),
            "summary" => Ok(r#"{"overview": "One story checked."}"#.to_string()),
            other => scripted(other, prompt),
        });
        let asker = RoutedAsk::new(route);
        let llm = LlmInfo {
            model: "test-model".to_string(),
            endpoint: "http://llm.test/v1".to_string(),
        };
        AppState::new(asker, settings, dir.path().to_path_buf(), llm)
    }

    async fn news_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<a href="/news/2025/05/06/chip-export-rules">Chip export rules tighten</a>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/news/2025/05/06/chip-export-rules"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><head><title>Chip export rules tighten</title></head><body><article>\
                 <h1>Chip export rules tighten</h1>\
                 <p>Officials said the new rules took effect on Tuesday.</p></article></body></html>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "organic": [{"title": "Notice", "link": "https://gov.test/notice", "snippet": "Effective Tuesday"}]
            })))
            .mount(&server)
            .await;
        server
    }

    async fn spawn_app<A>(state: Arc<AppState<A>>) -> String
    where
        A: AskAsync + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(state)).await.unwrap() });
        format!("http://{addr}")
    }

    #[test]
    fn client_paths_must_stay_relative() {
        assert_eq!(relative_path(""), Err(FileDenied::Missing));
        assert_eq!(relative_path("../etc/passwd"), Err(FileDenied::Invalid));
        assert_eq!(relative_path("reports/../../x"), Err(FileDenied::Invalid));
        assert_eq!(relative_path("/etc/passwd"), Err(FileDenied::Invalid));
        assert_eq!(relative_path("reports\\..\\x"), Err(FileDenied::Invalid));
        assert_eq!(
            relative_path("reports\\run_1\\summary_report.md"),
            Ok(PathBuf::from("reports/run_1/summary_report.md"))
        );
    }

    #[test]
    fn run_body_defaults_and_limits() {
        let body: RunBody = serde_json::from_str(
            r#"{"user_interest_desc": " AI chips ", "max_articles": 40, "mode": "fact_check"}"#,
        )
        .unwrap();
        let (mode, request) = body.into_request().unwrap();
        assert_eq!(mode, RunMode::FactCheck);
        assert_eq!(request.portal_url, DEFAULT_PORTAL);
        assert_eq!(request.interests, "AI chips");
        assert_eq!(request.max_articles, MAX_ARTICLES);
        assert!(RunBody::default().into_request().is_err());
    }

    #[test]
    fn one_run_at_a_time() {
        let slot = RunSlot::default();
        let guard = slot.try_acquire().unwrap();
        assert!(slot.is_busy());
        assert!(slot.try_acquire().is_none());
        drop(guard);
        assert!(!slot.is_busy());
        assert!(slot.try_acquire().is_some());
    }

    #[tokio::test]
    async fn file_route_serves_only_output_dirs() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("reports/run_1")).unwrap();
        std::fs::write(dir.path().join("reports/run_1/summary_report.md"), "# Report").unwrap();
        std::fs::write(dir.path().join("secret.txt"), "nope").unwrap();
        let state = Arc::new(state_in(&dir, "http://search.test"));
        let base = spawn_app(state).await;
        let client = Client::new();
        let get = |p: &str| client.get(format!("{base}/api/file")).query(&[("path", p)]).send();

        let ok = get("reports\\run_1\\summary_report.md").await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.headers()[header::CONTENT_TYPE], "text/markdown; charset=utf-8");
        assert_eq!(ok.text().await.unwrap(), "# Report");

        assert_eq!(get("").await.unwrap().status(), StatusCode::BAD_REQUEST);
        assert_eq!(get("reports/../secret.txt").await.unwrap().status(), StatusCode::BAD_REQUEST);
        let absolute = dir.path().join("secret.txt");
        assert_eq!(
            get(absolute.to_str().unwrap()).await.unwrap().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(get("secret.txt").await.unwrap().status(), StatusCode::FORBIDDEN);
        assert_eq!(get("runs/missing.log").await.unwrap().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn config_route_reports_model_and_search() {
        let dir = tempdir().unwrap();
        let base = spawn_app(Arc::new(state_in(&dir, "http://search.test"))).await;
        let config: serde_json::Value = reqwest::get(format!("{base}/api/config"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(config["llm_model"], "test-model");
        assert_eq!(config["search_endpoint"], "http://search.test/search");
        assert_eq!(config["search_key_set"], true);
        assert_eq!(config["busy"], false);
    }

    #[tokio::test]
    async fn busy_server_refuses_a_second_run() {
        let dir = tempdir().unwrap();
        let state = Arc::new(state_in(&dir, "http://search.test"));
        let _held = state.slot.try_acquire().unwrap();
        let base = spawn_app(Arc::clone(&state)).await;
        let client = Client::new();

        let busy = client
            .post(format!("{base}/run"))
            .json(&json!({ "interests": "technology" }))
            .send()
            .await
            .unwrap();
        assert_eq!(busy.status(), StatusCode::CONFLICT);

        let missing = client.post(format!("{base}/run")).json(&json!({})).send().await.unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn run_streams_events_until_complete() {
        let news = news_server().await;
        let dir = tempdir().unwrap();
        let state = Arc::new(state_in(&dir, &news.uri()));
        let base = spawn_app(Arc::clone(&state)).await;
        let client = Client::new();

        let events = client.get(format!("{base}/events")).send().await.unwrap();
        assert_eq!(events.headers()[header::CONTENT_TYPE], "text/event-stream");
        let started = client
            .post(format!("{base}/run"))
            .json(&json!({
                "portal_url": format!("{}/", news.uri()),
                "user_interest_desc": "technology",
                "max_articles": 1
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(started.status(), StatusCode::ACCEPTED);

        let body = tokio::time::timeout(Duration::from_secs(60), events.text())
            .await
            .unwrap()
            .unwrap();
        let seen: Vec<ProgressEvent> = body
            .lines()
            .filter_map(|l| l.strip_prefix("data: "))
            .map(|json| serde_json::from_str(json).unwrap())
            .collect();
        assert_eq!(seen.first().unwrap().step_id, "run_params");
        assert_eq!(seen.last().unwrap().step_id, "complete");
        assert!(seen.iter().any(|e| e.message.starts_with("web_search: ")));

        for _ in 0..100 {
            if !state.slot.is_busy() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!state.slot.is_busy());
        let log = std::fs::read_dir(dir.path().join("runs"))
            .unwrap()
            .filter_map(|e| e.ok())
            .find(|e| e.file_name().to_string_lossy().ends_with(".log"))
            .unwrap();
        let log_text = client
            .get(format!("{base}/api/file"))
            .query(&[("path", format!("runs/{}", log.file_name().to_string_lossy()))])
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(log_text.lines().last().unwrap().contains("] complete | done | "));
    }
}
