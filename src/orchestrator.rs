//! Run orchestration: the state machine that drives one pipeline run.
//!
//! ```text
//! INIT -> DISCOVER -> COLLECT -> VERIFY -> REPORT -> DONE
//!   \________\__________\_________\_________\______> ERROR
//! ```
//!
//! The orchestrator owns every capability and decides which stage calls
//! which tool. Content failures (no interests, no candidates, nothing
//! crawlable) end the run as [`RunOutcome::Halted`]; only failures writing
//! the run's own output surface as `Err`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::api::AskAsync;
use crate::config::Settings;
use crate::error::{PipelineError, Result};
use crate::events::{Emitter, EventStatus, Observer, ProgressEvent};
use crate::models::{ArticleRecord, RunReport, VerificationResult};
use crate::stages::fact_check::{Destination, fact_check_article};
use crate::stages::{Halt, collection, discovery, reporting, verification};
use crate::tools::article::ArticleCrawler;
use crate::tools::http_client;
use crate::tools::portal::PortalCrawler;
use crate::tools::search::SerperSearch;
use crate::utils::{display_path, ensure_writable_dir, run_timestamp, safe_slug, write_text};

/// Upper bound on articles per run.
pub const MAX_ARTICLES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    Discover,
    Collect,
    Verify,
    Report,
    Done,
    Error,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Discover => "DISCOVER",
            Self::Collect => "COLLECT",
            Self::Verify => "VERIFY",
            Self::Report => "REPORT",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        }
    }

    /// The state that follows this one on the happy path.
    fn successor(self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::Discover),
            Self::Discover => Some(Self::Collect),
            Self::Collect => Some(Self::Verify),
            Self::Verify => Some(Self::Report),
            Self::Report => Some(Self::Done),
            Self::Done | Self::Error => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checked state transitions for one run.
#[derive(Debug, Clone)]
pub struct RunTracker {
    state: RunState,
    history: Vec<RunState>,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self {
            state: RunState::Init,
            history: vec![RunState::Init],
        }
    }
}

impl RunTracker {
    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    /// Move forward to `next`, which must be the direct successor.
    pub fn advance(&mut self, next: RunState) -> Result<()> {
        if self.state.successor() != Some(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Enter ERROR. Allowed from every state except DONE; ERROR stays put.
    pub fn fail(&mut self) -> Result<()> {
        match self.state {
            RunState::Error => Ok(()),
            RunState::Done => Err(PipelineError::InvalidTransition {
                from: RunState::Done,
                to: RunState::Error,
            }),
            _ => {
                self.state = RunState::Error;
                self.history.push(RunState::Error);
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(RunReport),
    /// A content failure ended the run in `stage`.
    Halted { stage: RunState, message: String },
}

/// User input for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub portal_url: String,
    pub interests: String,
    pub max_articles: usize,
}

/// Which pipeline a run follows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Claims, queries and a plan per article, then searched verdicts.
    #[default]
    Verify,
    /// One fact-check pass per article.
    FactCheck,
}

/// Why a run stopped early.
enum Stop {
    Halted(Halt),
    Failed(PipelineError),
}

impl From<Halt> for Stop {
    fn from(halt: Halt) -> Self {
        Self::Halted(halt)
    }
}

impl From<PipelineError> for Stop {
    fn from(e: PipelineError) -> Self {
        Self::Failed(e)
    }
}

pub struct Orchestrator<A> {
    asker: A,
    settings: Settings,
    portal: PortalCrawler,
    articles: ArticleCrawler,
    search: SerperSearch,
    observer: Option<Box<dyn Observer>>,
}

impl<A: AskAsync> Orchestrator<A> {
    /// Fails when no search API key is configured, since every verdict
    /// depends on web search.
    pub fn new(asker: A, settings: Settings, observer: Option<Box<dyn Observer>>) -> Result<Self> {
        if settings.search.api_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
            return Err(PipelineError::config(
                "no search API key: set search.api_key in the settings file or SERPER_API_KEY",
            ));
        }
        let client = http_client(&settings.crawl)
            .map_err(|e| PipelineError::config(format!("http client: {e}")))?;
        Ok(Self {
            portal: PortalCrawler::new(client.clone()),
            articles: ArticleCrawler::new(client.clone()),
            search: SerperSearch::new(client, &settings.search),
            asker,
            settings,
            observer,
        })
    }

    fn emitter(&self) -> Emitter<'_> {
        Emitter::new(self.observer.as_deref())
    }

    /// Discover, collect, verify each article through its plan, and write
    /// `summary_report.md` into a fresh run directory.
    #[instrument(level = "info", skip_all, fields(portal = %request.portal_url))]
    pub async fn discover_and_verify(&self, request: &RunRequest) -> Result<RunOutcome> {
        let emitter = self.emitter();
        let mut tracker = RunTracker::default();
        let outcome = self.verify_run(&mut tracker, &emitter, request).await;
        conclude(&mut tracker, &emitter, outcome)
    }

    /// Discover, collect and fact-check each article in a single pass,
    /// writing `fact_check_report_<ts>.md` into the reports directory.
    #[instrument(level = "info", skip_all, fields(portal = %request.portal_url))]
    pub async fn fact_check(&self, request: &RunRequest) -> Result<RunOutcome> {
        let emitter = self.emitter();
        let mut tracker = RunTracker::default();
        let outcome = self.fact_check_run(&mut tracker, &emitter, request).await;
        conclude(&mut tracker, &emitter, outcome)
    }

    pub async fn run(&self, mode: RunMode, request: &RunRequest) -> Result<RunOutcome> {
        match mode {
            RunMode::Verify => self.discover_and_verify(request).await,
            RunMode::FactCheck => self.fact_check(request).await,
        }
    }

    async fn verify_run(
        &self,
        tracker: &mut RunTracker,
        emitter: &Emitter<'_>,
        request: &RunRequest,
    ) -> std::result::Result<RunReport, Stop> {
        let ts = run_timestamp();
        let run_dir = self.settings.dirs.reports_dir.join(format!("discover_verify_{ts}"));
        ensure_writable_dir(&run_dir).await?;
        emitter.done_with(
            "run_dir",
            "Run directory ready",
            json!({ "path": display_path(&run_dir) }),
        );

        let records = self.gather(tracker, emitter, request).await?;

        enter(tracker, emitter, RunState::Verify)?;
        let mut entries: Vec<(ArticleRecord, VerificationResult)> = Vec::with_capacity(records.len());
        for (i, article) in records.into_iter().enumerate() {
            let dir = run_dir.join(format!("article_{:02}_{}", i + 1, safe_slug(&article.title, 80)));
            let result = verification::verify_article(
                &self.asker,
                &self.search,
                emitter,
                i,
                &article,
                &dir,
                &self.settings,
            )
            .await;
            entries.push((article, result));
        }

        enter(tracker, emitter, RunState::Report)?;
        let summary_path = run_dir.join("summary_report.md");
        let markdown = self
            .report(emitter, &entries, &format!("News verification report {ts}"))
            .await;
        write_text(&summary_path, &markdown).await?;
        emitter.done_with(
            "summary",
            "Summary report written",
            json!({ "path": display_path(&summary_path) }),
        );

        let report = RunReport {
            run_dir,
            summary_path,
            markdown,
            entries,
        };
        finish(tracker, emitter, &report)?;
        Ok(report)
    }

    async fn fact_check_run(
        &self,
        tracker: &mut RunTracker,
        emitter: &Emitter<'_>,
        request: &RunRequest,
    ) -> std::result::Result<RunReport, Stop> {
        let ts = run_timestamp();
        let dirs = &self.settings.dirs;
        for dir in [&dirs.reports_dir, &dirs.articles_dir, &dirs.fact_checks_dir] {
            ensure_writable_dir(dir).await?;
        }
        emitter.done_with(
            "run_dir",
            "Output directories ready",
            json!({
                "reports": display_path(&dirs.reports_dir),
                "articles": display_path(&dirs.articles_dir),
                "fact_checks": display_path(&dirs.fact_checks_dir),
            }),
        );

        let records = self.gather(tracker, emitter, request).await?;

        enter(tracker, emitter, RunState::Verify)?;
        let dest = Destination {
            timestamp: &ts,
            articles_dir: &dirs.articles_dir,
            fact_checks_dir: &dirs.fact_checks_dir,
        };
        let mut entries = Vec::with_capacity(records.len());
        for (i, article) in records.into_iter().enumerate() {
            let (result, _paths) = fact_check_article(
                &self.asker,
                &self.search,
                emitter,
                i,
                &article,
                &dest,
                &self.settings,
            )
            .await?;
            entries.push((article, result));
        }

        enter(tracker, emitter, RunState::Report)?;
        let summary_path = dirs.reports_dir.join(format!("fact_check_report_{ts}.md"));
        let markdown = self
            .report(emitter, &entries, &format!("Fact-check report {ts}"))
            .await;
        write_text(&summary_path, &markdown).await?;
        emitter.done_with(
            "summary",
            "Fact-check report written",
            json!({ "path": display_path(&summary_path) }),
        );

        let report = RunReport {
            run_dir: dirs.reports_dir.clone(),
            summary_path,
            markdown,
            entries,
        };
        finish(tracker, emitter, &report)?;
        Ok(report)
    }

    /// DISCOVER and COLLECT, shared by both run modes.
    async fn gather(
        &self,
        tracker: &mut RunTracker,
        emitter: &Emitter<'_>,
        request: &RunRequest,
    ) -> std::result::Result<Vec<ArticleRecord>, Stop> {
        let max_articles = request.max_articles.clamp(1, MAX_ARTICLES);
        emitter.emit(
            ProgressEvent::new("run_params", EventStatus::Info, "Run parameters").with_detail(json!({
                "portal_url": request.portal_url,
                "interests": request.interests,
                "max_articles": max_articles,
            })),
        );

        enter(tracker, emitter, RunState::Discover)?;
        let found = discovery::discover(
            &self.asker,
            &self.portal,
            emitter,
            &request.portal_url,
            &request.interests,
            max_articles,
            self.settings.max_candidates_in_prompt,
        )
        .await?;
        info!(
            interests = ?found.profile.tags(),
            candidates = found.candidate_count,
            selected = found.selected.len(),
            "Articles selected"
        );

        enter(tracker, emitter, RunState::Collect)?;
        let records = collection::collect(
            &self.asker,
            &self.articles,
            emitter,
            &found.selected,
            &self.settings,
        )
        .await?;
        Ok(records)
    }

    async fn report(
        &self,
        emitter: &Emitter<'_>,
        entries: &[(ArticleRecord, VerificationResult)],
        title: &str,
    ) -> String {
        emitter.start("summary", "Writing summary report");
        reporting::build_report(&self.asker, entries, title).await
    }
}

/// Advance the tracker and announce the new state.
fn enter(tracker: &mut RunTracker, emitter: &Emitter<'_>, next: RunState) -> Result<()> {
    let from = tracker.state();
    tracker.advance(next)?;
    info!(%from, to = %next, "Run state changed");
    emitter.emit(
        ProgressEvent::new("run_state", EventStatus::Info, next.as_str())
            .with_detail(json!({ "from": from, "to": next })),
    );
    Ok(())
}

fn finish(tracker: &mut RunTracker, emitter: &Emitter<'_>, report: &RunReport) -> Result<()> {
    enter(tracker, emitter, RunState::Done)?;
    let failed = report.entries.iter().filter(|(_, r)| r.is_failed()).count();
    emitter.done_with(
        "complete",
        format!("Run complete: {} article(s), {failed} failed", report.entries.len()),
        json!({
            "run_dir": display_path(&report.run_dir),
            "summary": display_path(&report.summary_path),
        }),
    );
    Ok(())
}

fn conclude(
    tracker: &mut RunTracker,
    emitter: &Emitter<'_>,
    outcome: std::result::Result<RunReport, Stop>,
) -> Result<RunOutcome> {
    match outcome {
        Ok(report) => Ok(RunOutcome::Completed(report)),
        Err(Stop::Halted(halt)) => {
            let stage = tracker.state();
            warn!(%stage, history = ?tracker.history(), message = %halt, "Run halted");
            tracker.fail()?;
            emitter.error("run_state", format!("Halted during {stage}: {halt}"));
            Ok(RunOutcome::Halted {
                stage,
                message: halt.message,
            })
        }
        Err(Stop::Failed(e)) => {
            error!(stage = %tracker.state(), error = %e, "Run failed");
            if !tracker.state().is_terminal() {
                tracker.fail()?;
            }
            emitter.error("run_state", e.to_string());
            Err(e)
        }
    }
}
