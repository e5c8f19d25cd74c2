//! # Awful News Verify
//!
//! Picks the news articles on a portal that match a reader's interests,
//! collects their full text and fact-checks them claim by claim with an
//! OpenAI-compatible LLM and a web search API.
//!
//! ## Usage
//!
//! ```sh
//! awful_news_verify verify -p https://news.yahoo.com/ -i "AI chips, trade policy" -n 3
//! awful_news_verify fact-check --articles-dir ./articles --fact-checks-dir ./checks
//! awful_news_verify serve --port 5050
//! ```
//!
//! ## Architecture
//!
//! One run moves through a linear state machine:
//! 1. **Discover**: interest tags, portal candidates, LLM selection
//! 2. **Collect**: crawl each selected article, optional LLM clean pass
//! 3. **Verify**: claims, queries and a plan per article, then searched
//!    verdicts (or a single-pass fact check)
//! 4. **Report**: one Markdown summary for the run
//!
//! Progress events travel over a bounded channel to a consumer that writes
//! the run log while the pipeline works. `serve` exposes the same runs over a
//! local HTTP API with a Server-Sent-Events progress stream.

use std::error::Error;
use std::io;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod config;
mod decode;
mod error;
mod events;
mod models;
mod orchestrator;
mod prompts;
mod runner;
mod server;
mod stages;
#[cfg(test)]
mod testing;
mod tools;
mod utils;

use api::{AwfulAsk, RetryAsk};
use cli::{Cli, Command, Prompter};
use config::{Settings, load_llm};
use orchestrator::{Orchestrator, RunMode, RunOutcome};
use server::{AppState, LlmInfo};
use utils::{display_path, run_timestamp};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init (stdout is reserved for the report) ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_writer(io::stderr)
        .init();

    let start_time = Instant::now();
    info!("awful_news_verify starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let mut settings = Settings::load(args.settings.as_deref())?;
    args.apply(&mut settings);

    // ---- Load template & config ----
    let llm = load_llm(args.config.as_deref(), &settings.template).await?;
    let llm_info = LlmInfo::from(&llm);
    let asker = RetryAsk::new(
        AwfulAsk::new(llm),
        settings.retry.max_retries,
        settings.retry.base_delay(),
    );

    let (mode, run) = match &args.command {
        Command::Serve(serve) => {
            let state = AppState::new(asker, settings, std::env::current_dir()?, llm_info);
            server::serve(state, serve.addr()).await?;
            return Ok(());
        }
        Command::Verify(run) => (RunMode::Verify, run),
        Command::FactCheck(fc) => (RunMode::FactCheck, &fc.run),
    };

    let request = {
        let stdin = io::stdin();
        let mut prompter = Prompter::new(stdin.lock(), io::stderr());
        run.resolve(&mut prompter)?
    };
    info!(
        portal = %request.portal_url,
        interests = %request.interests,
        max_articles = request.max_articles,
        model = %llm_info.model,
        "Run request ready"
    );

    let log_path = settings
        .dirs
        .runs_dir
        .join(format!("run_{}.log", run_timestamp()));
    let (observer, stream) = events::channel(
        settings.events.queue_capacity,
        Duration::from_secs(settings.events.keepalive_secs),
    );
    let observer: Box<dyn events::Observer> = Box::new(observer);
    let orchestrator = Orchestrator::new(asker, settings, Some(observer))?;

    let pipeline = async move {
        let outcome = orchestrator.run(mode, &request).await;
        // Dropping the orchestrator closes the event channel.
        drop(orchestrator);
        outcome
    };
    let consumer = events::consume(stream, &log_path, |event| {
        debug!(frame = %event.sse_frame().trim_end(), "Progress event");
        info!(
            step = %event.step_id,
            status = event.status.as_str(),
            "{}",
            event.message
        );
    });
    let (outcome, logged) = tokio::join!(pipeline, consumer);

    match logged {
        Ok(n) => info!(events = n, path = %display_path(&log_path), "Run log written"),
        Err(e) => warn!(error = %e, "Run log could not be written"),
    }

    match outcome? {
        RunOutcome::Completed(report) => {
            println!("Summary report: {}", display_path(&report.summary_path));
            println!("Run directory: {}", display_path(&report.run_dir));
            println!("Run log: {}\n", display_path(&log_path));
            println!("{}", report.markdown);
        }
        RunOutcome::Halted { stage, message } => {
            warn!(%stage, "Run halted");
            println!("Run stopped during {stage}: {message}");
        }
    }

    info!(
        elapsed_ms = start_time.elapsed().as_millis(),
        "awful_news_verify finished"
    );
    Ok(())
}
