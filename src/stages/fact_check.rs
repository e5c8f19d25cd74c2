//! Single-pass fact check: claims, direct searches, one verdict call.
//!
//! Verdicts use the TRUE / PARTIALLY_TRUE / FALSE / UNCERTAIN scale. Articles
//! and per-article results are saved flat, keyed by run timestamp and index:
//! `<articles_dir>/<ts>_<NN>_<slug>.md` and
//! `<fact_checks_dir>/<ts>_<NN>_<slug>.json`.

use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use super::article_step;
use super::verification::run_queries;
use crate::api::{AskAsync, ask_typed};
use crate::config::Settings;
use crate::decode;
use crate::error::Result;
use crate::events::Emitter;
use crate::models::{ArticleRecord, FactCheckOutput, IdentifiedClaims, VerificationResult};
use crate::prompts;
use crate::tools::search::SerperSearch;
use crate::utils::{safe_slug, write_json, write_text};

/// Error recorded when the verdict reply cannot be decoded.
pub const NOT_JSON: &str = "fact_check_output_not_json";

/// `<ts>_<NN>_<slug>` base name shared by an article's two files.
pub fn artifact_stem(timestamp: &str, index: usize, title: &str) -> String {
    format!("{timestamp}_{:02}_{}", index + 1, safe_slug(title, 80))
}

pub fn article_markdown(article: &ArticleRecord, crawled_at: &str, budget: usize) -> String {
    format!(
        "# {}\n\n- Source: {}\n- CrawledAt: {crawled_at}\n{}\n\n---\n\n{}\n",
        article.title,
        article.url,
        article.truncation_line(budget),
        article.body()
    )
}

/// Outcome of checking one article: the typed result and the JSON saved
/// for it.
#[derive(Debug, Clone)]
pub struct Checked {
    pub result: VerificationResult,
    pub saved: Value,
}

/// Fact-check one article without touching the filesystem.
#[instrument(level = "info", skip_all, fields(url = %article.url))]
pub async fn check_article<A: AskAsync>(
    asker: &A,
    search: &SerperSearch,
    article: &ArticleRecord,
    settings: &Settings,
) -> Result<Checked> {
    if let Some(reason) = &article.error {
        let result = VerificationResult::failed(article, format!("crawl failed: {reason}"));
        let saved = json!({ "title": article.title, "url": article.url, "error": result.error });
        return Ok(Checked { result, saved });
    }

    let claims: IdentifiedClaims = ask_typed(
        asker,
        &prompts::FACT_CHECKER,
        "identify_claims",
        &prompts::fact_check_claims_instructions(article),
    )
    .await?;
    let results = run_queries(
        search,
        claims.critical_claims.iter().map(|c| c.statement.as_str()),
        settings,
    )
    .await;
    if results.hits.is_empty() && !results.failures.is_empty() {
        warn!(failures = results.failures.len(), "Every search failed; checking without evidence");
    }

    let reply = asker
        .ask(&prompts::FACT_CHECKER.prompt(
            "fact_check",
            &prompts::fact_check_instructions(article, &claims.critical_claims, &results.hits),
        ))
        .await?;
    match decode::decode::<FactCheckOutput>(&reply) {
        Ok(output) => {
            let mut saved = json!({ "title": article.title, "url": article.url, "checks": &output.checks });
            if !results.failures.is_empty() {
                saved["search_errors"] = json!(results.failures);
            }
            let mut result = output.into_result(article);
            result.news_summary = Some(claims.news_summary).filter(|s| !s.trim().is_empty());
            Ok(Checked { result, saved })
        }
        Err(e) => {
            warn!(error = %e, "Fact-check reply did not decode");
            Ok(Checked {
                result: VerificationResult::failed(article, NOT_JSON),
                saved: json!({
                    "title": article.title,
                    "url": article.url,
                    "error": NOT_JSON,
                    "raw": reply,
                }),
            })
        }
    }
}

/// Paths written for one article.
#[derive(Debug, Clone)]
pub struct SavedPaths {
    pub article: PathBuf,
    pub fact_check: PathBuf,
}

/// Where one run's fact-check files go.
#[derive(Debug, Clone, Copy)]
pub struct Destination<'a> {
    pub timestamp: &'a str,
    pub articles_dir: &'a Path,
    pub fact_checks_dir: &'a Path,
}

impl Destination<'_> {
    pub fn paths_for(&self, index: usize, article: &ArticleRecord) -> SavedPaths {
        let stem = artifact_stem(self.timestamp, index, &article.title);
        SavedPaths {
            article: self.articles_dir.join(format!("{stem}.md")),
            fact_check: self.fact_checks_dir.join(format!("{stem}.json")),
        }
    }
}

/// Check one article and persist both of its files. LLM failures become
/// the article's error; only filesystem failures are returned.
pub async fn fact_check_article<A: AskAsync>(
    asker: &A,
    search: &SerperSearch,
    emitter: &Emitter<'_>,
    index: usize,
    article: &ArticleRecord,
    dest: &Destination<'_>,
    settings: &Settings,
) -> Result<(VerificationResult, SavedPaths)> {
    let paths = dest.paths_for(index, article);
    let markdown = article_markdown(article, dest.timestamp, settings.llm_char_budget);
    write_text(&paths.article, &markdown).await?;

    let step = article_step(index, "fact_check");
    emitter.start(step.as_str(), "Fact-checking article");
    let checked = match check_article(asker, search, article, settings).await {
        Ok(checked) => checked,
        Err(e) => {
            warn!(error = %e, url = %article.url, "Fact check failed");
            let result = VerificationResult::failed(article, e.to_string());
            let saved = json!({ "title": article.title, "url": article.url, "error": result.error });
            Checked { result, saved }
        }
    };
    write_json(&paths.fact_check, &checked.saved).await?;

    match &checked.result.error {
        Some(reason) => emitter.error(step, reason.clone()),
        None => emitter.done_with(
            step,
            format!("{} statement(s) checked", checked.result.claims.len()),
            json!({ "saved": paths.fact_check }),
        ),
    }
    info!(url = %article.url, failed = checked.result.is_failed(), "Fact check complete");
    Ok((checked.result, paths))
}
