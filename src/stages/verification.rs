//! Verification: claims → queries → plan → searched verdicts, per article.
//!
//! The first three steps run through the [`TaskRunner`] and hand off through
//! files in the article's directory:
//!
//! ```text
//! article_NN_<slug>/
//!   extracted_news.md       article text
//!   identified_claims.json  {news_summary, key_entities, critical_claims}
//!   search_queries.json     {search_queries}
//!   verification_plan.md    PART 1 JSON plan, PART 2 readable plan
//!   verification_report.md PART 1 JSON results, PART 2 readable report
//! ```
//!
//! Any failure here is scoped to the article: it becomes the `error` of that
//! article's [`VerificationResult`] and the run moves on.

use std::path::{Path, PathBuf};

use itertools::Itertools;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::article_step;
use crate::api::{AskAsync, ask_typed};
use crate::config::Settings;
use crate::decode::{self, DecodeError, fenced_json};
use crate::error::{PipelineError, Result};
use crate::events::Emitter;
use crate::models::{
    ArticleRecord, ClaimAssessment, ClaimVerdict, IdentifiedClaims, PlanEntry, SearchQueries,
    Verdict, VerificationPlan, VerificationResult,
};
use crate::prompts;
use crate::runner::{Binding, Task, TaskRunner, json_output};
use crate::tools::Tool;
use crate::tools::file::FileReader;
use crate::tools::search::{SearchHit, SearchRequest, SerperSearch};
use crate::utils::write_text;

/// Artifact paths inside one article directory.
#[derive(Debug, Clone)]
pub struct ArticlePaths {
    pub dir: PathBuf,
    pub extracted_news: PathBuf,
    pub identified_claims: PathBuf,
    pub search_queries: PathBuf,
    pub verification_plan: PathBuf,
    pub verification_report: PathBuf,
}

impl ArticlePaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            extracted_news: dir.join("extracted_news.md"),
            identified_claims: dir.join("identified_claims.json"),
            search_queries: dir.join("search_queries.json"),
            verification_plan: dir.join("verification_plan.md"),
            verification_report: dir.join("verification_report.md"),
            dir,
        }
    }
}

pub fn extracted_news_markdown(article: &ArticleRecord, budget: usize) -> String {
    format!(
        "# {}\n\nURL: {}\n{}\n\n{}\n",
        article.title,
        article.url,
        article.truncation_line(budget),
        article.body()
    )
}

/// Render a plan as the two-part Markdown artifact.
pub fn render_plan(plan: &VerificationPlan) -> std::result::Result<String, serde_json::Error> {
    let json = serde_json::to_string_pretty(plan)?;
    let mut md = format!(
        "# Verification Plan\n\n## PART 1: Verification Plan (JSON)\n\n```json\n{json}\n```\n\n\
         ## PART 2: Readable Plan\n\n"
    );
    if !plan.overall_strategy.trim().is_empty() {
        md.push_str(&format!("**Overall strategy:** {}\n\n", plan.overall_strategy.trim()));
    }
    for entry in &plan.claims {
        md.push_str(&format!(
            "### {} ({}): {}\n\n",
            entry.claim_id, entry.priority, entry.statement
        ));
        if !entry.strategy.trim().is_empty() {
            md.push_str(&format!("- Strategy: {}\n", entry.strategy.trim()));
        }
        md.push_str(&format!("- Success criterion: {}\n- Queries:\n", entry.success_criterion));
        for q in &entry.queries {
            match q.intent.trim() {
                "" => md.push_str(&format!("  - `{}`\n", q.query)),
                intent => md.push_str(&format!("  - `{}` ({intent})\n", q.query)),
            }
        }
        md.push('\n');
    }
    Ok(md)
}

fn plan_output(reply: &str) -> std::result::Result<String, DecodeError> {
    let plan: VerificationPlan = decode::decode(reply)?;
    Ok(render_plan(&plan)?)
}

/// The three analysis tasks, each reading its inputs from the previous
/// step's file.
pub fn analysis_tasks(paths: &ArticlePaths) -> Vec<Task> {
    vec![
        Task {
            name: "identify_claims",
            agent: prompts::VERIFICATION_STRATEGIST,
            template: prompts::IDENTIFY_CLAIMS,
            bindings: vec![("article", Binding::File(paths.extracted_news.clone()))],
            output_file: Some(paths.identified_claims.clone()),
            schema: "identified_claims",
            format: json_output::<IdentifiedClaims>,
        },
        Task {
            name: "generate_queries",
            agent: prompts::VERIFICATION_STRATEGIST,
            template: prompts::GENERATE_QUERIES,
            bindings: vec![("claims", Binding::File(paths.identified_claims.clone()))],
            output_file: Some(paths.search_queries.clone()),
            schema: "search_queries",
            format: json_output::<SearchQueries>,
        },
        Task {
            name: "compile_plan",
            agent: prompts::VERIFICATION_STRATEGIST,
            template: prompts::COMPILE_PLAN,
            bindings: vec![
                ("claims", Binding::File(paths.identified_claims.clone())),
                ("queries", Binding::File(paths.search_queries.clone())),
            ],
            output_file: Some(paths.verification_plan.clone()),
            schema: "verification_plan",
            format: plan_output,
        },
    ]
}

/// Hits per query, plus the reason each failed query failed.
#[derive(Debug, Clone, Default)]
pub struct QueryResults {
    pub hits: Vec<(String, Vec<SearchHit>)>,
    pub failures: Vec<String>,
}

/// Run each query. Failed queries are logged and kept as failures so an
/// empty result can say why it is empty.
pub async fn run_queries<'q>(
    search: &SerperSearch,
    queries: impl IntoIterator<Item = &'q str>,
    settings: &Settings,
) -> QueryResults {
    let mut out = QueryResults::default();
    for query in queries {
        let request = SearchRequest {
            query: query.to_string(),
            num_results: settings.search_results(),
        };
        match search.invoke(request).await {
            Ok(mut hits) => {
                hits.truncate(settings.search.hits_per_query_in_prompt);
                if !hits.is_empty() {
                    out.hits.push((query.to_string(), hits));
                }
            }
            Err(e) => {
                warn!(error = %e, %query, "Search failed; skipping query");
                out.failures.push(e.to_string());
            }
        }
    }
    out
}

/// Verdict for one plan entry given its search results.
#[instrument(level = "info", skip_all, fields(claim = %entry.claim_id))]
pub async fn assess_claim<A: AskAsync>(
    asker: &A,
    entry: &PlanEntry,
    results: &QueryResults,
) -> Result<ClaimVerdict> {
    if results.hits.is_empty() {
        let explanation = if results.failures.is_empty() {
            "No search results were found for this claim.".to_string()
        } else {
            format!("search failed: {}", results.failures.iter().unique().join("; "))
        };
        return Ok(ClaimVerdict {
            claim_id: entry.claim_id.clone(),
            statement: entry.statement.clone(),
            verdict: Verdict::Unverified,
            confidence: Some("Low".to_string()),
            explanation,
            evidence: Vec::new(),
            caveats: None,
        });
    }
    let assessment: ClaimAssessment = ask_typed(
        asker,
        &prompts::CLAIM_VERIFIER,
        "verify_claim",
        &prompts::verdict_instructions(entry, &results.hits),
    )
    .await?;
    Ok(ClaimVerdict {
        claim_id: entry.claim_id.clone(),
        statement: entry.statement.clone(),
        verdict: assessment.verdict,
        confidence: assessment.confidence,
        explanation: assessment.explanation,
        evidence: assessment.evidence,
        caveats: assessment.caveats,
    })
}

/// Read the plan back from disk and verify every claim in it.
pub async fn execute_plan<A: AskAsync>(
    asker: &A,
    search: &SerperSearch,
    paths: &ArticlePaths,
    settings: &Settings,
) -> Result<Vec<ClaimVerdict>> {
    let plan_md = FileReader.invoke(paths.verification_plan.clone()).await?;
    let block = fenced_json(&plan_md)
        .ok_or_else(|| PipelineError::schema("verification_plan", "no JSON block in plan"))?;
    let plan: VerificationPlan = decode::decode(block)
        .map_err(|e| PipelineError::schema("verification_plan", e.to_string()))?;

    let mut verdicts = Vec::with_capacity(plan.claims.len());
    for entry in &plan.claims {
        let results = run_queries(search, entry.queries.iter().map(|q| q.query.as_str()), settings).await;
        verdicts.push(assess_claim(asker, entry, &results).await?);
    }
    Ok(verdicts)
}

/// Render the two-part verification report.
pub fn render_verification_report(
    result: &VerificationResult,
) -> std::result::Result<String, serde_json::Error> {
    let json = serde_json::to_string_pretty(&json!({ "verification_results": result.claims }))?;
    let mut md = format!(
        "# Verification Report: {}\n\nURL: {}\n\n## PART 1: Verification Results (JSON)\n\n\
         ```json\n{json}\n```\n\n## PART 2: Readable Report\n\n",
        result.title, result.url
    );
    if let Some(summary) = result.news_summary.as_deref().filter(|s| !s.trim().is_empty()) {
        md.push_str(&format!("{}\n\n", summary.trim()));
    }
    let tally = result
        .verdict_counts()
        .into_iter()
        .map(|(v, n)| format!("{v}: {n}"))
        .join(", ");
    md.push_str(&format!("**Verdicts:** {tally}\n\n"));
    for claim in &result.claims {
        md.push_str(&format!("### {} [{}] {}\n\n", claim.claim_id, claim.verdict, claim.statement));
        if let Some(confidence) = &claim.confidence {
            md.push_str(&format!("- Confidence: {confidence}\n"));
        }
        if !claim.explanation.trim().is_empty() {
            md.push_str(&format!("- Evidence summary: {}\n", claim.explanation.trim()));
        }
        for ev in claim.evidence.iter().filter(|e| !e.url.trim().is_empty()) {
            let label = if ev.source.trim().is_empty() { ev.url.as_str() } else { ev.source.trim() };
            md.push_str(&format!("- Source: [{label}]({})\n", ev.url));
        }
        if let Some(caveats) = claim.caveats.as_deref().filter(|c| !c.trim().is_empty()) {
            md.push_str(&format!("- Caveats: {}\n", caveats.trim()));
        }
        md.push('\n');
    }
    Ok(md)
}

/// Verify one article inside `dir`. Never fails: errors land in the result.
pub async fn verify_article<A: AskAsync>(
    asker: &A,
    search: &SerperSearch,
    emitter: &Emitter<'_>,
    index: usize,
    article: &ArticleRecord,
    dir: &Path,
    settings: &Settings,
) -> VerificationResult {
    let paths = ArticlePaths::new(dir);
    let extracted = extracted_news_markdown(article, settings.llm_char_budget);
    if let Err(e) = write_text(&paths.extracted_news, &extracted).await {
        emitter.error(article_step(index, "analyze"), e.to_string());
        return VerificationResult::failed(article, e.to_string());
    }
    if let Some(reason) = &article.error {
        emitter.error(article_step(index, "analyze"), "Article could not be crawled");
        return VerificationResult::failed(article, format!("crawl failed: {reason}"));
    }

    let analyze = article_step(index, "analyze");
    emitter.start(analyze.as_str(), "Identifying claims and planning searches");
    let mut runner = TaskRunner::new(asker);
    if let Err(e) = runner.run(&analysis_tasks(&paths)).await {
        warn!(error = %e, url = %article.url, "Analysis failed");
        emitter.error(analyze, e.to_string());
        return VerificationResult::failed(article, e.to_string());
    }
    emitter.done(analyze, "Verification plan ready");

    let verify = article_step(index, "verify");
    emitter.start(verify.as_str(), "Searching and scoring claims");
    emitter.tool_call(verify.as_str(), search, "verification plan queries");
    match finish(asker, search, &runner, article, &paths, settings).await {
        Ok(result) => {
            let counts: serde_json::Map<String, serde_json::Value> = result
                .verdict_counts()
                .into_iter()
                .map(|(v, n)| (v.to_string(), json!(n)))
                .collect();
            emitter.done_with(
                verify,
                format!("{} claim(s) verified", result.claims.len()),
                json!({ "verdicts": counts, "report": paths.verification_report }),
            );
            info!(url = %article.url, claims = result.claims.len(), "Article verified");
            result
        }
        Err(e) => {
            warn!(error = %e, url = %article.url, "Verification failed");
            emitter.error(verify, e.to_string());
            VerificationResult::failed(article, e.to_string())
        }
    }
}

async fn finish<A: AskAsync>(
    asker: &A,
    search: &SerperSearch,
    runner: &TaskRunner<'_, A>,
    article: &ArticleRecord,
    paths: &ArticlePaths,
    settings: &Settings,
) -> Result<VerificationResult> {
    let news_summary = runner
        .output("identify_claims")
        .and_then(|json| serde_json::from_str::<IdentifiedClaims>(json).ok())
        .map(|c| c.news_summary)
        .filter(|s| !s.trim().is_empty());

    let claims = execute_plan(asker, search, paths, settings).await?;
    let result = VerificationResult {
        title: article.title.clone(),
        url: article.url.clone(),
        news_summary,
        claims,
        error: None,
    };
    write_text(&paths.verification_report, &render_verification_report(&result)?).await?;
    Ok(result)
}
