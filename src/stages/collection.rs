//! Collection: crawl every selected article and prepare its text for the LLM.
//!
//! The output has exactly one [`ArticleRecord`] per selected article, in the
//! same order; a failed crawl is a record with `error` set.

use tracing::{info, instrument, warn};

use super::{Halt, article_step};
use crate::api::{AskAsync, ask_text};
use crate::config::Settings;
use crate::events::Emitter;
use crate::models::{ArticleRecord, SelectedArticle};
use crate::prompts;
use crate::tools::Tool;
use crate::tools::article::{ArticleCrawler, CrawlEntry, UrlRef};
use crate::utils::truncate_for_llm;

/// Marker stored as the body of an article that could not be crawled.
pub fn crawl_failure_marker(reason: &str) -> String {
    format!("[crawl failed: {reason}]")
}

/// Build the record for one selected article from its crawl entry.
pub fn to_record(selected: &SelectedArticle, entry: Option<&CrawlEntry>, budget: usize) -> ArticleRecord {
    let error = match entry {
        None => Some("no crawl result".to_string()),
        Some(e) => e.error.clone(),
    };
    let title = [
        selected.title.trim(),
        entry.map(|e| e.title.trim()).unwrap_or_default(),
        selected.url.as_str(),
    ]
    .into_iter()
    .find(|t| !t.is_empty())
    .unwrap_or_default()
    .to_string();

    match error {
        Some(reason) => ArticleRecord {
            title,
            url: selected.url.clone(),
            raw_body: crawl_failure_marker(&reason),
            cleaned_body: None,
            truncated: false,
            error: Some(reason),
        },
        None => {
            let markdown = entry.map(|e| e.markdown.as_str()).unwrap_or_default();
            let (raw_body, truncated) = truncate_for_llm(markdown, budget);
            ArticleRecord {
                title,
                url: selected.url.clone(),
                raw_body,
                cleaned_body: None,
                truncated,
                error: None,
            }
        }
    }
}

/// LLM pass that keeps only the article text. `None` means keep the raw body.
#[instrument(level = "info", skip_all, fields(url = %article.url))]
pub async fn clean_article<A: AskAsync>(asker: &A, article: &ArticleRecord, budget: usize) -> Option<String> {
    match ask_text(
        asker,
        &prompts::ARTICLE_EDITOR,
        "article_clean",
        &prompts::clean_instructions(article),
    )
    .await
    {
        Ok(cleaned) => Some(truncate_for_llm(&cleaned, budget).0),
        Err(e) => {
            warn!(error = %e, "Clean pass failed; keeping raw body");
            None
        }
    }
}

/// Run the whole collection stage.
pub async fn collect<A: AskAsync>(
    asker: &A,
    crawler: &ArticleCrawler,
    emitter: &Emitter<'_>,
    selected: &[SelectedArticle],
    settings: &Settings,
) -> Result<Vec<ArticleRecord>, Halt> {
    emitter.start(
        "article_crawl",
        format!("Crawling {} article(s)", selected.len()),
    );
    let targets = selected.iter().map(|s| UrlRef::from(s.url.as_str())).collect();
    emitter.tool_call("article_crawl", crawler, &format!("{} url(s)", selected.len()));
    let crawled = crawler.invoke(targets).await.unwrap_or_default();

    let mut records: Vec<ArticleRecord> = selected
        .iter()
        .map(|s| to_record(s, crawled.get(&s.url), settings.llm_char_budget))
        .collect();

    if records.iter().all(ArticleRecord::is_failed) {
        emitter.error("article_crawl", "No article body could be crawled");
        return Err(Halt::new(
            "No article body could be crawled. Check the portal and your network connection, \
             or try another portal.",
        ));
    }
    let ok = records.iter().filter(|r| !r.is_failed()).count();
    emitter.done("article_crawl", format!("Crawled {ok} of {} article(s)", records.len()));

    if settings.clean_articles {
        for (i, record) in records.iter_mut().enumerate() {
            if record.is_failed() {
                continue;
            }
            let step = article_step(i, "clean");
            emitter.start(step.as_str(), "Cleaning article text");
            match clean_article(asker, record, settings.llm_char_budget).await {
                Some(cleaned) => {
                    record.cleaned_body = Some(cleaned);
                    emitter.done(step, "Article text cleaned");
                }
                None => emitter.error(step, "Clean pass failed; using the crawled text"),
            }
        }
    }

    info!(records = records.len(), crawled = ok, "Collection complete");
    Ok(records)
}
