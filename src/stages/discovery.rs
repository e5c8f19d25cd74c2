//! Discovery: interests → portal candidates → LLM selection.
//!
//! The selection call is allowed to fail: an unusable reply falls back to
//! the first raw candidates. An empty portal is retried once against the
//! bare domain root before the run halts.

use std::collections::HashSet;

use serde_json::json;
use tracing::{info, instrument, warn};
use url::Url;

use super::Halt;
use crate::api::{AskAsync, ask_typed};
use crate::events::Emitter;
use crate::models::{CandidateLink, InterestProfile, SelectedArticle, Selection};
use crate::prompts;
use crate::tools::portal::{PortalCrawler, bare_root, dedup_key};
use crate::utils::inline_text;

/// Raw candidates taken beyond `max_articles` when selection falls back.
const FALLBACK_EXTRA: usize = 2;

#[derive(Debug, Clone)]
pub struct Discovery {
    pub profile: InterestProfile,
    pub candidate_count: usize,
    pub selected: Vec<SelectedArticle>,
}

/// Derive the interest profile, falling back to splitting the text itself.
#[instrument(level = "info", skip_all)]
pub async fn extract_interests<A: AskAsync>(asker: &A, description: &str) -> Option<InterestProfile> {
    match ask_typed::<_, InterestProfile>(
        asker,
        &prompts::INTEREST_ANALYZER,
        "interest_extract",
        &prompts::interest_instructions(description),
    )
    .await
    {
        Ok(profile) => Some(profile),
        Err(e) => {
            warn!(error = %e, "Interest extraction failed; deriving tags from the text");
            InterestProfile::from_free_text(description)
        }
    }
}

/// Crawl the portal, retrying once against the bare root when it yields
/// nothing. Crawl errors count as an empty result.
#[instrument(level = "info", skip(crawler))]
pub async fn crawl_candidates(crawler: &PortalCrawler, portal_url: &str) -> Vec<CandidateLink> {
    let first = crawl_or_empty(crawler, portal_url).await;
    if !first.is_empty() {
        return first;
    }
    match bare_root(portal_url) {
        Some(root) => {
            info!(%root, "Portal returned no candidates; retrying bare domain root");
            crawl_or_empty(crawler, &root).await
        }
        None => first,
    }
}

async fn crawl_or_empty(crawler: &PortalCrawler, url: &str) -> Vec<CandidateLink> {
    match crawler.crawl(url).await {
        Ok(listing) => listing.items,
        Err(e) => {
            warn!(error = %e, %url, "Portal crawl failed");
            Vec::new()
        }
    }
}

/// Keep only selections whose URL is one of the candidates, deduplicated,
/// in the model's order.
pub fn restrict_to_candidates(
    selection: Vec<SelectedArticle>,
    candidates: &[CandidateLink],
) -> Vec<SelectedArticle> {
    let by_key = |url: &str| {
        Url::parse(url.trim())
            .map(|u| dedup_key(&u))
            .unwrap_or_else(|_| url.trim().trim_end_matches('/').to_string())
    };
    let known: Vec<(String, &CandidateLink)> =
        candidates.iter().map(|c| (by_key(&c.url), c)).collect();

    let mut seen = HashSet::new();
    selection
        .into_iter()
        .filter_map(|pick| {
            let key = by_key(&pick.url);
            let (_, candidate) = known.iter().find(|(k, _)| *k == key)?;
            let title = inline_text(&pick.title);
            seen.insert(key).then(|| SelectedArticle {
                title: if title.is_empty() {
                    candidate.title.clone()
                } else {
                    title
                },
                url: candidate.url.clone(),
            })
        })
        .collect()
}

/// The first `max_articles + 2` raw candidates.
pub fn fallback_selection(candidates: &[CandidateLink], max_articles: usize) -> Vec<SelectedArticle> {
    candidates
        .iter()
        .take(max_articles + FALLBACK_EXTRA)
        .cloned()
        .map(SelectedArticle::from)
        .collect()
}

/// Ask the model to pick articles; fall back to raw candidates on any
/// failure. The result holds at most `max_articles` entries.
#[instrument(level = "info", skip_all, fields(candidates = candidates.len(), max_articles))]
pub async fn select_articles<A: AskAsync>(
    asker: &A,
    profile: &InterestProfile,
    candidates: &[CandidateLink],
    max_articles: usize,
    prompt_cap: usize,
) -> Vec<SelectedArticle> {
    let shown = &candidates[..candidates.len().min(prompt_cap)];
    let picked = match ask_typed::<_, Selection>(
        asker,
        &prompts::NEWS_SELECTOR,
        "news_select",
        &prompts::selection_instructions(profile, shown, max_articles),
    )
    .await
    {
        Ok(Selection(picks)) => restrict_to_candidates(picks, candidates),
        Err(e) => {
            warn!(error = %e, "Selection failed");
            Vec::new()
        }
    };

    let mut selected = if picked.is_empty() {
        warn!("No usable selection; falling back to the first raw candidates");
        fallback_selection(candidates, max_articles)
    } else {
        picked
    };
    selected.truncate(max_articles);
    selected
}

/// Run the whole discovery stage.
pub async fn discover<A: AskAsync>(
    asker: &A,
    crawler: &PortalCrawler,
    emitter: &Emitter<'_>,
    portal_url: &str,
    description: &str,
    max_articles: usize,
    prompt_cap: usize,
) -> Result<Discovery, Halt> {
    emitter.start("interest_extract", "Extracting interest tags");
    let Some(profile) = extract_interests(asker, description).await else {
        emitter.error("interest_extract", "No interests could be derived");
        return Err(Halt::new(
            "No interests could be derived from the description. Describe the topics you follow, \
             for example \"AI chips, trade policy\".",
        ));
    };
    emitter.done_with(
        "interest_extract",
        "Interest tags ready",
        json!({ "interests": profile.tags() }),
    );

    emitter.start("news_select", "Crawling portal and selecting articles");
    if let Err(e) = Url::parse(portal_url.trim()) {
        emitter.error("news_select", "Portal URL is not valid");
        return Err(Halt::new(format!(
            "{portal_url:?} is not a valid portal URL ({e}). \
             Enter a full address such as https://news.yahoo.com/."
        )));
    }
    emitter.tool_call("news_select", crawler, portal_url);
    let candidates = crawl_candidates(crawler, portal_url).await;
    if candidates.is_empty() {
        emitter.error("news_select", "Portal returned no candidate links");
        let tried = match bare_root(portal_url) {
            Some(root) => format!("{portal_url} or its domain root {root}"),
            None => portal_url.to_string(),
        };
        return Err(Halt::new(format!(
            "No candidates found on {tried}. \
             Try a portal homepage such as https://news.yahoo.com/ or https://www.reuters.com/."
        )));
    }

    let selected = select_articles(asker, &profile, &candidates, max_articles, prompt_cap).await;
    info!(
        candidates = candidates.len(),
        selected = selected.len(),
        "Discovery complete"
    );
    emitter.done_with(
        "news_select",
        format!("Selected {} of {} candidates", selected.len(), candidates.len()),
        json!({ "selected": selected }),
    );

    Ok(Discovery {
        profile,
        candidate_count: candidates.len(),
        selected,
    })
}
