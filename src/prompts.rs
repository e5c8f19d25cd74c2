//! Personas and instruction text for every LLM step.
//!
//! Templates used by the task runner carry `{placeholder}` slots that are
//! filled from the task's bindings; the other builders format their inputs
//! directly.

use itertools::Itertools;

use crate::api::Agent;
use crate::models::{ArticleRecord, CandidateLink, Claim, InterestProfile, PlanEntry, VerificationResult};
use crate::tools::search::SearchHit;

pub const INTEREST_ANALYZER: Agent = Agent {
    role: "User Interest Analyzer",
    goal: "Turn a free-text description of what a reader cares about into clear interest tags.",
    backstory: "You recognise the fields, companies, regions and themes people mention and \
                name them as short tags.",
};

pub const NEWS_SELECTOR: Agent = Agent {
    role: "News Selector",
    goal: "Pick the candidate headlines whose meaning best matches the reader's interests.",
    backstory: "You are a senior news editor who judges relevance by understanding a headline, \
                not by matching keywords.",
};

pub const ARTICLE_EDITOR: Agent = Agent {
    role: "Article Editor",
    goal: "Reduce a crawled web page to the article itself.",
    backstory: "You strip navigation, adverts and related-story lists and keep the article text \
                exactly as written.",
};

pub const VERIFICATION_STRATEGIST: Agent = Agent {
    role: "News Verification Strategist",
    goal: "Find the claims in a news article that matter most and plan how to check them.",
    backstory: "You are an experienced fact-checker who writes precise search queries that can \
                confirm or debunk a specific claim. You output only the requested result.",
};

pub const CLAIM_VERIFIER: Agent = Agent {
    role: "Claim Verification Specialist",
    goal: "Judge a claim against search results and cite the sources that decide it.",
    backstory: "You weigh the credibility of sources and never call a claim confirmed without \
                a source that says so.",
};

pub const FACT_CHECKER: Agent = Agent {
    role: "Fact Check Analyst",
    goal: "Check the key factual statements of one article against independent sources.",
    backstory: "You break an article into factual statements and cross-check each one before \
                giving a clear verdict.",
};

pub const REPORT_WRITER: Agent = Agent {
    role: "Fact Check Reporter",
    goal: "Summarise fact-check results for a general reader.",
    backstory: "You are an investigative journalist who explains verification work plainly.",
};

const JSON_ONLY: &str = "Reply with the JSON only. No explanations, no thoughts, no code fences.";

pub fn interest_instructions(description: &str) -> String {
    format!(
        "Extract 3 to 10 interest tags from the reader's description below. Use words from the \
         description or close paraphrases of them.\n\n\
         Description:\n{description}\n\n\
         Return {{\"interests\": [\"tag\", ...]}}. {JSON_ONLY}"
    )
}

pub fn selection_instructions(
    profile: &InterestProfile,
    candidates: &[CandidateLink],
    max_articles: usize,
) -> String {
    let listing = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {} | {}", i + 1, c.title, c.url))
        .join("\n");
    format!(
        "Reader interests: {}\n\n\
         Candidate headlines (number. title | url):\n{listing}\n\n\
         Choose at most {max_articles} candidates that best match the interests by meaning. \
         Copy each url exactly as listed.\n\
         Return [{{\"title\": \"...\", \"url\": \"...\"}}, ...]. {JSON_ONLY}",
        profile.to_json()
    )
}

pub fn clean_instructions(article: &ArticleRecord) -> String {
    format!(
        "The Markdown below was crawled from {url}. Return only the article: its headline and \
         body paragraphs in Markdown. Drop menus, adverts, share buttons, comments and lists of \
         other stories. Do not rewrite or summarise.\n\n---\n{body}",
        url = article.url,
        body = article.raw_body
    )
}

/// Runner template; `{article}` is the contents of `extracted_news.md`.
pub const IDENTIFY_CLAIMS: &str = "\
Read the news article below and identify the claims that need verification.

1. Summarise the article in two or three sentences.
2. List the key entities (people, organisations, places, dates).
3. Pick the 5 to 8 most critical factual claims, prioritised by importance to the story, \
how verifiable they are and the impact if they were false.

For each claim give the exact statement, why it needs verification and a priority \
(High, Medium or Low).

Return {\"news_summary\": \"...\", \"key_entities\": [\"...\"], \"critical_claims\": \
[{\"id\": \"C1\", \"statement\": \"...\", \"rationale\": \"...\", \"priority\": \"High\"}]}.
Reply with the JSON only.

Article:
{article}";

/// Runner template; `{claims}` is `identified_claims.json`.
pub const GENERATE_QUERIES: &str = "\
For every claim below write 2 or 3 web search queries that could find official sources, \
independent reporting, expert opinion or contradicting evidence.

Return {\"search_queries\": [{\"claim_id\": \"C1\", \"query\": \"...\", \"intent\": \"...\", \
\"expected_result\": \"...\"}]}.
Reply with the JSON only.

Claims:
{claims}";

/// Runner template; `{claims}` and `{queries}` are the two previous artifacts.
pub const COMPILE_PLAN: &str = "\
Merge the claims and search queries below into one verification plan. Give an overall \
strategy, and for every claim a strategy, the queries to run and a success criterion that \
says what evidence would settle it.

Return {\"overall_strategy\": \"...\", \"claims\": [{\"claim_id\": \"C1\", \"statement\": \"...\", \
\"priority\": \"High\", \"strategy\": \"...\", \"success_criterion\": \"...\", \
\"queries\": [{\"query\": \"...\", \"intent\": \"...\", \"expected_result\": \"...\"}]}]}.
Reply with the JSON only.

Claims:
{claims}

Search queries:
{queries}";

fn render_hits(hits: &[(String, Vec<SearchHit>)]) -> String {
    hits.iter()
        .map(|(query, results)| {
            let lines = results
                .iter()
                .map(|h| format!("- {} ({})\n  {}", h.title, h.link, h.snippet))
                .join("\n");
            format!("Query: {query}\n{lines}")
        })
        .join("\n\n")
}

pub fn verdict_instructions(entry: &PlanEntry, hits: &[(String, Vec<SearchHit>)]) -> String {
    format!(
        "Claim {id}: {statement}\n\
         Success criterion: {criterion}\n\n\
         Search results:\n{results}\n\n\
         Decide whether the claim is CONFIRMED, CONTRADICTED, AMBIGUOUS or UNVERIFIED. Any \
         verdict except UNVERIFIED must cite at least one of the result links above as evidence.\n\
         Return {{\"verdict\": \"...\", \"confidence\": \"High|Medium|Low\", \"explanation\": \"...\", \
         \"evidence\": [{{\"source\": \"...\", \"url\": \"...\", \"note\": \"...\"}}], \"caveats\": \"...\"}}. \
         {JSON_ONLY}",
        id = entry.claim_id,
        statement = entry.statement,
        criterion = entry.success_criterion,
        results = render_hits(hits),
    )
}

pub fn fact_check_claims_instructions(article: &ArticleRecord) -> String {
    IDENTIFY_CLAIMS.replace(
        "{article}",
        &format!("# {}\n\nURL: {}\n\n{}", article.title, article.url, article.body()),
    )
}

pub fn fact_check_instructions(
    article: &ArticleRecord,
    claims: &[Claim],
    hits: &[(String, Vec<SearchHit>)],
) -> String {
    let claim_list = claims
        .iter()
        .map(|c| format!("- {}: {}", c.id, c.statement))
        .join("\n");
    format!(
        "Article: {title} ({url})\n\n\
         Claims:\n{claim_list}\n\n\
         Search results per claim:\n{results}\n\n\
         Give every claim a verdict of TRUE, PARTIALLY_TRUE, FALSE or UNCERTAIN. Any verdict except \
         UNCERTAIN must cite at least one result link as evidence.\n\
         Return {{\"title\": \"...\", \"url\": \"...\", \"checks\": [{{\"claim\": \"...\", \"verdict\": \"...\", \
         \"explanation\": \"...\", \"evidence\": [{{\"source\": \"...\", \"url\": \"...\", \"note\": \"...\"}}]}}]}}. \
         {JSON_ONLY}",
        title = article.title,
        url = article.url,
        results = render_hits(hits),
    )
}

pub fn report_instructions(entries: &[(ArticleRecord, VerificationResult)]) -> String {
    let digest = entries
        .iter()
        .enumerate()
        .map(|(i, (article, result))| {
            let outcome = match &result.error {
                Some(reason) => format!("could not be verified: {reason}"),
                None => result
                    .claims
                    .iter()
                    .map(|c| format!("  - [{}] {}", c.verdict, c.statement))
                    .join("\n"),
            };
            format!("{}. {} ({})\n{outcome}", i + 1, article.title, article.url)
        })
        .join("\n\n");
    format!(
        "Here are the verification results for {n} articles:\n\n{digest}\n\n\
         Write a short overview of the run, one two-sentence summary per article in the same \
         order, an overall reliability assessment and the topics that remain contested.\n\
         Return {{\"overview\": \"...\", \"summaries\": [\"...\"], \"reliability\": \"...\", \
         \"contested_topics\": [\"...\"]}}. {JSON_ONLY}",
        n = entries.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_lists_every_candidate_with_url() {
        let profile = InterestProfile::new(["technology"]).unwrap();
        let candidates = vec![
            CandidateLink {
                title: "Chips".to_string(),
                url: "https://x.test/news/chips".to_string(),
            },
            CandidateLink {
                title: "Rates".to_string(),
                url: "https://x.test/news/rates".to_string(),
            },
        ];
        let text = selection_instructions(&profile, &candidates, 1);
        assert!(text.contains("1. Chips | https://x.test/news/chips"));
        assert!(text.contains("2. Rates | https://x.test/news/rates"));
        assert!(text.contains("at most 1"));
    }

    #[test]
    fn runner_templates_have_their_slots() {
        assert!(IDENTIFY_CLAIMS.contains("{article}"));
        assert!(GENERATE_QUERIES.contains("{claims}"));
        assert!(COMPILE_PLAN.contains("{claims}") && COMPILE_PLAN.contains("{queries}"));
    }

    #[test]
    fn verdict_prompt_carries_links() {
        let entry = PlanEntry {
            claim_id: "C1".to_string(),
            statement: "Exports fell".to_string(),
            priority: Default::default(),
            strategy: String::new(),
            success_criterion: "official data".to_string(),
            queries: vec![],
        };
        let hits = vec![(
            "exports fell".to_string(),
            vec![SearchHit {
                title: "Trade data".to_string(),
                link: "https://stats.test/trade".to_string(),
                snippet: "Exports fell 3%".to_string(),
            }],
        )];
        let text = verdict_instructions(&entry, &hits);
        assert!(text.contains("Claim C1: Exports fell"));
        assert!(text.contains("https://stats.test/trade"));
    }
}
