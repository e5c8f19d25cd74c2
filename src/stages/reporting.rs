//! Reporting: one Markdown summary for the whole run.
//!
//! The LLM only writes the narrative (overview, per-article summaries,
//! reliability, contested topics). The document itself is rendered here so it
//! always has one `###` section per article, whatever the model returns.

use itertools::Itertools;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::api::{AskAsync, ask_typed};
use crate::decode::{JsonShape, Schema};
use crate::models::{ArticleRecord, Verdict, VerificationResult};
use crate::prompts;
use crate::utils::inline_text;

/// Narrative parts of the report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReportNarrative {
    pub overview: String,
    #[serde(default)]
    pub summaries: Vec<String>,
    #[serde(default)]
    pub reliability: String,
    #[serde(default)]
    pub contested_topics: Vec<String>,
}

impl Schema for ReportNarrative {
    const NAME: &'static str = "summary";
    const SHAPE: JsonShape = JsonShape::Object;

    fn check(&mut self) -> Result<(), String> {
        if self.overview.trim().is_empty() {
            return Err("empty overview".to_string());
        }
        self.contested_topics.retain(|t| !t.trim().is_empty());
        Ok(())
    }
}

fn tally(entries: &[(ArticleRecord, VerificationResult)]) -> Vec<(Verdict, usize)> {
    entries
        .iter()
        .flat_map(|(_, r)| r.claims.iter().map(|c| c.verdict))
        .counts()
        .into_iter()
        .sorted_by_key(|(v, _)| v.as_str())
        .collect()
}

/// Narrative computed without the LLM.
pub fn local_narrative(entries: &[(ArticleRecord, VerificationResult)]) -> ReportNarrative {
    let failed = entries.iter().filter(|(_, r)| r.is_failed()).count();
    let claims: usize = entries.iter().map(|(_, r)| r.claims.len()).sum();
    let overview = format!(
        "{} article(s) were processed: {} verified and {failed} could not be verified. \
         {claims} claim(s) were checked in total.",
        entries.len(),
        entries.len() - failed,
    );

    let summaries = entries
        .iter()
        .map(|(_, r)| r.news_summary.clone().unwrap_or_default())
        .collect();

    let doubtful: Vec<String> = entries
        .iter()
        .flat_map(|(_, r)| r.claims.iter())
        .filter(|c| {
            matches!(
                c.verdict,
                Verdict::Contradicted | Verdict::Ambiguous | Verdict::False | Verdict::PartiallyTrue
            )
        })
        .map(|c| c.statement.clone())
        .collect();

    let reliability = if claims == 0 {
        "No claim could be assessed.".to_string()
    } else {
        format!(
            "{} of {claims} claim(s) were disputed or only partly supported.",
            doubtful.len()
        )
    };

    ReportNarrative {
        overview,
        summaries,
        reliability,
        contested_topics: doubtful,
    }
}

fn render_article(out: &mut String, n: usize, article: &ArticleRecord, result: &VerificationResult, summary: &str) {
    out.push_str(&format!("### {n}. {}\n\n", inline_text(&article.title)));
    out.push_str(&format!("- Link: <{}>\n", article.url));
    if article.truncated {
        out.push_str("- Note: article text was truncated before analysis\n");
    }
    out.push('\n');

    if let Some(reason) = &result.error {
        out.push_str(&format!("This article could not be verified: {}\n\n", inline_text(reason)));
        return;
    }

    let summary = Some(inline_text(summary))
        .filter(|s| !s.is_empty())
        .or_else(|| result.news_summary.as_deref().map(inline_text));
    if let Some(summary) = summary {
        out.push_str(&format!("{summary}\n\n"));
    }

    if result.claims.is_empty() {
        out.push_str("No checkable claims were identified.\n\n");
        return;
    }
    for claim in &result.claims {
        out.push_str(&format!("- **{}** {}", claim.verdict, inline_text(&claim.statement)));
        let explanation = inline_text(&claim.explanation);
        if !explanation.is_empty() {
            out.push_str(&format!(": {explanation}"));
        }
        out.push('\n');
    }
    out.push('\n');
}

/// Render the report document. Model-written text is flattened with
/// [`inline_text`] so only this function decides the heading structure.
pub fn render_report(
    title: &str,
    entries: &[(ArticleRecord, VerificationResult)],
    narrative: &ReportNarrative,
) -> String {
    let mut out = format!(
        "# {title}\n\n## Overview\n\n{}\n\n## Articles\n\n",
        inline_text(&narrative.overview)
    );

    for (i, (article, result)) in entries.iter().enumerate() {
        let summary = narrative.summaries.get(i).map(String::as_str).unwrap_or_default();
        render_article(&mut out, i + 1, article, result, summary);
    }

    out.push_str("## Assessment\n\n");
    let reliability = inline_text(&narrative.reliability);
    if !reliability.is_empty() {
        out.push_str(&format!("{reliability}\n\n"));
    }
    let topics: Vec<String> = narrative
        .contested_topics
        .iter()
        .map(|t| inline_text(t))
        .filter(|t| !t.is_empty())
        .collect();
    if !topics.is_empty() {
        out.push_str("Contested topics:\n\n");
        for topic in &topics {
            out.push_str(&format!("- {topic}\n"));
        }
        out.push('\n');
    }
    let tally = tally(entries);
    if !tally.is_empty() {
        let line = tally.iter().map(|(v, n)| format!("{v}: {n}")).join(", ");
        out.push_str(&format!("Verdicts: {line}\n"));
    }
    out
}

/// Ask the report writer for the narrative and render the document, falling
/// back to [`local_narrative`] when the call fails.
#[instrument(level = "info", skip_all, fields(entries = entries.len()))]
pub async fn build_report<A: AskAsync>(
    asker: &A,
    entries: &[(ArticleRecord, VerificationResult)],
    title: &str,
) -> String {
    let narrative = match ask_typed::<_, ReportNarrative>(
        asker,
        &prompts::REPORT_WRITER,
        "summary",
        &prompts::report_instructions(entries),
    )
    .await
    {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "Report narrative failed; using local summary");
            local_narrative(entries)
        }
    };
    let markdown = render_report(title, entries, &narrative);
    info!(bytes = markdown.len(), "Report rendered");
    markdown
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::LlmError;
    use crate::models::{ClaimVerdict, Evidence};
    use crate::testing::RoutedAsk;

    fn entry(n: usize, failed: bool) -> (ArticleRecord, VerificationResult) {
        let article = ArticleRecord {
            title: format!("Story {n}"),
            url: format!("https://example-news.test/news/{n}"),
            raw_body: "body".to_string(),
            cleaned_body: None,
            truncated: false,
            error: None,
        };
        if failed {
            let result = VerificationResult::failed(&article, "search quota exhausted");
            return (article, result);
        }
        let result = VerificationResult {
            title: article.title.clone(),
            url: article.url.clone(),
            news_summary: Some(format!("Summary {n}.")),
            claims: vec![
                ClaimVerdict {
                    claim_id: "C1".to_string(),
                    statement: "Rates rose".to_string(),
                    verdict: Verdict::Confirmed,
                    confidence: None,
                    explanation: "Bank statement".to_string(),
                    evidence: vec![Evidence {
                        source: "Bank".to_string(),
                        url: "https://bank.test".to_string(),
                        note: String::new(),
                    }],
                    caveats: None,
                },
                ClaimVerdict {
                    claim_id: "C2".to_string(),
                    statement: "Inflation halved".to_string(),
                    verdict: Verdict::Contradicted,
                    confidence: None,
                    explanation: String::new(),
                    evidence: vec![],
                    caveats: None,
                },
            ],
            error: None,
        };
        (article, result)
    }

    fn sections(markdown: &str) -> usize {
        markdown.lines().filter(|l| l.starts_with("### ")).count()
    }

    #[test]
    fn one_section_per_article_even_when_failed() {
        let entries = vec![entry(1, false), entry(2, true), entry(3, false)];
        let md = render_report("Run", &entries, &local_narrative(&entries));
        assert_eq!(sections(&md), 3);
        assert!(md.contains("### 2. Story 2"));
        assert!(md.contains("could not be verified: search quota exhausted"));
        assert!(md.contains("- **CONFIRMED** Rates rose: Bank statement"));
        assert!(md.contains("Verdicts: CONFIRMED: 2, CONTRADICTED: 2"));
    }

    #[test]
    fn local_narrative_lists_disputed_claims() {
        let entries = vec![entry(1, false), entry(2, true)];
        let narrative = local_narrative(&entries);
        assert!(narrative.overview.contains("1 verified and 1 could not be verified"));
        assert_eq!(narrative.contested_topics, vec!["Inflation halved"]);
        assert_eq!(narrative.summaries, vec!["Summary 1.".to_string(), String::new()]);
    }

    #[tokio::test]
    async fn llm_narrative_is_used_when_valid() {
        let asker = RoutedAsk::new(|task, _| {
            assert_eq!(task, "summary");
            Ok(r#"{"overview": "Mostly solid.", "summaries": ["Rates story."],
                   "reliability": "High", "contested_topics": ["inflation"]}"#
                .to_string())
        });
        let entries = vec![entry(1, false)];
        let md = build_report(&asker, &entries, "Run").await;
        assert!(md.contains("## Overview\n\nMostly solid."));
        assert!(md.contains("Rates story."));
        assert!(md.contains("- inflation"));
    }

    #[test]
    fn narrative_headings_are_flattened() {
        let mut entries = vec![entry(1, false), entry(2, false)];
        entries[0].0.title = "## Breaking\nnews".to_string();
        let narrative = ReportNarrative {
            overview: "# Injected\n\n## Articles\n\nAll fine.".to_string(),
            summaries: vec!["### 9. Fake section\nmore".to_string()],
            reliability: "## Assessment\nHigh".to_string(),
            contested_topics: vec!["### x".to_string(), "#".to_string()],
        };
        let md = render_report("Run", &entries, &narrative);
        assert_eq!(sections(&md), 2);
        assert_eq!(md.lines().filter(|l| l.starts_with("## ")).count(), 3);
        assert!(md.contains("## Overview\n\nInjected ## Articles All fine.\n"));
        assert!(md.contains("### 1. Breaking news\n"));
        assert!(md.contains("\n9. Fake section more\n"));
        assert!(md.contains("\nAssessment High\n"));
        assert!(md.contains("Contested topics:\n\n- x\n\n"));
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_local_text() {
        let asker = RoutedAsk::new(|_, _| Err(LlmError::Request("down".to_string())));
        let entries = vec![entry(1, false), entry(2, true)];
        let md = build_report(&asker, &entries, "Run").await;
        assert_eq!(sections(&md), 2);
        assert!(md.contains("2 article(s) were processed"));
        assert!(md.contains("## Assessment"));
    }
}
