//! Data models that flow between pipeline stages.
//!
//! - [`InterestProfile`]: normalized interest tags for one run
//! - [`CandidateLink`] / [`PortalListing`]: links found on a portal homepage
//! - [`SelectedArticle`] / [`Selection`]: links chosen as relevant
//! - [`ArticleRecord`]: crawled text of one selected article
//! - [`Claim`], [`SearchQuery`], [`VerificationPlan`]: the per-article plan
//! - [`Verdict`], [`Evidence`], [`ClaimVerdict`], [`VerificationResult`]:
//!   the per-article outcome
//! - [`RunReport`]: the terminal artifact of a run
//!
//! Types that an LLM produces implement [`Schema`] so they are validated on
//! the way in. Field names are snake_case to match the JSON the prompts ask
//! for.

use std::fmt;
use std::path::PathBuf;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::decode::{JsonShape, Schema};

/// Most claims kept per article.
pub const MAX_CLAIMS: usize = 8;
/// Most interest tags kept per profile.
pub const MAX_TAGS: usize = 10;

/// The user's interests as an ordered set of tags.
///
/// Built once per run and never modified afterwards; the tags are trimmed and
/// de-duplicated case-insensitively, first occurrence wins.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InterestProfile {
    interests: Vec<String>,
}

impl InterestProfile {
    pub fn new<I, S>(tags: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let interests = normalize_tags(tags.into_iter().map(Into::into));
        (!interests.is_empty()).then_some(Self { interests })
    }

    /// Derive tags from the free text itself by splitting on list separators.
    pub fn from_free_text(text: &str) -> Option<Self> {
        let parts = text
            .split([',', ';', '\n', '，', '、', '；', '。'])
            .flat_map(|p| p.split(" and "))
            .map(str::trim)
            .filter(|p| !p.is_empty());
        Self::new(parts)
    }

    pub fn tags(&self) -> &[String] {
        &self.interests
    }

    pub fn to_json(&self) -> String {
        serde_json::json!({ "interests": self.interests }).to_string()
    }
}

fn normalize_tags(tags: impl Iterator<Item = String>) -> Vec<String> {
    tags.map(|t| t.trim().trim_matches(|c: char| c == '"' || c == '#').trim().to_string())
        .filter(|t| !t.is_empty())
        .unique_by(|t| t.to_lowercase())
        .take(MAX_TAGS)
        .collect()
}

impl Schema for InterestProfile {
    const NAME: &'static str = "interests";
    const SHAPE: JsonShape = JsonShape::Object;

    fn check(&mut self) -> Result<(), String> {
        self.interests = normalize_tags(std::mem::take(&mut self.interests).into_iter());
        if self.interests.is_empty() {
            return Err("interest list is empty".to_string());
        }
        Ok(())
    }
}

/// A link found on a portal homepage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct CandidateLink {
    pub title: String,
    pub url: String,
}

/// Output of a portal crawl.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PortalListing {
    pub portal_url: String,
    pub items: Vec<CandidateLink>,
}

/// A link chosen as relevant; input to collection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SelectedArticle {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

impl From<CandidateLink> for SelectedArticle {
    fn from(c: CandidateLink) -> Self {
        Self {
            title: c.title,
            url: c.url,
        }
    }
}

/// The selection step's reply: a non-empty array of `{title, url}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct Selection(pub Vec<SelectedArticle>);

impl Schema for Selection {
    const NAME: &'static str = "news_selection";
    const SHAPE: JsonShape = JsonShape::Array;

    fn check(&mut self) -> Result<(), String> {
        self.0.retain(|a| !a.url.trim().is_empty());
        if self.0.is_empty() {
            return Err("selection is empty".to_string());
        }
        Ok(())
    }
}

/// Full text of one selected article.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArticleRecord {
    pub title: String,
    pub url: String,
    /// Crawled body, cut to the LLM budget (see `truncated`).
    pub raw_body: String,
    /// Article-only Markdown from the clean pass, when it succeeded.
    pub cleaned_body: Option<String>,
    /// `raw_body` was cut to the character budget.
    pub truncated: bool,
    /// Crawl failure; `raw_body` then holds the error marker.
    pub error: Option<String>,
}

impl ArticleRecord {
    /// Best available body: cleaned if present, raw otherwise.
    pub fn body(&self) -> &str {
        self.cleaned_body.as_deref().unwrap_or(&self.raw_body)
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Metadata line telling readers of a saved article whether its text was cut.
    pub fn truncation_line(&self, budget: usize) -> String {
        if self.truncated {
            format!("- Truncated: yes (first {budget} chars)")
        } else {
            "- Truncated: no".to_string()
        }
    }
}

/// Claim priority, High first when sorted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl From<String> for Priority {
    fn from(raw: String) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "high" | "critical" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        })
    }
}

/// A checkable factual assertion from one article.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Claim {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "claim")]
    pub statement: String,
    #[serde(default, alias = "why_verify")]
    pub rationale: String,
    #[serde(default)]
    pub priority: Priority,
}

/// Contents of `identified_claims.json`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentifiedClaims {
    #[serde(default)]
    pub news_summary: String,
    #[serde(default)]
    pub key_entities: Vec<String>,
    #[serde(alias = "claims")]
    pub critical_claims: Vec<Claim>,
}

impl Schema for IdentifiedClaims {
    const NAME: &'static str = "identified_claims";
    const SHAPE: JsonShape = JsonShape::Object;

    /// Keep at most [`MAX_CLAIMS`], highest priority first, and give every
    /// claim an id unique within the article.
    fn check(&mut self) -> Result<(), String> {
        self.critical_claims.retain(|c| !c.statement.trim().is_empty());
        if self.critical_claims.is_empty() {
            return Err("no critical claims".to_string());
        }
        self.critical_claims.sort_by_key(|c| c.priority);
        self.critical_claims.truncate(MAX_CLAIMS);
        let ids_unique = self
            .critical_claims
            .iter()
            .map(|c| c.id.trim())
            .filter(|id| !id.is_empty())
            .all_unique();
        for (i, claim) in self.critical_claims.iter_mut().enumerate() {
            if claim.id.trim().is_empty() || !ids_unique {
                claim.id = format!("C{}", i + 1);
            }
        }
        Ok(())
    }
}

/// A query designed to verify one claim.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub claim_id: String,
    pub query: String,
    #[serde(default, alias = "purpose")]
    pub intent: String,
    #[serde(default)]
    pub expected_result: String,
}

/// Contents of `search_queries.json`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchQueries {
    pub search_queries: Vec<SearchQuery>,
}

impl Schema for SearchQueries {
    const NAME: &'static str = "search_queries";
    const SHAPE: JsonShape = JsonShape::Object;

    fn check(&mut self) -> Result<(), String> {
        self.search_queries.retain(|q| !q.query.trim().is_empty());
        if self.search_queries.is_empty() {
            return Err("no search queries".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PlannedQuery {
    pub query: String,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub expected_result: String,
}

/// One claim's entry in the verification plan.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PlanEntry {
    pub claim_id: String,
    pub statement: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub strategy: String,
    pub success_criterion: String,
    pub queries: Vec<PlannedQuery>,
}

/// Claims, their queries and a success criterion per claim.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerificationPlan {
    #[serde(default)]
    pub overall_strategy: String,
    pub claims: Vec<PlanEntry>,
}

impl Schema for VerificationPlan {
    const NAME: &'static str = "verification_plan";
    const SHAPE: JsonShape = JsonShape::Object;

    fn check(&mut self) -> Result<(), String> {
        if self.claims.is_empty() {
            return Err("plan has no claims".to_string());
        }
        for entry in &mut self.claims {
            entry.queries.retain(|q| !q.query.trim().is_empty());
            if entry.statement.trim().is_empty() {
                return Err(format!("claim {} has no statement", entry.claim_id));
            }
            if entry.queries.is_empty() {
                return Err(format!("claim {} has no queries", entry.claim_id));
            }
            if entry.success_criterion.trim().is_empty() {
                return Err(format!("claim {} has no success criterion", entry.claim_id));
            }
        }
        Ok(())
    }
}

/// Which verdict vocabulary a stage uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictScale {
    /// CONFIRMED / CONTRADICTED / AMBIGUOUS / UNVERIFIED
    Plan,
    /// TRUE / PARTIALLY_TRUE / FALSE / UNCERTAIN
    FactCheck,
}

/// Categorical outcome of verifying one claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum Verdict {
    Confirmed,
    Contradicted,
    Ambiguous,
    Unverified,
    True,
    PartiallyTrue,
    False,
    Uncertain,
}

impl TryFrom<String> for Verdict {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let key = raw.trim().to_uppercase().replace([' ', '-'], "_");
        Ok(match key.as_str() {
            "CONFIRMED" => Self::Confirmed,
            "CONTRADICTED" => Self::Contradicted,
            "AMBIGUOUS" => Self::Ambiguous,
            "UNVERIFIED" => Self::Unverified,
            "TRUE" => Self::True,
            "PARTIALLY_TRUE" => Self::PartiallyTrue,
            "FALSE" => Self::False,
            "UNCERTAIN" => Self::Uncertain,
            _ => return Err(format!("unknown verdict {raw:?}")),
        })
    }
}

impl Verdict {
    pub fn scale(self) -> VerdictScale {
        match self {
            Self::Confirmed | Self::Contradicted | Self::Ambiguous | Self::Unverified => {
                VerdictScale::Plan
            }
            _ => VerdictScale::FactCheck,
        }
    }

    /// Every verdict except "could not tell" must cite evidence.
    pub fn requires_evidence(self) -> bool {
        !matches!(self, Self::Unverified | Self::Uncertain)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "CONFIRMED",
            Self::Contradicted => "CONTRADICTED",
            Self::Ambiguous => "AMBIGUOUS",
            Self::Unverified => "UNVERIFIED",
            Self::True => "TRUE",
            Self::PartiallyTrue => "PARTIALLY_TRUE",
            Self::False => "FALSE",
            Self::Uncertain => "UNCERTAIN",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cited source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Evidence {
    #[serde(default)]
    pub source: String,
    #[serde(default, alias = "link")]
    pub url: String,
    #[serde(default)]
    pub note: String,
}

impl Evidence {
    /// A source name and a url, so a reader can follow the citation.
    pub fn is_citable(&self) -> bool {
        !self.url.trim().is_empty() && !self.source.trim().is_empty()
    }
}

/// Drop empty evidence entries and name unnamed sources after their url host.
pub fn tidy_evidence(evidence: &mut Vec<Evidence>) {
    evidence.retain(|e| !(e.url.trim().is_empty() && e.note.trim().is_empty()));
    for e in evidence.iter_mut().filter(|e| e.source.trim().is_empty()) {
        if let Some(host) = Url::parse(e.url.trim()).ok().and_then(|u| u.host_str().map(str::to_string)) {
            e.source = host.trim_start_matches("www.").to_string();
        }
    }
}

/// Check that `verdict` belongs to `scale` and cites evidence when it must.
pub fn check_verdict(
    verdict: Verdict,
    evidence: &[Evidence],
    scale: VerdictScale,
) -> Result<(), String> {
    if verdict.scale() != scale {
        return Err(format!("verdict {verdict} is not allowed here"));
    }
    if verdict.requires_evidence() && !evidence.iter().any(Evidence::is_citable) {
        return Err(format!("verdict {verdict} needs evidence with a source and a url"));
    }
    Ok(())
}

/// The verdict step's reply for one claim.
#[derive(Debug, Clone, Deserialize)]
pub struct ClaimAssessment {
    #[serde(alias = "status", alias = "verification_status")]
    pub verdict: Verdict,
    #[serde(default)]
    pub confidence: Option<String>,
    #[serde(default, alias = "evidence_summary")]
    pub explanation: String,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub caveats: Option<String>,
}

impl Schema for ClaimAssessment {
    const NAME: &'static str = "claim_verdict";
    const SHAPE: JsonShape = JsonShape::Object;

    fn check(&mut self) -> Result<(), String> {
        tidy_evidence(&mut self.evidence);
        check_verdict(self.verdict, &self.evidence, VerdictScale::Plan)
    }
}

/// Final verdict for one claim.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClaimVerdict {
    pub claim_id: String,
    pub statement: String,
    pub verdict: Verdict,
    #[serde(default)]
    pub confidence: Option<String>,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub caveats: Option<String>,
}

/// Outcome of verifying one article.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerificationResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub news_summary: Option<String>,
    #[serde(default)]
    pub claims: Vec<ClaimVerdict>,
    /// Set when the article could not be verified.
    #[serde(default)]
    pub error: Option<String>,
}

impl VerificationResult {
    pub fn failed(article: &ArticleRecord, reason: impl Into<String>) -> Self {
        Self {
            title: article.title.clone(),
            url: article.url.clone(),
            news_summary: None,
            claims: Vec::new(),
            error: Some(reason.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Number of claims per verdict, sorted by verdict name.
    pub fn verdict_counts(&self) -> Vec<(Verdict, usize)> {
        self.claims
            .iter()
            .map(|c| c.verdict)
            .counts()
            .into_iter()
            .sorted_by_key(|(v, _)| v.as_str())
            .collect()
    }
}

/// One check in the single-pass fact-check reply.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FactCheck {
    #[serde(alias = "statement")]
    pub claim: String,
    pub verdict: Verdict,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

/// The single-pass fact-check reply for one article.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FactCheckOutput {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    pub checks: Vec<FactCheck>,
}

impl Schema for FactCheckOutput {
    const NAME: &'static str = "fact_check";
    const SHAPE: JsonShape = JsonShape::Object;

    fn check(&mut self) -> Result<(), String> {
        if self.checks.is_empty() {
            return Err("no checks".to_string());
        }
        for check in &mut self.checks {
            tidy_evidence(&mut check.evidence);
            check_verdict(check.verdict, &check.evidence, VerdictScale::FactCheck)
                .map_err(|e| format!("{:?}: {e}", check.claim))?;
        }
        Ok(())
    }
}

impl FactCheckOutput {
    pub fn into_result(self, article: &ArticleRecord) -> VerificationResult {
        VerificationResult {
            title: article.title.clone(),
            url: article.url.clone(),
            news_summary: None,
            claims: self
                .checks
                .into_iter()
                .enumerate()
                .map(|(i, c)| ClaimVerdict {
                    claim_id: format!("C{}", i + 1),
                    statement: c.claim,
                    verdict: c.verdict,
                    confidence: None,
                    explanation: c.explanation,
                    evidence: c.evidence,
                    caveats: None,
                })
                .collect(),
            error: None,
        }
    }
}

/// Terminal artifact of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_dir: PathBuf,
    pub summary_path: PathBuf,
    pub markdown: String,
    pub entries: Vec<(ArticleRecord, VerificationResult)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode;

    fn record() -> ArticleRecord {
        ArticleRecord {
            title: "Chip exports".to_string(),
            url: "https://example.com/a".to_string(),
            raw_body: "body".to_string(),
            cleaned_body: None,
            truncated: false,
            error: None,
        }
    }

    #[test]
    fn interest_tags_are_deduplicated_in_order() {
        let p = InterestProfile::new(["AI", " ai ", "Chips", "", "#Trade"]).unwrap();
        assert_eq!(p.tags(), ["AI", "Chips", "Trade"]);
        assert!(InterestProfile::new(Vec::<String>::new()).is_none());
    }

    #[test]
    fn interest_tags_from_free_text_come_from_the_text() {
        let text = "artificial intelligence, chip makers and macro economy";
        let p = InterestProfile::from_free_text(text).unwrap();
        assert_eq!(p.tags(), ["artificial intelligence", "chip makers", "macro economy"]);
        for tag in p.tags() {
            assert!(text.contains(tag.as_str()));
        }
        let zh = InterestProfile::from_free_text("特朗普、美国外交，关税").unwrap();
        assert_eq!(zh.tags().len(), 3);
    }

    #[test]
    fn interest_profile_json_round_trip_shape() {
        let p = InterestProfile::new(["technology"]).unwrap();
        assert_eq!(p.to_json(), r#"{"interests":["technology"]}"#);
    }

    #[test]
    fn selection_drops_entries_without_url() {
        let sel: Selection =
            decode(r#"[{"title": "a", "url": ""}, {"title": "b", "url": "https://x.test/b"}]"#)
                .unwrap();
        assert_eq!(sel.0.len(), 1);
        assert!(decode::<Selection>("[]").is_err());
    }

    #[test]
    fn claims_are_prioritized_capped_and_numbered() {
        let mut claims: Vec<_> = (0..10)
            .map(|i| {
                serde_json::json!({
                    "statement": format!("claim {i}"),
                    "priority": if i == 9 { "High" } else { "low" },
                })
            })
            .collect();
        claims.push(serde_json::json!({"statement": "   "}));
        let raw = serde_json::json!({ "news_summary": "s", "critical_claims": claims }).to_string();
        let parsed: IdentifiedClaims = decode(&raw).unwrap();
        assert_eq!(parsed.critical_claims.len(), MAX_CLAIMS);
        assert_eq!(parsed.critical_claims[0].statement, "claim 9");
        assert_eq!(parsed.critical_claims[0].priority, Priority::High);
        assert_eq!(parsed.critical_claims[0].id, "C1");
        assert_eq!(parsed.critical_claims[7].id, "C8");
    }

    #[test]
    fn verdicts_parse_loosely_but_reject_unknowns() {
        assert_eq!(Verdict::try_from("partially true".to_string()), Ok(Verdict::PartiallyTrue));
        assert_eq!(Verdict::try_from("confirmed".to_string()), Ok(Verdict::Confirmed));
        assert!(Verdict::try_from("probably".to_string()).is_err());
        assert_eq!(serde_json::to_string(&Verdict::PartiallyTrue).unwrap(), "\"PARTIALLY_TRUE\"");
    }

    #[test]
    fn confirmed_claim_needs_evidence_url() {
        let missing = r#"{"verdict": "CONFIRMED", "explanation": "x", "evidence": [{"source": "AP", "url": "", "note": "n"}]}"#;
        assert!(decode::<ClaimAssessment>(missing).is_err());

        let ok = r#"{"verdict": "CONFIRMED", "evidence": [{"source": "AP", "url": "https://apnews.com/x"}]}"#;
        let a: ClaimAssessment = decode(ok).unwrap();
        assert_eq!(a.evidence[0].url, "https://apnews.com/x");

        let unverified = r#"{"verdict": "UNVERIFIED", "evidence": []}"#;
        assert!(decode::<ClaimAssessment>(unverified).is_ok());
    }

    #[test]
    fn unnamed_sources_take_the_url_host() {
        let raw = r#"{"verdict": "CONFIRMED", "evidence": [
            {"source": " ", "url": "https://www.reuters.com/markets/x"},
            {"url": "", "note": "background"}]}"#;
        let a: ClaimAssessment = decode(raw).unwrap();
        assert_eq!(a.evidence[0].source, "reuters.com");
        assert_eq!(a.evidence[1].source, "");

        let unnamable = r#"{"verdict": "CONFIRMED", "evidence": [{"source": "", "url": "not a url"}]}"#;
        let err = decode::<ClaimAssessment>(unnamable).unwrap_err();
        assert!(err.to_string().contains("needs evidence with a source and a url"));
    }

    #[test]
    fn plan_scale_rejects_fact_check_verdicts() {
        let wrong = r#"{"verdict": "TRUE", "evidence": [{"url": "https://x.test"}]}"#;
        assert!(decode::<ClaimAssessment>(wrong).is_err());
    }

    #[test]
    fn plan_requires_queries_and_criteria() {
        let no_criterion = r#"{"claims": [{"claim_id": "C1", "statement": "s", "success_criterion": "", "queries": [{"query": "q"}]}]}"#;
        assert!(decode::<VerificationPlan>(no_criterion).is_err());
        let ok = r#"{"claims": [{"claim_id": "C1", "statement": "s", "success_criterion": "two sources", "queries": [{"query": "q"}]}]}"#;
        assert!(decode::<VerificationPlan>(ok).is_ok());
    }

    #[test]
    fn fact_check_output_maps_to_result() {
        let raw = r#"{"title": "t", "url": "u", "checks": [
            {"claim": "GDP grew 3%", "verdict": "TRUE", "evidence": [{"source": "BEA", "url": "https://bea.gov"}]},
            {"claim": "It rained", "verdict": "UNCERTAIN", "evidence": []}
        ]}"#;
        let out: FactCheckOutput = decode(raw).unwrap();
        let result = out.into_result(&record());
        assert_eq!(result.title, "Chip exports");
        assert_eq!(result.claims.len(), 2);
        assert_eq!(result.claims[1].claim_id, "C2");
        assert!(!result.is_failed());
    }

    #[test]
    fn failed_result_keeps_article_identity() {
        let r = VerificationResult::failed(&record(), "crawl failed");
        assert!(r.is_failed());
        assert_eq!(r.url, "https://example.com/a");
    }

    #[test]
    fn article_body_prefers_cleaned() {
        let mut a = record();
        assert_eq!(a.body(), "body");
        a.cleaned_body = Some("clean".to_string());
        assert_eq!(a.body(), "clean");
    }
}
