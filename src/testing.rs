//! Test doubles shared by the module tests.

use std::sync::Mutex;

use crate::api::{AskAsync, LlmError};

/// An [`AskAsync`] that answers by task name.
///
/// The task name is read from the `## Task:` line every agent prompt carries;
/// the closure gets the name and the whole prompt.
pub struct RoutedAsk<F> {
    route: F,
    calls: Mutex<Vec<String>>,
}

impl<F> RoutedAsk<F>
where
    F: Fn(&str, &str) -> Result<String, LlmError>,
{
    pub fn new(route: F) -> Self {
        Self {
            route,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Task names in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, task: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|t| *t == task).count()
    }
}

pub fn task_name(prompt: &str) -> &str {
    prompt
        .lines()
        .find_map(|l| l.strip_prefix("## Task: "))
        .map(str::trim)
        .unwrap_or("")
}

impl<F> AskAsync for RoutedAsk<F>
where
    F: Fn(&str, &str) -> Result<String, LlmError>,
{
    async fn ask(&self, text: &str) -> Result<String, LlmError> {
        let task = task_name(text);
        self.calls.lock().unwrap().push(task.to_string());
        (self.route)(task, text)
    }
}

// Canned replies for the verification steps, routed by task name.

pub const CLAIMS: &str = r#"{"news_summary": "Rules on chip exports tightened.",
    "key_entities": ["Commerce Department"],
    "critical_claims": [
        {"statement": "New export rules took effect on Tuesday", "rationale": "date", "priority": "High"},
        {"statement": "Licences are needed above the threshold", "rationale": "scope", "priority": "Medium"}
    ]}"#;
pub const QUERIES: &str = r#"{"search_queries": [
    {"claim_id": "C1", "query": "chip export rules effective date", "intent": "official notice"},
    {"claim_id": "C2", "query": "chip export licence threshold", "intent": "rule text"}
]}"#;
pub const PLAN: &str = r#"{"overall_strategy": "Check official notices first.",
    "claims": [
        {"claim_id": "C1", "statement": "New export rules took effect on Tuesday", "priority": "High",
         "strategy": "Official notice", "success_criterion": "Federal Register entry",
         "queries": [{"query": "chip export rules effective date"}]},
        {"claim_id": "C2", "statement": "Licences are needed above the threshold", "priority": "Medium",
         "strategy": "Rule text", "success_criterion": "Rule text names a threshold",
         "queries": [{"query": "chip export licence threshold"}]}
    ]}"#;
pub const VERDICT: &str = r#"{"verdict": "CONFIRMED", "confidence": "High",
    "explanation": "The notice gives the date.",
    "evidence": [{"source": "Federal Register", "url": "https://gov.test/notice", "note": "effective date"}]}"#;

pub fn scripted(task: &str, _prompt: &str) -> std::result::Result<String, LlmError> {
    Ok(match task {
        "identify_claims" => CLAIMS,
        "generate_queries" => QUERIES,
        "compile_plan" => PLAN,
        "verify_claim" => VERDICT,
        other => panic!("unexpected task {other}"),
    }
    .to_string())
}

#[test]
fn task_name_is_read_from_prompt() {
    assert_eq!(task_name("You are...\n\n## Task: identify_claims\n\nbody"), "identify_claims");
    assert_eq!(task_name("no task"), "");
}
