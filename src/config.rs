//! Pipeline settings and LLM configuration loading.
//!
//! Two files configure a run:
//!
//! - the `awful_aj` `config.yaml` (endpoint, model, API key) plus the chat
//!   template named by [`Settings::template`]; both are loaded once by
//!   [`load_llm`] and handed to the orchestrator as an [`LlmConfig`];
//! - an optional pipeline `settings.yaml` deserialized into [`Settings`].
//!   Every field has a default, so an empty file (or none) is valid.
//!
//! ```yaml
//! llm_char_budget: 20000
//! clean_articles: true
//! search:
//!   endpoint: https://google.serper.dev/search
//!   num_results: 10
//! dirs:
//!   reports_dir: reports
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use awful_aj::{config, config::AwfulJadeConfig, config_dir, template, template::ChatTemplate};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::{PipelineError, Result};

/// Serper's hard cap on results per query.
pub const MAX_SEARCH_RESULTS: usize = 100;

/// Tunables for one pipeline run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Name of the `awful_aj` chat template used for every LLM call.
    pub template: String,
    /// Maximum characters of article body forwarded to any LLM call.
    pub llm_char_budget: usize,
    /// Run the LLM "clean" pass over crawled article bodies.
    pub clean_articles: bool,
    /// Maximum number of portal candidates listed in the selection prompt.
    pub max_candidates_in_prompt: usize,
    pub retry: RetrySettings,
    pub search: SearchSettings,
    pub crawl: CrawlSettings,
    pub events: EventSettings,
    pub dirs: OutputDirs,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            template: "news_verify".to_string(),
            llm_char_budget: 20_000,
            clean_articles: true,
            max_candidates_in_prompt: 120,
            retry: RetrySettings::default(),
            search: SearchSettings::default(),
            crawl: CrawlSettings::default(),
            events: EventSettings::default(),
            dirs: OutputDirs::default(),
        }
    }
}

/// Rate-limit retry policy for LLM calls: `delay = base_delay * attempt`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: usize,
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 30_000,
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Web search API (Serper-compatible) settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchSettings {
    pub endpoint: String,
    /// Falls back to `SERPER_API_KEY` when absent.
    pub api_key: Option<String>,
    /// Results requested per query, clamped to [`MAX_SEARCH_RESULTS`].
    pub num_results: usize,
    /// Hits per query forwarded to the verdict prompt.
    pub hits_per_query_in_prompt: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://google.serper.dev/search".to_string(),
            api_key: None,
            num_results: 10,
            hits_per_query_in_prompt: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CrawlSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
    pub max_redirects: usize,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 90,
            user_agent: concat!("awful_news_verify/", env!("CARGO_PKG_VERSION")).to_string(),
            max_redirects: 5,
        }
    }
}

/// Progress event queue settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventSettings {
    /// Bounded queue length; the oldest events are dropped when full.
    pub queue_capacity: usize,
    /// Idle interval after which a consumer sees a keep-alive ping.
    pub keepalive_secs: u64,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            keepalive_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputDirs {
    pub reports_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub articles_dir: PathBuf,
    pub fact_checks_dir: PathBuf,
}

impl Default for OutputDirs {
    fn default() -> Self {
        Self {
            reports_dir: PathBuf::from("reports"),
            runs_dir: PathBuf::from("runs"),
            articles_dir: PathBuf::from("data/articles"),
            fact_checks_dir: PathBuf::from("data/fact_checks"),
        }
    }
}

impl Settings {
    /// Load settings from an optional YAML file, then fill the search API key
    /// from the environment when the file leaves it unset.
    #[instrument(level = "info", skip_all)]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let raw =
                    std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
                let parsed = Self::from_yaml(&raw)?;
                info!(path = %path.display(), "Loaded pipeline settings");
                parsed
            }
            None => Self::default(),
        };
        if settings.search.api_key.is_none() {
            settings.search.api_key = std::env::var("SERPER_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty());
        }
        Ok(settings)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|e| PipelineError::config(format!("settings: {e}")))
    }

    /// Number of results to request per query, within the API's hard cap.
    pub fn search_results(&self) -> usize {
        self.search.num_results.clamp(1, MAX_SEARCH_RESULTS)
    }
}

/// Explicit LLM configuration handed to the orchestrator at construction.
pub struct LlmConfig {
    pub config: AwfulJadeConfig,
    pub template: ChatTemplate,
}

/// Load the `awful_aj` configuration and chat template.
///
/// `config_path` overrides the default `<awful_aj config dir>/config.yaml`.
#[instrument(level = "info", skip_all)]
pub async fn load_llm(config_path: Option<&str>, template_name: &str) -> Result<LlmConfig> {
    let config_path = match config_path {
        Some(path) => PathBuf::from(path),
        None => config_dir()
            .map_err(|e| PipelineError::config(format!("awful_aj config dir: {e}")))?
            .join("config.yaml"),
    };
    let config_str = config_path
        .to_str()
        .ok_or_else(|| PipelineError::config("config path is not valid UTF-8"))?;
    let config = config::load_config(config_str)
        .map_err(|e| PipelineError::config(format!("{config_str}: {e}")))?;
    info!(config_path = config_str, "Loaded LLM configuration");

    let template = template::load_template(template_name)
        .await
        .map_err(|e| PipelineError::config(format!("template {template_name}: {e}")))?;
    info!(template = template_name, "Loaded template");

    Ok(LlmConfig { config, template })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_behaviour() {
        let s = Settings::default();
        assert_eq!(s.llm_char_budget, 20_000);
        assert_eq!(s.retry.max_retries, 2);
        assert_eq!(s.retry.base_delay(), Duration::from_secs(30));
        assert_eq!(s.search.num_results, 10);
        assert_eq!(s.dirs.reports_dir, PathBuf::from("reports"));
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let s = Settings::from_yaml("llm_char_budget: 500\nsearch:\n  num_results: 3\n").unwrap();
        assert_eq!(s.llm_char_budget, 500);
        assert_eq!(s.search.num_results, 3);
        assert_eq!(s.search.endpoint, "https://google.serper.dev/search");
        assert!(s.clean_articles);
    }

    #[test]
    fn empty_yaml_is_default() {
        let s = Settings::from_yaml("  \n").unwrap();
        assert_eq!(s.template, "news_verify");
    }

    #[test]
    fn malformed_yaml_is_config_error() {
        let err = Settings::from_yaml("llm_char_budget: [not a number").unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }));
    }

    #[test]
    fn search_results_are_capped() {
        let mut s = Settings::default();
        s.search.num_results = 500;
        assert_eq!(s.search_results(), MAX_SEARCH_RESULTS);
        s.search.num_results = 0;
        assert_eq!(s.search_results(), 1);
    }
}
