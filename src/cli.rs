//! Command-line interface definitions for Awful News Verify.
//!
//! Two subcommands share the run inputs (portal, interests, article count).
//! Inputs missing from the command line are asked for interactively on
//! stderr, so stdout only ever carries the final report. `serve` takes no
//! run inputs: runs are started over HTTP instead.

use std::io::{self, BufRead, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::warn;

use crate::config::Settings;
use crate::orchestrator::{MAX_ARTICLES, RunMode, RunRequest};

pub const DEFAULT_PORTAL: &str = "https://news.yahoo.com/";
pub const DEFAULT_MAX_ARTICLES: usize = 3;

/// Command-line arguments for Awful News Verify.
///
/// # Examples
///
/// ```sh
/// # Discover and verify three technology stories
/// awful_news_verify verify -p https://news.yahoo.com/ -i "AI chips, trade policy" -n 3
///
/// # Single-pass fact check with custom output folders
/// awful_news_verify fact-check --articles-dir ./articles --fact-checks-dir ./checks
///
/// # Local monitoring server on a fixed port
/// awful_news_verify serve --port 5050
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to the awful_aj config.yaml file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Optional path to a pipeline settings YAML file
    #[arg(short, long, global = true, env = "NEWS_VERIFY_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// awful_aj chat template name (overrides the settings file)
    #[arg(short, long, global = true)]
    pub template: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discover articles and verify them claim by claim through a search plan
    Verify(RunArgs),
    /// Discover articles and fact-check each one in a single pass
    FactCheck(FactCheckArgs),
    /// Serve the local monitoring API (start runs, stream their events)
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub bind: IpAddr,

    /// Port to listen on; 0 lets the system pick a free one
    #[arg(long, env = "PORT", default_value_t = 0)]
    pub port: u16,
}

impl ServeArgs {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// News portal homepage to pick articles from
    #[arg(short, long)]
    pub portal: Option<String>,

    /// Free-text description of your interests
    #[arg(short, long)]
    pub interests: Option<String>,

    /// Number of articles to process (1-10)
    #[arg(short = 'n', long)]
    pub max_articles: Option<usize>,

    /// Directory for reports and run folders
    #[arg(long)]
    pub reports_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FactCheckArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Directory for the saved article Markdown files
    #[arg(long)]
    pub articles_dir: Option<PathBuf>,

    /// Directory for the per-article fact-check JSON files
    #[arg(long)]
    pub fact_checks_dir: Option<PathBuf>,
}

impl Cli {
    /// Run inputs and pipeline of a one-shot command; `None` for `serve`.
    pub fn run_args(&self) -> Option<(RunMode, &RunArgs)> {
        match &self.command {
            Command::Verify(run) => Some((RunMode::Verify, run)),
            Command::FactCheck(fc) => Some((RunMode::FactCheck, &fc.run)),
            Command::Serve(_) => None,
        }
    }

    /// Apply command-line overrides on top of loaded settings.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(template) = &self.template {
            settings.template = template.clone();
        }
        if let Some(dir) = self.run_args().and_then(|(_, run)| run.reports_dir.as_ref()) {
            settings.dirs.reports_dir = dir.clone();
        }
        if let Command::FactCheck(fc) = &self.command {
            if let Some(dir) = &fc.articles_dir {
                settings.dirs.articles_dir = dir.clone();
            }
            if let Some(dir) = &fc.fact_checks_dir {
                settings.dirs.fact_checks_dir = dir.clone();
            }
        }
    }
}

pub fn clamp_articles(n: usize) -> usize {
    n.clamp(1, MAX_ARTICLES)
}

/// Line-based question/answer over any reader and writer.
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Ask one question. An empty answer takes `default`; end of input is an
    /// error unless there is a default to fall back to.
    pub fn ask(&mut self, question: &str, default: Option<&str>) -> io::Result<String> {
        match default {
            Some(d) => write!(self.output, "{question} [{d}]: ")?,
            None => write!(self.output, "{question}: ")?,
        }
        self.output.flush()?;

        let mut line = String::new();
        let read = self.input.read_line(&mut line)?;
        let answer = line.trim();
        match (answer.is_empty(), default) {
            (false, _) => Ok(answer.to_string()),
            (true, Some(d)) => Ok(d.to_string()),
            (true, None) if read == 0 => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("no answer for {question:?}"),
            )),
            (true, None) => self.ask(question, None),
        }
    }
}

impl RunArgs {
    /// Build the run request, prompting for whatever was not given.
    pub fn resolve<R: BufRead, W: Write>(&self, prompter: &mut Prompter<R, W>) -> io::Result<RunRequest> {
        let portal_url = match &self.portal {
            Some(p) => p.clone(),
            None => prompter.ask("News portal URL", Some(DEFAULT_PORTAL))?,
        };
        let interests = match self.interests.as_deref().map(str::trim) {
            Some(i) if !i.is_empty() => i.to_string(),
            _ => prompter.ask("What topics interest you?", None)?,
        };
        let max_articles = match self.max_articles {
            Some(n) => n,
            None => {
                let default = DEFAULT_MAX_ARTICLES.to_string();
                let raw = prompter.ask("How many articles (1-10)", Some(&default))?;
                raw.parse().unwrap_or_else(|_| {
                    warn!(%raw, "Not a number; using the default article count");
                    DEFAULT_MAX_ARTICLES
                })
            }
        };
        Ok(RunRequest {
            portal_url,
            interests,
            max_articles: clamp_articles(max_articles),
        })
    }
}
