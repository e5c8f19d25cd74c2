//! Ordered execution of LLM tasks with file-backed hand-off.
//!
//! A [`Task`] names an agent, a prompt template with `{slot}` placeholders,
//! the bindings that fill those slots and an optional output file. A binding
//! is inline text, the output of an earlier task, or a persisted file that is
//! read through the [`FileReader`] capability when the prompt is rendered.
//! Each reply goes through the task's formatter, which validates it and
//! produces the text that is persisted and handed to later tasks.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::api::{Agent, AskAsync};
use crate::decode::{self, DecodeError, Schema};
use crate::error::{PipelineError, Result};
use crate::tools::Tool;
use crate::tools::file::FileReader;
use crate::utils::{truncate_for_log, write_text};

/// Validates a reply and returns the text to persist.
pub type Formatter = fn(&str) -> std::result::Result<String, DecodeError>;

/// Source of one template slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Inline(String),
    /// Output of an earlier task in the same runner, by task name.
    Prior(&'static str),
    /// A persisted artifact, read at render time.
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Task {
    pub name: &'static str,
    pub agent: Agent,
    pub template: &'static str,
    pub bindings: Vec<(&'static str, Binding)>,
    pub output_file: Option<PathBuf>,
    /// Schema name reported on a format failure.
    pub schema: &'static str,
    pub format: Formatter,
}

/// Decode a reply as `T` and pretty-print it back to JSON.
pub fn json_output<T: Schema + Serialize>(reply: &str) -> std::result::Result<String, DecodeError> {
    let value: T = decode::decode(reply)?;
    Ok(serde_json::to_string_pretty(&value)?)
}

pub struct TaskRunner<'a, A> {
    asker: &'a A,
    files: FileReader,
    outputs: HashMap<&'static str, String>,
}

impl<'a, A: AskAsync> TaskRunner<'a, A> {
    pub fn new(asker: &'a A) -> Self {
        Self {
            asker,
            files: FileReader,
            outputs: HashMap::new(),
        }
    }

    /// Run `tasks` in order; the first failure stops the sequence.
    pub async fn run(&mut self, tasks: &[Task]) -> Result<()> {
        for task in tasks {
            self.run_task(task).await?;
        }
        Ok(())
    }

    /// Output of a task that already ran.
    pub fn output(&self, name: &str) -> Option<&str> {
        self.outputs.get(name).map(String::as_str)
    }

    #[instrument(level = "info", skip_all, fields(task = task.name))]
    pub async fn run_task(&mut self, task: &Task) -> Result<String> {
        let t0 = Instant::now();
        let instructions = self.render(task).await?;
        let prompt = task.agent.prompt(task.name, &instructions);

        let reply = self.asker.ask(&prompt).await?;
        let formatted = match (task.format)(&reply) {
            Err(e) if e.is_truncated() => {
                warn!(error = %e, "EOF while parsing; re-asking once");
                let second = self.asker.ask(&prompt).await?;
                (task.format)(&second).map_err(|e2| (e2, second))
            }
            other => other.map_err(|e| (e, reply)),
        }
        .map_err(|(e, raw)| {
            warn!(
                error = %e,
                response_preview = %truncate_for_log(&raw, 300),
                "Task output did not match its schema"
            );
            PipelineError::schema(task.schema, e.to_string())
        })?;

        if let Some(path) = &task.output_file {
            write_text(path, &formatted).await?;
        }
        info!(
            elapsed_ms = t0.elapsed().as_millis(),
            bytes = formatted.len(),
            "Task complete"
        );
        self.outputs.insert(task.name, formatted.clone());
        Ok(formatted)
    }

    async fn render(&self, task: &Task) -> Result<String> {
        let mut text = task.template.to_string();
        for (slot, binding) in &task.bindings {
            let value = match binding {
                Binding::Inline(s) => s.clone(),
                Binding::Prior(name) => self
                    .outputs
                    .get(name)
                    .cloned()
                    .ok_or_else(|| {
                        PipelineError::config(format!("task {} needs output of {name}", task.name))
                    })?,
                Binding::File(path) => self.files.invoke(path.clone()).await?,
            };
            text = text.replace(&format!("{{{slot}}}"), &value);
        }
        Ok(text)
    }
}
