//! Pipeline stages, in run order.
//!
//! Each stage consumes and produces the typed entities of [`crate::models`].
//! Content failures that end a run (nothing to select, nothing crawlable)
//! come back as a [`Halt`]; everything else is recorded on the entity it
//! concerns.

use std::fmt;

pub mod collection;
pub mod discovery;
pub mod fact_check;
pub mod reporting;
pub mod verification;

/// A content failure that ends the run with guidance for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Halt {
    pub message: String,
}

impl Halt {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for Halt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Step id for one article's step, `article_{n}_{step}` with `n` 1-based.
pub fn article_step(index: usize, step: &str) -> String {
    format!("article_{}_{step}", index + 1)
}
