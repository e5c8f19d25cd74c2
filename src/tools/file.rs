//! Read a persisted artifact back by path.

use std::path::PathBuf;

use tokio::fs;
use tracing::debug;

use super::{Capability, Tool, ToolError};

#[derive(Debug, Clone, Copy, Default)]
pub struct FileReader;

impl Tool for FileReader {
    type Input = PathBuf;
    type Output = String;

    fn capability(&self) -> Capability {
        Capability::FileRead
    }

    async fn invoke(&self, path: PathBuf) -> Result<String, ToolError> {
        let contents = fs::read_to_string(&path)
            .await
            .map_err(|source| ToolError::Io {
                capability: Capability::FileRead,
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), bytes = contents.len(), "Read artifact");
        Ok(contents)
    }
}
