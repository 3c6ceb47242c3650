use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Append-only text record of published ids, one `<rfc3339> <key>: <id>`
/// line per entry. Writes are best-effort.
#[derive(Debug, Clone)]
pub struct DeploymentLog {
    path: PathBuf,
}

impl DeploymentLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, key: &str, id: &str) {
        let line = format!(
            "{} {key}: {id}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(err) = result {
            warn!(path = %self.path.display(), "failed to append deployment id: {err}");
        }
    }
}
