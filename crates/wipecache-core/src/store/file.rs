use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{PersistentRecord, StoreBackend, StoreError};

/// JSON-file backend: one file per `(partition, scope)` at
/// `<dir>/<partition>/<scope>.json`.
///
/// The directory is created lazily on the first write, so a store pointed at
/// a location that does not exist yet simply reads as empty.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, partition: &str, scope: &str) -> PathBuf {
        self.dir
            .join(sanitize(partition))
            .join(format!("{}.json", sanitize(scope)))
    }
}

/// Keep scope identifiers (usually emails) usable as file names.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '-' | '_' | '+') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // Never produce "." / ".." path components
    if cleaned.chars().all(|c| c == '.') {
        cleaned.replace('.', "_")
    } else {
        cleaned
    }
}

#[async_trait]
impl StoreBackend for JsonFileStore {
    async fn load(
        &self,
        partition: &str,
        scope: &str,
    ) -> Result<Option<PersistentRecord>, StoreError> {
        let path = self.record_path(partition, scope);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: PersistentRecord = serde_json::from_str(&contents)?;
        Ok(Some(record))
    }

    async fn save(&self, record: &PersistentRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.partition, &record.scope);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(record)?;

        // Write-then-rename so readers never see a half-written file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "Record written");
        Ok(())
    }
}
