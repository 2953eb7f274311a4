//! Frontmatter read/merge/write against vault files.
//!
//! Every write re-reads the file first so edits made by other programs
//! between two updates are kept. Nothing is cached here.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use walkdir::WalkDir;

use tally_core::error::{FrontmatterError, HeaderOperation};
use tally_core::frontmatter::{self, FieldValue, Header};
use tally_core::{DocumentCount, DocumentRef};

type StoreResult<T> = std::result::Result<T, FrontmatterError>;

/// One entry of a [`FrontmatterStore::batch_update`] call.
#[derive(Debug, Clone)]
pub struct FieldUpdate {
    pub document: DocumentRef,
    pub key: String,
    pub value: FieldValue,
}

/// Per-entry outcome of a [`FrontmatterStore::batch_update`] call.
#[derive(Debug, Default)]
pub struct BatchUpdateOutcome {
    /// Paths that were written.
    pub successful: Vec<String>,
    pub failed: Vec<FrontmatterError>,
    pub total: usize,
}

/// Reads and rewrites document headers under a vault root.
#[derive(Debug, Clone)]
pub struct FrontmatterStore {
    root: PathBuf,
}

impl FrontmatterStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a vault-relative path, refusing anything that would leave the vault.
    fn resolve(&self, doc: &DocumentRef, operation: HeaderOperation) -> StoreResult<PathBuf> {
        let rel = Path::new(&doc.path);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if doc.path.is_empty() || escapes {
            return Err(FrontmatterError::new(
                &doc.path,
                operation,
                "path is not inside the vault",
            ));
        }
        Ok(self.root.join(rel))
    }

    async fn read_content(&self, doc: &DocumentRef) -> StoreResult<String> {
        let path = self.resolve(doc, HeaderOperation::Read)?;
        tokio::fs::read_to_string(&path).await.map_err(|e| {
            let operation = if e.kind() == std::io::ErrorKind::InvalidData {
                HeaderOperation::Parse
            } else {
                HeaderOperation::Read
            };
            FrontmatterError::new(&doc.path, operation, e)
        })
    }

    async fn write_content(&self, doc: &DocumentRef, content: &str) -> StoreResult<()> {
        let path = self.resolve(doc, HeaderOperation::Write)?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| FrontmatterError::new(&doc.path, HeaderOperation::Write, e))
    }

    /// Numeric value of `key`, or 0 when the header or key is missing or the
    /// value is not a number.
    ///
    /// # Errors
    ///
    /// Returns a read error if the file cannot be read.
    pub async fn read_field(&self, doc: &DocumentRef, key: &str) -> StoreResult<i64> {
        let content = self.read_content(doc).await?;
        Ok(field_from_content(&content, key).unwrap_or(0))
    }

    /// Set `key` to `value`, keeping the body and every other header entry.
    ///
    /// # Errors
    ///
    /// Returns a read or write error for the document.
    pub async fn update_field(
        &self,
        doc: &DocumentRef,
        key: &str,
        value: impl Into<FieldValue>,
    ) -> StoreResult<()> {
        let content = self.read_content(doc).await?;
        let mut header = header_from_content(&content).unwrap_or_default();
        header.set(key, value);
        self.write_content(doc, &frontmatter::splice_header(&content, &header))
            .await
    }

    /// Add `delta` to the numeric value of `key` in a single read-then-write
    /// and return the new value.
    ///
    /// # Errors
    ///
    /// Returns a read or write error for the document.
    pub async fn increment_field(&self, doc: &DocumentRef, key: &str, delta: i64) -> StoreResult<i64> {
        let content = self.read_content(doc).await?;
        let mut header = header_from_content(&content).unwrap_or_default();
        let current = header.get(key).and_then(FieldValue::as_i64).unwrap_or(0);
        let next = current.saturating_add(delta);
        header.set(key, next);
        self.write_content(doc, &frontmatter::splice_header(&content, &header))
            .await?;
        debug!(path = %doc.path, key, from = current, to = next, "counter updated");
        Ok(next)
    }

    /// # Errors
    ///
    /// Returns a read error if the file cannot be read.
    pub async fn has_header(&self, doc: &DocumentRef) -> StoreResult<bool> {
        let content = self.read_content(doc).await?;
        Ok(frontmatter::split_header(&content).0.is_some())
    }

    /// Give the document a header containing `data`. If it already has one,
    /// `data` is merged into it rather than adding a second header.
    ///
    /// # Errors
    ///
    /// Returns a read or write error for the document.
    pub async fn create_header(&self, doc: &DocumentRef, data: &Header) -> StoreResult<()> {
        let content = self.read_content(doc).await?;
        let mut header = header_from_content(&content).unwrap_or_default();
        header.merge(data);
        self.write_content(doc, &frontmatter::splice_header(&content, &header))
            .await
    }

    /// The whole header, or `None` if the document has none.
    ///
    /// # Errors
    ///
    /// Returns a read error if the file cannot be read.
    pub async fn read_all(&self, doc: &DocumentRef) -> StoreResult<Option<Header>> {
        let content = self.read_content(doc).await?;
        Ok(header_from_content(&content))
    }

    /// Replace the whole header with `data`, keeping the body.
    ///
    /// # Errors
    ///
    /// Returns a read or write error for the document.
    pub async fn write_all(&self, doc: &DocumentRef, data: &Header) -> StoreResult<()> {
        let content = self.read_content(doc).await?;
        self.write_content(doc, &frontmatter::splice_header(&content, data))
            .await
    }

    /// Apply each update independently; one failure does not stop the rest.
    pub async fn batch_update(&self, updates: &[FieldUpdate]) -> BatchUpdateOutcome {
        let mut outcome = BatchUpdateOutcome {
            total: updates.len(),
            ..BatchUpdateOutcome::default()
        };
        for update in updates {
            match self
                .update_field(&update.document, &update.key, update.value.clone())
                .await
            {
                Ok(()) => outcome.successful.push(update.document.path.clone()),
                Err(e) => {
                    warn!(error = %e, "batch update entry failed");
                    outcome.failed.push(e);
                }
            }
        }
        outcome
    }

    /// Build a [`DocumentRef`] for a vault-relative path from file metadata.
    ///
    /// # Errors
    ///
    /// Returns a read error if the file metadata cannot be read.
    pub async fn document(&self, rel_path: &str) -> StoreResult<DocumentRef> {
        let probe = DocumentRef::new(rel_path);
        let path = self.resolve(&probe, HeaderOperation::Read)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| FrontmatterError::new(rel_path, HeaderOperation::Read, e))?;
        let modified_at = meta.modified().map(DateTime::<Utc>::from).unwrap_or(probe.modified_at);
        let created_at = meta.created().map(DateTime::<Utc>::from).unwrap_or(modified_at);
        Ok(DocumentRef {
            path: probe.path,
            size_bytes: meta.len(),
            modified_at,
            created_at,
        })
    }

    /// Every markdown document in the vault that carries `key`, with its value.
    ///
    /// Hidden directories (such as `.tally`) are skipped, as are files that
    /// cannot be read.
    pub async fn scan(&self, key: &str) -> Vec<DocumentCount> {
        let files: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("md"))
            .map(|e| e.into_path())
            .collect();

        let mut counts = Vec::new();
        for file in files {
            let Some(rel) = relative_path(&self.root, &file) else {
                continue;
            };
            let content = match tokio::fs::read_to_string(&file).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %rel, error = %e, "skipping unreadable document");
                    continue;
                }
            };
            let Some(count) = header_from_content(&content)
                .and_then(|h| h.get(key).and_then(FieldValue::as_i64))
            else {
                continue;
            };
            let modified_at = tokio::fs::metadata(&file)
                .await
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .ok();
            counts.push(DocumentCount {
                path: rel,
                count,
                modified_at,
            });
        }
        counts.sort_by(|a, b| a.path.cmp(&b.path));
        counts
    }
}

fn header_from_content(content: &str) -> Option<Header> {
    frontmatter::split_header(content)
        .0
        .map(frontmatter::parse_header)
}

fn field_from_content(content: &str, key: &str) -> Option<i64> {
    header_from_content(content)?.get(key)?.as_i64()
}

fn relative_path(root: &Path, file: &Path) -> Option<String> {
    let rel = file.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn vault_with(files: &[(&str, &str)]) -> (tempfile::TempDir, FrontmatterStore) {
        let dir = tempfile::tempdir().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        let store = FrontmatterStore::new(dir.path());
        (dir, store)
    }

    fn read(dir: &tempfile::TempDir, rel: &str) -> String {
        fs::read_to_string(dir.path().join(rel)).unwrap()
    }

    #[tokio::test]
    async fn update_field_rewrites_existing_header() {
        let (dir, store) = vault_with(&[("a.md", "---\nview_count: 1\n---\nBody text")]);
        store
            .update_field(&DocumentRef::new("a.md"), "view_count", 5)
            .await
            .unwrap();
        assert_eq!(read(&dir, "a.md"), "---\nview_count: 5\n---\nBody text");
    }

    #[tokio::test]
    async fn update_field_creates_missing_header() {
        let (dir, store) = vault_with(&[("a.md", "Just content")]);
        store
            .update_field(&DocumentRef::new("a.md"), "view_count", 1)
            .await
            .unwrap();
        assert_eq!(read(&dir, "a.md"), "---\nview_count: 1\n---\nJust content");
    }

    #[tokio::test]
    async fn update_field_keeps_unrelated_fields() {
        let (dir, store) = vault_with(&[(
            "a.md",
            "---\ntitle: \"Alpha\"\ncreated: 2025-02-10\ntags:\n  - rust\nview_count: 2\n---\n# Alpha\n\nbody\n",
        )]);
        store
            .update_field(&DocumentRef::new("a.md"), "view_count", 3)
            .await
            .unwrap();
        assert_eq!(
            read(&dir, "a.md"),
            "---\ntitle: \"Alpha\"\ncreated: 2025-02-10\ntags:\n  - rust\nview_count: 3\n---\n# Alpha\n\nbody\n"
        );
    }

    #[tokio::test]
    async fn read_field_defaults_to_zero() {
        let (_dir, store) = vault_with(&[
            ("none.md", "no header"),
            ("text.md", "---\nview_count: lots\n---\n"),
            ("ok.md", "---\nview_count: 9\n---\n"),
        ]);
        assert_eq!(store.read_field(&DocumentRef::new("none.md"), "view_count").await.unwrap(), 0);
        assert_eq!(store.read_field(&DocumentRef::new("text.md"), "view_count").await.unwrap(), 0);
        assert_eq!(store.read_field(&DocumentRef::new("ok.md"), "view_count").await.unwrap(), 9);
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let (_dir, store) = vault_with(&[]);
        let err = store
            .read_field(&DocumentRef::new("gone.md"), "view_count")
            .await
            .unwrap_err();
        assert_eq!(err.operation, HeaderOperation::Read);
        assert_eq!(err.path, "gone.md");
    }

    #[tokio::test]
    async fn paths_outside_the_vault_are_refused() {
        let (_dir, store) = vault_with(&[]);
        let err = store
            .update_field(&DocumentRef::new("../escape.md"), "view_count", 1)
            .await
            .unwrap_err();
        assert!(err.reason.contains("not inside the vault"));
    }

    #[tokio::test]
    async fn increment_field_adds_delta() {
        let (dir, store) = vault_with(&[("a.md", "---\nview_count: 4\n---\nx")]);
        let doc = DocumentRef::new("a.md");
        assert_eq!(store.increment_field(&doc, "view_count", 1).await.unwrap(), 5);
        assert_eq!(store.increment_field(&doc, "view_count", 2).await.unwrap(), 7);
        assert_eq!(read(&dir, "a.md"), "---\nview_count: 7\n---\nx");
    }

    #[tokio::test]
    async fn header_helpers() {
        let (dir, store) = vault_with(&[("a.md", "body"), ("b.md", "---\nkeep: true\n---\nbody")]);
        let a = DocumentRef::new("a.md");
        let b = DocumentRef::new("b.md");

        assert!(!store.has_header(&a).await.unwrap());
        assert!(store.read_all(&a).await.unwrap().is_none());

        let data: Header = [("view_count", 1)].into_iter().collect();
        store.create_header(&a, &data).await.unwrap();
        assert!(store.has_header(&a).await.unwrap());
        assert_eq!(read(&dir, "a.md"), "---\nview_count: 1\n---\nbody");

        store.create_header(&b, &data).await.unwrap();
        assert_eq!(read(&dir, "b.md"), "---\nkeep: true\nview_count: 1\n---\nbody");

        let replacement: Header = [("only", "this")].into_iter().collect();
        store.write_all(&b, &replacement).await.unwrap();
        let all = store.read_all(&b).await.unwrap().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all.get("only"), Some(&FieldValue::String("this".to_string())));
    }

    #[tokio::test]
    async fn batch_update_does_not_stop_on_failure() {
        let (dir, store) = vault_with(&[("a.md", "a"), ("c.md", "c")]);
        let updates: Vec<FieldUpdate> = ["a.md", "missing.md", "c.md"]
            .iter()
            .map(|p| FieldUpdate {
                document: DocumentRef::new(*p),
                key: "view_count".to_string(),
                value: FieldValue::Integer(2),
            })
            .collect();

        let outcome = store.batch_update(&updates).await;
        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.successful, vec!["a.md".to_string(), "c.md".to_string()]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].path, "missing.md");
        assert_eq!(read(&dir, "c.md"), "---\nview_count: 2\n---\nc");
    }

    #[tokio::test]
    async fn scan_finds_counted_documents() {
        let (_dir, store) = vault_with(&[
            ("notes/a.md", "---\nview_count: 3\n---\n"),
            ("notes/deep/b.md", "---\nview_count: 1\n---\n"),
            ("uncounted.md", "---\ntitle: x\n---\n"),
            ("plain.txt", "---\nview_count: 8\n---\n"),
            (".tally/hidden.md", "---\nview_count: 8\n---\n"),
        ]);
        let counts = store.scan("view_count").await;
        let found: Vec<(&str, i64)> = counts.iter().map(|c| (c.path.as_str(), c.count)).collect();
        assert_eq!(found, vec![("notes/a.md", 3), ("notes/deep/b.md", 1)]);
    }

    #[tokio::test]
    async fn document_reads_metadata() {
        let (_dir, store) = vault_with(&[("notes/a.md", "12345")]);
        let doc = store.document("notes/a.md").await.unwrap();
        assert_eq!(doc.path, "notes/a.md");
        assert_eq!(doc.size_bytes, 5);
    }
}
