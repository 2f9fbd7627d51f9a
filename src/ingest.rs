//! Batch ingestion: documents → deterministic chunks → embeddings → store.
//!
//! Each document is processed independently. A failure (empty source,
//! embedding error, store error) is recorded in [`IngestReport::errors`] and
//! the batch continues. The document row is written only after all of its
//! chunks are stored, so a document that failed partway is still unknown
//! and ingesting it again stores the chunks it is missing.
//!
//! Chunk ids are content hashes, so re-ingesting identical text produces
//! the same ids: already-stored chunks are counted as skipped and never
//! rewritten.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tracing::Instrument;
use walkdir::WalkDir;

use research_core::chunk::chunk_document;
use research_core::embedding::Embedder;
use research_core::models::{Chunk, Document, DocumentMetadata};
use research_core::store::Store;
use research_core::{EngineError, EngineResult};

use crate::embedding::embed_batched;

/// Per-document failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestError {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub documents_loaded: u64,
    pub chunks_created: u64,
    pub chunks_ingested: u64,
    pub chunks_skipped: u64,
    pub errors: Vec<IngestError>,
}

impl IngestReport {
    fn error(&mut self, source: &str, err: impl std::fmt::Display) {
        tracing::warn!(source, error = %err, "document ingest failed");
        self.errors.push(IngestError {
            source: source.to_string(),
            error: err.to_string(),
        });
    }
}

#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn Store>,
    embedder: Option<Arc<dyn Embedder>>,
    max_tokens: usize,
    batch_size: usize,
}

struct DocumentOutcome {
    created: u64,
    ingested: u64,
    skipped: u64,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Option<Arc<dyn Embedder>>,
        max_tokens: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            max_tokens,
            batch_size,
        }
    }

    pub async fn ingest(&self, documents: &[Document]) -> IngestReport {
        let span = tracing::info_span!("ingest", documents = documents.len());
        async {
            let mut report = IngestReport::default();
            for doc in documents {
                match self.ingest_one(doc).await {
                    Ok(outcome) => {
                        report.documents_loaded += 1;
                        report.chunks_created += outcome.created;
                        report.chunks_ingested += outcome.ingested;
                        report.chunks_skipped += outcome.skipped;
                    }
                    Err(e) => report.error(&doc.source, e),
                }
            }
            tracing::info!(
                loaded = report.documents_loaded,
                created = report.chunks_created,
                ingested = report.chunks_ingested,
                skipped = report.chunks_skipped,
                errors = report.errors.len(),
                "ingest finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn ingest_one(&self, doc: &Document) -> EngineResult<DocumentOutcome> {
        if doc.source.trim().is_empty() {
            return Err(EngineError::Validation(
                "document source must not be empty".to_string(),
            ));
        }

        let chunks = chunk_document(&doc.source, &doc.text, self.max_tokens);
        let created = chunks.len() as u64;

        let mut fresh: Vec<Chunk> = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if !self.store.contains_chunk(&chunk.id).await? {
                fresh.push(chunk);
            }
        }
        let mut skipped = created - fresh.len() as u64;

        let known = self.store.document_metadata(&doc.source).await?.is_some();
        if known && !fresh.is_empty() {
            return Err(EngineError::Validation(format!(
                "document '{}' is already stored with different content; documents are immutable",
                doc.source
            )));
        }

        let vectors = match (&self.embedder, fresh.is_empty()) {
            (Some(embedder), false) => {
                let texts: Vec<String> = fresh.iter().map(|c| c.text.clone()).collect();
                Some(embed_batched(embedder.as_ref(), &texts, self.batch_size).await?)
            }
            _ => None,
        };

        let mut ingested = 0u64;
        for (i, chunk) in fresh.iter().enumerate() {
            let vector = vectors.as_ref().and_then(|v| v.get(i)).map(|v| v.as_slice());
            if self.store.insert_chunk(chunk, vector).await? {
                ingested += 1;
            } else {
                skipped += 1;
            }
        }

        // Last, so an interrupted document is not yet treated as stored.
        if !known {
            self.store.insert_document(doc).await?;
        }

        tracing::debug!(source = %doc.source, created, ingested, skipped, "document ingested");
        Ok(DocumentOutcome {
            created,
            ingested,
            skipped,
        })
    }
}

// ============ Loading files ============

pub fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Read documents from files and directories.
///
/// Directories are walked recursively and filtered with `include_globs`
/// (relative to the directory); explicitly named files are always read.
/// Unreadable files become [`IngestError`]s instead of aborting.
pub fn load_documents(
    paths: &[PathBuf],
    include_globs: &[String],
) -> Result<(Vec<Document>, Vec<IngestError>)> {
    let include_set = build_globset(include_globs)?;
    let exclude_set = build_globset(&[
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ])?;

    let mut files: Vec<PathBuf> = Vec::new();
    let mut errors = Vec::new();

    for root in paths {
        if root.is_file() {
            files.push(root.clone());
            continue;
        }
        if !root.exists() {
            errors.push(IngestError {
                source: root.display().to_string(),
                error: "path does not exist".to_string(),
            });
            continue;
        }
        for entry in WalkDir::new(root) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    errors.push(IngestError {
                        source: root.display().to_string(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            if exclude_set.is_match(&rel) || !include_set.is_match(&rel) {
                continue;
            }
            files.push(entry.path().to_path_buf());
        }
    }

    // Sort for deterministic ordering
    files.sort();
    files.dedup();

    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        match read_document(&path) {
            Ok(doc) => documents.push(doc),
            Err(e) => errors.push(IngestError {
                source: path.display().to_string(),
                error: format!("{:#}", e),
            }),
        }
    }
    Ok((documents, errors))
}

fn read_document(path: &Path) -> Result<Document> {
    let raw = std::fs::read_to_string(path)?;
    let (metadata, body) = parse_front_matter(&raw);
    let metadata = DocumentMetadata {
        origin: metadata
            .origin
            .or_else(|| Some(format!("file://{}", path.display()))),
        ..metadata
    };
    Ok(Document::new(path.display().to_string(), body).with_metadata(metadata))
}

/// Split an optional `---` delimited header of `key: value` lines
/// (`authors`, `author`, `date`, `origin`) from the body.
pub fn parse_front_matter(raw: &str) -> (DocumentMetadata, &str) {
    let mut meta = DocumentMetadata::default();
    let Some(rest) = raw.strip_prefix("---\n") else {
        return (meta, raw);
    };
    let Some(end) = rest.find("\n---") else {
        return (meta, raw);
    };

    for line in rest[..end].lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match key.trim().to_ascii_lowercase().as_str() {
            "authors" | "author" => {
                meta.authors = value
                    .trim_matches(|c| c == '[' || c == ']')
                    .split([',', ';'])
                    .map(|a| a.trim().trim_matches('"').to_string())
                    .filter(|a| !a.is_empty())
                    .collect();
            }
            "date" if !value.is_empty() => meta.date = Some(value.to_string()),
            "origin" | "url" | "doi" if !value.is_empty() => {
                meta.origin = Some(value.to_string())
            }
            _ => {}
        }
    }

    let body = &rest[end + 4..];
    (meta, body.strip_prefix('\n').unwrap_or(body))
}
