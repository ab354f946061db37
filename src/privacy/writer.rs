//! Export writer
//!
//! Collects every provider's contribution for one export request and packages them
//! into a single zip archive. Contributions are keyed by (context, component); each
//! component gets its own [`ComponentWriter`] which may only write into the contexts
//! approved for it. All writes go through one mutex, so providers may share the
//! writer even if a host runs them concurrently.

use crate::context::ContextDirectory;
use crate::error::{PrivacyError, StorageError};
use crate::privacy::contextlist::ApprovedContextList;
use crate::types::{ContextId, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Write};
use std::sync::Arc;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Name of the manifest at the archive root
pub const INDEX_FILE: &str = "index.json";

/// Per-context file holding exported metadata values
pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct MetadataValue {
    value: String,
    description: String,
}

#[derive(Debug, Default)]
struct ContextExport {
    /// Relative path within the entry directory to file bytes
    files: BTreeMap<String, Vec<u8>>,
    metadata: BTreeMap<String, MetadataValue>,
}

impl ContextExport {
    fn is_empty(&self) -> bool {
        self.files.is_empty() && self.metadata.is_empty()
    }
}

#[derive(Default)]
struct WriterState {
    claimed: BTreeSet<String>,
    entries: BTreeMap<(ContextId, String), ContextExport>,
}

/// One (context, component) entry in the archive index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub context: ContextId,
    pub context_path: String,
    pub component: String,
    pub files: Vec<String>,
}

/// Manifest written to `index.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveIndex {
    pub user: UserId,
    pub generated_at: String,
    pub entries: Vec<ArchiveEntry>,
}

/// A packaged export, ready for storage
#[derive(Debug, Clone)]
pub struct ExportArchive {
    pub bytes: Vec<u8>,
    pub index: ArchiveIndex,
}

/// Per-request export writer
pub struct ExportWriter {
    user: UserId,
    contexts: Arc<dyn ContextDirectory>,
    state: Mutex<WriterState>,
}

impl ExportWriter {
    pub fn new(user: UserId, contexts: Arc<dyn ContextDirectory>) -> Self {
        Self {
            user,
            contexts,
            state: Mutex::new(WriterState::default()),
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    /// Hand out the writer for one component's approved list.
    ///
    /// A component may be claimed only once per export; a second claim means two
    /// providers share a component key, which is a programming error.
    pub fn for_component<'a>(
        &'a self,
        approved: &'a ApprovedContextList,
    ) -> Result<ComponentWriter<'a>, PrivacyError> {
        let mut state = self.state.lock();
        if !state.claimed.insert(approved.component().to_string()) {
            return Err(PrivacyError::WriterCollision {
                component: approved.component().to_string(),
                context: approved.context_ids().first().copied().unwrap_or(ContextId(0)),
                path: "<component claimed twice>".to_string(),
            });
        }
        Ok(ComponentWriter {
            writer: self,
            approved,
        })
    }

    /// Number of non-empty (context, component) entries written so far
    pub fn entry_count(&self) -> usize {
        self.state
            .lock()
            .entries
            .values()
            .filter(|e| !e.is_empty())
            .count()
    }

    fn insert_file(
        &self,
        component: &str,
        context: ContextId,
        path: String,
        bytes: Vec<u8>,
    ) -> Result<(), PrivacyError> {
        let mut state = self.state.lock();
        let entry = state
            .entries
            .entry((context, component.to_string()))
            .or_default();
        if entry.files.contains_key(&path) {
            return Err(PrivacyError::WriterCollision {
                component: component.to_string(),
                context,
                path,
            });
        }
        entry.files.insert(path, bytes);
        Ok(())
    }

    fn insert_metadata(
        &self,
        component: &str,
        context: ContextId,
        key: &str,
        value: MetadataValue,
    ) -> Result<(), PrivacyError> {
        let mut state = self.state.lock();
        let entry = state
            .entries
            .entry((context, component.to_string()))
            .or_default();
        if entry.metadata.contains_key(key) {
            return Err(PrivacyError::WriterCollision {
                component: component.to_string(),
                context,
                path: format!("{}#{}", METADATA_FILE, key),
            });
        }
        entry.metadata.insert(key.to_string(), value);
        Ok(())
    }

    /// Package everything written into a zip archive
    pub fn finalise(self) -> Result<ExportArchive, PrivacyError> {
        let state = self.state.into_inner();
        let mut entries = Vec::new();
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for ((context, component), export) in state.entries {
            if export.is_empty() {
                continue;
            }
            let context_path = self.contexts.archive_path(context);
            let base = format!("{}/{}", context_path, sanitize(&component));
            let mut files = Vec::new();

            for (relative, bytes) in &export.files {
                zip.start_file(format!("{}/{}", base, relative), options)
                    .map_err(zip_error)?;
                zip.write_all(bytes).map_err(write_error)?;
                files.push(relative.clone());
            }
            if !export.metadata.is_empty() {
                let body = serde_json::to_vec_pretty(&export.metadata).map_err(json_error)?;
                zip.start_file(format!("{}/{}", base, METADATA_FILE), options)
                    .map_err(zip_error)?;
                zip.write_all(&body).map_err(write_error)?;
                files.push(METADATA_FILE.to_string());
            }

            entries.push(ArchiveEntry {
                context,
                context_path,
                component,
                files,
            });
        }

        let index = ArchiveIndex {
            user: self.user,
            generated_at: chrono::Utc::now().to_rfc3339(),
            entries,
        };
        zip.start_file(INDEX_FILE, options).map_err(zip_error)?;
        let body = serde_json::to_vec_pretty(&index).map_err(json_error)?;
        zip.write_all(&body).map_err(write_error)?;

        let cursor = zip.finish().map_err(zip_error)?;
        Ok(ExportArchive {
            bytes: cursor.into_inner(),
            index,
        })
    }
}

/// Writer handle scoped to a single component and its approved contexts
pub struct ComponentWriter<'a> {
    writer: &'a ExportWriter,
    approved: &'a ApprovedContextList,
}

impl<'a> ComponentWriter<'a> {
    pub fn component(&self) -> &str {
        self.approved.component()
    }

    pub fn approved(&self) -> &ApprovedContextList {
        self.approved
    }

    fn check_context(&self, context: ContextId) -> Result<(), PrivacyError> {
        if self.approved.contains(context) {
            Ok(())
        } else {
            Err(PrivacyError::ContextNotApproved {
                component: self.component().to_string(),
                context,
            })
        }
    }

    /// Write the main data document for a (sub)context as `data.json`.
    pub fn export_data<T: Serialize + ?Sized>(
        &self,
        context: ContextId,
        subcontext: &[&str],
        data: &T,
    ) -> Result<(), PrivacyError> {
        self.export_json(context, subcontext, "data", data)
    }

    /// Write a named document next to the main data, as `<name>.json`.
    pub fn export_related_data<T: Serialize + ?Sized>(
        &self,
        context: ContextId,
        subcontext: &[&str],
        name: &str,
        data: &T,
    ) -> Result<(), PrivacyError> {
        self.export_json(context, subcontext, name, data)
    }

    /// Record a single metadata value with a human-readable description.
    pub fn export_metadata(
        &self,
        context: ContextId,
        key: &str,
        value: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<(), PrivacyError> {
        self.check_context(context)?;
        self.writer.insert_metadata(
            self.component(),
            context,
            key,
            MetadataValue {
                value: value.into(),
                description: description.into(),
            },
        )
    }

    /// Store a raw file under `files/`.
    pub fn export_file(
        &self,
        context: ContextId,
        subcontext: &[&str],
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<(), PrivacyError> {
        self.check_context(context)?;
        let path = join_path(subcontext, &format!("files/{}", sanitize(filename)));
        self.writer
            .insert_file(self.component(), context, path, bytes)
    }

    fn export_json<T: Serialize + ?Sized>(
        &self,
        context: ContextId,
        subcontext: &[&str],
        name: &str,
        data: &T,
    ) -> Result<(), PrivacyError> {
        self.check_context(context)?;
        let bytes = serde_json::to_vec_pretty(data).map_err(json_error)?;
        let path = join_path(subcontext, &format!("{}.json", sanitize(name)));
        if path == METADATA_FILE {
            return Err(PrivacyError::WriterCollision {
                component: self.component().to_string(),
                context,
                path,
            });
        }
        self.writer
            .insert_file(self.component(), context, path, bytes)
    }
}

fn join_path(subcontext: &[&str], leaf: &str) -> String {
    let mut parts: Vec<String> = subcontext
        .iter()
        .map(|s| sanitize(s))
        .filter(|s| !s.is_empty())
        .collect();
    parts.push(leaf.to_string());
    parts.join("/")
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string()
}

fn zip_error(err: zip::result::ZipError) -> StorageError {
    StorageError::Packaging(format!("Failed to write export archive: {}", err))
}

fn write_error(err: std::io::Error) -> StorageError {
    StorageError::Packaging(format!("Failed to write export archive: {}", err))
}

fn json_error(err: serde_json::Error) -> StorageError {
    StorageError::Packaging(format!("Failed to serialize export data: {}", err))
}
