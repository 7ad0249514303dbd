//! Document storage and text extraction
//!
//! Source documents are read through a [`DocumentStore`]; the
//! [`TextExtractor`] turns the stored bytes into plain text and reports an
//! empty extraction instead of failing, so generation can fall back.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Opaque reference to a stored document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef(String);

impl DocumentRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Blob storage for uploaded documents
pub trait DocumentStore: Send + Sync {
    /// Reads the raw bytes of a stored document
    fn read(&self, reference: &DocumentRef) -> Result<Vec<u8>>;

    /// Stores bytes under `path` and returns a reference to them
    fn write(&self, bytes: &[u8], path: &str) -> Result<DocumentRef>;
}

/// Document store backed by a local directory
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a relative reference onto the root, refusing anything that
    /// could escape it
    fn resolve(&self, reference: &str) -> Result<PathBuf> {
        let relative = Path::new(reference);
        if reference.trim().is_empty() {
            anyhow::bail!("Empty document reference");
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => anyhow::bail!("Invalid document reference: {}", reference),
            }
        }
        Ok(self.root.join(relative))
    }
}

impl DocumentStore for FsDocumentStore {
    fn read(&self, reference: &DocumentRef) -> Result<Vec<u8>> {
        let path = self.resolve(reference.as_str())?;
        fs::read(&path).with_context(|| format!("Failed to read document: {:?}", path))
    }

    fn write(&self, bytes: &[u8], path: &str) -> Result<DocumentRef> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, bytes)
            .with_context(|| format!("Failed to write document: {:?}", target))?;

        let normalized = Path::new(path)
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/");
        Ok(DocumentRef::new(normalized))
    }
}

/// Why an extraction produced no text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmptyReason {
    /// The document could not be read from storage
    Unreadable(String),
    /// The bytes were not a PDF or UTF-8 text
    UnsupportedFormat,
    /// The PDF could not be parsed
    Corrupt(String),
    /// The document parsed but holds no text
    NoText,
}

impl fmt::Display for EmptyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmptyReason::Unreadable(e) => write!(f, "document unreadable: {}", e),
            EmptyReason::UnsupportedFormat => write!(f, "unsupported document format"),
            EmptyReason::Corrupt(e) => write!(f, "document corrupt: {}", e),
            EmptyReason::NoText => write!(f, "document contains no text"),
        }
    }
}

/// Outcome of extracting a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Text(String),
    Empty(EmptyReason),
}

impl Extraction {
    /// The extracted text, or "" for an empty extraction
    pub fn text(&self) -> &str {
        match self {
            Extraction::Text(text) => text,
            Extraction::Empty(_) => "",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Extraction::Empty(_))
    }
}

/// Extracts plain text from stored documents
pub struct TextExtractor<'a> {
    documents: &'a dyn DocumentStore,
}

impl<'a> TextExtractor<'a> {
    pub fn new(documents: &'a dyn DocumentStore) -> Self {
        Self { documents }
    }

    /// Extracts the text of a stored document. Never fails: unreadable or
    /// textless documents come back as [`Extraction::Empty`].
    pub fn extract(&self, reference: &DocumentRef) -> Extraction {
        let bytes = match self.documents.read(reference) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Could not read document {}: {:#}", reference, e);
                return Extraction::Empty(EmptyReason::Unreadable(e.to_string()));
            }
        };

        let extraction = extract_text_from_bytes(&bytes);
        match &extraction {
            Extraction::Text(text) => {
                debug!("Extracted {} characters from {}", text.len(), reference)
            }
            Extraction::Empty(reason) => warn!("No text extracted from {}: {}", reference, reason),
        }
        extraction
    }
}

/// Extracts text from PDF or UTF-8 text bytes
pub fn extract_text_from_bytes(bytes: &[u8]) -> Extraction {
    let text = if bytes.starts_with(b"%PDF") {
        match extract_pdf_text(bytes) {
            Ok(text) => text,
            Err(e) => return Extraction::Empty(EmptyReason::Corrupt(format!("{:#}", e))),
        }
    } else {
        match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => return Extraction::Empty(EmptyReason::UnsupportedFormat),
        }
    };

    if text.trim().is_empty() {
        Extraction::Empty(EmptyReason::NoText)
    } else {
        Extraction::Text(text)
    }
}

/// Concatenates the text of every page; pages that fail to decode are
/// skipped.
fn extract_pdf_text(bytes: &[u8]) -> Result<String> {
    let doc = lopdf::Document::load_mem(bytes).context("Failed to parse PDF")?;

    let mut text = String::new();
    for page_number in doc.get_pages().keys() {
        match doc.extract_text(&[*page_number]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                if !text.ends_with('\n') {
                    text.push('\n');
                }
            }
            Err(e) => warn!("Skipping PDF page {}: {}", page_number, e),
        }
    }
    Ok(text)
}
