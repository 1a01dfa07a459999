//! Photo discovery
//!
//! Enumerates supported images directly under a storage location. Formats
//! that many reconstruction programs cannot read (HEIC/HEIF and camera RAW)
//! are gated by [`IngestPolicy`]; the discoverer never converts anything.

use photomesh_storage::SharedStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};
use crate::stage::estimated_total_secs;

/// Image format of a discovered photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatTag {
    Jpeg,
    Png,
    Tiff,
    Bmp,
    Heic,
    Heif,
    Dng,
    Cr2,
    Nef,
    Arw,
}

impl FormatTag {
    pub const ALL: [FormatTag; 10] = [
        FormatTag::Jpeg,
        FormatTag::Png,
        FormatTag::Tiff,
        FormatTag::Bmp,
        FormatTag::Heic,
        FormatTag::Heif,
        FormatTag::Dng,
        FormatTag::Cr2,
        FormatTag::Nef,
        FormatTag::Arw,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatTag::Jpeg => "jpeg",
            FormatTag::Png => "png",
            FormatTag::Tiff => "tiff",
            FormatTag::Bmp => "bmp",
            FormatTag::Heic => "heic",
            FormatTag::Heif => "heif",
            FormatTag::Dng => "dng",
            FormatTag::Cr2 => "cr2",
            FormatTag::Nef => "nef",
            FormatTag::Arw => "arw",
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            FormatTag::Jpeg => &["jpg", "jpeg"],
            FormatTag::Png => &["png"],
            FormatTag::Tiff => &["tif", "tiff"],
            FormatTag::Bmp => &["bmp"],
            FormatTag::Heic => &["heic"],
            FormatTag::Heif => &["heif"],
            FormatTag::Dng => &["dng"],
            FormatTag::Cr2 => &["cr2"],
            FormatTag::Nef => &["nef"],
            FormatTag::Arw => &["arw"],
        }
    }

    /// Case-insensitive extension lookup
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|tag| tag.extensions().contains(&ext.as_str()))
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Accepted only when the downstream pipeline reads the format natively
    pub fn requires_native_support(&self) -> bool {
        matches!(
            self,
            FormatTag::Heic
                | FormatTag::Heif
                | FormatTag::Dng
                | FormatTag::Cr2
                | FormatTag::Nef
                | FormatTag::Arw
        )
    }
}

impl std::fmt::Display for FormatTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How HEIC/HEIF/RAW inputs are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestPolicy {
    /// Accepted as-is
    #[default]
    Native,
    /// Excluded from the photo set and reported as pending conversion
    RequireConversion,
}

impl IngestPolicy {
    pub fn accepts(&self, format: FormatTag) -> bool {
        match self {
            IngestPolicy::Native => true,
            IngestPolicy::RequireConversion => !format.requires_native_support(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub path: PathBuf,
    pub byte_size: u64,
    pub format: FormatTag,
}

impl PhotoRecord {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Non-empty, deduplicated, path-sorted photos of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhotoSet {
    photos: Vec<PhotoRecord>,
}

impl PhotoSet {
    /// `None` when `photos` is empty
    pub fn new(mut photos: Vec<PhotoRecord>) -> Option<Self> {
        if photos.is_empty() {
            return None;
        }
        photos.sort_by(|a, b| a.path.cmp(&b.path));
        Some(Self { photos })
    }

    pub fn len(&self) -> usize {
        self.photos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.photos.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PhotoRecord> {
        self.photos.iter()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.photos.iter().map(|p| p.path.clone()).collect()
    }

    pub fn total_bytes(&self) -> u64 {
        self.photos.iter().map(|p| p.byte_size).sum()
    }

    pub fn stats(&self, time_scale: f64) -> PhotoSetStats {
        let mut per_format = BTreeMap::new();
        for photo in &self.photos {
            *per_format.entry(photo.format).or_insert(0) += 1;
        }
        let total_bytes = self.total_bytes();
        PhotoSetStats {
            count: self.len(),
            total_bytes,
            average_bytes: total_bytes / self.len().max(1) as u64,
            per_format,
            estimated_synthetic_secs: estimated_total_secs(self.len(), time_scale),
        }
    }
}

impl<'a> IntoIterator for &'a PhotoSet {
    type Item = &'a PhotoRecord;
    type IntoIter = std::slice::Iter<'a, PhotoRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.photos.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoSetStats {
    pub count: usize,
    pub total_bytes: u64,
    pub average_bytes: u64,
    pub per_format: BTreeMap<FormatTag, usize>,
    pub estimated_synthetic_secs: f64,
}

/// Result of a scan, including inputs held back by the ingest policy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    pub photos: Vec<PhotoRecord>,
    pub pending_conversion: Vec<PathBuf>,
}

/// Dedup key: same path with a lowercased extension
fn dedup_key(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => path.with_extension(ext.to_ascii_lowercase()),
        None => path.to_path_buf(),
    }
}

pub struct PhotoDiscoverer {
    store: Arc<dyn SharedStore>,
    policy: IngestPolicy,
}

impl PhotoDiscoverer {
    pub fn new(store: Arc<dyn SharedStore>, policy: IngestPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> IngestPolicy {
        self.policy
    }

    fn patterns() -> Vec<String> {
        FormatTag::ALL
            .iter()
            .flat_map(|tag| tag.extensions().iter().map(|ext| format!("*.{}", ext)))
            .collect()
    }

    /// Enumerate supported files without failing on an empty result.
    ///
    /// Read-only: never writes to the store.
    pub async fn scan(&self, location: &Path) -> Result<ScanOutcome> {
        self.store.probe(location).await?;

        let candidates = self.store.glob(location, &Self::patterns(), true).await?;
        let mut seen = HashSet::new();
        let mut outcome = ScanOutcome::default();

        for path in candidates {
            if !seen.insert(dedup_key(&path)) {
                debug!("Skipping case-variant duplicate {}", path.display());
                continue;
            }
            let Some(format) = FormatTag::from_path(&path) else {
                continue;
            };
            if !self.policy.accepts(format) {
                outcome.pending_conversion.push(path);
                continue;
            }
            match self.store.metadata(&path).await {
                Ok(meta) => outcome.photos.push(PhotoRecord {
                    path,
                    byte_size: meta.len,
                    format,
                }),
                Err(e) => warn!("Skipping unreadable photo {}: {}", path.display(), e),
            }
        }

        Ok(outcome)
    }

    /// Discover the photo set of a run.
    ///
    /// # Errors
    ///
    /// - `StorageUnreachable` when `location` cannot be probed
    /// - `NoPhotosFound` when nothing accepted is present
    pub async fn discover(&self, location: &Path) -> Result<PhotoSet> {
        let outcome = self.scan(location).await?;
        if !outcome.pending_conversion.is_empty() {
            warn!(
                "{} photo(s) need conversion before processing: {:?}",
                outcome.pending_conversion.len(),
                outcome.pending_conversion
            );
        }
        PhotoSet::new(outcome.photos)
            .ok_or_else(|| OrchestratorError::NoPhotosFound(location.display().to_string()))
    }
}
