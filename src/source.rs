//! Track sources and storage
//!
//! A [`TrackSource`] is the immutable byte image of one track. Storage is
//! reached only through the [`TrackStore`] trait so the engine never touches
//! the filesystem directly; [`FsStore`] is the `std::fs` implementation.

use crate::{ChipdeckError, Result};
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// gzip member magic (`1F 8B`) followed by the deflate method byte.
const GZIP_MAGIC: [u8; 3] = [0x1F, 0x8B, 0x08];

/// Upper bound for an inflated track image (64 MB).
const MAX_INFLATED_SIZE: u64 = 64 * 1024 * 1024;

/// Track file formats the engine can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackFormat {
    /// VGM register-write log (`.vgm`, `.vgz`)
    RegisterStream,
    /// MDX tracker score (`.mdx`)
    Tracker,
}

impl TrackFormat {
    /// Detect the format from a file extension (case-insensitive).
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "vgm" | "vgz" => Some(TrackFormat::RegisterStream),
            "mdx" => Some(TrackFormat::Tracker),
            _ => None,
        }
    }

    /// Short display label.
    pub fn label(&self) -> &'static str {
        match self {
            TrackFormat::RegisterStream => "VGM",
            TrackFormat::Tracker => "MDX",
        }
    }
}

/// Immutable image of a loaded track.
#[derive(Debug, Clone)]
pub struct TrackSource {
    bytes: Arc<[u8]>,
    format: TrackFormat,
    path: PathBuf,
}

impl TrackSource {
    /// Wrap raw bytes, inflating gzip-wrapped register streams.
    pub fn from_bytes(bytes: Vec<u8>, format: TrackFormat, path: impl Into<PathBuf>) -> Result<Self> {
        let bytes = match format {
            TrackFormat::RegisterStream => decompress_if_needed(bytes)?,
            TrackFormat::Tracker => bytes,
        };
        if bytes.is_empty() {
            return Err(ChipdeckError::Truncated {
                needed: 1,
                available: 0,
            });
        }
        Ok(TrackSource {
            bytes: bytes.into(),
            format,
            path: path.into(),
        })
    }

    /// Read a track through a store, detecting the format from the extension.
    pub fn load(path: impl AsRef<Path>, store: &dyn TrackStore) -> Result<Self> {
        let path = path.as_ref();
        let format = TrackFormat::from_path(path).ok_or_else(|| {
            ChipdeckError::Unsupported(format!("unknown track extension: {}", path.display()))
        })?;
        let bytes = store.read(path)?;
        Self::from_bytes(bytes, format, path)
    }

    /// Track bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Shared handle to the track bytes.
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    /// Track format.
    pub fn format(&self) -> TrackFormat {
        self.format
    }

    /// Path the track was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the image is empty (never true for a loaded source).
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Inflate gzip-wrapped data, returning other data unchanged.
pub fn decompress_if_needed(data: Vec<u8>) -> Result<Vec<u8>> {
    if !data.starts_with(&GZIP_MAGIC) {
        return Ok(data);
    }
    let mut out = Vec::new();
    GzDecoder::new(data.as_slice())
        .take(MAX_INFLATED_SIZE)
        .read_to_end(&mut out)
        .map_err(|e| ChipdeckError::Format(format!("gzip inflate failed: {e}")))?;
    Ok(out)
}

/// Byte-level access to stored tracks and sample banks.
pub trait TrackStore {
    /// Read a whole file.
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;

    /// Whether a regular file exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// File names (not paths) of the regular files in `dir`.
    fn list_dir(&self, dir: &Path) -> std::io::Result<Vec<String>>;
}

/// [`TrackStore`] backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStore;

impl TrackStore for FsStore {
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn list_dir(&self, dir: &Path) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }
}

/// Playable tracks of one directory with wrap-around selection.
#[derive(Debug, Clone, Default)]
pub struct TrackList {
    tracks: Vec<PathBuf>,
    index: usize,
}

impl TrackList {
    /// Build from explicit paths, keeping only playable extensions.
    pub fn from_paths(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        TrackList {
            tracks: paths
                .into_iter()
                .filter(|p| TrackFormat::from_path(p).is_some())
                .collect(),
            index: 0,
        }
    }

    /// List the playable tracks of `dir`, sorted by name.
    pub fn scan(dir: impl AsRef<Path>, store: &dyn TrackStore) -> Result<Self> {
        let dir = dir.as_ref();
        let mut names = store.list_dir(dir)?;
        names.sort();
        Ok(Self::from_paths(names.into_iter().map(|n| dir.join(n))))
    }

    /// Whether no playable track was found.
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Number of tracks.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Selected track index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Selected track path.
    pub fn current(&self) -> Option<&Path> {
        self.tracks.get(self.index).map(PathBuf::as_path)
    }

    /// Select the next track, wrapping at the end.
    pub fn next(&mut self) -> Option<&Path> {
        if !self.tracks.is_empty() {
            self.index = (self.index + 1) % self.tracks.len();
        }
        self.current()
    }

    /// Select the previous track, wrapping at the start.
    pub fn prev(&mut self) -> Option<&Path> {
        if !self.tracks.is_empty() {
            self.index = (self.index + self.tracks.len() - 1) % self.tracks.len();
        }
        self.current()
    }
}
