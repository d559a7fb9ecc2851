//! Covers extracted from audio tags.
//!
//! Albums without a cover file often embed one in their tags. Extracted
//! covers are written under a separate artwork root mirroring the music
//! tree, so the music directory itself is never written to.

use std::fs;
use std::path::{Path, PathBuf};

use lofty::config::ParseOptions;
use lofty::picture::MimeType;
use lofty::prelude::*;
use lofty::probe::Probe;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::errors::CastError;
use crate::media_locator::COVER_FILES;

/// Files read for an embedded cover, by extension.
pub const AUDIO_EXTENSIONS: [&str; 4] = ["flac", "mp3", "mp4", "m4a"];

const PNG_MAGIC: &[u8] = b"\x89PNG";

#[derive(Clone, Debug)]
pub struct ArtworkExtractor {
    music_root: PathBuf,
    artwork_root: PathBuf,
}

fn is_audio_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                AUDIO_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            })
}

/// First cover file present in `directory`, as a name.
fn cover_in(directory: &Path) -> Option<&'static str> {
    COVER_FILES
        .into_iter()
        .find(|cover| directory.join(cover).is_file())
}

/// File extension for an embedded picture.
fn picture_extension(mime: Option<&MimeType>, data: &[u8]) -> &'static str {
    match mime {
        Some(MimeType::Png) => "png",
        Some(MimeType::Jpeg) => "jpg",
        Some(MimeType::Tiff) => "tiff",
        Some(MimeType::Bmp) => "bmp",
        Some(MimeType::Gif) => "gif",
        _ if data.starts_with(PNG_MAGIC) => "png",
        _ => "jpg",
    }
}

/// Extension and bytes of the first picture embedded in `path`.
fn embedded_picture(path: &Path) -> Result<Option<(&'static str, Vec<u8>)>, CastError> {
    let tagged_file = Probe::open(path)
        .and_then(|probe| probe.options(ParseOptions::new()).read())
        .map_err(|e| CastError::Media(format!("Cannot read tags of {}: {}", path.display(), e)))?;

    let picture = tagged_file
        .primary_tag()
        .and_then(|tag| tag.pictures().first())
        .or_else(|| {
            tagged_file
                .tags()
                .iter()
                .find_map(|tag| tag.pictures().first())
        });

    Ok(picture.map(|picture| {
        (
            picture_extension(picture.mime_type(), picture.data()),
            picture.data().to_vec(),
        )
    }))
}

impl ArtworkExtractor {
    pub fn new(music_root: impl Into<PathBuf>, artwork_root: impl Into<PathBuf>) -> Self {
        Self {
            music_root: music_root.into(),
            artwork_root: artwork_root.into(),
        }
    }

    pub fn artwork_root(&self) -> &Path {
        &self.artwork_root
    }

    /// Cover already extracted for `directory` (relative to the music
    /// root), as a path relative to the artwork root.
    pub fn find_extracted(&self, directory: &Path) -> Option<PathBuf> {
        cover_in(&self.artwork_root.join(directory)).map(|cover| directory.join(cover))
    }

    /// Returns the extracted cover of `directory`, extracting it from the
    /// first audio file of the directory when needed.
    ///
    /// Unreadable tags are logged and yield `None`; only failures to write
    /// the artwork root are errors.
    pub fn extract_directory(&self, directory: &Path) -> Result<Option<PathBuf>, CastError> {
        if let Some(found) = self.find_extracted(directory) {
            return Ok(Some(found));
        }

        let source_dir = self.music_root.join(directory);
        let Ok(entries) = fs::read_dir(&source_dir) else {
            debug!(directory = %source_dir.display(), "No such music directory");
            return Ok(None);
        };
        let mut audio_files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_audio_file(path))
            .collect();
        audio_files.sort();

        let Some(source) = audio_files.first() else {
            return Ok(None);
        };
        let (extension, data) = match embedded_picture(source) {
            Ok(Some(picture)) => picture,
            Ok(None) => {
                debug!(file = %source.display(), "No embedded artwork");
                return Ok(None);
            }
            Err(e) => {
                warn!("{}", e);
                return Ok(None);
            }
        };

        let target_dir = self.artwork_root.join(directory);
        fs::create_dir_all(&target_dir)?;
        let name = format!("cover.{}", extension);
        fs::write(target_dir.join(&name), data)?;
        info!(
            source = %source.display(),
            cover = %target_dir.join(&name).display(),
            "Extracted embedded artwork"
        );
        Ok(Some(directory.join(name)))
    }

    /// Walks the whole music root and extracts a cover for every directory
    /// lacking one. Returns the number of covers created.
    pub fn extract_all(&self) -> Result<usize, CastError> {
        if !self.music_root.is_dir() {
            return Err(CastError::Media(format!(
                "Music root {} is not a directory",
                self.music_root.display()
            )));
        }

        let mut created = 0;
        let walker = WalkDir::new(&self.music_root)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_dir());

        for entry in walker {
            if let Some(cover) = cover_in(entry.path()) {
                debug!(directory = %entry.path().display(), cover = cover, "Cover already exists");
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.music_root) else {
                continue;
            };
            if self.find_extracted(relative).is_some() {
                continue;
            }
            if self.extract_directory(relative)?.is_some() {
                created += 1;
            }
        }

        info!(created = created, "Artwork extraction finished");
        Ok(created)
    }
}
