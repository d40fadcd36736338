//! Song descriptor supplied by the library/import side

use std::path::{Path, PathBuf};

/// A playable song
///
/// Owned by the metadata/import collaborator; the playback core only reads it.
#[derive(Debug, Clone, Default)]
pub struct Song {
    pub id: u64,
    pub title: String,
    pub album: String,
    pub artist: String,
    pub file_path: PathBuf,
    /// Embedded cover art bytes, if any
    pub artwork: Option<Vec<u8>>,
    /// Duration reported by the tag reader (seconds), if known
    pub duration_hint: Option<f64>,
}

impl Song {
    /// Create a song with placeholder metadata derived from the file name
    pub fn from_path(id: u64, path: impl Into<PathBuf>) -> Self {
        let file_path = path.into();
        let title = file_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Unknown Title".to_string());

        Self {
            id,
            title,
            album: "Unknown Album".to_string(),
            artist: "Unknown Artist".to_string(),
            file_path,
            artwork: None,
            duration_hint: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

impl PartialEq for Song {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Song {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path_uses_file_stem() {
        let song = Song::from_path(7, "/music/Artist - Track.mp3");
        assert_eq!(song.title, "Artist - Track");
        assert_eq!(song.album, "Unknown Album");
        assert_eq!(song.path(), Path::new("/music/Artist - Track.mp3"));
    }

    #[test]
    fn test_equality_by_id() {
        let a = Song::from_path(1, "a.mp3");
        let mut b = Song::from_path(1, "b.mp3");
        b.title = "Other".to_string();
        assert_eq!(a, b);
        assert_ne!(a, Song::from_path(2, "a.mp3"));
    }
}
