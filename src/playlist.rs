//! Play queue navigation
//!
//! Picks which song comes next for manual skips and for automatic
//! advancement when a track ends, according to the current [`PlayMode`].

use rand::Rng;

use crate::settings::PlayMode;
use crate::song::Song;

/// Ordered list of songs with a cursor
#[derive(Debug, Clone, Default)]
pub struct Playlist {
    songs: Vec<Song>,
    current: Option<usize>,
    mode: PlayMode,
}

impl Playlist {
    pub fn new(mode: PlayMode) -> Self {
        Self {
            songs: Vec::new(),
            current: None,
            mode,
        }
    }

    /// Replace the queue and point the cursor at `start` (if in range)
    pub fn set_songs(&mut self, songs: Vec<Song>, start: usize) {
        self.current = if start < songs.len() { Some(start) } else { None };
        self.songs = songs;
    }

    pub fn songs(&self) -> &[Song] {
        &self.songs
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn mode(&self) -> PlayMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PlayMode) {
        self.mode = mode;
    }

    pub fn current(&self) -> Option<&Song> {
        self.current.and_then(|i| self.songs.get(i))
    }

    /// Move the cursor onto `song` if it is queued
    pub fn select(&mut self, song: &Song) -> bool {
        match self.songs.iter().position(|s| s == song) {
            Some(index) => {
                self.current = Some(index);
                true
            }
            None => false,
        }
    }

    /// Manual skip forward (wraps around)
    pub fn next(&mut self) -> Option<Song> {
        let len = self.songs.len();
        let index = match (self.mode, self.current) {
            _ if len == 0 => return None,
            (PlayMode::Shuffle, _) => random_index(len),
            (_, Some(i)) => (i + 1) % len,
            (_, None) => 0,
        };
        self.move_to(index)
    }

    /// Manual skip backward (wraps around)
    pub fn previous(&mut self) -> Option<Song> {
        let len = self.songs.len();
        let index = match (self.mode, self.current) {
            _ if len == 0 => return None,
            (PlayMode::Shuffle, _) => random_index(len),
            (_, Some(i)) => (i + len - 1) % len,
            (_, None) => len - 1,
        };
        self.move_to(index)
    }

    /// Song to continue with after the current one ended naturally
    pub fn after_finished(&mut self) -> Option<Song> {
        let len = self.songs.len();
        let current = self.current?;
        let index = match self.mode {
            PlayMode::Sequential if current + 1 >= len => return None,
            PlayMode::Sequential => current + 1,
            PlayMode::LoopAll => (current + 1) % len,
            PlayMode::LoopOne => current,
            PlayMode::Shuffle => random_index(len),
        };
        self.move_to(index)
    }

    fn move_to(&mut self, index: usize) -> Option<Song> {
        let song = self.songs.get(index)?.clone();
        self.current = Some(index);
        Some(song)
    }
}

fn random_index(len: usize) -> usize {
    rand::rng().random_range(0..len)
}
