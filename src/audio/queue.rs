use chrono::{DateTime, Utc};
use serenity::model::id::UserId;
use std::{collections::VecDeque, fmt};
use tracing::{debug, info};

use crate::{error::PlayerError, sources::ResolvedTrack};

#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub track: ResolvedTrack,
    pub requested_by: UserId,
    pub added_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(track: ResolvedTrack, requested_by: UserId) -> Self {
        Self {
            track,
            requested_by,
            added_at: Utc::now(),
        }
    }

    pub fn title(&self) -> &str {
        &self.track.title
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Paused,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        };
        f.write_str(label)
    }
}

/// Vista de sólo lectura de la cola de una guild.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueSnapshot {
    pub current: Option<QueueEntry>,
    pub queue: Vec<QueueEntry>,
    pub started_at: Option<DateTime<Utc>>,
    pub state: PlaybackState,
}

impl QueueSnapshot {
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.queue.is_empty()
    }
}

/// Cola FIFO estricta con el track actual aparte.
#[derive(Debug)]
pub struct MusicQueue {
    items: VecDeque<QueueEntry>,
    current: Option<QueueEntry>,
    started_at: Option<DateTime<Utc>>,
    max_size: usize,
}

impl MusicQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            current: None,
            started_at: None,
            max_size,
        }
    }

    /// Agrega un track al final de la cola
    pub fn add_track(&mut self, entry: QueueEntry) -> Result<(), PlayerError> {
        if self.items.len() >= self.max_size {
            return Err(PlayerError::QueueFull(self.max_size));
        }

        info!("➕ Agregado a la cola: {}", entry.title());
        self.items.push_back(entry);
        Ok(())
    }

    /// Saca el siguiente track (FIFO) y lo marca como actual
    pub fn next_track(&mut self) -> Option<QueueEntry> {
        let next = self.items.pop_front();
        match &next {
            Some(entry) => {
                debug!("➡️ Siguiente en cola: {}", entry.title());
                self.current = Some(entry.clone());
                self.started_at = Some(Utc::now());
            }
            None => {
                self.current = None;
                self.started_at = None;
            }
        }
        next
    }

    /// Descarta el track actual sin tocar el resto de la cola
    pub fn finish_current(&mut self) -> Option<QueueEntry> {
        self.started_at = None;
        self.current.take()
    }

    /// Limpia la cola y el track actual juntos
    pub fn clear(&mut self) {
        self.items.clear();
        self.current = None;
        self.started_at = None;
        debug!("🗑️ Cola limpiada");
    }

    pub fn current(&self) -> Option<&QueueEntry> {
        self.current.as_ref()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Nada sonando y nada pendiente
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.current.is_none()
    }

    pub fn snapshot(&self, state: PlaybackState) -> QueueSnapshot {
        QueueSnapshot {
            current: self.current.clone(),
            queue: self.items.iter().cloned().collect(),
            started_at: self.started_at,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(title: &str) -> QueueEntry {
        QueueEntry::new(
            ResolvedTrack {
                title: title.to_string(),
                webpage_url: format!("https://example.com/{title}"),
                stream_url: format!("https://cdn.example.com/{title}"),
                duration: None,
                is_live: None,
            },
            UserId::new(7),
        )
    }

    fn titles(snapshot: &QueueSnapshot) -> Vec<&str> {
        snapshot.queue.iter().map(|e| e.title()).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = MusicQueue::new(10);
        for t in ["A", "B", "C"] {
            queue.add_track(entry(t)).unwrap();
        }

        assert_eq!(queue.next_track().unwrap().title(), "A");
        let snapshot = queue.snapshot(PlaybackState::Playing);
        assert_eq!(snapshot.current.as_ref().map(|e| e.title()), Some("A"));
        assert_eq!(titles(&snapshot), vec!["B", "C"]);
        assert!(snapshot.started_at.is_some());

        assert_eq!(queue.next_track().unwrap().title(), "B");
        assert_eq!(queue.next_track().unwrap().title(), "C");
        assert!(queue.next_track().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_rejects() {
        let mut queue = MusicQueue::new(1);
        queue.add_track(entry("A")).unwrap();
        assert!(matches!(
            queue.add_track(entry("B")),
            Err(PlayerError::QueueFull(1))
        ));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_finish_keeps_pending_and_clear_drops_everything() {
        let mut queue = MusicQueue::new(10);
        queue.add_track(entry("A")).unwrap();
        queue.add_track(entry("B")).unwrap();
        queue.next_track();

        assert_eq!(queue.finish_current().unwrap().title(), "A");
        assert_eq!(queue.len(), 1);
        assert!(!queue.is_empty());

        queue.next_track();
        queue.add_track(entry("C")).unwrap();
        queue.clear();
        assert_eq!(queue.snapshot(PlaybackState::Idle), QueueSnapshot::default());
    }
}
