//! Bounded ring of recent trace events.

use super::event::TraceEvent;

/// Keeps the newest `capacity` events; older ones are overwritten.
#[derive(Debug)]
pub struct TraceBuffer {
    events: Vec<Option<TraceEvent>>,
    head: usize,
    len: usize,
    dropped: u64,
}

impl TraceBuffer {
    /// A buffer holding at most `capacity` events (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            events: (0..capacity.max(1)).map(|_| None).collect(),
            head: 0,
            len: 0,
            dropped: 0,
        }
    }

    /// Maximum number of events kept.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.events.len()
    }

    /// Events currently held.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True with no events.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Events overwritten so far.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Appends `event`, overwriting the oldest when full.
    pub fn push(&mut self, event: TraceEvent) {
        let cap = self.events.len();
        let slot = (self.head + self.len) % cap;
        self.events[slot] = Some(event);
        if self.len < cap {
            self.len += 1;
        } else {
            self.head = (self.head + 1) % cap;
            self.dropped += 1;
        }
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &TraceEvent> {
        let cap = self.events.len();
        (0..self.len).filter_map(move |i| self.events[(self.head + i) % cap].as_ref())
    }

    /// Newest event.
    #[must_use]
    pub fn last(&self) -> Option<&TraceEvent> {
        self.iter().last()
    }

    /// Copies the held events out, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TraceEvent> {
        self.iter().cloned().collect()
    }

    /// Renders the held events as newline-separated JSON.
    pub fn to_json_lines(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for event in self.iter() {
            out.push_str(&event.to_json_line()?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl Default for TraceBuffer {
    fn default() -> Self {
        Self::new(1024)
    }
}
