use std::collections::VecDeque;

/// Remembers the last few accepted payloads; an exact repeat inside the
/// window is reported as a duplicate.
#[derive(Debug)]
pub struct DuplicateFilter {
    window: usize,
    recent: VecDeque<String>,
}

impl DuplicateFilter {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            recent: VecDeque::with_capacity(window),
        }
    }

    /// Returns false when `payload` was accepted recently.
    pub fn accept(&mut self, payload: &str) -> bool {
        if self.window == 0 {
            return true;
        }
        if self.recent.iter().any(|seen| seen == payload) {
            return false;
        }

        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(payload.to_string());
        true
    }
}
