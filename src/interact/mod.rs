//! Interactive protocols relayed between chat and agent menus

pub mod injector;
pub mod keyboard;
mod permission;
mod question;
mod reply;

pub use permission::{summarize_tool, PermissionHandler};
pub use question::AskQuestionHandler;
pub use reply::{PendingReply, PendingReplyStore};

use std::collections::{HashSet, VecDeque};

/// Callback ids remembered for duplicate detection
const SEEN_CALLBACKS: usize = 200;

/// Bounded memory of handled callback ids; the oldest are forgotten first
#[derive(Debug)]
pub struct SeenCallbacks {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenCallbacks {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record `id`; false if it was already seen
    pub fn first_time(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.ids.clear();
    }
}

impl Default for SeenCallbacks {
    fn default() -> Self {
        Self::new(SEEN_CALLBACKS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seen_callbacks_forget_oldest() {
        let mut seen = SeenCallbacks::new(2);
        assert!(seen.first_time("a"));
        assert!(!seen.first_time("a"));
        assert!(seen.first_time("b"));
        assert!(seen.first_time("c"));
        // "a" fell out of the window
        assert!(seen.first_time("a"));
        assert!(!seen.first_time("c"));
    }
}
