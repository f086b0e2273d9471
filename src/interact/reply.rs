use std::time::Duration;

use crate::cache::ExpiringMap;

/// Force-reply prompts are bounded like every other pending store
const MAX_PENDING_REPLIES: usize = 200;

/// A "Reply" prompt waiting for the human's text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReply {
    pub session_id: String,
    pub project: String,
}

/// Maps a force-reply prompt, by `(chat id, message id)`, to its session
pub struct PendingReplyStore {
    pending: ExpiringMap<(i64, i64), PendingReply>,
}

impl PendingReplyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: ExpiringMap::new(ttl, MAX_PENDING_REPLIES),
        }
    }

    pub fn set(&mut self, chat_id: i64, message_id: i64, session_id: &str, project: &str) {
        self.pending.insert(
            (chat_id, message_id),
            PendingReply {
                session_id: session_id.to_string(),
                project: project.to_string(),
            },
        );
    }

    pub fn get(&self, chat_id: i64, message_id: i64) -> Option<&PendingReply> {
        self.pending.get(&(chat_id, message_id))
    }

    /// Remove and return a live entry
    pub fn take(&mut self, chat_id: i64, message_id: i64) -> Option<PendingReply> {
        let key = (chat_id, message_id);
        self.pending.get(&key)?;
        self.pending.remove(&key)
    }

    pub fn sweep(&mut self) -> usize {
        self.pending.sweep().len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(600);

    #[tokio::test(start_paused = true)]
    async fn test_take_is_one_shot() {
        let mut store = PendingReplyStore::new(TTL);
        store.set(1, 10, "s1", "api");

        assert_eq!(store.get(1, 10).unwrap().project, "api");
        assert_eq!(store.take(1, 10).unwrap().session_id, "s1");
        assert!(store.take(1, 10).is_none());
        assert!(store.get(2, 10).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let mut store = PendingReplyStore::new(TTL);
        store.set(1, 10, "s1", "api");
        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        assert!(store.take(1, 10).is_none());
        assert_eq!(store.sweep(), 1);
        assert_eq!(store.len(), 0);
    }
}
