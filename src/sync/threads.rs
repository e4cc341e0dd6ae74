use tracing::debug;

use super::fetch::{FetchError, PaginatedFetcher};
use super::model::{Message, SlackTs};

/// Attaches reply sets to thread roots within a channel window.
pub struct ThreadReconstructor<'a> {
    fetcher: &'a PaginatedFetcher,
}

impl<'a> ThreadReconstructor<'a> {
    pub fn new(fetcher: &'a PaginatedFetcher) -> Self {
        Self { fetcher }
    }

    pub fn is_thread_root(message: &Message) -> bool {
        message.is_thread_root()
    }

    pub async fn expand(
        &self,
        channel_id: &str,
        root: &Message,
        window_start: &SlackTs,
    ) -> Result<Vec<Message>, FetchError> {
        if !Self::is_thread_root(root) {
            return Ok(Vec::new());
        }
        let replies = self.fetcher.replies(channel_id, root, window_start).await?;
        debug!(
            channel = channel_id,
            ts = %root.ts,
            replies = replies.len(),
            "thread expanded"
        );
        Ok(replies)
    }

    /// Fills `replies` on every thread root in place.
    pub async fn expand_all(
        &self,
        channel_id: &str,
        messages: &mut [Message],
        window_start: &SlackTs,
    ) -> Result<usize, FetchError> {
        let mut expanded = 0;
        for message in messages.iter_mut() {
            if Self::is_thread_root(message) {
                message.replies = self.expand(channel_id, message, window_start).await?;
                expanded += 1;
            }
        }
        Ok(expanded)
    }
}
