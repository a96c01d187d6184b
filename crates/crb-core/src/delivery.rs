//! Outbound delivery with a formatting fallback ladder.
//!
//! Each chunk is tried as formatted HTML first, then as plain text, then as
//! plain text truncated to the transport's hard limit. A chunk that exhausts
//! the ladder is logged and skipped so the rest of the reply still goes out.

use tracing::{error, warn};

use crate::{
    chunker::split_message,
    domain::ChatScope,
    formatting::markdown_to_html,
    messaging::Messenger,
    Result,
};

/// The payload for one delivery attempt of `chunk`, or `None` when the ladder
/// is exhausted.
///
/// Attempt 0 renders markdown to HTML, attempt 1 sends the raw text, attempt 2
/// truncates the raw text to `hard_limit`.
pub fn delivery_attempt(chunk: &str, attempt: u8, hard_limit: usize) -> Option<String> {
    match attempt {
        0 => Some(markdown_to_html(chunk)),
        1 => Some(chunk.to_string()),
        2 => Some(truncate_to(chunk, hard_limit)),
        _ => None,
    }
}

/// Split `text` into chunks and deliver them in order, walking the fallback
/// ladder per chunk. Returns the number of chunks actually delivered.
pub async fn deliver_reply(
    messenger: &dyn Messenger,
    chat: ChatScope,
    text: &str,
    max_len: usize,
) -> Result<usize> {
    let chunks = split_message(text, max_len);
    let mut delivered = 0usize;

    for chunk in &chunks {
        if deliver_chunk(messenger, chat, chunk, max_len).await {
            delivered += 1;
        }
    }
    Ok(delivered)
}

async fn deliver_chunk(
    messenger: &dyn Messenger,
    chat: ChatScope,
    chunk: &str,
    hard_limit: usize,
) -> bool {
    let mut attempt = 0u8;
    while let Some(payload) = delivery_attempt(chunk, attempt, hard_limit) {
        let result = if attempt == 0 {
            messenger.send_html(chat, &payload).await
        } else {
            messenger.send_plain(chat, &payload).await
        };

        match result {
            Ok(()) => return true,
            Err(err) => {
                warn!(chat = chat.0, attempt, %err, "delivery attempt failed");
                attempt += 1;
            }
        }
    }
    error!(chat = chat.0, "dropping undeliverable chunk");
    false
}

/// Truncate to at most `max_len` bytes without cutting inside a UTF-8
/// character.
fn truncate_to(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut end = max_len;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::Error;

    #[derive(Clone, Copy, Debug, PartialEq)]
    enum Mode {
        Html,
        Plain,
    }

    /// Fake messenger that fails the first `fail_html`/`fail_plain` calls of
    /// each kind and records what it sent.
    struct FakeMessenger {
        fail_html: Mutex<usize>,
        fail_plain: Mutex<usize>,
        sent: Mutex<Vec<(Mode, String)>>,
    }

    impl FakeMessenger {
        fn new(fail_html: usize, fail_plain: usize) -> Self {
            Self {
                fail_html: Mutex::new(fail_html),
                fail_plain: Mutex::new(fail_plain),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<(Mode, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Messenger for FakeMessenger {
        async fn send_html(&self, _chat: ChatScope, html: &str) -> Result<()> {
            let mut remaining = self.fail_html.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Delivery("bad html entities".into()));
            }
            self.sent.lock().unwrap().push((Mode::Html, html.to_string()));
            Ok(())
        }

        async fn send_plain(&self, _chat: ChatScope, text: &str) -> Result<()> {
            let mut remaining = self.fail_plain.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Delivery("message too long".into()));
            }
            self.sent.lock().unwrap().push((Mode::Plain, text.to_string()));
            Ok(())
        }

        async fn send_typing(&self, _chat: ChatScope) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn ladder_steps() {
        assert_eq!(
            delivery_attempt("**hi**", 0, 100).as_deref(),
            Some("<b>hi</b>")
        );
        assert_eq!(delivery_attempt("**hi**", 1, 100).as_deref(), Some("**hi**"));
        assert_eq!(delivery_attempt("abcdef", 2, 3).as_deref(), Some("abc"));
        assert_eq!(delivery_attempt("abcdef", 3, 3), None);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "héllo"; // 'é' is two bytes starting at index 1
        assert_eq!(truncate_to(s, 2), "h");
        assert_eq!(truncate_to(s, 3), "hé");
        assert_eq!(truncate_to(s, 100), s);
    }

    #[tokio::test]
    async fn happy_path_sends_html() {
        let m = FakeMessenger::new(0, 0);
        let n = deliver_reply(&m, ChatScope(1), "**hello**", 4096)
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(m.sent(), vec![(Mode::Html, "<b>hello</b>".to_string())]);
    }

    #[tokio::test]
    async fn html_failure_falls_back_to_plain() {
        let m = FakeMessenger::new(1, 0);
        let n = deliver_reply(&m, ChatScope(1), "**hello**", 4096)
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(m.sent(), vec![(Mode::Plain, "**hello**".to_string())]);
    }

    #[tokio::test]
    async fn plain_failure_falls_back_to_truncated() {
        let giant = "a".repeat(50); // single oversized sentence for max_len 20
        let m = FakeMessenger::new(1, 1);
        let n = deliver_reply(&m, ChatScope(1), &giant, 20).await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(m.sent(), vec![(Mode::Plain, "a".repeat(20))]);
    }

    #[tokio::test]
    async fn undeliverable_chunk_does_not_block_the_rest() {
        // First chunk exhausts the ladder (1 html + 2 plain failures); the
        // second chunk goes through untouched.
        let text = format!("{}\n\n{}", "first paragraph here", "second paragraph here");
        let m = FakeMessenger::new(1, 2);
        let n = deliver_reply(&m, ChatScope(1), &text, 25).await.unwrap();
        assert_eq!(n, 1);
        let sent = m.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("second paragraph"));
    }
}
