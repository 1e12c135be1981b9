//! Speech segments from an external speech-to-text engine
//!
//! The recogniser pushes transcripts through a [`SpeechFeed`]; the pipeline
//! thread drains them between frames and raises speech alerts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::mpsc;

/// A recognised utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechSegment {
    /// Unique, increasing id
    pub id: u64,
    /// Transcript
    pub text: String,
    /// When the segment was received
    pub received_at: Instant,
}

/// Create a feed holding at most `capacity` undelivered segments
#[must_use]
pub fn feed(capacity: usize) -> (SpeechFeed, SpeechReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        SpeechFeed {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        },
        SpeechReceiver { rx },
    )
}

/// Producer side, for the speech-to-text collaborator
#[derive(Debug, Clone)]
pub struct SpeechFeed {
    tx: mpsc::Sender<SpeechSegment>,
    next_id: Arc<AtomicU64>,
}

impl SpeechFeed {
    fn segment(&self, text: &str) -> Option<SpeechSegment> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(SpeechSegment {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            text: text.to_string(),
            received_at: Instant::now(),
        })
    }

    /// Push a transcript without waiting
    ///
    /// Blank transcripts are ignored. Returns `false` if the segment was not
    /// accepted (blank, feed full or pipeline gone).
    pub fn try_push(&self, text: &str) -> bool {
        let Some(segment) = self.segment(text) else {
            return false;
        };

        match self.tx.try_send(segment) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(segment)) => {
                tracing::warn!(id = segment.id, "speech feed full, segment dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Push a transcript, waiting for room
    ///
    /// Returns `false` if the transcript is blank or the pipeline is gone.
    pub async fn push(&self, text: &str) -> bool {
        match self.segment(text) {
            Some(segment) => self.tx.send(segment).await.is_ok(),
            None => false,
        }
    }
}

/// Consumer side, drained by the pipeline thread
#[derive(Debug)]
pub struct SpeechReceiver {
    rx: mpsc::Receiver<SpeechSegment>,
}

impl SpeechReceiver {
    /// Next pending segment, if any
    pub fn try_next(&mut self) -> Option<SpeechSegment> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_arrive_in_order_with_ids() {
        let (feed, mut rx) = feed(4);
        assert!(feed.try_push("someone is at the door"));
        assert!(feed.clone().try_push("  hello  "));

        let first = rx.try_next().unwrap();
        let second = rx.try_next().unwrap();
        assert_eq!(first.text, "someone is at the door");
        assert_eq!(second.text, "hello");
        assert!(second.id > first.id);
        assert!(rx.try_next().is_none());
    }

    #[test]
    fn blank_text_is_ignored() {
        let (feed, mut rx) = feed(4);
        assert!(!feed.try_push("   "));
        assert!(rx.try_next().is_none());
    }

    #[test]
    fn full_feed_rejects() {
        let (feed, _rx) = feed(1);
        assert!(feed.try_push("one"));
        assert!(!feed.try_push("two"));
    }

    #[tokio::test]
    async fn async_push_waits_for_room() {
        let (feed, mut rx) = feed(1);
        assert!(feed.push("first").await);
        assert_eq!(rx.try_next().unwrap().text, "first");
        assert!(feed.push("second").await);
    }
}
