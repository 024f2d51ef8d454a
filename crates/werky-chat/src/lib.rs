//! Conversation stream merger.
//!
//! A two-party conversation is two directional message feeds, (a -> b) and
//! (b -> a), each individually ordered by the store's write timestamp. The
//! store gives no cross-feed ordering, so this crate owns the merge into
//! one transcript. This is the single implementation behind every chat
//! surface; screens are thin adapters over [`Conversation`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use werky_core::{
    Document, DocumentStore, Filter, MESSAGES, MarketError, OrderBy, Subscription, Timestamp,
};

/// One chat message, envelope timestamp included. `ts` is the store-assigned
/// sort key; `sent_at` is the sender's wall clock, for display only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
    pub ts: Timestamp,
}

/// The stored payload; id and ts live on the document envelope.
#[derive(Debug, Serialize, Deserialize)]
struct MessageBody {
    from: String,
    to: String,
    text: String,
    sent_at: DateTime<Utc>,
}

fn message_from_doc(doc: Document) -> Result<ChatMessage, MarketError> {
    let id = doc.id.clone();
    let ts = doc.ts;
    let body: MessageBody = doc.decode()?;
    Ok(ChatMessage {
        id,
        from: body.from,
        to: body.to,
        text: body.text,
        sent_at: body.sent_at,
        ts,
    })
}

fn decode_all(docs: Vec<Document>) -> Result<Vec<ChatMessage>, MarketError> {
    docs.into_iter().map(message_from_doc).collect()
}

fn direction(from: &str, to: &str) -> [Filter; 2] {
    [Filter::eq("from", from), Filter::eq("to", to)]
}

/// Two-pointer merge of two individually ts-sorted sides into one
/// transcript. Stable: on equal timestamps the left side goes first, so
/// ties keep the arrival order the caller already observed.
pub fn merge(side_a: &[ChatMessage], side_b: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut merged = Vec::with_capacity(side_a.len() + side_b.len());
    let (mut i, mut j) = (0, 0);

    while i < side_a.len() && j < side_b.len() {
        if side_b[j].ts < side_a[i].ts {
            merged.push(side_b[j].clone());
            j += 1;
        } else {
            merged.push(side_a[i].clone());
            i += 1;
        }
    }
    merged.extend(side_a[i..].iter().cloned());
    merged.extend(side_b[j..].iter().cloned());
    merged
}

#[derive(Clone)]
pub struct Messenger {
    store: Arc<dyn DocumentStore>,
}

impl Messenger {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Messenger { store }
    }

    /// Persists a message with a store-assigned timestamp. The transcript
    /// is not touched here: the live feed delivers the authoritative copy,
    /// so there is exactly one path into the merged view.
    pub async fn send_message(
        &self,
        from: &str,
        to: &str,
        text: &str,
    ) -> Result<ChatMessage, MarketError> {
        let from = from.trim();
        let to = to.trim();
        let text = text.trim();
        let mut missing = Vec::new();
        if from.is_empty() {
            missing.push("from");
        }
        if to.is_empty() || to == from {
            missing.push("to");
        }
        if text.is_empty() {
            missing.push("text");
        }
        if !missing.is_empty() {
            return Err(MarketError::validation(missing));
        }

        let body = MessageBody {
            from: from.to_string(),
            to: to.to_string(),
            text: text.to_string(),
            sent_at: Utc::now(),
        };
        let data =
            serde_json::to_value(&body).map_err(|err| MarketError::Persistence(err.into()))?;
        let doc = self.store.create(MESSAGES, None, data).await?;
        message_from_doc(doc)
    }

    /// One-shot merged transcript between two users.
    pub async fn transcript(&self, a: &str, b: &str) -> Result<Vec<ChatMessage>, MarketError> {
        let side_a = decode_all(
            self.store
                .query(MESSAGES, &direction(a, b), OrderBy::Timestamp)
                .await?,
        )?;
        let side_b = decode_all(
            self.store
                .query(MESSAGES, &direction(b, a), OrderBy::Timestamp)
                .await?,
        )?;
        Ok(merge(&side_a, &side_b))
    }

    /// Opens the live conversation: both directional feeds are subscribed
    /// and seeded from their initial snapshots before this returns.
    pub async fn open_conversation(&self, a: &str, b: &str) -> Result<Conversation, MarketError> {
        let mut feed_a = self
            .store
            .subscribe(MESSAGES, &direction(a, b), OrderBy::Timestamp)
            .await?;
        let mut feed_b = self
            .store
            .subscribe(MESSAGES, &direction(b, a), OrderBy::Timestamp)
            .await?;

        let side_a = decode_all(feed_a.next_snapshot().await.unwrap_or_default())?;
        let side_b = decode_all(feed_b.next_snapshot().await.unwrap_or_default())?;
        let transcript = merge(&side_a, &side_b);
        info!(user_a = %a, user_b = %b, "conversation opened");

        Ok(Conversation {
            feed_a,
            feed_b,
            side_a,
            side_b,
            transcript,
            a_closed: false,
            b_closed: false,
        })
    }

    /// Everyone `user` has exchanged messages with, in first-contact order.
    pub async fn partners_of(&self, user: &str) -> Result<Vec<String>, MarketError> {
        let sent = decode_all(
            self.store
                .query(MESSAGES, &[Filter::eq("from", user)], OrderBy::Timestamp)
                .await?,
        )?;
        let received = decode_all(
            self.store
                .query(MESSAGES, &[Filter::eq("to", user)], OrderBy::Timestamp)
                .await?,
        )?;

        let mut partners: Vec<String> = Vec::new();
        for message in merge(&sent, &received) {
            let counterpart = if message.from == user {
                message.to
            } else {
                message.from
            };
            if !partners.contains(&counterpart) {
                partners.push(counterpart);
            }
        }
        Ok(partners)
    }
}

enum Side {
    A,
    B,
}

/// A live two-party transcript. Holds both directional subscriptions;
/// closing (or dropping) the conversation cancels them, so no update can
/// ever be delivered into a conversation that was torn down.
pub struct Conversation {
    feed_a: Subscription,
    feed_b: Subscription,
    side_a: Vec<ChatMessage>,
    side_b: Vec<ChatMessage>,
    transcript: Vec<ChatMessage>,
    a_closed: bool,
    b_closed: bool,
}

impl Conversation {
    /// The current merged view. Eventually consistent: a message sent a
    /// moment ago appears once its feed delivers it.
    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    /// Waits for the next snapshot on either feed, re-merges and returns
    /// the updated transcript. `Ok(None)` once both feeds have ended.
    pub async fn next_update(&mut self) -> Result<Option<&[ChatMessage]>, MarketError> {
        loop {
            if self.a_closed && self.b_closed {
                return Ok(None);
            }

            let (side, snapshot) = if self.a_closed {
                (Side::B, self.feed_b.next_snapshot().await)
            } else if self.b_closed {
                (Side::A, self.feed_a.next_snapshot().await)
            } else {
                tokio::select! {
                    snapshot = self.feed_a.next_snapshot() => (Side::A, snapshot),
                    snapshot = self.feed_b.next_snapshot() => (Side::B, snapshot),
                }
            };

            match snapshot {
                None => match side {
                    Side::A => self.a_closed = true,
                    Side::B => self.b_closed = true,
                },
                Some(docs) => {
                    let decoded = decode_all(docs)?;
                    match side {
                        Side::A => self.side_a = decoded,
                        Side::B => self.side_b = decoded,
                    }
                    self.transcript = merge(&self.side_a, &self.side_b);
                    return Ok(Some(&self.transcript));
                }
            }
        }
    }

    /// Cancels both feeds. Idempotent; dropping the conversation does the
    /// same.
    pub fn close(&mut self) {
        self.feed_a.cancel();
        self.feed_b.cancel();
        self.a_closed = true;
        self.b_closed = true;
    }
}
