//! Folds incoming batches into a [`MessageStore`].
//!
//! Entries are keyed by `client_id` when present, else by server `id`. The merge
//! is idempotent, and batches touching disjoint keys commute:
//!
//! * a confirmed entry is never replaced by a pending one with the same key;
//! * when two confirmed copies meet, the first one's `id`/`created_at` are kept;
//! * entries absent from a batch are retained; only delete batches remove rows;
//! * deleted ids are remembered so a late insert or fetch cannot bring them back;
//! * updates and deletes for unknown ids are no-ops.

use shared::domain::{ClientId, MessageId};
use tracing::{debug, trace};

use crate::{
    store::MessageStore,
    types::{ChatMessage, DeliveryState},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    /// Initial fetch rows, realtime inserts, send acknowledgements and optimistic entries.
    Upsert(Vec<ChatMessage>),
    /// Changes to rows that must already be known (realtime updates, local review edits).
    Update(Vec<ChatMessage>),
    Delete(Vec<MessageId>),
    /// Moves `sending` entries to `failed`. Confirmed entries are left alone.
    MarkFailed(Vec<ClientId>),
    /// Drops local-only entries, e.g. a failed send the user gave up on.
    Discard(Vec<ClientId>),
}

impl Batch {
    pub fn label(&self) -> &'static str {
        match self {
            Batch::Upsert(_) => "upsert",
            Batch::Update(_) => "update",
            Batch::Delete(_) => "delete",
            Batch::MarkFailed(_) => "mark_failed",
            Batch::Discard(_) => "discard",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub inserted: usize,
    pub replaced: usize,
    pub removed: usize,
    pub ignored: usize,
}

impl ReconcileOutcome {
    pub fn changed(&self) -> bool {
        self.inserted + self.replaced + self.removed > 0
    }
}

/// Returns a new store with `batch` applied, leaving `store` untouched.
pub fn reconcile(store: &MessageStore, batch: &Batch) -> MessageStore {
    let mut next = store.clone();
    apply(&mut next, batch);
    next
}

pub fn apply(store: &mut MessageStore, batch: &Batch) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();
    match batch {
        Batch::Upsert(messages) => {
            for message in messages {
                upsert(store, message, &mut outcome);
            }
        }
        Batch::Update(messages) => {
            for message in messages {
                update(store, message, &mut outcome);
            }
        }
        Batch::Delete(ids) => {
            for id in ids {
                store.tombstone(*id);
                match store.position_by_id(*id) {
                    Some(index) => {
                        store.remove(index);
                        outcome.removed += 1;
                    }
                    None => outcome.ignored += 1,
                }
            }
        }
        Batch::MarkFailed(client_ids) => {
            for client_id in client_ids {
                let Some(index) = store.position_by_client_id(*client_id) else {
                    outcome.ignored += 1;
                    continue;
                };
                let existing = store.get(index);
                if existing.delivery_state != DeliveryState::Sending {
                    outcome.ignored += 1;
                    continue;
                }
                let mut failed = existing.clone();
                failed.delivery_state = DeliveryState::Failed;
                store.replace(index, failed);
                outcome.replaced += 1;
            }
        }
        Batch::Discard(client_ids) => {
            for client_id in client_ids {
                match store.position_by_client_id(*client_id) {
                    Some(index) if !store.get(index).is_confirmed() => {
                        store.remove(index);
                        outcome.removed += 1;
                    }
                    _ => outcome.ignored += 1,
                }
            }
        }
    }

    trace!(
        batch = batch.label(),
        inserted = outcome.inserted,
        replaced = outcome.replaced,
        removed = outcome.removed,
        ignored = outcome.ignored,
        "reconciled batch"
    );
    outcome
}

fn upsert(store: &mut MessageStore, incoming: &ChatMessage, outcome: &mut ReconcileOutcome) {
    if incoming.id.is_some_and(|id| store.is_deleted(id)) {
        debug!(id = ?incoming.id, "ignoring upsert of deleted message");
        outcome.ignored += 1;
        return;
    }
    if incoming.key().is_none() {
        debug!("ignoring upsert of message with neither id nor client id");
        outcome.ignored += 1;
        return;
    }

    let by_client = incoming
        .client_id
        .and_then(|client_id| store.position_by_client_id(client_id));
    let by_id = incoming.id.and_then(|id| store.position_by_id(id));

    let index = match (by_client, by_id) {
        (None, None) => {
            store.insert(incoming.clone());
            outcome.inserted += 1;
            return;
        }
        (Some(index), None) | (None, Some(index)) => index,
        (Some(client_index), Some(id_index)) if client_index == id_index => client_index,
        (Some(client_index), Some(id_index)) => {
            // Same server row known under two entries: keep the one carrying the
            // client id and fold the other into it.
            let duplicate = store.remove(id_index);
            outcome.removed += 1;
            let client_index = if id_index < client_index {
                client_index - 1
            } else {
                client_index
            };
            if let Some(folded) = merge(store.get(client_index), &duplicate) {
                store.replace(client_index, folded);
            }
            // Replacing can move the entry; look it up again now that only one copy is left.
            return upsert(store, incoming, outcome);
        }
    };

    match merge(store.get(index), incoming) {
        Some(merged) => {
            store.replace(index, merged);
            outcome.replaced += 1;
        }
        None => outcome.ignored += 1,
    }
}

fn update(store: &mut MessageStore, incoming: &ChatMessage, outcome: &mut ReconcileOutcome) {
    let Some(id) = incoming.id else {
        outcome.ignored += 1;
        return;
    };
    let Some(index) = store.position_by_id(id) else {
        debug!(%id, "ignoring update for unknown message");
        outcome.ignored += 1;
        return;
    };

    let existing = store.get(index);
    let mut updated = existing.clone();
    updated.kind = incoming.kind;
    updated.body = incoming.body.clone();
    updated.attachment_refs = incoming.attachment_refs.clone();
    updated.review_status = incoming.review_status;
    if updated.client_id.is_none() {
        updated.client_id = incoming.client_id;
    }

    if &updated == existing {
        outcome.ignored += 1;
    } else {
        store.replace(index, updated);
        outcome.replaced += 1;
    }
}

/// Returns the merged entry, or `None` when `existing` should stay as it is.
fn merge(existing: &ChatMessage, incoming: &ChatMessage) -> Option<ChatMessage> {
    if existing.is_confirmed() && !incoming.is_confirmed() {
        return None;
    }

    let mut merged = incoming.clone();
    if existing.is_confirmed() {
        merged.id = existing.id;
        merged.created_at = existing.created_at;
    }
    merged.client_id = incoming.client_id.or(existing.client_id);
    merged.local_created_at = existing.local_created_at;

    if &merged == existing {
        None
    } else {
        Some(merged)
    }
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
