//! Ordered in-memory view of one conversation.
//!
//! The store only keeps entries sorted and answers lookups. Every mutation goes
//! through [`crate::reconciler`], which owns the merge rules.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use shared::domain::{ClientId, MessageId};

use crate::types::ChatMessage;

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    seq: u64,
    message: ChatMessage,
}

impl Slot {
    fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.message.sort_at(), self.seq)
    }
}

/// Entries ordered by effective timestamp, ties broken by insertion sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageStore {
    slots: Vec<Slot>,
    next_seq: u64,
    tombstones: HashSet<MessageId>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.slots.iter().map(|slot| slot.message.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.slots.iter().map(|slot| &slot.message)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get_by_client_id(&self, client_id: ClientId) -> Option<&ChatMessage> {
        self.position_by_client_id(client_id)
            .map(|index| &self.slots[index].message)
    }

    pub fn get_by_id(&self, id: MessageId) -> Option<&ChatMessage> {
        self.position_by_id(id).map(|index| &self.slots[index].message)
    }

    pub fn is_deleted(&self, id: MessageId) -> bool {
        self.tombstones.contains(&id)
    }

    pub(crate) fn get(&self, index: usize) -> &ChatMessage {
        &self.slots[index].message
    }

    pub(crate) fn position_by_client_id(&self, client_id: ClientId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.message.client_id == Some(client_id))
    }

    pub(crate) fn position_by_id(&self, id: MessageId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.message.id == Some(id))
    }

    pub(crate) fn insert(&mut self, message: ChatMessage) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.place(Slot { seq, message });
    }

    /// Replaces the message at `index`, keeping its insertion sequence so ties keep
    /// their original order.
    pub(crate) fn replace(&mut self, index: usize, message: ChatMessage) {
        let slot = self.slots.remove(index);
        self.place(Slot {
            seq: slot.seq,
            message,
        });
    }

    pub(crate) fn remove(&mut self, index: usize) -> ChatMessage {
        self.slots.remove(index).message
    }

    pub(crate) fn tombstone(&mut self, id: MessageId) {
        self.tombstones.insert(id);
    }

    fn place(&mut self, slot: Slot) {
        let key = slot.order_key();
        let index = self
            .slots
            .partition_point(|existing| existing.order_key() < key);
        self.slots.insert(index, slot);
    }
}
