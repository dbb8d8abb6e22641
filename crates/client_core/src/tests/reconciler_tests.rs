use super::*;
use chrono::{DateTime, Duration, TimeZone, Utc};
use shared::{
    domain::{ConversationKey, MessageKind, ReviewStatus, Role, UserId},
    protocol::Profile,
};

use crate::types::{ConversationScope, MessageDraft};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn scope() -> ConversationScope {
    ConversationScope {
        key: ConversationKey("chat-1".into()),
        student_id: UserId::new(),
    }
}

fn student(scope: &ConversationScope) -> Profile {
    Profile {
        id: scope.student_id,
        role: Role::Student,
        name: "Ivanete".into(),
        email: "ivanete@example.com".into(),
        avatar_url: None,
        is_master: None,
    }
}

fn pending(text: &str, offset_secs: i64) -> ChatMessage {
    let scope = scope();
    ChatMessage::optimistic(
        ClientId::new(),
        &scope,
        &student(&scope),
        &MessageDraft::text(text),
        base_time() + Duration::seconds(offset_secs),
    )
}

fn confirmed(id: i64, client_id: Option<ClientId>, text: &str, offset_secs: i64) -> ChatMessage {
    let at = base_time() + Duration::seconds(offset_secs);
    ChatMessage {
        id: Some(MessageId(id)),
        client_id,
        conversation_key: ConversationKey("chat-1".into()),
        sender_id: None,
        sender_role: Role::Coach,
        kind: MessageKind::Text,
        body: Some(text.into()),
        attachment_refs: Vec::new(),
        review_status: None,
        created_at: Some(at),
        local_created_at: at,
        delivery_state: DeliveryState::Sent,
    }
}

fn bodies(store: &MessageStore) -> Vec<String> {
    store
        .iter()
        .map(|message| message.body.clone().unwrap_or_default())
        .collect()
}

#[test]
fn optimistic_send_then_ack_leaves_one_sent_entry() {
    let mut store = MessageStore::new();
    let optimistic = pending("Oi", 0);
    let client_id = optimistic.client_id.expect("client id");
    apply(&mut store, &Batch::Upsert(vec![optimistic]));
    assert_eq!(store.len(), 1);

    let ack = confirmed(42, Some(client_id), "Oi", 1);
    let outcome = apply(&mut store, &Batch::Upsert(vec![ack]));

    assert_eq!(outcome.replaced, 1);
    assert_eq!(store.len(), 1);
    let entry = store.get_by_client_id(client_id).expect("entry");
    assert_eq!(entry.id, Some(MessageId(42)));
    assert_eq!(entry.delivery_state, DeliveryState::Sent);
    assert_eq!(entry.local_created_at, base_time());
}

#[test]
fn realtime_insert_before_ack_yields_one_entry() {
    let mut store = MessageStore::new();
    let optimistic = pending("Oi", 0);
    let client_id = optimistic.client_id.expect("client id");
    apply(&mut store, &Batch::Upsert(vec![optimistic]));

    let realtime = confirmed(7, Some(client_id), "Oi", 1);
    apply(&mut store, &Batch::Upsert(vec![realtime.clone()]));
    apply(&mut store, &Batch::Upsert(vec![realtime]));

    assert_eq!(store.len(), 1);
    let entry = store.get_by_id(MessageId(7)).expect("entry");
    assert_eq!(entry.client_id, Some(client_id));
    assert!(entry.is_confirmed());
}

#[test]
fn pending_duplicate_never_downgrades_confirmed_entry() {
    let mut store = MessageStore::new();
    let optimistic = pending("Oi", 0);
    let client_id = optimistic.client_id.expect("client id");
    apply(
        &mut store,
        &Batch::Upsert(vec![confirmed(42, Some(client_id), "Oi", 1)]),
    );

    let outcome = apply(&mut store, &Batch::Upsert(vec![optimistic]));

    assert_eq!(outcome.ignored, 1);
    let entry = store.get_by_client_id(client_id).expect("entry");
    assert_eq!(entry.id, Some(MessageId(42)));
    assert_eq!(entry.delivery_state, DeliveryState::Sent);
}

#[test]
fn second_confirmation_keeps_first_server_identity() {
    let mut store = MessageStore::new();
    let client_id = ClientId::new();
    apply(
        &mut store,
        &Batch::Upsert(vec![confirmed(7, Some(client_id), "Oi", 1)]),
    );
    apply(
        &mut store,
        &Batch::Upsert(vec![confirmed(8, Some(client_id), "Oi", 2)]),
    );

    assert_eq!(store.len(), 1);
    let entry = store.get_by_client_id(client_id).expect("entry");
    assert_eq!(entry.id, Some(MessageId(7)));
    assert_eq!(entry.created_at, Some(base_time() + Duration::seconds(1)));
}

#[test]
fn delete_of_unknown_id_is_a_no_op() {
    let mut store = MessageStore::new();
    apply(
        &mut store,
        &Batch::Upsert(vec![confirmed(1, None, "a", 0), confirmed(2, None, "b", 1)]),
    );
    let before = store.snapshot();

    let outcome = apply(&mut store, &Batch::Delete(vec![MessageId(99)]));

    assert!(!outcome.changed());
    assert_eq!(store.snapshot(), before);
}

#[test]
fn deleted_id_is_not_resurrected_by_a_late_fetch() {
    let mut store = MessageStore::new();
    let row = confirmed(5, None, "old", 0);
    apply(&mut store, &Batch::Upsert(vec![row.clone()]));
    apply(&mut store, &Batch::Delete(vec![MessageId(5)]));
    apply(&mut store, &Batch::Upsert(vec![row]));

    assert!(store.is_empty());
    assert!(store.is_deleted(MessageId(5)));
}

#[test]
fn delete_before_insert_still_blocks_the_insert() {
    let mut store = MessageStore::new();
    apply(&mut store, &Batch::Delete(vec![MessageId(3)]));
    apply(
        &mut store,
        &Batch::Upsert(vec![confirmed(3, None, "late", 0)]),
    );
    assert!(store.is_empty());
}

#[test]
fn update_for_unknown_id_is_ignored() {
    let mut store = MessageStore::new();
    apply(&mut store, &Batch::Upsert(vec![confirmed(1, None, "a", 0)]));
    let before = store.snapshot();

    let mut update = confirmed(2, None, "b", 0);
    update.review_status = Some(ReviewStatus::Approved);
    let outcome = apply(&mut store, &Batch::Update(vec![update]));

    assert_eq!(outcome.ignored, 1);
    assert_eq!(store.snapshot(), before);
}

#[test]
fn update_changes_review_status_in_place() {
    let mut store = MessageStore::new();
    let client_id = ClientId::new();
    let mut photo = confirmed(10, Some(client_id), "", 0);
    photo.kind = MessageKind::MealPhoto;
    photo.body = None;
    photo.attachment_refs = vec!["https://cdn/meal.jpg".into()];
    photo.review_status = Some(ReviewStatus::Pending);
    apply(&mut store, &Batch::Upsert(vec![photo.clone()]));

    let mut reviewed = photo;
    reviewed.client_id = None;
    reviewed.review_status = Some(ReviewStatus::NeedsAdjustment);
    apply(&mut store, &Batch::Update(vec![reviewed]));

    let entry = store.get_by_id(MessageId(10)).expect("entry");
    assert_eq!(entry.review_status, Some(ReviewStatus::NeedsAdjustment));
    assert_eq!(entry.client_id, Some(client_id));
}

#[test]
fn merge_is_idempotent() {
    let batch = Batch::Upsert(vec![
        confirmed(1, None, "a", 0),
        confirmed(2, Some(ClientId::new()), "b", 5),
        pending("c", 3),
    ]);
    let once = reconcile(&MessageStore::new(), &batch);
    let twice = reconcile(&once, &batch);
    assert_eq!(once.snapshot(), twice.snapshot());
}

#[test]
fn batches_over_disjoint_keys_commute() {
    let first = Batch::Upsert(vec![confirmed(1, None, "a", 0), pending("b", 4)]);
    let second = Batch::Upsert(vec![confirmed(2, None, "c", 2), confirmed(3, None, "d", 6)]);
    let empty = MessageStore::new();

    let forward = reconcile(&reconcile(&empty, &first), &second);
    let backward = reconcile(&reconcile(&empty, &second), &first);

    assert_eq!(forward.snapshot(), backward.snapshot());
    assert_eq!(bodies(&forward), vec!["a", "c", "b", "d"]);
}

#[test]
fn never_holds_two_entries_for_one_key() {
    let client_id = ClientId::new();
    let mut optimistic = pending("Oi", 0);
    optimistic.client_id = Some(client_id);
    let mut store = MessageStore::new();
    apply(&mut store, &Batch::Upsert(vec![optimistic]));
    // Fetched before the client id was known locally, then the ack ties the two together.
    apply(&mut store, &Batch::Upsert(vec![confirmed(42, None, "Oi", 1)]));
    assert_eq!(store.len(), 2);

    apply(
        &mut store,
        &Batch::Upsert(vec![confirmed(42, Some(client_id), "Oi", 1)]),
    );

    assert_eq!(store.len(), 1);
    let entry = store.get_by_id(MessageId(42)).expect("entry");
    assert_eq!(entry.client_id, Some(client_id));
}

#[test]
fn ordering_falls_back_to_local_time_and_keeps_insertion_order_on_ties() {
    let mut store = MessageStore::new();
    let late_confirmed = confirmed(1, None, "late", 10);
    let early_pending = pending("early", 2);
    let tie_a = confirmed(2, None, "tie-a", 5);
    let tie_b = confirmed(3, None, "tie-b", 5);
    apply(
        &mut store,
        &Batch::Upsert(vec![late_confirmed, early_pending, tie_a, tie_b]),
    );
    assert_eq!(bodies(&store), vec!["early", "tie-a", "tie-b", "late"]);

    // Re-asserting an existing entry must not move it behind its tie partner.
    let mut edited = confirmed(2, None, "tie-a", 5);
    edited.review_status = Some(ReviewStatus::Approved);
    apply(&mut store, &Batch::Upsert(vec![edited]));
    assert_eq!(bodies(&store), vec!["early", "tie-a", "tie-b", "late"]);
}

#[test]
fn ack_moves_entry_to_server_timestamp() {
    let mut store = MessageStore::new();
    let optimistic = pending("first", 0);
    let client_id = optimistic.client_id.expect("client id");
    apply(
        &mut store,
        &Batch::Upsert(vec![optimistic, confirmed(1, None, "second", 5)]),
    );
    apply(
        &mut store,
        &Batch::Upsert(vec![confirmed(2, Some(client_id), "first", 9)]),
    );
    assert_eq!(bodies(&store), vec!["second", "first"]);
}

#[test]
fn mark_failed_only_touches_sending_entries() {
    let mut store = MessageStore::new();
    let optimistic = pending("Oi", 0);
    let client_id = optimistic.client_id.expect("client id");
    let sent_client = ClientId::new();
    apply(
        &mut store,
        &Batch::Upsert(vec![optimistic, confirmed(1, Some(sent_client), "ok", 1)]),
    );

    let outcome = apply(&mut store, &Batch::MarkFailed(vec![client_id, sent_client]));

    assert_eq!(outcome.replaced, 1);
    assert_eq!(outcome.ignored, 1);
    assert_eq!(
        store.get_by_client_id(client_id).expect("failed").delivery_state,
        DeliveryState::Failed
    );
    assert_eq!(
        store.get_by_client_id(sent_client).expect("sent").delivery_state,
        DeliveryState::Sent
    );
}

#[test]
fn discard_removes_only_local_entries() {
    let mut store = MessageStore::new();
    let optimistic = pending("Oi", 0);
    let client_id = optimistic.client_id.expect("client id");
    let sent_client = ClientId::new();
    apply(
        &mut store,
        &Batch::Upsert(vec![optimistic, confirmed(1, Some(sent_client), "ok", 1)]),
    );
    apply(&mut store, &Batch::MarkFailed(vec![client_id]));

    apply(&mut store, &Batch::Discard(vec![client_id, sent_client]));

    assert_eq!(store.len(), 1);
    assert!(store.get_by_client_id(sent_client).is_some());
}

#[test]
fn failed_entry_becomes_sent_when_a_retry_is_acknowledged() {
    let mut store = MessageStore::new();
    let optimistic = pending("Oi", 0);
    let client_id = optimistic.client_id.expect("client id");
    apply(&mut store, &Batch::Upsert(vec![optimistic]));
    apply(&mut store, &Batch::MarkFailed(vec![client_id]));

    apply(
        &mut store,
        &Batch::Upsert(vec![confirmed(42, Some(client_id), "Oi", 3)]),
    );

    let entry = store.get_by_client_id(client_id).expect("entry");
    assert_eq!(entry.delivery_state, DeliveryState::Sent);
    assert_eq!(store.len(), 1);
}

#[test]
fn reconcile_leaves_input_store_untouched() {
    let store = reconcile(
        &MessageStore::new(),
        &Batch::Upsert(vec![confirmed(1, None, "a", 0)]),
    );
    let before = store.clone();
    let next = reconcile(&store, &Batch::Delete(vec![MessageId(1)]));
    assert_eq!(store, before);
    assert!(next.is_empty());
}
