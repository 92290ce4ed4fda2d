mod test_helpers;

use std::sync::{Arc, Mutex};

use relayq::protocol::{ServerMessage, UpdateKind};
use relayq::queue::{ItemStatus, SequencedLog};
use relayq::replica::{ClientReplica, ReplicaAction};
use test_helpers::make_item;

#[relayq::test]
fn apply_sync_deduplicates_and_sorts() {
    let mut replica = ClientReplica::new();

    let a = make_item(2, ItemStatus::Pending, 100);
    let b = make_item(1, ItemStatus::Completed, 100);
    let mut a_newer = a.clone();
    a_newer.status = ItemStatus::Processing;
    a_newer.updated_at_ms = 200;

    replica.apply_sync(vec![a.clone(), b.clone()]);
    replica.apply_sync(vec![a_newer.clone()]);

    let seqs: Vec<u64> = replica.items().iter().map(|i| i.sequence).collect();
    assert_eq!(seqs, vec![1, 2]);
    assert_eq!(replica.get(a.id).unwrap().status, ItemStatus::Processing);
    assert_eq!(replica.last_sequence(), 2);
}

#[relayq::test]
fn stale_update_does_not_overwrite_newer_state() {
    let mut replica = ClientReplica::new();

    let newer = make_item(1, ItemStatus::Completed, 300);
    let mut stale = newer.clone();
    stale.status = ItemStatus::Processing;
    stale.updated_at_ms = 200;

    replica.apply_update(UpdateKind::Completed, newer.clone());
    replica.apply_update(UpdateKind::Processing, stale);

    assert_eq!(replica.get(newer.id).unwrap().status, ItemStatus::Completed);
}

#[relayq::test]
fn contiguous_updates_need_no_gap_fill() {
    let mut replica = ClientReplica::new();

    let action = replica.apply_update(UpdateKind::Created, make_item(1, ItemStatus::Pending, 100));
    assert_eq!(action, ReplicaAction::None);

    let action = replica.apply_update(UpdateKind::Created, make_item(2, ItemStatus::Pending, 101));
    assert_eq!(action, ReplicaAction::None);
}

#[relayq::test]
fn sequence_discontinuity_requests_gap_fill() {
    let mut replica = ClientReplica::new();
    replica.apply_sync(vec![
        make_item(1, ItemStatus::Completed, 100),
        make_item(2, ItemStatus::Completed, 101),
    ]);

    let action = replica.apply_update(UpdateKind::Created, make_item(5, ItemStatus::Pending, 200));
    assert_eq!(action, ReplicaAction::RequestAfter(2));

    // The gap-fill batch heals the hole.
    replica.apply_sync(vec![
        make_item(3, ItemStatus::Completed, 150),
        make_item(4, ItemStatus::Pending, 160),
    ]);
    let seqs: Vec<u64> = replica.items().iter().map(|i| i.sequence).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
}

#[relayq::test]
fn reconciliation_is_order_independent() {
    let items = vec![
        make_item(1, ItemStatus::Completed, 110),
        make_item(2, ItemStatus::Failed, 120),
        make_item(3, ItemStatus::Processing, 130),
    ];
    let mut updates = Vec::new();
    for item in &items {
        let mut created = item.clone();
        created.status = ItemStatus::Pending;
        created.updated_at_ms = item.updated_at_ms - 10;
        updates.push((UpdateKind::Created, created));
        updates.push((UpdateKind::from_status(item.status), item.clone()));
    }

    let mut forward = ClientReplica::new();
    for (kind, item) in &updates {
        forward.apply_update(*kind, item.clone());
    }

    let mut shuffled = ClientReplica::new();
    for (kind, item) in updates.iter().rev() {
        shuffled.apply_update(*kind, item.clone());
    }

    assert_eq!(forward.items(), shuffled.items());
    assert_eq!(forward.items(), &items[..]);
}

#[relayq::test]
fn snapshot_then_deltas_equals_late_snapshot() {
    // A replica that takes the initial snapshot and applies every broadcast
    // must end identical to one that only snapshots at the end.
    let log = SequencedLog::new();
    let events: Arc<Mutex<Vec<ServerMessage>>> = Arc::default();

    let sink = Arc::clone(&events);
    log.subscribe_added(move |item| {
        sink.lock().unwrap().push(ServerMessage::ItemUpdated {
            kind: UpdateKind::Created,
            item: item.clone(),
        });
    });
    let sink = Arc::clone(&events);
    log.subscribe_updated(move |item| {
        sink.lock().unwrap().push(ServerMessage::ItemUpdated {
            kind: UpdateKind::from_status(item.status),
            item: item.clone(),
        });
    });

    let mut streaming = ClientReplica::new();
    streaming.apply_sync(log.all()); // initial (empty) snapshot

    let a = log.append("one");
    let b = log.append("two");
    log.claim_next().unwrap();
    log.update(a.id, ItemStatus::Completed, Some("done".to_string()))
        .unwrap();
    log.claim_next().unwrap();
    log.update(b.id, ItemStatus::Failed, Some("nope".to_string()))
        .unwrap();
    log.append("three");

    for message in events.lock().unwrap().drain(..) {
        streaming.apply_message(message);
    }

    let mut late = ClientReplica::new();
    late.apply_sync(log.all());

    assert_eq!(streaming.items(), late.items());
    assert_eq!(streaming.last_sequence(), 3);
}

#[relayq::test]
fn non_item_messages_are_ignored() {
    let mut replica = ClientReplica::new();
    let action = replica.apply_message(ServerMessage::CurrentSequence { sequence: 9 });
    assert_eq!(action, ReplicaAction::None);
    assert!(replica.items().is_empty());
    assert_eq!(replica.last_sequence(), 0);
}
