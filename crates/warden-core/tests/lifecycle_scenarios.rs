// Integration tests have relaxed clippy settings.
// Production code (src/) must use strict zero-unwrap/panic patterns.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::float_cmp
)]
//! End-to-end confinement lifecycle scenarios
//!
//! Every test drives a manager backed by JSON files in a temporary directory
//! and a manual clock, so sentences elapse without waiting.

use std::{sync::Arc, time::Duration};

use tempfile::TempDir;
use warden_core::{
    ChannelReleaseSink, ConfinementRequest, Error, JsonFileGateway, Location, ManualClock,
    Persistence, Presence, RestrictionManager, SchedulerState, Sentence, SentenceChange,
    SubjectId,
};

struct Harness {
    dir: TempDir,
    clock: ManualClock,
    manager: RestrictionManager,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(1_700_000_000);
    let manager = RestrictionManager::builder(Arc::new(JsonFileGateway::new(dir.path())))
        .clock(Arc::new(clock.clone()))
        .build();
    Harness {
        dir,
        clock,
        manager,
    }
}

fn reopen(h: &Harness) -> RestrictionManager {
    let manager = RestrictionManager::builder(Arc::new(JsonFileGateway::new(h.dir.path())))
        .clock(Arc::new(h.clock.clone()))
        .build();
    manager.load().unwrap();
    manager
}

fn yard() -> Location {
    Location::new("overworld", 10.0, 64.0, 10.0)
}

#[test]
fn zone_lookup_ignores_case_and_rejects_duplicates() {
    let h = harness();
    let created = h
        .manager
        .create_zone("Yard", yard().with_orientation(45.0, -10.0))
        .unwrap()
        .into_result()
        .unwrap();

    for spelling in ["yard", "YARD", "yArD"] {
        assert_eq!(h.manager.zone(spelling), Some(created.clone()));
    }

    let again = h.manager.create_zone("YARD", Location::new("nether", 0.0, 0.0, 0.0));
    assert!(matches!(again, Err(Error::ZoneExists(_))));
}

#[test]
fn remaining_time_counts_down_to_zero() {
    let h = harness();
    h.manager.create_zone("yard", yard()).unwrap().into_result().unwrap();
    let id = SubjectId::random();
    h.manager
        .confine(ConfinementRequest::new(id, "alice", "yard", Sentence::Seconds(3_600)))
        .unwrap()
        .into_result()
        .unwrap();

    assert_eq!(h.manager.remaining(&id), Some(Sentence::Seconds(3_600)));
    h.clock.advance(600);
    assert_eq!(h.manager.remaining(&id), Some(Sentence::Seconds(3_000)));
    h.clock.advance(3_000);
    assert_eq!(h.manager.remaining(&id), Some(Sentence::Seconds(0)));
    h.clock.advance(10_000);
    assert_eq!(h.manager.remaining(&id), Some(Sentence::Seconds(0)));
}

#[test]
fn releasing_twice_is_harmless() {
    let h = harness();
    h.manager.create_zone("yard", yard()).unwrap().into_result().unwrap();
    let id = SubjectId::random();
    h.manager
        .confine(ConfinementRequest::new(id, "alice", "yard", Sentence::Seconds(30)))
        .unwrap()
        .into_result()
        .unwrap();

    assert!(h.manager.release(&id).into_result().unwrap().is_some());
    assert!(h.manager.release(&id).into_result().unwrap().is_none());
    assert!(h
        .manager
        .release(&SubjectId::random())
        .into_result()
        .unwrap()
        .is_none());
    assert!(h.manager.restrictions().is_empty());
}

#[test]
fn subtract_clamps_and_set_restarts() {
    let h = harness();
    h.manager.create_zone("yard", yard()).unwrap().into_result().unwrap();
    let id = SubjectId::random();
    h.manager
        .confine(ConfinementRequest::new(id, "alice", "yard", Sentence::Seconds(100)))
        .unwrap()
        .into_result()
        .unwrap();

    h.manager
        .change_sentence(&id, SentenceChange::Subtract(500))
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(h.manager.get(&id).unwrap().sentence, Sentence::Seconds(0));

    h.clock.advance(42);
    h.manager
        .change_sentence(&id, SentenceChange::Set(Sentence::Seconds(50)))
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(h.manager.remaining(&id), Some(Sentence::Seconds(50)));
}

#[test]
fn yard_scenario_sweep_releases_alice() {
    let h = harness();
    h.manager.create_zone("yard", yard()).unwrap().into_result().unwrap();
    let alice = SubjectId::random();
    let target = h
        .manager
        .confine(
            ConfinementRequest::new(alice, "alice", "yard", Sentence::Seconds(30))
                .reason("test")
                .from_location(Location::new("overworld", 100.0, 70.0, -40.0)),
        )
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(target, yard());
    assert!(h.manager.is_restricted(&alice));

    h.clock.advance(31);
    let released = h.manager.sweep().into_result().unwrap();

    assert_eq!(released.len(), 1);
    assert_eq!(released[0].reason, "test");
    assert!(!h.manager.is_restricted(&alice));
    assert_eq!(
        h.manager.restore_location(&released[0], "overworld").unwrap(),
        Location::new("overworld", 100.0, 70.0, -40.0)
    );
}

#[tokio::test(start_paused = true)]
async fn yard_scenario_through_background_scheduler() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(0);
    let (sink, mut batches) = ChannelReleaseSink::new();
    let manager = RestrictionManager::builder(Arc::new(JsonFileGateway::new(dir.path())))
        .clock(Arc::new(clock.clone()))
        .release_sink(Arc::new(sink))
        .sweep_interval(Duration::from_secs(30))
        .build();

    manager.create_zone("yard", yard()).unwrap().into_result().unwrap();
    let alice = SubjectId::random();
    manager
        .confine(ConfinementRequest::new(alice, "alice", "yard", Sentence::Seconds(30)))
        .unwrap()
        .into_result()
        .unwrap();

    manager.start().await.unwrap();
    assert_eq!(manager.scheduler_state().await, SchedulerState::Running);

    clock.advance(31);
    let batch = batches.recv().await.unwrap();
    assert_eq!(batch, vec![alice]);

    // the host's mutation task applies the batch
    let released = manager.release_expired(&batch).into_result().unwrap();
    assert_eq!(released.len(), 1);
    assert!(!manager.is_restricted(&alice));

    // a stale duplicate batch is a no-op
    assert!(manager
        .release_expired(&batch)
        .into_result()
        .unwrap()
        .is_empty());

    manager.shutdown().await.unwrap();
    assert_eq!(manager.scheduler_state().await, SchedulerState::Stopped);
}

#[test]
fn expired_batch_skips_subjects_extended_since_the_sweep() {
    let h = harness();
    h.manager.create_zone("yard", yard()).unwrap().into_result().unwrap();
    let id = SubjectId::random();
    h.manager
        .confine(ConfinementRequest::new(id, "alice", "yard", Sentence::Seconds(30)))
        .unwrap()
        .into_result()
        .unwrap();

    h.clock.advance(31);
    let batch = vec![id];
    h.manager
        .change_sentence(&id, SentenceChange::Add(600))
        .unwrap()
        .into_result()
        .unwrap();

    assert!(h
        .manager
        .release_expired(&batch)
        .into_result()
        .unwrap()
        .is_empty());
    assert!(h.manager.is_restricted(&id));
}

#[test]
fn deleting_zone_releases_both_occupants() {
    let h = harness();
    h.manager.create_zone("yard", yard()).unwrap().into_result().unwrap();
    h.manager
        .create_zone("cell", Location::new("overworld", 0.0, 10.0, 0.0))
        .unwrap()
        .into_result()
        .unwrap();

    let a = SubjectId::random();
    let b = SubjectId::random();
    let c = SubjectId::random();
    for (id, name, zone) in [(a, "a", "yard"), (b, "b", "yard"), (c, "c", "cell")] {
        h.manager
            .confine(ConfinementRequest::new(id, name, zone, Sentence::Permanent))
            .unwrap()
            .into_result()
            .unwrap();
    }

    let deletion = h.manager.delete_zone("YARD").unwrap().into_result().unwrap();
    let mut released: Vec<SubjectId> = deletion.released.iter().map(|r| r.subject_id).collect();
    released.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(released, expected);
    assert!(h.manager.zone("yard").is_none());

    let persisted = JsonFileGateway::new(h.dir.path()).load_restrictions().unwrap();
    let ids: Vec<SubjectId> = persisted.iter().map(|r| r.subject_id).collect();
    assert_eq!(ids, vec![c]);

    let zones = JsonFileGateway::new(h.dir.path()).load_zones().unwrap();
    assert_eq!(zones.len(), 1);
    assert_eq!(zones[0].name.as_str(), "cell");

    assert!(matches!(h.manager.delete_zone("yard"), Err(Error::ZoneNotFound(_))));
}

#[test]
fn state_survives_reopen() {
    let h = harness();
    h.manager
        .create_zone("yard", yard().with_orientation(90.5, 12.25))
        .unwrap()
        .into_result()
        .unwrap();
    let id = SubjectId::random();
    h.manager
        .confine(
            ConfinementRequest::new(id, "alice", "yard", Sentence::Seconds(120))
                .reason("spam")
                .issuer("mod_bob")
                .from_location(Location::new("nether", 1.5, 2.5, 3.5)),
        )
        .unwrap()
        .into_result()
        .unwrap();

    let reopened = reopen(&h);
    assert_eq!(reopened.zones(), h.manager.zones());
    assert_eq!(reopened.restrictions(), h.manager.restrictions());
}

#[tokio::test]
async fn reload_keeps_records_that_expired_offline() {
    let h = harness();
    h.manager.create_zone("yard", yard()).unwrap().into_result().unwrap();
    let id = SubjectId::random();
    h.manager
        .confine(ConfinementRequest::new(id, "alice", "yard", Sentence::Seconds(60)))
        .unwrap()
        .into_result()
        .unwrap();

    h.clock.advance(3_600);
    let summary = h.manager.reload().await.unwrap();
    assert_eq!(summary.restrictions, 1);
    assert_eq!(summary.expired, 1);
    assert!(h.manager.is_restricted(&id));

    let presence = h.manager.on_join(&id).into_result().unwrap();
    assert!(matches!(presence, Presence::Released(_)));
    assert!(!h.manager.is_restricted(&id));
}

#[tokio::test]
async fn reload_with_unreadable_file_keeps_current_state() {
    let h = harness();
    h.manager.create_zone("yard", yard()).unwrap().into_result().unwrap();
    std::fs::write(h.dir.path().join("zones.json"), "{{ not json").unwrap();

    let result = h.manager.reload().await;
    assert!(matches!(result, Err(Error::Persistence(_))));
    assert!(h.manager.zone("yard").is_some());
}

#[test]
fn release_by_name_ignores_case() {
    let h = harness();
    h.manager.create_zone("yard", yard()).unwrap().into_result().unwrap();
    let id = SubjectId::random();
    h.manager
        .confine(ConfinementRequest::new(id, "Alice", "yard", Sentence::Seconds(30)))
        .unwrap()
        .into_result()
        .unwrap();

    let record = h.manager.release_by_name("ALICE").into_result().unwrap().unwrap();
    assert_eq!(record.subject_id, id);
    assert!(h.manager.release_by_name("alice").into_result().unwrap().is_none());
}
