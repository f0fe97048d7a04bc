use super::*;
use crate::limits::*;

const H: Ms = 3_600_000; // 1 hour in ms
const M: Ms = 60_000; // 1 minute in ms
// 2030-01-01T00:00:00Z
const BASE: Ms = 1_893_456_000_000;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("roomkeep_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn at(h: Ms, m: Ms) -> Ms {
    BASE + h * H + m * M
}

fn is_overlap(err: &EngineError) -> bool {
    matches!(err, EngineError::Rejected(Rejection::Overlap { .. }))
}

// ── Conflict engine ──────────────────────────────────────

#[tokio::test]
async fn disjoint_reservations_both_succeed() {
    let engine = Engine::new(test_wal_path("disjoint.wal")).unwrap();
    let now = now_ms();
    engine.reserve(1, Span::new(at(9, 0), at(10, 0)), 10, now).await.unwrap();
    engine.reserve(1, Span::new(at(13, 0), at(14, 0)), 11, now).await.unwrap();
    assert_eq!(engine.room_reservation_count(1).await, 2);
}

#[tokio::test]
async fn touching_reservations_both_succeed() {
    let engine = Engine::new(test_wal_path("touching.wal")).unwrap();
    let now = now_ms();
    engine.reserve(1, Span::new(at(10, 0), at(11, 0)), 10, now).await.unwrap();
    engine.reserve(1, Span::new(at(11, 0), at(12, 0)), 11, now).await.unwrap();
    engine.reserve(1, Span::new(at(9, 0), at(10, 0)), 12, now).await.unwrap();
    assert_eq!(engine.room_reservation_count(1).await, 3);
}

#[tokio::test]
async fn overlapping_second_is_rejected() {
    let engine = Engine::new(test_wal_path("overlapping.wal")).unwrap();
    let now = now_ms();
    let first = engine.reserve(1, Span::new(at(10, 0), at(11, 0)), 10, now).await.unwrap();

    let cases = [
        (at(10, 0), at(11, 0)),  // identical
        (at(9, 30), at(10, 1)),  // clips start
        (at(10, 59), at(12, 0)), // clips end
        (at(10, 15), at(10, 45)), // inside
        (at(9, 0), at(12, 0)),   // covers
    ];
    for (s, e) in cases {
        match engine.reserve(1, Span::new(s, e), 11, now).await {
            Err(EngineError::Rejected(Rejection::Overlap { existing })) => assert_eq!(existing, first.id),
            other => panic!("expected overlap for [{s}, {e}), got {other:?}"),
        }
    }
    assert_eq!(engine.room_reservation_count(1).await, 1);
}

#[tokio::test]
async fn same_span_on_different_rooms_is_fine() {
    let engine = Engine::new(test_wal_path("rooms_independent.wal")).unwrap();
    let now = now_ms();
    let span = Span::new(at(10, 0), at(11, 0));
    engine.reserve(1, span, 10, now).await.unwrap();
    engine.reserve(2, span, 10, now).await.unwrap();
}

#[tokio::test]
async fn rejection_reasons_are_distinct() {
    let engine = Engine::new(test_wal_path("reasons.wal")).unwrap();
    let now = BASE;

    let inverted = engine.reserve(1, Span::unchecked(at(11, 0), at(10, 0)), 10, now).await;
    assert!(matches!(inverted, Err(EngineError::Rejected(Rejection::InvalidInterval))));

    let past = engine.reserve(1, Span::new(BASE - H, BASE + H), 10, now).await;
    assert!(matches!(past, Err(EngineError::Rejected(Rejection::PastStart))));

    engine.reserve(1, Span::new(at(1, 0), at(2, 0)), 10, now).await.unwrap();
    let overlap = engine.reserve(1, Span::new(at(1, 30), at(2, 30)), 10, now).await;
    assert!(overlap.as_ref().is_err_and(is_overlap));

    // Nothing rejected was persisted.
    assert_eq!(engine.reservation_count(), 1);
}

#[tokio::test]
async fn insert_skips_submission_time_rules() {
    let engine = Engine::new(test_wal_path("insert_raw.wal")).unwrap();
    // Past spans are fine at the store level; only reserve() rejects them.
    let r = engine.insert(3, Span::new(1_000, 2_000), 1).await.unwrap();
    assert_eq!(engine.get(r.id).await, Some(r));
    let err = engine.insert(3, Span::unchecked(5, 5), 1).await.unwrap_err();
    assert!(matches!(err, EngineError::Rejected(Rejection::InvalidInterval)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_inserts_exactly_one_wins() {
    let engine = Arc::new(Engine::new(test_wal_path("race.wal")).unwrap());
    let now = now_ms();
    let mut handles = Vec::new();
    for i in 0..32 {
        let engine = engine.clone();
        // All candidates share [10:00, 10:30)
        let span = Span::new(at(10, 0) - i * M, at(10, 30) + i * M);
        handles.push(tokio::spawn(async move { engine.reserve(1, span, i, now).await }));
    }

    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => assert!(is_overlap(&e), "unexpected error {e:?}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(engine.room_reservation_count(1).await, 1);
}

#[tokio::test]
async fn concurrent_disjoint_inserts_all_win() {
    let engine = Arc::new(Engine::new(test_wal_path("race_disjoint.wal")).unwrap());
    let now = now_ms();
    let mut handles = Vec::new();
    for i in 0..24 {
        let engine = engine.clone();
        let span = Span::new(at(i, 0), at(i + 1, 0));
        handles.push(tokio::spawn(async move { engine.reserve(1, span, i, now).await }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(engine.room_reservation_count(1).await, 24);
}

#[tokio::test]
async fn room_limit_enforced() {
    let engine = Engine::new(test_wal_path("limit.wal")).unwrap();
    let schedule = engine.schedule_for(4);
    {
        let mut guard = schedule.write().await;
        for i in 0..MAX_RESERVATIONS_PER_ROOM as Ms {
            guard.insert(Reservation {
                id: ulid::Ulid::new(),
                room_id: 4,
                subject_id: 1,
                span: Span::new(i * 10, i * 10 + 5),
                created_at: 0,
            });
        }
    }
    let err = engine.insert(4, Span::new(at(1, 0), at(2, 0)), 1).await.unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
}

// ── Cancel / delete_by_room ──────────────────────────────

#[tokio::test]
async fn cancel_frees_the_slot() {
    let engine = Engine::new(test_wal_path("cancel.wal")).unwrap();
    let now = now_ms();
    let span = Span::new(at(10, 0), at(11, 0));
    let r = engine.reserve(1, span, 10, now).await.unwrap();

    let removed = engine.cancel(r.id).await.unwrap();
    assert_eq!(removed.id, r.id);
    assert!(engine.get(r.id).await.is_none());
    assert!(matches!(engine.cancel(r.id).await, Err(EngineError::NotFound(_))));

    engine.reserve(1, span, 11, now).await.unwrap();
}

#[tokio::test]
async fn delete_by_room_is_idempotent() {
    let engine = Engine::new(test_wal_path("purge.wal")).unwrap();
    let now = now_ms();
    engine.reserve(5, Span::new(at(1, 0), at(2, 0)), 10, now).await.unwrap();
    engine.reserve(5, Span::new(at(3, 0), at(4, 0)), 10, now).await.unwrap();
    let other = engine.reserve(6, Span::new(at(1, 0), at(2, 0)), 10, now).await.unwrap();

    assert_eq!(engine.delete_by_room(5).await.unwrap(), 2);
    assert!(engine.list(&ReservationFilter { room_id: Some(5), ..Default::default() }).await.is_empty());

    // Second delivery of the same deletion.
    assert_eq!(engine.delete_by_room(5).await.unwrap(), 0);
    assert!(engine.list(&ReservationFilter { room_id: Some(5), ..Default::default() }).await.is_empty());

    // Never-seen room.
    assert_eq!(engine.delete_by_room(999).await.unwrap(), 0);

    assert_eq!(engine.get(other.id).await, Some(other));
    assert_eq!(engine.reservation_count(), 1);
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn find_overlapping_vs_find_in_range_boundary() {
    let engine = Engine::new(test_wal_path("find.wal")).unwrap();
    let now = now_ms();
    let early = engine.reserve(1, Span::new(at(8, 0), at(10, 0)), 10, now).await.unwrap();
    let mid = engine.reserve(1, Span::new(at(10, 0), at(11, 0)), 10, now).await.unwrap();

    let q = Span::new(at(10, 0), at(12, 0));
    let overlapping: Vec<_> = engine.find_overlapping(1, &q).await.into_iter().map(|r| r.id).collect();
    assert_eq!(overlapping, vec![mid.id]);

    let in_range: Vec<_> = engine.find_in_range(1, &q).await.into_iter().map(|r| r.id).collect();
    assert_eq!(in_range, vec![early.id, mid.id]);

    assert!(engine.find_overlapping(77, &q).await.is_empty());
}

#[tokio::test]
async fn list_filters_compose() {
    let engine = Engine::new(test_wal_path("list.wal")).unwrap();
    let now = now_ms();
    let a = engine.reserve(1, Span::new(at(9, 0), at(10, 0)), 10, now).await.unwrap();
    let b = engine.reserve(1, Span::new(at(24 + 9, 0), at(24 + 10, 0)), 20, now).await.unwrap();
    let c = engine.reserve(2, Span::new(at(9, 0), at(10, 0)), 20, now).await.unwrap();

    let all = engine.list(&ReservationFilter::default()).await;
    assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a.id, b.id, c.id]);

    let by_subject = engine.list(&ReservationFilter { subject_id: Some(20), ..Default::default() }).await;
    assert_eq!(by_subject.iter().map(|r| r.id).collect::<Vec<_>>(), vec![b.id, c.id]);

    let day = chrono::NaiveDate::from_ymd_opt(2030, 1, 1);
    let by_day = engine.list(&ReservationFilter { date: day, ..Default::default() }).await;
    assert_eq!(by_day.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a.id, c.id]);

    let narrow = engine
        .list(&ReservationFilter { room_id: Some(1), subject_id: Some(20), date: day })
        .await;
    assert!(narrow.is_empty());
}

// ── Availability ─────────────────────────────────────────

// 2024-01-01T00:00:00Z
const JAN1: Ms = 1_704_067_200_000;

#[tokio::test]
async fn availability_inclusive_of_boundary_dates() {
    let engine = Engine::new(test_wal_path("avail.wal")).unwrap();
    let before = engine.insert(1, Span::new(JAN1 - 2 * H, JAN1 - H), 1).await.unwrap();
    let first_day = engine.insert(1, Span::new(JAN1 + 9 * H, JAN1 + 10 * H), 1).await.unwrap();
    let last_day = engine
        .insert(1, Span::new(JAN1 + 2 * DAY_MS + 22 * H, JAN1 + 2 * DAY_MS + 23 * H), 1)
        .await
        .unwrap();
    let straddle = engine
        .insert(1, Span::new(JAN1 + 3 * DAY_MS - H, JAN1 + 3 * DAY_MS + H), 1)
        .await
        .unwrap();
    let after = engine.insert(1, Span::new(JAN1 + 3 * DAY_MS + 2 * H, JAN1 + 3 * DAY_MS + 3 * H), 1).await.unwrap();

    let range = DateRange::parse("2024-01-01", "2024-01-03").unwrap();
    let avail = engine.booked_slots(1, &range).await;
    let ids: Vec<_> = avail.booked.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![first_day.id, last_day.id, straddle.id]);
    assert!(!ids.contains(&before.id));
    assert!(!ids.contains(&after.id));

    assert_eq!(
        avail.free,
        vec![
            Span::new(JAN1, JAN1 + 9 * H),
            Span::new(JAN1 + 10 * H, JAN1 + 2 * DAY_MS + 22 * H),
        ]
    );
    // last_day and straddle touch, so the window ends fully booked.
    assert!(avail.free.iter().all(|s| s.end <= last_day.span.start));
}

#[tokio::test]
async fn availability_counts_booking_ending_at_range_start() {
    let engine = Engine::new(test_wal_path("avail_edge.wal")).unwrap();
    let edge = engine.insert(1, Span::new(JAN1 - H, JAN1), 1).await.unwrap();
    let range = DateRange::parse("2024-01-01", "2024-01-01").unwrap();
    let avail = engine.booked_slots(1, &range).await;
    assert_eq!(avail.booked, vec![edge]);
    assert_eq!(avail.free, vec![Span::new(JAN1, JAN1 + DAY_MS)]);
}

#[tokio::test]
async fn availability_empty_is_not_an_error() {
    let engine = Engine::new(test_wal_path("avail_empty.wal")).unwrap();
    let range = DateRange::parse("2024-01-01", "2024-01-03").unwrap();
    let avail = engine.booked_slots(42, &range).await;
    assert!(avail.is_empty());
    assert_eq!(avail.free, vec![range.window()]);
}

// ── WAL ──────────────────────────────────────────────────

#[tokio::test]
async fn wal_replay_restores_live_state() {
    let path = test_wal_path("replay.wal");
    let now = now_ms();
    let (kept, cancelled, purged) = {
        let engine = Engine::new(path.clone()).unwrap();
        let kept = engine.reserve(1, Span::new(at(1, 0), at(2, 0)), 10, now).await.unwrap();
        let cancelled = engine.reserve(1, Span::new(at(3, 0), at(4, 0)), 10, now).await.unwrap();
        let purged = engine.reserve(2, Span::new(at(1, 0), at(2, 0)), 10, now).await.unwrap();
        engine.cancel(cancelled.id).await.unwrap();
        engine.delete_by_room(2).await.unwrap();
        (kept, cancelled, purged)
    };

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.get(kept.id).await, Some(kept.clone()));
    assert!(engine.get(cancelled.id).await.is_none());
    assert!(engine.get(purged.id).await.is_none());
    assert_eq!(engine.reservation_count(), 1);

    // The replayed reservation still blocks its slot.
    let err = engine.reserve(1, kept.span, 11, now).await.unwrap_err();
    assert!(is_overlap(&err));
}

#[tokio::test]
async fn compaction_keeps_only_live_state() {
    let path = test_wal_path("compact.wal");
    let now = now_ms();
    let kept = {
        let engine = Engine::new(path.clone()).unwrap();
        let mut kept = Vec::new();
        for i in 0..10 {
            let r = engine.reserve(1, Span::new(at(i, 0), at(i, 30)), 10, now).await.unwrap();
            if i % 2 == 0 {
                engine.cancel(r.id).await.unwrap();
            } else {
                kept.push(r);
            }
        }
        assert_eq!(engine.wal_appends_since_compact().await, 15);
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        let extra = engine.reserve(1, Span::new(at(20, 0), at(21, 0)), 10, now).await.unwrap();
        kept.push(extra);
        kept
    };

    let records = crate::wal::Wal::<ReservationRecord>::replay(&path).unwrap();
    assert_eq!(records.len(), kept.len());
    assert!(records.iter().all(|r| matches!(r, ReservationRecord::Created(_))));

    let engine = Engine::new(path).unwrap();
    let listed = engine.list(&ReservationFilter::default()).await;
    assert_eq!(listed, kept);
}
