use super::*;
use fanout::{LocalBroadcaster, Subscription};
use shared::error::{ApiError, ErrorCode};
use std::sync::Mutex;

/// Records every published frame and still delivers through a local channel.
#[derive(Default)]
struct RecordingBroadcaster {
    inner: LocalBroadcaster,
    published: Mutex<Vec<(Topic, ServerEvent)>>,
}

impl RecordingBroadcaster {
    fn cursor_versions(&self) -> Vec<i64> {
        self.published
            .lock()
            .expect("published")
            .iter()
            .filter_map(|(_, event)| match event {
                ServerEvent::CursorChanged { cursor } => Some(cursor.version),
                _ => None,
            })
            .collect()
    }

    fn topics(&self) -> Vec<Topic> {
        self.published
            .lock()
            .expect("published")
            .iter()
            .map(|(topic, _)| *topic)
            .collect()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn publish(&self, topic: Topic, event: ServerEvent) -> usize {
        self.published
            .lock()
            .expect("published")
            .push((topic, event.clone()));
        self.inner.publish(topic, event)
    }

    fn subscribe(&self, topic: Topic) -> Subscription {
        self.inner.subscribe(topic)
    }

    fn unsubscribe(&self, topic: Topic) {
        self.inner.unsubscribe(topic)
    }
}

struct Fixture {
    coordinator: Coordinator,
    broadcaster: Arc<RecordingBroadcaster>,
    session: SessionId,
    items: Vec<SessionItem>,
}

/// Products are `(id, image_count)`; the session queue holds them in order.
async fn fixture(products: &[(i64, Option<u32>)]) -> Fixture {
    fixture_with(products, CoordinatorConfig::default()).await
}

async fn fixture_with(products: &[(i64, Option<u32>)], config: CoordinatorConfig) -> Fixture {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    for (id, images) in products {
        storage
            .register_product(ProductId(*id), &format!("product {id}"), *images)
            .await
            .expect("product");
    }
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let coordinator = Coordinator::new(
        storage.clone(),
        Arc::new(storage),
        broadcaster.clone(),
        config,
    );
    let ids: Vec<ProductId> = products.iter().map(|(id, _)| ProductId(*id)).collect();
    let (summary, items) = coordinator
        .create_session("evening show", &ids)
        .await
        .expect("session");
    Fixture {
        coordinator,
        broadcaster,
        session: summary.session_id,
        items,
    }
}

#[tokio::test]
async fn create_session_assigns_batch_positions_and_empty_cursor() {
    let fx = fixture(&[(1, None), (2, None), (3, None)]).await;
    let positions: Vec<i64> = fx.items.iter().map(|item| item.position).collect();
    assert_eq!(positions, vec![1, 2, 3]);

    let cursor = fx.coordinator.current_cursor(fx.session).await.expect("cursor");
    assert_eq!(cursor.current_item_id, None);
    assert_eq!(cursor.version, 0);
}

#[tokio::test]
async fn create_session_rejects_blank_title() {
    let fx = fixture(&[]).await;
    let err = fx
        .coordinator
        .create_session("   ", &[])
        .await
        .expect_err("blank title");
    assert_eq!(err.code(), ErrorCode::Validation);
}

#[tokio::test]
async fn initialize_points_at_first_item_and_publishes() {
    let fx = fixture(&[(1, Some(2)), (2, None)]).await;
    let cursor = fx
        .coordinator
        .initialize_cursor(fx.session)
        .await
        .expect("init");
    assert_eq!(cursor.current_item_id, Some(fx.items[0].id));
    assert_eq!(cursor.current_image_index, 0);
    assert_eq!(cursor.version, 1);

    let again = fx
        .coordinator
        .initialize_cursor(fx.session)
        .await
        .expect("init again");
    assert_eq!(again.current_item_id, Some(fx.items[0].id));
    assert_eq!(fx.broadcaster.cursor_versions(), vec![1, 2]);
    assert_eq!(
        fx.broadcaster.topics(),
        vec![Topic::Cursor(fx.session), Topic::Cursor(fx.session)]
    );
}

#[tokio::test]
async fn initialize_empty_session_fails_without_side_effects() {
    let fx = fixture(&[]).await;
    let err = fx
        .coordinator
        .initialize_cursor(fx.session)
        .await
        .expect_err("empty");
    assert!(matches!(err, CoordinatorError::NoProducts));

    let cursor = fx.coordinator.current_cursor(fx.session).await.expect("cursor");
    assert_eq!(cursor.version, 0);
    assert!(fx.broadcaster.cursor_versions().is_empty());
}

#[tokio::test]
async fn boundaries_leave_cursor_unchanged() {
    let fx = fixture(&[(1, None), (2, None), (3, None)]).await;
    fx.coordinator
        .jump_to_product(fx.session, 3)
        .await
        .expect("jump");
    let before = fx.coordinator.current_cursor(fx.session).await.expect("cursor");

    let err = fx
        .coordinator
        .advance_to_next(fx.session)
        .await
        .expect_err("end");
    assert!(matches!(err, CoordinatorError::EndOfSession));
    assert_eq!(
        fx.coordinator.current_cursor(fx.session).await.expect("cursor"),
        before
    );

    fx.coordinator
        .jump_to_product(fx.session, 1)
        .await
        .expect("jump");
    let before = fx.coordinator.current_cursor(fx.session).await.expect("cursor");
    let err = fx
        .coordinator
        .go_to_previous(fx.session)
        .await
        .expect_err("start");
    assert!(matches!(err, CoordinatorError::StartOfSession));
    assert_eq!(
        fx.coordinator.current_cursor(fx.session).await.expect("cursor"),
        before
    );
    assert_eq!(fx.broadcaster.cursor_versions(), vec![1, 2]);
}

#[tokio::test]
async fn repeated_jump_resets_image_each_time() {
    let fx = fixture(&[(1, None), (2, Some(4))]).await;
    fx.coordinator
        .jump_to_product(fx.session, 2)
        .await
        .expect("jump");
    fx.coordinator
        .cycle_image(fx.session, ImageDirection::Forward)
        .await
        .expect("cycle");

    let first = fx
        .coordinator
        .jump_to_product(fx.session, 2)
        .await
        .expect("jump");
    let second = fx
        .coordinator
        .jump_to_product(fx.session, 2)
        .await
        .expect("jump");
    assert_eq!(first.current_item_id, second.current_item_id);
    assert_eq!(first.current_image_index, 0);
    assert_eq!(second.current_image_index, 0);
    assert!(second.version > first.version);
}

#[tokio::test]
async fn jump_to_missing_position_is_rejected() {
    let fx = fixture(&[(1, None)]).await;
    let err = fx
        .coordinator
        .jump_to_product(fx.session, 2)
        .await
        .expect_err("invalid");
    assert!(matches!(err, CoordinatorError::InvalidPosition(2)));
    assert_eq!(ApiError::from(err).code, ErrorCode::InvalidPosition);
}

#[tokio::test]
async fn image_cycle_wraps_using_catalog_count() {
    let fx = fixture(&[(1, Some(3))]).await;
    fx.coordinator
        .initialize_cursor(fx.session)
        .await
        .expect("init");

    let back = fx
        .coordinator
        .cycle_image(fx.session, ImageDirection::Backward)
        .await
        .expect("back");
    assert_eq!(back.current_image_index, 2);

    let forward = fx
        .coordinator
        .cycle_image(fx.session, ImageDirection::Forward)
        .await
        .expect("forward");
    assert_eq!(forward.current_image_index, 0);
}

#[tokio::test]
async fn image_cycle_needs_known_images_and_a_current_item() {
    let fx = fixture(&[(1, None), (2, Some(0))]).await;
    let err = fx
        .coordinator
        .cycle_image(fx.session, ImageDirection::Forward)
        .await
        .expect_err("uninitialized");
    assert_eq!(err.code(), ErrorCode::NotFound);

    fx.coordinator
        .initialize_cursor(fx.session)
        .await
        .expect("init");
    let err = fx
        .coordinator
        .cycle_image(fx.session, ImageDirection::Forward)
        .await
        .expect_err("unknown count");
    assert!(matches!(err, CoordinatorError::NoImages));

    fx.coordinator
        .advance_to_next(fx.session)
        .await
        .expect("next");
    let err = fx
        .coordinator
        .cycle_image(fx.session, ImageDirection::Backward)
        .await
        .expect_err("zero images");
    assert!(matches!(err, CoordinatorError::NoImages));
}

#[tokio::test]
async fn overlay_set_and_clear_survive_navigation() {
    let fx = fixture(&[(1, None), (2, None)]).await;
    fx.coordinator
        .initialize_cursor(fx.session)
        .await
        .expect("init");
    let with_overlay = fx
        .coordinator
        .set_overlay_message(fx.session, "  Only 5 left!  ", "#e11d48")
        .await
        .expect("overlay");
    let overlay = with_overlay.overlay_message.clone().expect("overlay");
    assert_eq!(overlay.text, "Only 5 left!");

    let moved = fx
        .coordinator
        .advance_to_next(fx.session)
        .await
        .expect("next");
    assert_eq!(moved.overlay_message.map(|m| m.id), Some(overlay.id));

    let cleared = fx
        .coordinator
        .clear_overlay_message(fx.session)
        .await
        .expect("clear");
    assert!(cleared.overlay_message.is_none());
}

#[tokio::test]
async fn overlay_input_is_validated() {
    let fx = fixture(&[(1, None)]).await;
    let err = fx
        .coordinator
        .set_overlay_message(fx.session, " ", "red")
        .await
        .expect_err("empty text");
    assert_eq!(err.code(), ErrorCode::Validation);

    let long = "x".repeat(MAX_OVERLAY_TEXT_BYTES + 1);
    let err = fx
        .coordinator
        .set_overlay_message(fx.session, &long, "red")
        .await
        .expect_err("too long");
    assert_eq!(err.code(), ErrorCode::Validation);
}

#[tokio::test]
async fn add_item_appends_or_inserts_and_publishes_queue() {
    let fx = fixture(&[(1, None), (2, None)]).await;
    let appended = fx
        .coordinator
        .add_item(fx.session, ProductId(3), None, ItemOverrides::default())
        .await
        .expect("append");
    assert_eq!(appended.position, 3);

    let inserted = fx
        .coordinator
        .add_item(
            fx.session,
            ProductId(4),
            Some(1),
            ItemOverrides {
                featured_text: Some("Host pick".into()),
                ..ItemOverrides::default()
            },
        )
        .await
        .expect("insert");
    assert_eq!(inserted.position, 1);

    let products: Vec<i64> = fx
        .coordinator
        .list_items(fx.session)
        .await
        .expect("items")
        .iter()
        .map(|item| item.product_id.0)
        .collect();
    assert_eq!(products, vec![4, 1, 2, 3]);
    assert_eq!(
        fx.broadcaster.topics(),
        vec![Topic::Queue(fx.session), Topic::Queue(fx.session)]
    );
}

#[tokio::test]
async fn removing_current_item_moves_cursor_to_successor() {
    let fx = fixture(&[(1, None), (2, None), (3, None)]).await;
    fx.coordinator
        .jump_to_product(fx.session, 2)
        .await
        .expect("jump");

    let remaining = fx
        .coordinator
        .remove_item(fx.items[1].id)
        .await
        .expect("remove");
    assert_eq!(remaining.len(), 2);

    let cursor = fx.coordinator.current_cursor(fx.session).await.expect("cursor");
    assert_eq!(cursor.current_item_id, Some(fx.items[2].id));
    assert_eq!(
        fx.broadcaster.topics(),
        vec![
            Topic::Cursor(fx.session),
            Topic::Queue(fx.session),
            Topic::Cursor(fx.session)
        ]
    );
}

#[tokio::test]
async fn removing_unknown_item_is_not_found() {
    let fx = fixture(&[(1, None)]).await;
    let err = fx
        .coordinator
        .remove_item(ItemId(9_999))
        .await
        .expect_err("missing");
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn swap_exchanges_positions_within_session() {
    let fx = fixture(&[(1, None), (2, None), (3, None), (4, None)]).await;
    let items = fx
        .coordinator
        .swap_positions(fx.items[1].id, fx.items[3].id)
        .await
        .expect("swap");
    let products: Vec<i64> = items.iter().map(|item| item.product_id.0).collect();
    assert_eq!(products, vec![1, 4, 3, 2]);
}

#[tokio::test]
async fn swap_across_sessions_is_rejected() {
    let fx = fixture(&[(1, None)]).await;
    let (_, other_items) = fx
        .coordinator
        .create_session("other show", &[ProductId(1)])
        .await
        .expect("other");
    let err = fx
        .coordinator
        .swap_positions(fx.items[0].id, other_items[0].id)
        .await
        .expect_err("different sessions");
    assert!(matches!(err, CoordinatorError::DifferentSessions(_, _)));
    assert_eq!(err.code(), ErrorCode::DifferentSessions);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let fx = fixture(&[]).await;
    let err = fx
        .coordinator
        .advance_to_next(SessionId(404))
        .await
        .expect_err("missing");
    assert_eq!(err.code(), ErrorCode::NotFound);
    let err = fx
        .coordinator
        .current_cursor(SessionId(404))
        .await
        .expect_err("missing");
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn held_lock_surfaces_busy() {
    let fx = fixture_with(
        &[(1, None), (2, None)],
        CoordinatorConfig {
            lock_timeout: Duration::from_millis(40),
        },
    )
    .await;
    let _held = fx
        .coordinator
        .locks
        .acquire(fx.session, Duration::from_secs(1))
        .await
        .expect("hold");

    let err = fx
        .coordinator
        .initialize_cursor(fx.session)
        .await
        .expect_err("busy");
    assert!(matches!(err, CoordinatorError::Busy { .. }));
    assert!(err.code().is_retryable());
}

#[tokio::test]
async fn apply_dispatches_commands_scoped_to_session() {
    let fx = fixture(&[(1, None), (2, None)]).await;
    let outcome = fx
        .coordinator
        .apply(fx.session, ProducerCommand::Initialize)
        .await
        .expect("init");
    assert!(matches!(outcome, CommandOutcome::Cursor(ref c) if c.current_item_id == Some(fx.items[0].id)));

    let outcome = fx
        .coordinator
        .apply(fx.session, ProducerCommand::Next)
        .await
        .expect("next");
    let json = serde_json::to_value(&outcome).expect("json");
    assert_eq!(json["type"], "cursor");

    let (other, other_items) = fx
        .coordinator
        .create_session("other show", &[ProductId(1)])
        .await
        .expect("other");
    let err = fx
        .coordinator
        .apply(
            fx.session,
            ProducerCommand::RemoveItem {
                item_id: other_items[0].id,
            },
        )
        .await
        .expect_err("foreign item");
    assert_eq!(err.code(), ErrorCode::NotFound);
    assert_eq!(
        fx.coordinator
            .list_items(other.session_id)
            .await
            .expect("items")
            .len(),
        1
    );
}

#[tokio::test]
async fn delete_session_cascades() {
    let fx = fixture(&[(1, None)]).await;
    fx.coordinator
        .initialize_cursor(fx.session)
        .await
        .expect("init");
    fx.coordinator
        .delete_session(fx.session)
        .await
        .expect("delete");
    let err = fx
        .coordinator
        .list_items(fx.session)
        .await
        .expect_err("gone");
    assert_eq!(err.code(), ErrorCode::NotFound);
    let err = fx
        .coordinator
        .delete_session(fx.session)
        .await
        .expect_err("already gone");
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn failed_session_creation_leaves_nothing_behind() {
    let fx = fixture(&[(1, None)]).await;
    // Break the step after the session insert.
    sqlx::query("DROP TABLE session_cursors")
        .execute(fx.coordinator.storage().pool())
        .await
        .expect("drop");

    let err = fx
        .coordinator
        .create_session("doomed show", &[ProductId(1), ProductId(2)])
        .await
        .expect_err("cursor table is gone");
    assert_eq!(err.code(), ErrorCode::Internal);

    let sessions = fx.coordinator.storage().list_sessions().await.expect("sessions");
    assert_eq!(
        sessions.iter().map(|s| s.session_id).collect::<Vec<_>>(),
        vec![fx.session]
    );
}

#[tokio::test]
async fn session_deleted_before_transaction_is_not_found() {
    let fx = fixture(&[(1, None), (2, None)]).await;
    fx.coordinator
        .storage()
        .delete_session(fx.session)
        .await
        .expect("delete");

    let err = fx
        .coordinator
        .commit_transition(fx.session, NavCommand::Initialize)
        .await
        .expect_err("deleted");
    assert!(matches!(err, CoordinatorError::NotFound(_)), "{err:?}");
    assert!(fx.broadcaster.cursor_versions().is_empty());
}

#[tokio::test]
async fn session_deleted_while_waiting_for_lock_is_not_found() {
    let fx = fixture(&[(1, None), (2, None)]).await;
    let held = fx
        .coordinator
        .locks
        .acquire(fx.session, Duration::from_secs(1))
        .await
        .expect("hold");

    let coordinator = fx.coordinator.clone();
    let session = fx.session;
    let waiting = tokio::spawn(async move {
        coordinator
            .add_item(session, ProductId(3), None, ItemOverrides::default())
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    fx.coordinator
        .storage()
        .delete_session(fx.session)
        .await
        .expect("delete");
    drop(held);

    let err = waiting.await.expect("join").expect_err("deleted");
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn sqlite_lock_wait_surfaces_busy() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("playback_coordinator_busy_{suffix}"));
    let database_url = format!(
        "sqlite://{}",
        temp_root
            .join("busy.db")
            .to_string_lossy()
            .replace('\\', "/")
    );

    let holder = Storage::new(&database_url).await.expect("db");
    let storage = Storage::with_busy_timeout(&database_url, Duration::from_millis(50))
        .await
        .expect("db");
    let coordinator = Coordinator::new(
        storage.clone(),
        Arc::new(storage),
        Arc::new(LocalBroadcaster::default()),
        CoordinatorConfig::default(),
    );
    let (summary, _) = coordinator
        .create_session("contended", &[ProductId(1)])
        .await
        .expect("session");

    let mut tx = holder.begin().await.expect("tx");
    assert!(sessions::claim(&mut tx, summary.session_id)
        .await
        .expect("claim"));

    let err = coordinator
        .initialize_cursor(summary.session_id)
        .await
        .expect_err("write lock is held elsewhere");
    assert!(matches!(err, CoordinatorError::StoreBusy(_)), "{err:?}");
    assert_eq!(ApiError::from(err).code, ErrorCode::Busy);

    tx.rollback().await.expect("rollback");
    holder.pool().close().await;
    coordinator.storage().pool().close().await;
    std::fs::remove_dir_all(temp_root).expect("cleanup");
}
