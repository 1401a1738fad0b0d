//! Offline-first facade used by application screens.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::db::{Database, SnapshotStore, SqliteQueueStore, SqliteSnapshotStore};
use crate::error::{Error, Result};
use crate::models::{entity_resource_key, EntitySnapshot, Operation, OperationKind};
use crate::sync::{RemoteWrite, SyncEngine, SyncHandle};

use super::PhotoCache;

const TICKET_ENTITY: &str = "tickets";
const DEFAULT_PHOTO_FILENAME: &str = "photo.jpg";

/// A captured photo waiting to be uploaded for a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhotoUpload {
    /// Local reference to the image bytes (file path or data URL)
    pub blob: String,
    /// MIME type
    #[serde(rename = "type")]
    pub content_type: String,
    pub location: Option<String>,
    pub filename: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PhotoPayload<'a> {
    ticket_id: &'a str,
    #[serde(flatten)]
    photo: &'a PhotoUpload,
}

/// Local snapshot cache, photo cache and the sync engine handle.
#[derive(Clone)]
pub struct OfflineService {
    snapshots: Arc<dyn SnapshotStore>,
    photos: Arc<PhotoCache>,
    sync: SyncHandle,
    clock: Arc<dyn Clock>,
}

impl OfflineService {
    pub fn new(snapshots: Arc<dyn SnapshotStore>, sync: SyncHandle) -> Self {
        Self {
            snapshots,
            photos: Arc::new(PhotoCache::new()),
            sync,
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamp saved snapshots from `clock`
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Open the database at `db_path` and start the sync engine on it.
    pub fn open_path<R: RemoteWrite>(
        db_path: impl Into<PathBuf>,
        remote: R,
        config: EngineConfig,
    ) -> Result<Self> {
        let db = Database::open(db_path.into())?;
        Self::start(Arc::new(db), remote, config)
    }

    /// In-memory database (primarily for tests).
    pub fn open_in_memory<R: RemoteWrite>(remote: R, config: EngineConfig) -> Result<Self> {
        Self::start(Arc::new(Database::open_in_memory()?), remote, config)
    }

    fn start<R: RemoteWrite>(db: Arc<Database>, remote: R, config: EngineConfig) -> Result<Self> {
        let snapshots: Arc<dyn SnapshotStore> = Arc::new(SqliteSnapshotStore::new(Arc::clone(&db)));
        let sync = SyncEngine::new(Arc::new(SqliteQueueStore::new(db)), remote)
            .with_config(config)
            .with_snapshots(Arc::clone(&snapshots))
            .spawn()?;
        Ok(Self::new(snapshots, sync))
    }

    pub const fn sync(&self) -> &SyncHandle {
        &self.sync
    }

    /// Record a local change: the snapshot is written first, then the
    /// write is queued against the same entity.
    ///
    /// A snapshot failure is returned and nothing is queued.
    pub async fn save_offline(
        &self,
        kind: impl Into<OperationKind>,
        entity_type: &str,
        id: &str,
        data: Value,
    ) -> Result<Operation> {
        let snapshot =
            EntitySnapshot::new(id, entity_type, data)?.with_stored_at(self.clock.now_millis());
        self.snapshots.put(&snapshot)?;
        let resource_key = snapshot.resource_key();
        self.sync
            .enqueue_for(kind, resource_key, snapshot.data)
            .await
    }

    /// Save ticket field updates locally and queue an `UPDATE_TICKET`.
    pub async fn save_ticket_offline(&self, ticket_id: &str, updates: Value) -> Result<Operation> {
        let Value::Object(fields) = updates else {
            return Err(Error::InvalidInput(
                "Ticket updates must be a JSON object".to_string(),
            ));
        };

        let mut ticket = Map::with_capacity(fields.len() + 1);
        ticket.insert("id".to_string(), Value::String(ticket_id.to_string()));
        ticket.extend(fields.into_iter().filter(|(key, _)| key != "id"));

        self.save_offline(
            OperationKind::UpdateTicket,
            TICKET_ENTITY,
            ticket_id,
            Value::Object(ticket),
        )
        .await
    }

    /// Queue a photo upload for a ticket. No snapshot is written.
    pub async fn queue_photo_upload(&self, ticket_id: &str, photo: PhotoUpload) -> Result<Operation> {
        if ticket_id.trim().is_empty() {
            return Err(Error::InvalidInput("Ticket id must not be empty".to_string()));
        }

        let photo = PhotoUpload {
            filename: photo
                .filename
                .or_else(|| Some(DEFAULT_PHOTO_FILENAME.to_string())),
            ..photo
        };
        let payload = serde_json::to_value(PhotoPayload {
            ticket_id,
            photo: &photo,
        })?;
        // Ordered behind earlier writes to the same ticket
        self.sync
            .enqueue_for(
                OperationKind::UploadPhoto,
                entity_resource_key(TICKET_ENTITY, ticket_id),
                payload,
            )
            .await
    }

    /// Last known local version of an entity
    pub fn cached(&self, entity_type: &str, id: &str) -> Result<Option<EntitySnapshot>> {
        self.snapshots.get(entity_type, id)
    }

    /// Drop every cached snapshot; queued operations are kept
    pub fn clear_cache(&self) -> Result<()> {
        self.snapshots.clear()
    }

    /// Keep a captured photo's local reference for this session
    pub fn cache_photo(&self, photo_id: &str, blob: impl Into<String>) -> Result<()> {
        self.photos.insert(photo_id, blob)
    }

    pub fn cached_photo(&self, photo_id: &str) -> Result<Option<String>> {
        self.photos.get(photo_id)
    }

    /// Forget every cached photo reference; returns how many were dropped
    pub fn clear_photo_cache(&self) -> Result<usize> {
        let cleared = self.photos.clear()?;
        tracing::debug!("Cleared {cleared} cached photos");
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::MemoryQueueStore;
    use crate::models::OperationStatus;
    use crate::sync::WriteOutcome;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct AcceptAll;

    impl RemoteWrite for AcceptAll {
        async fn apply(&self, _kind: &OperationKind, _payload: &Value) -> WriteOutcome {
            WriteOutcome::Applied(None)
        }
    }

    fn offline_service() -> OfflineService {
        let config = EngineConfig::default().without_auto_sync().starting_offline();
        OfflineService::open_in_memory(AcceptAll, config).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ticket_update_writes_snapshot_then_queues() {
        let service = offline_service();

        let op = service
            .save_ticket_offline("t-9", json!({ "status": "resolved", "notes": "Replaced filter" }))
            .await
            .unwrap();

        let expected = json!({ "id": "t-9", "status": "resolved", "notes": "Replaced filter" });
        assert_eq!(op.kind, OperationKind::UpdateTicket);
        assert_eq!(op.payload, expected);
        assert_eq!(op.resource_key.as_deref(), Some("tickets/t-9"));
        assert_eq!(op.status, OperationStatus::Pending);

        let cached = service.cached("tickets", "t-9").unwrap().unwrap();
        assert_eq!(cached.entity_type, "tickets");
        assert_eq!(cached.data, expected);
        assert_eq!(service.sync().list().unwrap(), vec![op]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ticket_id_argument_wins_over_payload_id() {
        let service = offline_service();
        let op = service
            .save_ticket_offline("t-1", json!({ "id": "t-2", "status": "open" }))
            .await
            .unwrap();
        assert_eq!(op.payload, json!({ "id": "t-1", "status": "open" }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejects_non_object_updates_without_side_effects() {
        let service = offline_service();
        let result = service.save_ticket_offline("t-1", json!("resolved")).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(service.cached("tickets", "t-1").unwrap().is_none());
        assert!(service.sync().list().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn photo_upload_defaults_filename() {
        let service = offline_service();
        let op = service
            .queue_photo_upload(
                "t-3",
                PhotoUpload {
                    blob: "file:///photos/0001.jpg".to_string(),
                    content_type: "image/jpeg".to_string(),
                    location: Some("Roof unit 2".to_string()),
                    filename: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(op.kind, OperationKind::UploadPhoto);
        assert_eq!(
            op.payload,
            json!({
                "ticketId": "t-3",
                "blob": "file:///photos/0001.jpg",
                "type": "image/jpeg",
                "location": "Roof unit 2",
                "filename": "photo.jpg",
            })
        );
        assert_eq!(op.resource_key.as_deref(), Some("tickets/t-3"));
        assert!(service.cached("tickets", "t-3").unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn synced_writes_leave_cache_in_place() {
        let service = offline_service();
        service
            .save_offline(OperationKind::CreatePurchase, "purchases", "p-1", json!({ "id": "p-1", "total": 120 }))
            .await
            .unwrap();

        service.sync().set_online(true).await.unwrap();
        service.sync().sync_now().await.unwrap();

        assert!(service.sync().list().unwrap().is_empty());
        assert_eq!(service.cached("purchases", "p-1").unwrap().unwrap().data["total"], 120);

        service.clear_cache().unwrap();
        assert!(service.cached("purchases", "p-1").unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn equal_ids_of_different_types_stay_apart() {
        let service = offline_service();
        let ticket = service
            .save_offline(OperationKind::UpdateTicket, "tickets", "42", json!({ "status": "open" }))
            .await
            .unwrap();
        let purchase = service
            .save_offline(OperationKind::CreatePurchase, "purchases", "42", json!({ "total": 7 }))
            .await
            .unwrap();

        assert_eq!(ticket.resource_key.as_deref(), Some("tickets/42"));
        assert_eq!(purchase.resource_key.as_deref(), Some("purchases/42"));
        assert_eq!(
            service.cached("tickets", "42").unwrap().unwrap().data,
            json!({ "status": "open" })
        );
        assert_eq!(
            service.cached("purchases", "42").unwrap().unwrap().data,
            json!({ "total": 7 })
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn snapshots_are_stamped_from_injected_clock() {
        let config = EngineConfig::default().without_auto_sync().starting_offline();
        let service = OfflineService::open_in_memory(AcceptAll, config)
            .unwrap()
            .with_clock(Arc::new(ManualClock::new(1_700_000_000_000)));

        service
            .save_ticket_offline("t-5", json!({ "status": "open" }))
            .await
            .unwrap();

        let cached = service.cached("tickets", "t-5").unwrap().unwrap();
        assert_eq!(cached.stored_at, 1_700_000_000_000);
    }

    struct UnwritableSnapshots;

    impl SnapshotStore for UnwritableSnapshots {
        fn put(&self, _snapshot: &EntitySnapshot) -> Result<()> {
            Err(Error::Database("disk full".to_string()))
        }

        fn get(&self, _entity_type: &str, _id: &str) -> Result<Option<EntitySnapshot>> {
            Ok(None)
        }

        fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn snapshot_failure_is_returned_and_nothing_is_queued() {
        let config = EngineConfig::default().without_auto_sync().starting_offline();
        let sync = SyncEngine::new(Arc::new(MemoryQueueStore::new()), AcceptAll)
            .with_config(config)
            .spawn()
            .unwrap();
        let service = OfflineService::new(Arc::new(UnwritableSnapshots), sync);

        let result = service
            .save_ticket_offline("t-1", json!({ "status": "resolved" }))
            .await;

        assert!(matches!(result, Err(Error::Database(message)) if message == "disk full"));
        assert!(service.sync().list().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn photo_cache_is_shared_across_clones() {
        let service = offline_service();
        let other = service.clone();

        service.cache_photo("ph-1", "file:///photos/1.jpg").unwrap();
        assert_eq!(
            other.cached_photo("ph-1").unwrap().as_deref(),
            Some("file:///photos/1.jpg")
        );

        assert_eq!(other.clear_photo_cache().unwrap(), 1);
        assert_eq!(service.cached_photo("ph-1").unwrap(), None);
    }
}
