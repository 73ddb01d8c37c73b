//! Integration tests for QuarantineStore on top of the connection pool.

use std::time::Duration;

use quarantine_store::{Error, NewQuarantineEntry, PoolConfig, QuarantineStore};
use tempfile::TempDir;
use time::OffsetDateTime;

async fn create_test_store() -> (QuarantineStore, TempDir) {
   let temp_dir = TempDir::new().expect("Failed to create temp directory");
   let config = PoolConfig {
      max_connections: 3,
      acquire_timeout: Some(Duration::from_secs(5)),
      ..Default::default()
   };
   let store = QuarantineStore::open(temp_dir.path().join("quarantine.db"), Some(config))
      .await
      .expect("Failed to open quarantine store");

   (store, temp_dir)
}

fn sample(name: &str) -> NewQuarantineEntry {
   NewQuarantineEntry::new(
      format!("/home/user/Downloads/{name}"),
      format!("/var/quarantine/{name}.q"),
      "Eicar-Signature",
      68,
      "275a021bbfb6489e54d471899f7db9d1663fc695ec2fe2a2c4538aabf651fd0f",
   )
}

fn days_ago(days: i64) -> OffsetDateTime {
   OffsetDateTime::now_utc() - time::Duration::days(days)
}

#[tokio::test]
async fn test_open_detects_capabilities() {
   let (store, _temp) = create_test_store().await;

   let capabilities = store.capabilities();
   assert!(capabilities.wal_enabled());
   assert!(capabilities.foreign_keys);

   store.close().await;
}

#[tokio::test]
async fn test_add_and_get_entry() {
   let (store, _temp) = create_test_store().await;

   let added = store.add_entry(sample("eicar.com")).await.unwrap();
   assert!(added.id > 0);

   let fetched = store.get_entry(added.id).await.unwrap().unwrap();
   assert_eq!(fetched, added);
   assert_eq!(fetched.threat_name, "Eicar-Signature");
   assert_eq!(fetched.file_size, 68);

   assert!(store.get_entry(added.id + 100).await.unwrap().is_none());

   store.close().await;
}

#[tokio::test]
async fn test_duplicate_quarantine_path_rejected() {
   let (store, _temp) = create_test_store().await;
   store.add_entry(sample("dup.exe")).await.unwrap();

   let err = store.add_entry(sample("dup.exe")).await.unwrap_err();

   assert!(matches!(err, Error::DuplicateQuarantinePath(ref p) if p == "/var/quarantine/dup.exe.q"));
   assert_eq!(err.error_code(), "DUPLICATE_QUARANTINE_PATH");
   assert_eq!(store.entry_count().await.unwrap(), 1);

   store.close().await;
}

#[tokio::test]
async fn test_file_size_out_of_range() {
   let (store, _temp) = create_test_store().await;
   let mut entry = sample("huge.iso");
   entry.file_size = u64::MAX;

   let err = store.add_entry(entry).await.unwrap_err();

   assert!(matches!(err, Error::FileSizeOutOfRange(u64::MAX)));
   assert_eq!(store.entry_count().await.unwrap(), 0);

   store.close().await;
}

#[tokio::test]
async fn test_list_newest_first_and_lookup_by_original_path() {
   let (store, _temp) = create_test_store().await;

   let old = store
      .add_entry(sample("a.exe").detected_at(days_ago(3)))
      .await
      .unwrap();
   let new = store.add_entry(sample("b.exe")).await.unwrap();

   let mut again = sample("a.exe");
   again.quarantine_path = "/var/quarantine/a.exe.2.q".into();
   let latest_a = store.add_entry(again.detected_at(days_ago(1))).await.unwrap();

   let ids: Vec<i64> = store
      .list_entries()
      .await
      .unwrap()
      .into_iter()
      .map(|e| e.id)
      .collect();
   assert_eq!(ids, vec![new.id, latest_a.id, old.id]);

   let found = store
      .get_entry_by_original_path("/home/user/Downloads/a.exe")
      .await
      .unwrap()
      .unwrap();
   assert_eq!(found.id, latest_a.id);

   assert!(
      store
         .get_entry_by_original_path("/nowhere")
         .await
         .unwrap()
         .is_none()
   );

   store.close().await;
}

#[tokio::test]
async fn test_remove_entry() {
   let (store, _temp) = create_test_store().await;
   let entry = store.add_entry(sample("gone.exe")).await.unwrap();

   assert!(store.remove_entry(entry.id).await.unwrap());
   assert!(!store.remove_entry(entry.id).await.unwrap());
   assert!(store.get_entry(entry.id).await.unwrap().is_none());

   store.close().await;
}

#[tokio::test]
async fn test_count_and_total_size() {
   let (store, _temp) = create_test_store().await;

   assert_eq!(store.entry_count().await.unwrap(), 0);
   assert_eq!(store.total_size().await.unwrap(), 0);

   let mut big = sample("big.bin");
   big.file_size = 1_000_000;
   store.add_entry(big).await.unwrap();
   store.add_entry(sample("small.com")).await.unwrap();

   assert_eq!(store.entry_count().await.unwrap(), 2);
   assert_eq!(store.total_size().await.unwrap(), 1_000_068);

   store.close().await;
}

#[tokio::test]
async fn test_cleanup_older_than() {
   let (store, _temp) = create_test_store().await;

   let ancient = store
      .add_entry(sample("ancient.exe").detected_at(days_ago(90)))
      .await
      .unwrap();
   let stale = store
      .add_entry(sample("stale.exe").detected_at(days_ago(31)))
      .await
      .unwrap();
   let fresh = store.add_entry(sample("fresh.exe")).await.unwrap();

   let old: Vec<i64> = store
      .entries_older_than(30)
      .await
      .unwrap()
      .into_iter()
      .map(|e| e.id)
      .collect();
   assert_eq!(old, vec![ancient.id, stale.id]);

   let removed = store.cleanup_older_than(30).await.unwrap();
   assert_eq!(removed.len(), 2);
   assert_eq!(removed[0], ancient);

   let remaining = store.list_entries().await.unwrap();
   assert_eq!(remaining, vec![fresh]);

   assert!(store.cleanup_older_than(30).await.unwrap().is_empty());

   store.close().await;
}

#[tokio::test]
async fn test_huge_age_matches_nothing() {
   let (store, _temp) = create_test_store().await;
   store
      .add_entry(sample("old.exe").detected_at(days_ago(365)))
      .await
      .unwrap();

   assert!(store.entries_older_than(u32::MAX).await.unwrap().is_empty());
   assert!(store.cleanup_older_than(u32::MAX).await.unwrap().is_empty());
   assert_eq!(store.entry_count().await.unwrap(), 1);

   store.close().await;
}

#[tokio::test]
async fn test_entries_survive_reopen() {
   let temp_dir = TempDir::new().unwrap();
   let path = temp_dir.path().join("quarantine.db");

   let store = QuarantineStore::open(&path, None).await.unwrap();
   let entry = store.add_entry(sample("persist.exe")).await.unwrap();
   store.close().await;

   let reopened = QuarantineStore::open(&path, None).await.unwrap();
   assert_eq!(reopened.get_entry(entry.id).await.unwrap(), Some(entry));

   reopened.close().await;
}

#[tokio::test]
async fn test_concurrent_writers_share_pool() {
   let (store, _temp) = create_test_store().await;

   let (a, b, c, d) = tokio::join!(
      store.add_entry(sample("w1.exe")),
      store.add_entry(sample("w2.exe")),
      store.add_entry(sample("w3.exe")),
      store.add_entry(sample("w4.exe")),
   );

   for result in [a, b, c, d] {
      result.unwrap();
   }

   assert_eq!(store.entry_count().await.unwrap(), 4);
   assert!(store.pool().total_created() <= store.pool().capacity());

   store.close().await;
}

#[tokio::test]
async fn test_closed_store_reports_pool_closed() {
   let (store, _temp) = create_test_store().await;
   store.close().await;

   let err = store.entry_count().await.unwrap_err();

   assert!(matches!(err, Error::Pool(_)));
   assert_eq!(err.error_code(), "POOL_CLOSED");
}

#[test]
fn test_entry_serializes_detected_at_as_rfc3339() {
   let entry = sample("json.exe").detected_at(OffsetDateTime::UNIX_EPOCH);

   let json = serde_json::to_value(&entry).unwrap();

   assert_eq!(json["detected_at"], "1970-01-01T00:00:00Z");
   assert_eq!(json["threat_name"], "Eicar-Signature");
}
