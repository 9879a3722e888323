//! Bulk-load streams.
//!
//! A [`Bulker`] hands out one [`BulkerStream`] per load. SQL destinations
//! get every mode through [`SqlBulker`]:
//!
//! | Mode | Writes | Failure leaves |
//! |------|--------|----------------|
//! | Stream | each object, in its own transaction where DDL is transactional | earlier objects written |
//! | Batch | all objects in one transaction on `complete` | destination untouched |
//! | ReplaceTable | staged chunks, swapped in by rename on `complete` | original table untouched |
//! | ReplacePartition | staged chunks, delete + copy of one partition on `complete` | original rows untouched |

mod auto_commit;
pub mod options;
mod replace_partition;
mod replace_table;
pub mod sql_bulker;
mod staged;
pub mod stream;
mod transactional;

pub use options::{BulkMode, State, StreamOptions, StreamStatus, DEFAULT_BATCH_SIZE};
pub use sql_bulker::SqlBulker;
pub use staged::staging_table_name;
pub use stream::{Bulker, BulkerStream};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::adapter::{Session, SqlAdapter, WhenConditions, PARTITION_ID_COLUMN};
    use crate::config::MemoryConfig;
    use crate::core::{DataType, Object, SqlColumn, Table};
    use crate::drivers::memory::MemoryAdapter;
    use crate::error::{BulkerError, ErrorKind};

    fn obj(v: Value) -> Object {
        v.as_object().cloned().unwrap()
    }

    fn setup() -> (Arc<MemoryAdapter>, SqlBulker<MemoryAdapter>) {
        let adapter = Arc::new(MemoryAdapter::new(&MemoryConfig::default()));
        (adapter.clone(), SqlBulker::from_arc(adapter))
    }

    fn setup_without_transactional_ddl() -> (Arc<MemoryAdapter>, SqlBulker<MemoryAdapter>) {
        let config = MemoryConfig {
            transactional: false,
            ..MemoryConfig::default()
        };
        let adapter = Arc::new(MemoryAdapter::new(&config));
        (adapter.clone(), SqlBulker::from_arc(adapter))
    }

    async fn rows(adapter: &MemoryAdapter, table: &str) -> Vec<Object> {
        let mut db = adapter.db(&CancellationToken::new()).await.unwrap();
        adapter
            .select(&mut db, table, &WhenConditions::default())
            .await
            .unwrap()
    }

    async fn live(adapter: &MemoryAdapter, table: &str) -> Table {
        let mut db = adapter.db(&CancellationToken::new()).await.unwrap();
        adapter.get_table_schema(&mut db, table).await.unwrap()
    }

    async fn seed(adapter: &MemoryAdapter, table: &str, data: Vec<Object>) {
        let definition = Table::new("public", table)
            .with_column("id", SqlColumn::new("bigint").with_data_type(DataType::Int64))
            .with_column("name", SqlColumn::new("text").with_data_type(DataType::String));
        let mut db = adapter.db(&CancellationToken::new()).await.unwrap();
        adapter.create_table(&mut db, &definition).await.unwrap();
        adapter.insert(&mut db, &definition, false, &data).await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_creates_table_from_merged_header() {
        let (adapter, bulker) = setup();
        let mut stream = bulker
            .create_stream("s1", "events", BulkMode::Batch, StreamOptions::new())
            .await
            .unwrap();
        stream.consume(obj(json!({"id": 1, "name": "a"}))).await.unwrap();
        stream
            .consume(obj(json!({"id": 2, "user": {"active": true}, "note": null})))
            .await
            .unwrap();
        assert!(adapter.table_names().await.is_empty());

        let state = stream.complete().await.unwrap();
        assert_eq!(state.status, StreamStatus::Completed);
        assert_eq!(state.processed_rows, 2);
        assert_eq!(state.successful_rows, 2);

        let table = live(&adapter, "events").await;
        assert_eq!(table.sorted_column_names(), vec!["id", "name", "user_active"]);
        assert_eq!(table.columns["user_active"].type_name, "boolean");
        assert_eq!(rows(&adapter, "events").await.len(), 2);
        assert_eq!(adapter.schemas().await, vec!["public"]);
    }

    #[tokio::test]
    async fn test_batch_merge_dedupes_and_upserts() {
        let (adapter, bulker) = setup();
        seed(&adapter, "users", vec![]).await;
        let options = StreamOptions::new()
            .with_primary_keys(["id"])
            .with_merge_rows(true);
        let mut stream = bulker
            .create_stream("s1", "users", BulkMode::Batch, options)
            .await
            .unwrap();
        stream.consume(obj(json!({"id": 1, "name": "a"}))).await.unwrap();
        stream.consume(obj(json!({"id": 2, "name": "b"}))).await.unwrap();
        stream.consume(obj(json!({"id": 1, "name": "c"}))).await.unwrap();
        let state = stream.complete().await.unwrap();
        assert_eq!(state.successful_rows, 2);

        let table = live(&adapter, "users").await;
        assert_eq!(table.primary_key_name, "public_users_pk");
        let stored = rows(&adapter, "users").await;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0]["name"], "c");
    }

    #[tokio::test]
    async fn test_batch_failure_rolls_back_everything() {
        let (adapter, bulker) = setup();
        adapter.fail_on(ErrorKind::Insert);
        let mut stream = bulker
            .create_stream("s1", "events", BulkMode::Batch, StreamOptions::new())
            .await
            .unwrap();
        stream.consume(obj(json!({"id": 1}))).await.unwrap();

        let err = stream.complete().await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Insert));
        assert_eq!(stream.state().status, StreamStatus::Failed);
        assert!(stream.state().last_error.is_some());
        assert!(adapter.table_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_runs_ddl_before_load_transaction_without_transactional_ddl() {
        let (adapter, bulker) = setup_without_transactional_ddl();
        adapter.fail_on(ErrorKind::Insert);
        let mut stream = bulker
            .create_stream("s1", "events", BulkMode::Batch, StreamOptions::new())
            .await
            .unwrap();
        stream.consume(obj(json!({"id": 1, "name": "a"}))).await.unwrap();
        let err = stream.complete().await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Insert));

        let ops = adapter.operations();
        let begin = ops
            .iter()
            .position(|k| *k == ErrorKind::BeginTransaction)
            .unwrap();
        assert!(ops[..begin].contains(&ErrorKind::CreateSchema));
        assert!(ops[..begin].contains(&ErrorKind::CreateTable));
        assert_eq!(&ops[begin..], &[ErrorKind::BeginTransaction, ErrorKind::Insert]);

        // The table outlives the failed load, its rows do not.
        assert_eq!(adapter.table_names().await, vec!["events"]);
        assert!(rows(&adapter, "events").await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_loads_without_transactional_ddl() {
        let (adapter, bulker) = setup_without_transactional_ddl();
        let mut stream = bulker
            .create_stream("s1", "events", BulkMode::Batch, StreamOptions::new())
            .await
            .unwrap();
        stream.consume(obj(json!({"id": 1}))).await.unwrap();
        stream.consume(obj(json!({"id": 2, "name": "b"}))).await.unwrap();
        assert_eq!(stream.complete().await.unwrap().successful_rows, 2);
        assert_eq!(rows(&adapter, "events").await.len(), 2);
    }

    #[tokio::test]
    async fn test_stream_mode_evolves_schema_per_object() {
        let (adapter, bulker) = setup();
        let mut stream = bulker
            .create_stream("s1", "events", BulkMode::Stream, StreamOptions::new())
            .await
            .unwrap();
        stream.consume(obj(json!({"a": 1}))).await.unwrap();
        assert_eq!(rows(&adapter, "events").await.len(), 1);

        stream.consume(obj(json!({"a": 2, "b": "x"}))).await.unwrap();
        let table = live(&adapter, "events").await;
        assert_eq!(table.sorted_column_names(), vec!["a", "b"]);

        let state = stream.complete().await.unwrap();
        assert_eq!(state.successful_rows, 2);
        assert_eq!(rows(&adapter, "events").await.len(), 2);
    }

    #[tokio::test]
    async fn test_stream_mode_failure_keeps_earlier_rows() {
        let (adapter, bulker) = setup();
        let mut stream = bulker
            .create_stream("s1", "events", BulkMode::Stream, StreamOptions::new())
            .await
            .unwrap();
        stream.consume(obj(json!({"a": 1}))).await.unwrap();
        adapter.fail_on(ErrorKind::Insert);
        assert!(stream.consume(obj(json!({"a": 2, "b": true}))).await.is_err());

        // The failed object's column was rolled back with its transaction.
        assert_eq!(live(&adapter, "events").await.sorted_column_names(), vec!["a"]);
        assert_eq!(stream.state().successful_rows, 1);
        assert!(stream.state().last_error.is_some());

        stream.consume(obj(json!({"a": 3}))).await.unwrap();
        assert_eq!(rows(&adapter, "events").await.len(), 2);
    }

    #[tokio::test]
    async fn test_closed_stream_rejects_calls() {
        let (_adapter, bulker) = setup();
        let mut stream = bulker
            .create_stream("s1", "events", BulkMode::Batch, StreamOptions::new())
            .await
            .unwrap();
        let state = stream.abort().await.unwrap();
        assert_eq!(state.status, StreamStatus::Aborted);

        let err = stream.consume(obj(json!({"a": 1}))).await.unwrap_err();
        assert!(matches!(err, BulkerError::StreamClosed(_)));
        assert!(matches!(
            stream.complete().await,
            Err(BulkerError::StreamClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_replace_table_swaps_in_new_rows() {
        let (adapter, bulker) = setup();
        seed(
            &adapter,
            "events",
            vec![obj(json!({"id": 1, "name": "old"})), obj(json!({"id": 2, "name": "old"}))],
        )
        .await;

        let options = StreamOptions::new().with_batch_size(1);
        let mut stream = bulker
            .create_stream("s1", "events", BulkMode::ReplaceTable, options)
            .await
            .unwrap();
        stream.consume(obj(json!({"id": 10, "name": "new"}))).await.unwrap();
        stream.consume(obj(json!({"id": 11, "name": "new", "flag": true}))).await.unwrap();
        // The first flush already created the staging table.
        assert_eq!(adapter.table_names().await.len(), 2);

        let state = stream.complete().await.unwrap();
        assert_eq!(state.successful_rows, 2);
        assert_eq!(adapter.table_names().await, vec!["events"]);
        let stored = rows(&adapter, "events").await;
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|r| r["name"] == "new"));
        assert!(live(&adapter, "events").await.columns.contains_key("flag"));
    }

    #[tokio::test]
    async fn test_replace_table_failure_keeps_original_and_drops_staging() {
        let (adapter, bulker) = setup();
        seed(&adapter, "events", vec![obj(json!({"id": 1, "name": "old"}))]).await;
        adapter.fail_on(ErrorKind::ReplaceTable);

        let mut stream = bulker
            .create_stream("s1", "events", BulkMode::ReplaceTable, StreamOptions::new())
            .await
            .unwrap();
        stream.consume(obj(json!({"id": 2, "name": "new"}))).await.unwrap();
        let err = stream.complete().await.unwrap_err();

        assert_eq!(err.kind(), Some(ErrorKind::ReplaceTable));
        assert_eq!(adapter.table_names().await, vec!["events"]);
        let stored = rows(&adapter, "events").await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["name"], "old");
        assert!(adapter.operations().contains(&ErrorKind::DropTable));
    }

    #[tokio::test]
    async fn test_replace_table_without_rows_truncates() {
        let (adapter, bulker) = setup();
        seed(&adapter, "events", vec![obj(json!({"id": 1, "name": "old"}))]).await;
        let mut stream = bulker
            .create_stream("s1", "events", BulkMode::ReplaceTable, StreamOptions::new())
            .await
            .unwrap();
        let state = stream.complete().await.unwrap();
        assert_eq!(state.successful_rows, 0);
        assert!(rows(&adapter, "events").await.is_empty());
        assert_eq!(adapter.table_names().await, vec!["events"]);
    }

    #[tokio::test]
    async fn test_replace_table_without_rows_leaves_missing_target_absent() {
        let (adapter, bulker) = setup();
        let mut stream = bulker
            .create_stream("s1", "events", BulkMode::ReplaceTable, StreamOptions::new())
            .await
            .unwrap();
        let state = stream.complete().await.unwrap();
        assert_eq!(state.status, StreamStatus::Completed);
        assert_eq!(state.successful_rows, 0);
        assert!(adapter.table_names().await.is_empty());
        let ops = adapter.operations();
        assert!(!ops.contains(&ErrorKind::CreateTable));
        assert!(!ops.contains(&ErrorKind::TruncateTable));
    }

    #[tokio::test]
    async fn test_replace_partition_replaces_only_its_rows() {
        let (adapter, bulker) = setup();
        for (partition, ids) in [("p1", vec![1, 2]), ("p2", vec![3]), ("p1", vec![4])] {
            let options = StreamOptions::new().with_partition_id(partition);
            let mut stream = bulker
                .create_stream("s", "events", BulkMode::ReplacePartition, options)
                .await
                .unwrap();
            for id in ids {
                stream.consume(obj(json!({"id": id}))).await.unwrap();
            }
            stream.complete().await.unwrap();
        }

        assert_eq!(adapter.table_names().await, vec!["events"]);
        let stored = rows(&adapter, "events").await;
        let mut ids: Vec<(i64, String)> = stored
            .iter()
            .map(|r| {
                (
                    r["id"].as_i64().unwrap(),
                    r[PARTITION_ID_COLUMN].as_str().unwrap().to_string(),
                )
            })
            .collect();
        ids.sort();
        assert_eq!(ids, vec![(3, "p2".to_string()), (4, "p1".to_string())]);
    }

    #[tokio::test]
    async fn test_replace_partition_failure_keeps_rows() {
        let (adapter, bulker) = setup();
        let options = StreamOptions::new().with_partition_id("p1");
        let mut stream = bulker
            .create_stream("s", "events", BulkMode::ReplacePartition, options.clone())
            .await
            .unwrap();
        stream.consume(obj(json!({"id": 1}))).await.unwrap();
        stream.complete().await.unwrap();

        adapter.fail_on(ErrorKind::CopyTables);
        let mut stream = bulker
            .create_stream("s", "events", BulkMode::ReplacePartition, options)
            .await
            .unwrap();
        stream.consume(obj(json!({"id": 2}))).await.unwrap();
        assert!(stream.complete().await.is_err());

        let stored = rows(&adapter, "events").await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["id"], 1);
        assert_eq!(adapter.table_names().await, vec!["events"]);
    }

    #[tokio::test]
    async fn test_replace_partition_keeps_rows_when_copy_fails_without_transactional_ddl() {
        let (adapter, bulker) = setup_without_transactional_ddl();
        let options = StreamOptions::new().with_partition_id("p1");
        let mut stream = bulker
            .create_stream("s", "events", BulkMode::ReplacePartition, options.clone())
            .await
            .unwrap();
        stream.consume(obj(json!({"id": 1}))).await.unwrap();
        stream.complete().await.unwrap();

        adapter.fail_on(ErrorKind::CopyTables);
        let mut stream = bulker
            .create_stream("s", "events", BulkMode::ReplacePartition, options)
            .await
            .unwrap();
        stream.consume(obj(json!({"id": 2, "flag": true}))).await.unwrap();
        let err = stream.complete().await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::CopyTables));

        // The new column is added before the transaction that deletes and copies.
        let ops = adapter.operations();
        let begin = ops
            .iter()
            .rposition(|k| *k == ErrorKind::BeginTransaction)
            .unwrap();
        let patch = ops
            .iter()
            .rposition(|k| *k == ErrorKind::PatchTableSchema)
            .unwrap();
        assert!(patch < begin);
        assert!(ops[begin..].starts_with(&[
            ErrorKind::BeginTransaction,
            ErrorKind::Delete,
            ErrorKind::CopyTables
        ]));

        let stored = rows(&adapter, "events").await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["id"], 1);
        assert!(live(&adapter, "events").await.columns.contains_key("flag"));
        assert_eq!(adapter.table_names().await, vec!["events"]);
    }

    #[tokio::test]
    async fn test_create_stream_validation() {
        let (_adapter, bulker) = setup();
        let err = bulker
            .create_stream("s", "events", BulkMode::ReplacePartition, StreamOptions::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BulkerError::Validation(_)));

        let err = bulker
            .create_stream(
                "s",
                "events",
                BulkMode::Batch,
                StreamOptions::new().with_merge_rows(true),
            )
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("merge_rows requires primary keys"));

        bulker.close().await.unwrap();
        let err = bulker
            .create_stream("s", "events", BulkMode::Batch, StreamOptions::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BulkerError::StreamClosed(_)));
    }

    #[tokio::test]
    async fn test_cancelled_stream_stops() {
        let (adapter, bulker) = setup();
        let cancel = CancellationToken::new();
        let mut stream = bulker
            .create_stream(
                "s",
                "events",
                BulkMode::Stream,
                StreamOptions::new().with_cancel(cancel.clone()),
            )
            .await
            .unwrap();
        cancel.cancel();
        let err = stream.consume(obj(json!({"a": 1}))).await.unwrap_err();
        assert!(matches!(err, BulkerError::Cancelled));
        assert!(adapter.table_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_sessions_are_released_after_streams() {
        let (adapter, bulker) = setup();
        let mut stream = bulker
            .create_stream("s", "events", BulkMode::Batch, StreamOptions::new())
            .await
            .unwrap();
        stream.consume(obj(json!({"a": 1}))).await.unwrap();
        stream.complete().await.unwrap();

        // A leaked transaction would hold the catalog lock forever.
        let tx = adapter.open_tx(&CancellationToken::new()).await.unwrap();
        tx.commit().await.unwrap();
    }
}
