use crate::db::*;
use crate::types::ProviderId;
use tempfile::NamedTempFile;

/// Querying after the pool is closed must return an error rather than hang
#[tokio::test]
async fn test_get_cursor_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.pool().close().await;

    let result = db.get_sync_cursor(&ProviderId::from("nzbgeek")).await;
    assert!(
        result.is_err(),
        "get_sync_cursor after pool close should return an error, got: {:?}",
        result
    );
}
