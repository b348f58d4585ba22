use crate::db::Database;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_migrations_create_schema() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(version, 1);

    // Jobs table exists and is queryable
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(count, 0);

    db.close().await;
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let db = Database::new(&path).await.unwrap();
    db.close().await;

    // Reopening must not re-apply v1
    let db = Database::new(&path).await.unwrap();
    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_version")
        .fetch_all(db.pool())
        .await
        .unwrap();
    assert_eq!(versions, vec![1]);

    db.close().await;
}

#[tokio::test]
async fn test_schema_rejects_non_canonical_status() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    // Raw insert bypassing the typed layer still cannot write a bogus status
    let result = sqlx::query(
        "INSERT INTO jobs (kind, status, processor, created_at) VALUES ('import', 'BOGUS', 'p', 0)",
    )
    .execute(db.pool())
    .await;
    assert!(result.is_err(), "CHECK constraint should reject bogus status");

    let result = sqlx::query(
        "INSERT INTO jobs (kind, status, processor, created_at) VALUES ('other', 'pending', 'p', 0)",
    )
    .execute(db.pool())
    .await;
    assert!(result.is_err(), "CHECK constraint should reject bogus kind");

    db.close().await;
}
