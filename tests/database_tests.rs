//! Message store and identity provider tests

use crewcomm_server::database;
use sqlx::SqlitePool;

// Helper function to create test database
async fn setup_test_db() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .expect("Failed to create test database");

    database::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

#[tokio::test]
async fn append_assigns_id_and_timestamp() {
    let pool = setup_test_db().await;
    database::create_user(&pool, "alice", Some("Alice")).await.unwrap();
    database::create_user(&pool, "bob", None).await.unwrap();

    let stored = database::append_message(&pool, "alice", Some("bob"), None, "hi")
        .await
        .unwrap();

    assert!(stored.id > 0);
    assert!(stored.created_at > 0);
    assert_eq!(stored.sender, "alice");
    assert_eq!(stored.receiver.as_deref(), Some("bob"));
    assert_eq!(stored.team_id, None);
    assert_eq!(stored.body, "hi");
}

#[tokio::test]
async fn append_group_message_carries_team_id() {
    let pool = setup_test_db().await;
    database::create_user(&pool, "bob", None).await.unwrap();

    let stored = database::append_message(&pool, "bob", None, Some("team1"), "standup")
        .await
        .unwrap();

    assert_eq!(stored.receiver, None);
    assert_eq!(stored.team_id.as_deref(), Some("team1"));
}

#[tokio::test]
async fn all_messages_returns_store_order() {
    let pool = setup_test_db().await;
    database::create_user(&pool, "alice", None).await.unwrap();

    for body in ["first", "second", "third"] {
        database::append_message(&pool, "alice", Some("bob"), None, body)
            .await
            .unwrap();
    }

    let log = database::all_messages(&pool).await.unwrap();
    assert_eq!(log.len(), 3);

    let bodies: Vec<&str> = log.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["first", "second", "third"]);

    // Same-second appends still come back in insertion order
    assert!(log.windows(2).all(|pair| pair[0].id < pair[1].id));
}

#[tokio::test]
async fn message_log_is_kept_for_offline_recipients() {
    let pool = setup_test_db().await;
    database::create_user(&pool, "alice", None).await.unwrap();

    // Nobody has ever connected as "ghost"; the record must still land.
    database::append_message(&pool, "alice", Some("ghost"), None, "anyone there?")
        .await
        .unwrap();

    let log = database::all_messages(&pool).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].receiver.as_deref(), Some("ghost"));
}

#[tokio::test]
async fn user_existence_and_status_flags() {
    let pool = setup_test_db().await;

    assert!(!database::user_exists(&pool, "alice").await.unwrap());
    assert_eq!(database::user_status(&pool, "alice").await.unwrap(), None);

    database::create_user(&pool, "alice", Some("Alice")).await.unwrap();
    assert!(database::user_exists(&pool, "alice").await.unwrap());
    assert_eq!(
        database::user_status(&pool, "alice").await.unwrap().as_deref(),
        Some("offline")
    );

    database::mark_online(&pool, "alice").await.unwrap();
    assert_eq!(
        database::user_status(&pool, "alice").await.unwrap().as_deref(),
        Some("online")
    );

    database::mark_offline(&pool, "alice").await.unwrap();
    assert_eq!(
        database::user_status(&pool, "alice").await.unwrap().as_deref(),
        Some("offline")
    );
}

#[tokio::test]
async fn create_user_is_idempotent() {
    let pool = setup_test_db().await;

    database::create_user(&pool, "alice", Some("Alice")).await.unwrap();
    database::create_user(&pool, "alice", Some("Alice Again")).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = 'alice'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}
