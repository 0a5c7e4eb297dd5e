//! Idempotency cache keying and upsert behavior.

use serde_json::json;

use super::harness::create_db;

#[tokio::test]
async fn responses_are_cached_per_composite_key() {
    let (_pool, db) = create_db().await;
    let repo = db.idempotency();

    let response = json!({ "assistantMessage": "hi", "creditsCharged": 1 });
    repo.save("ai-chat", "user:alice", "key-1", &response)
        .await
        .unwrap();

    let hit = repo.get("ai-chat", "user:alice", "key-1").await.unwrap();
    assert_eq!(hit, Some(response.clone()));

    // The bare client key is not the uniqueness boundary: other
    // scopes and endpoints miss.
    assert!(repo.get("ai-chat", "user:bob", "key-1").await.unwrap().is_none());
    assert!(repo.get("ai-image", "user:alice", "key-1").await.unwrap().is_none());
}

#[tokio::test]
async fn save_upserts_the_latest_response() {
    let (_pool, db) = create_db().await;
    let repo = db.idempotency();

    repo.save("ai-chat", "user:alice", "key-1", &json!({ "v": 1 }))
        .await
        .unwrap();
    repo.save("ai-chat", "user:alice", "key-1", &json!({ "v": 2 }))
        .await
        .unwrap();

    let hit = repo.get("ai-chat", "user:alice", "key-1").await.unwrap();
    assert_eq!(hit, Some(json!({ "v": 2 })));
}
