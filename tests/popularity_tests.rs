/// Popularity tests
///
/// Increment and top-N behaviour against the in-memory backend
/// Run with: cargo test --test popularity_tests

use rankstore::{Catalog, Entity, KeyLayout, MemoryStore, StoreConfig, StoreError};
use std::collections::HashSet;
use std::sync::Arc;

async fn setup(entities: &[Entity]) -> (Catalog, MemoryStore) {
    let store = MemoryStore::new();
    for entity in entities {
        store.seed_entity(&KeyLayout::default(), entity).await;
    }
    let catalog = Catalog::with_store(StoreConfig::default(), Arc::new(store.clone()))
        .await
        .unwrap();
    (catalog, store)
}

fn album(id: &str, likes: u64) -> Entity {
    Entity::new(id, format!("Album {id}"), "Various", 9.99, likes)
}

#[tokio::test]
async fn test_sequential_increments_accumulate() {
    let (catalog, store) = setup(&[album("1", 7)]).await;

    for _ in 0..25 {
        catalog.increment_popularity("1").await.unwrap();
    }

    let entity = catalog.get("1").await.unwrap();
    assert_eq!(entity.likes, 32);
    assert_eq!(store.zscore("popularity", "1").await, Some(32.0));
}

#[tokio::test]
async fn test_increment_nonexistent_leaves_state_unchanged() {
    let (catalog, store) = setup(&[album("1", 3)]).await;

    for _ in 0..3 {
        let err = catalog.increment_popularity("missing").await.unwrap_err();
        assert_eq!(err, StoreError::NotFound("missing".into()));
    }

    assert!(store.hgetall("entity:missing").await.is_empty());
    assert_eq!(store.zscore("popularity", "missing").await, None);
    assert_eq!(catalog.get("1").await.unwrap().likes, 3);
    assert_eq!(store.zscore("popularity", "1").await, Some(3.0));
}

#[tokio::test]
async fn test_scenario_increment_then_top_one() {
    let (catalog, store) = setup(&[album("1", 5), album("2", 4)]).await;

    catalog.increment_popularity("1").await.unwrap();

    assert_eq!(catalog.get("1").await.unwrap().likes, 6);
    assert_eq!(store.zscore("popularity", "1").await, Some(6.0));

    let top = catalog.top_n(1).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].id, "1");
    assert_eq!(top[0].likes, 6);
    assert_eq!(top[0].title, "Album 1");
}

#[tokio::test]
async fn test_short_read_returns_what_exists() {
    let (catalog, _store) = setup(&[album("1", 1), album("2", 2)]).await;

    let top = catalog.top_n(3).await.unwrap();
    assert_eq!(top.len(), 2);
    assert_eq!(top[0].id, "2");
    assert_eq!(top[1].id, "1");
}

#[tokio::test]
async fn test_top_n_descending_without_duplicates() {
    let entities: Vec<Entity> = (0..20).map(|i| album(&i.to_string(), (i * 7 % 11) as u64)).collect();
    let (catalog, _store) = setup(&entities).await;

    let ranked = catalog.top_n_ranked(10).await.unwrap();
    assert_eq!(ranked.len(), 10);

    for pair in ranked.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    let ids: HashSet<&str> = ranked.iter().map(|r| r.entity.id.as_str()).collect();
    assert_eq!(ids.len(), ranked.len());
    assert!(ranked.iter().all(|r| r.is_consistent()));
}

#[tokio::test]
async fn test_ties_break_in_reverse_lexicographic_order() {
    let (catalog, _store) = setup(&[album("a", 4), album("c", 4), album("b", 4)]).await;

    let ids: Vec<String> = catalog
        .top_n(3)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, vec!["c", "b", "a"]);
}

#[tokio::test]
async fn test_increment_changes_ranking() {
    let (catalog, _store) = setup(&[album("1", 5), album("2", 6)]).await;

    assert_eq!(catalog.top_n(1).await.unwrap()[0].id, "2");

    catalog.increment_popularity("1").await.unwrap();
    catalog.increment_popularity("1").await.unwrap();

    let top = catalog.top_n_ranked(2).await.unwrap();
    assert_eq!(top[0].entity.id, "1");
    assert_eq!(top[0].score, 7.0);
    assert_eq!(top[1].entity.id, "2");
}

#[tokio::test]
async fn test_top_n_fails_when_ranked_record_is_missing() {
    let (catalog, store) = setup(&[album("1", 5)]).await;
    store.del("entity:1").await;

    let err = catalog.top_n(1).await.unwrap_err();
    assert_eq!(err, StoreError::NotFound("1".into()));
}

#[tokio::test]
async fn test_top_n_fails_on_undecodable_record() {
    let (catalog, store) = setup(&[album("1", 5)]).await;
    let mut fields = store.hgetall("entity:1").await;
    fields.insert("price".into(), "free".into());
    store.hset("entity:1", fields).await;

    assert!(matches!(
        catalog.top_n(1).await,
        Err(StoreError::DecodeError(_))
    ));
}

#[tokio::test]
async fn test_custom_key_layout() {
    let layout = KeyLayout::new("album", "likes");
    let store = MemoryStore::new();
    store.seed_entity(&layout, &album("1", 2)).await;

    let config = StoreConfig::default().keys(layout);
    let catalog = Catalog::with_store(config, Arc::new(store.clone()))
        .await
        .unwrap();

    catalog.increment_popularity("1").await.unwrap();

    assert_eq!(store.zscore("likes", "1").await, Some(3.0));
    assert_eq!(
        store.hgetall("album:1").await.get("likes").map(String::as_str),
        Some("3")
    );
    assert!(store.hgetall("entity:1").await.is_empty());
}

#[tokio::test]
async fn test_entity_serializes_to_json() {
    let (catalog, _store) = setup(&[album("1", 5)]).await;
    let entity = catalog.get("1").await.unwrap();

    let json = serde_json::to_value(&entity).unwrap();
    assert_eq!(json["id"], "1");
    assert_eq!(json["likes"], 5);
    assert_eq!(json["price"], 9.99);
}

#[tokio::test]
async fn test_connections_released_on_every_path() {
    let (catalog, store) = setup(&[album("1", 5)]).await;

    catalog.increment_popularity("1").await.unwrap();
    let _ = catalog.increment_popularity("nope").await;
    let _ = catalog.get("nope").await;
    catalog.top_n(5).await.unwrap();

    store.set_offline(true);
    assert!(matches!(
        catalog.top_n(5).await,
        Err(StoreError::StoreUnavailable(_))
    ));
    store.set_offline(false);

    let stats = catalog.stats().await;
    assert_eq!(stats.active_connections, 0);
    assert_eq!(stats.available_connections, stats.total_connections);

    // The broken connection was closed, a fresh one serves the next call.
    assert_eq!(catalog.top_n(1).await.unwrap()[0].likes, 6);
}
