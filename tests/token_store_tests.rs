use std::sync::Arc;

use anyhow::Result;
use apns_bridge::clients::{
    database::PostgresTokenStore,
    token_store::{InMemoryTokenStore, TokenStore},
};

use crate::support::{jid, token};

/// Test: Lookups are keyed by bare JID and return tokens in order
#[tokio::test]
async fn test_lookup_by_bare_jid() -> Result<()> {
    let store = InMemoryTokenStore::new();
    store.set_device_token(&jid("bob@domain/phone"), &token("beef")).await?;
    store.set_device_token(&jid("Bob@Domain/tablet"), &token("abcd")).await?;

    assert_eq!(
        store.device_tokens(&jid("bob@domain/laptop")).await?,
        vec![token("abcd"), token("beef")]
    );
    assert!(store.device_tokens(&jid("carol@domain")).await?.is_empty());

    Ok(())
}

/// Test: Room lookups return the tokens of every member
#[tokio::test]
async fn test_room_member_tokens() -> Result<()> {
    let store = InMemoryTokenStore::new();
    store.set_device_token(&jid("carol@domain"), &token("t1")).await?;
    store.set_device_token(&jid("dave@domain"), &token("t2")).await?;
    store.set_device_token(&jid("erin@domain"), &token("t3")).await?;
    store.add_room_member(7, &jid("carol@domain"));
    store.add_room_member(7, &jid("dave@domain/phone"));
    store.add_room_member(8, &jid("erin@domain"));

    assert_eq!(
        store.device_tokens_for_room(7).await?,
        vec![token("t1"), token("t2")]
    );

    store.remove_room_member(7, &jid("dave@domain"));
    assert_eq!(store.device_tokens_for_room(7).await?, vec![token("t1")]);
    assert!(store.device_tokens_for_room(99).await?.is_empty());

    Ok(())
}

/// Test: Deleting by token value reports whether anything was removed
#[tokio::test]
async fn test_delete_by_token_value() -> Result<()> {
    let store = InMemoryTokenStore::new();
    store.set_device_token(&jid("bob@domain"), &token("abcd")).await?;

    assert!(store.delete_device_token(&token("abcd")).await?);
    assert!(!store.delete_device_token(&token("abcd")).await?);
    assert!(store.is_empty());

    Ok(())
}

/// Test: Concurrent deletes of one token succeed exactly once
#[tokio::test]
async fn test_concurrent_deletes() -> Result<()> {
    let store = Arc::new(InMemoryTokenStore::new());
    store.set_device_token(&jid("bob@domain"), &token("abcd")).await?;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.delete_device_token(&token("abcd")).await })
        })
        .collect();

    let mut removed = 0;
    for result in futures_util::future::join_all(handles).await {
        if result?? {
            removed += 1;
        }
    }

    assert_eq!(removed, 1);

    Ok(())
}

/// Test: PostgreSQL store behaves like the in-memory one.
/// Runs only when TEST_DATABASE_URL points at a scratch database.
#[tokio::test]
async fn test_postgres_token_store() -> Result<()> {
    let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping PostgreSQL test");
        return Ok(());
    };

    let store = PostgresTokenStore::connect(&database_url).await?;
    store.ensure_schema().await?;
    store.health_check().await?;

    let owner = jid(&format!("user-{}@domain", uuid::Uuid::new_v4().simple()));
    let first = token(&uuid::Uuid::new_v4().simple().to_string());
    let second = token(&uuid::Uuid::new_v4().simple().to_string());
    let room_id = i64::from(rand::random::<u32>());

    store.set_device_token(&owner, &first).await?;
    store.set_device_token(&owner, &first).await?;
    store.set_device_token(&owner, &second).await?;
    store.add_room_member(room_id, &owner).await?;

    let mut expected = vec![first.clone(), second.clone()];
    expected.sort();
    assert_eq!(store.device_tokens(&owner).await?, expected);
    assert_eq!(store.device_tokens_for_room(room_id).await?, expected);

    assert!(store.delete_device_token(&first).await?);
    assert!(!store.delete_device_token(&first).await?);
    assert_eq!(store.delete_device_tokens_for(&owner).await?, 1);
    assert!(store.device_tokens(&owner).await?.is_empty());

    Ok(())
}
