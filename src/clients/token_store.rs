use std::collections::BTreeSet;

use anyhow::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;

use crate::models::{packet::Jid, token::DeviceToken};

/// Persistent mapping of bare JIDs to the device tokens they registered.
///
/// Tokens are unique across owners: registering a token for a new JID moves it.
/// Deletion is keyed by token value alone.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn device_tokens(&self, jid: &Jid) -> Result<Vec<DeviceToken>, Error>;

    /// Tokens of every member of the room.
    async fn device_tokens_for_room(&self, room_id: i64) -> Result<Vec<DeviceToken>, Error>;

    async fn set_device_token(&self, jid: &Jid, token: &DeviceToken) -> Result<(), Error>;

    /// Returns whether the token was present. Removing an absent token is not an error.
    async fn delete_device_token(&self, token: &DeviceToken) -> Result<bool, Error>;

    async fn delete_device_tokens_for(&self, jid: &Jid) -> Result<usize, Error>;

    async fn health_check(&self) -> Result<(), Error>;
}

#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    owners: DashMap<DeviceToken, String>,
    room_members: DashMap<i64, BTreeSet<String>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_room_member(&self, room_id: i64, jid: &Jid) {
        self.room_members
            .entry(room_id)
            .or_default()
            .insert(jid.bare());
    }

    pub fn remove_room_member(&self, room_id: i64, jid: &Jid) {
        if let Some(mut members) = self.room_members.get_mut(&room_id) {
            members.remove(&jid.bare());
        }
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    fn tokens_owned_by(&self, owners: &BTreeSet<String>) -> Vec<DeviceToken> {
        let mut tokens: Vec<DeviceToken> = self
            .owners
            .iter()
            .filter(|entry| owners.contains(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        tokens.sort();
        tokens
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn device_tokens(&self, jid: &Jid) -> Result<Vec<DeviceToken>, Error> {
        Ok(self.tokens_owned_by(&BTreeSet::from([jid.bare()])))
    }

    async fn device_tokens_for_room(&self, room_id: i64) -> Result<Vec<DeviceToken>, Error> {
        // Clone the member set so no shard lock is held while scanning owners.
        let members = match self.room_members.get(&room_id) {
            Some(members) => members.clone(),
            None => return Ok(Vec::new()),
        };

        Ok(self.tokens_owned_by(&members))
    }

    async fn set_device_token(&self, jid: &Jid, token: &DeviceToken) -> Result<(), Error> {
        self.owners.insert(token.clone(), jid.bare());
        Ok(())
    }

    async fn delete_device_token(&self, token: &DeviceToken) -> Result<bool, Error> {
        Ok(self.owners.remove(token).is_some())
    }

    async fn delete_device_tokens_for(&self, jid: &Jid) -> Result<usize, Error> {
        let owner = jid.bare();
        let mut removed = 0;
        self.owners.retain(|_, value| {
            let keep = *value != owner;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}
