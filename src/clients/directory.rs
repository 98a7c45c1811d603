use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{packet::Jid, room::Room};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("User not found: {0}")]
    UserNotFound(String),
}

/// Host user directory. Lookups are in-memory and must not block.
pub trait UserDirectory: Send + Sync {
    fn user_name(&self, jid: &Jid) -> Result<Option<String>, DirectoryError>;
}

pub trait ChatService: Send + Sync {
    fn chat_room(&self, name: &str) -> Option<Room>;
}

/// Host registry of multi-user chat services, keyed by service subdomain
/// (`conference` for `conference.example.com`).
pub trait RoomRegistry: Send + Sync {
    fn chat_service(&self, subdomain: &str) -> Option<Arc<dyn ChatService>>;
}

pub struct IdentityResolver {
    users: Arc<dyn UserDirectory>,
    rooms: Arc<dyn RoomRegistry>,
}

impl IdentityResolver {
    pub fn new(users: Arc<dyn UserDirectory>, rooms: Arc<dyn RoomRegistry>) -> Self {
        Self { users, rooms }
    }

    /// Human readable name of `jid`, falling back to its local part.
    pub fn display_name(&self, jid: &Jid) -> String {
        let fallback = || jid.node().unwrap_or(jid.domain()).to_string();

        match self.users.user_name(jid) {
            Ok(Some(name)) if !name.trim().is_empty() => name,
            Ok(_) => fallback(),
            Err(e) => {
                warn!(jid = %jid, error = %e, "Display name lookup failed");
                fallback()
            }
        }
    }

    pub fn find_room(&self, room_jid: &Jid) -> Option<Room> {
        let room_name = room_jid.node()?;
        let service_name = room_jid.domain().split('.').next()?;

        let Some(service) = self.rooms.chat_service(service_name) else {
            debug!(service = service_name, "Chat service not found");
            return None;
        };

        service.chat_room(room_name)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryChatService {
    rooms: DashMap<String, Room>,
}

impl InMemoryChatService {
    pub fn add_room(&self, room: Room) {
        self.rooms.insert(room.name.to_lowercase(), room);
    }

    pub fn remove_room(&self, name: &str) {
        self.rooms.remove(&name.to_lowercase());
    }
}

impl ChatService for InMemoryChatService {
    fn chat_room(&self, name: &str) -> Option<Room> {
        self.rooms.get(&name.to_lowercase()).map(|room| room.clone())
    }
}

/// Directory for a host that keeps users and rooms in process.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: DashMap<String, Option<String>>,
    services: DashMap<String, Arc<InMemoryChatService>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, jid: &Jid, name: Option<&str>) {
        self.users.insert(jid.bare(), name.map(str::to_string));
    }

    pub fn add_room(&self, service: &str, room: Room) {
        self.services
            .entry(service.to_lowercase())
            .or_default()
            .add_room(room);
    }

    pub fn service(&self, name: &str) -> Option<Arc<InMemoryChatService>> {
        self.services
            .get(&name.to_lowercase())
            .map(|service| Arc::clone(service.value()))
    }
}

impl UserDirectory for InMemoryDirectory {
    fn user_name(&self, jid: &Jid) -> Result<Option<String>, DirectoryError> {
        self.users
            .get(&jid.bare())
            .map(|name| name.value().clone())
            .ok_or_else(|| DirectoryError::UserNotFound(jid.bare()))
    }
}

impl RoomRegistry for InMemoryDirectory {
    fn chat_service(&self, subdomain: &str) -> Option<Arc<dyn ChatService>> {
        self.service(subdomain)
            .map(|service| service as Arc<dyn ChatService>)
    }
}
