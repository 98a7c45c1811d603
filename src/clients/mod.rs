pub mod apns;
pub mod database;
pub mod directory;
pub mod gateway;
pub mod health;
pub mod token_store;
