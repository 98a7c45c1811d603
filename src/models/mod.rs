pub mod feedback;
pub mod health;
pub mod packet;
pub mod payload;
pub mod retry;
pub mod room;
pub mod settings;
pub mod token;
