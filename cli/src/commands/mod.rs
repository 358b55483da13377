pub mod ask;
pub mod chat;
pub mod health;
pub mod setup;
