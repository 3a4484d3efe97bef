pub mod deployment;
pub mod events;
pub mod health;
pub mod items;
pub mod sessions;
pub mod stories;
