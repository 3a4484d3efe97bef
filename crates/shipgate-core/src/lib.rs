pub mod checklist;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod gate;
pub mod io;
pub mod poll;
pub mod registry;
pub mod service;
pub mod session;
pub mod story;
pub mod types;

pub use error::{Result, ShipgateError};
