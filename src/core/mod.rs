//! Core connection management logic

pub mod controller;
pub mod directory;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod notification;
pub mod timers;
pub mod types;
