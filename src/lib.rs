pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod gate;
pub mod models;
pub mod provider;
pub mod security;
pub mod skills;
pub mod storage;
