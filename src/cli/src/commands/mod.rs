pub mod config;
pub mod health;
pub mod jobs;
pub mod posts;
