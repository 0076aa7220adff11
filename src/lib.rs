//! Nattevakt: Scheduled Night-Watch News Generation
//!
//! Loads the Pjuskeby context sources, asks a language model for short news
//! items, validates and sanitizes the answer and persists it atomically. Runs
//! are mutually exclusive per output file, rate limited and circuit broken;
//! any failure degrades to an offline snapshot or static placeholders.

pub mod api;
pub mod breaker;
pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod degrade;
pub mod error;
pub mod feed;
pub mod generation;
pub mod integrity;
pub mod journal;
pub mod lock;
pub mod logging;
pub mod provider;
pub mod rate;
pub mod response;
pub mod sources;
pub mod writer;
