//! weather-announcer: spoken weather announcements for Home Assistant.
//!
//! Triggers decide when to speak, the composer decides what to say and the
//! dispatcher sends it to every configured audio target.

pub mod api;
pub mod composer;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod home_assistant;
pub mod rewriter;
pub mod service;
pub mod thresholds;
pub mod triggers;
pub mod verbalizer;
pub mod weather;
