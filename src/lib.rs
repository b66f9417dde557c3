#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![allow(clippy::multiple_crate_versions)]

//! Verifies IPTV stream candidates and ranks the ones that play.
//!
//! [`engine::Engine`] is the core: it takes [`model::ChannelRecord`]s and runs
//! blacklist filtering, one probe per host, per-channel fallback and optional
//! deep validation, then groups and ranks the survivors.

pub mod blacklist;
pub mod config;
pub mod engine;
pub mod error;
pub mod group;
pub mod host;
pub mod memo;
pub mod model;
pub mod notify;
pub mod output;
pub mod playlist;
pub mod probe;
pub mod rank;
pub mod report;
pub mod sources;
pub mod tools;
pub mod util;
pub mod validate;
