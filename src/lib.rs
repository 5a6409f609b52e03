//! Retail Pulse store visit processing
//!
//! This library accepts batches of store visits, each with image URLs, and
//! processes them as resumable background jobs: every image is fetched,
//! stored as an artifact and scored, with per-visit progress and the job's
//! final status recorded in the job store.

pub mod app_state;
pub mod config;
pub mod db;
pub mod engine;
pub mod models;
pub mod routes;
pub mod services;
