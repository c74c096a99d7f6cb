//! Barangay transparency backend.
//!
//! Residents and barangay administrators manage projects, budgets and
//! feedback through a REST API over an embedded Sled store, with
//! cookie-session authentication and role-based access.
//!
//! The layers, bottom up:
//! - [`storage`]: per-entity tables; tenant-scoped CRUD takes the caller's barangay id
//! - [`auth`]: bcrypt password hashes and the server-side session store
//! - [`rest`]: Axum handlers, the session gate extractor and the JSON envelopes

pub mod auth;
pub mod config;
pub mod error;
pub mod ids;
pub mod models;
pub mod rest;
pub mod storage;
pub mod telemetry;
