//! Tether - device pairing, remote command dispatch and presence tracking for
//! multi-tenant mobile device management.
//!
//! This library exposes all modules for the binary and for integration tests.

pub mod admin_graphql;
pub mod admin_mutations;
pub mod commands;
pub mod devices;
pub mod dispatcher;
pub mod entities;
pub mod errors;
pub mod jobs;
pub mod org_sync;
pub mod pairing;
pub mod presence;
pub mod principal;
pub mod settings;
pub mod storage;
pub mod tenant;
pub mod transport;
pub mod web;
