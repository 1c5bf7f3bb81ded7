//! Parts CRM Core - Shared domain types.
//!
//! This crate provides the types shared by every Parts CRM component:
//! - `server` - Order lifecycle engine, ticket workflow and JSON API
//! - `cli` - Migrations, tenant bootstrap and catalog seeding
//!
//! # Architecture
//!
//! The core crate contains only types and pure rules - no I/O, no database access,
//! no HTTP clients. The transition tables live here so that every consumer agrees
//! on which status changes are legal.
//!
//! # Modules
//!
//! - [`types`] - Type-safe IDs, emails, money checks, roles, statuses and transitions

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
