//! Core types for Parts CRM.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod email;
pub mod id;
pub mod money;
pub mod role;
pub mod status;
pub mod transition;

pub use email::{Email, EmailError};
pub use id::*;
pub use money::{MoneyError, ensure_non_negative, ensure_positive, mask_card_number};
pub use role::{AgentType, Role, RoleParseError};
pub use status::*;
pub use transition::{TransitionPolicy, TransitionRejected};
