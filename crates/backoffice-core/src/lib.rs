//! Core library for the back-office.
//!
//! Contains the admin session guard (step-up 2FA, idle auto-lock, tab-scoped
//! session record), the collaborator traits it talks to, the rules content
//! editor, and the dashboard statistics aggregation. This crate depends on
//! `backoffice-storage` for the tab store trait and knows nothing about HTTP;
//! the hosted backend is reached through the traits in [`identity`],
//! [`twofactor`], [`rules`] and [`stats`].

pub mod clock;
pub mod error;
pub mod guard;
pub mod identity;
pub mod route;
pub mod rules;
pub mod session;
pub mod stats;
pub mod twofactor;

pub use guard::{Collaborators, GuardConfig, GuardPhase, GuardSnapshot, SessionGuard};
