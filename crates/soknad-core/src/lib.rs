//! Core types and state machines for the benefits application workflow.
//!
//! This crate is deliberately free of HTTP, database and runtime
//! dependencies. An inbound [`event::Event`] is applied to an
//! [`application::Application`], which records everything it raises in an
//! [`activity::ActivityLog`]; [`mediator::mediate`] turns the needs in that
//! log into outbound messages. Loading, saving and publishing belong to the
//! layers above.

pub mod activity;
pub mod application;
pub mod error;
pub mod event;
pub mod mediator;
pub mod requirement;
pub mod store;
pub mod submission;

pub use error::{Error, Result, SevereFailure};
