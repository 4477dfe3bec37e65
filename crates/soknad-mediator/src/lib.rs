//! Orchestration for the benefits application workflow.
//!
//! [`Mediator`] runs the load → handle → mediate → save → publish cycle for
//! one inbound event at a time per owner, on top of any
//! [`soknad_core::store::ApplicationStore`] and [`NeedPublisher`].

pub mod error;
pub mod mediator;
pub mod observer;
pub mod publish;

pub use error::{Error, Result};
pub use mediator::{Mediator, Outcome};
pub use observer::TracingObserver;
pub use publish::{MemoryPublisher, NeedPublisher, TracingPublisher};
