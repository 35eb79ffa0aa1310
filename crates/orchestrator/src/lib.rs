//! # Chorus Orchestrator
//!
//! Turns user input into a reply: the input pipeline, the live consultant
//! chain, the primary call alongside the delayed fan-out, next-turn
//! injection, and the output pipeline.
//!
//! [`TurnHost`] owns one conversation; [`Orchestrator`] is the provider side
//! of a single turn and can be driven on its own.

pub mod engine;
pub mod host;
pub mod injection;
pub mod request;
pub mod services;

pub use engine::{ConsultantOutcome, Orchestrator, TurnOutcome};
pub use host::{HostBuilder, TurnHost, TurnReply};
pub use injection::InjectionCache;
pub use request::{ConsultantSpec, OrchestrationRequest, labeled_block};
pub use services::HostServices;
