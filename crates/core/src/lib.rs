//! # Chorus Core
//!
//! Domain types, traits, and error definitions for the Chorus conversational host.
//! This crate has **no runtime wiring** — it defines the model that the action
//! registry, the provider adapters, and the orchestrator all implement against.
//!
//! ## Layout
//!
//! - [`action`] — the plugin contract: lifecycle and pipeline hooks, payloads
//! - [`capability`] — the typed capability set handed to hooks
//! - [`provider`] — the abstraction over model backends
//! - [`message`] — conversation history
//! - [`event`] — domain events and the broadcast bus
//! - [`error`] — one error enum per bounded context

pub mod action;
pub mod capability;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use action::{Action, ActionDescriptor, ActionStatus, HookKind, HookOutcome, LifecycleState, Payload};
pub use capability::{Capability, CapabilityBag, CapabilitySet, Host, ProviderStatus};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use message::{Conversation, ConversationId, Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse};
