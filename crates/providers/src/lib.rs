//! Model provider plumbing for Chorus.
//!
//! Raw adapters implement `chorus_core::Provider`; [`GatedProvider`] wraps
//! them with the shared [`RateGate`] plus timeout/retry, and the
//! [`ProviderRouter`] hands them out by name.

pub mod gate;
pub mod gated;
pub mod openai_compat;
pub mod router;

pub use gate::{Admission, RateGate, RateLimiterState};
pub use gated::GatedProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{PrimaryTarget, ProviderRouter, build_from_config};
