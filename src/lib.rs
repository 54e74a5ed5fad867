//! # Singleton Vault
//!
//! Process-wide singletons keyed by `(type, tag)`, constructed lazily on first
//! use and destroyed in priority order when the process exits.
//!
//! Independently written modules can each declare "the one instance of `T`
//! tagged `Tag`" without a central initialization order. Construction is
//! thread-safe and runs at most once per key; a failed construction is
//! retried by the next caller.
//!
//! ## Quick Start
//!
//! ```rust
//! use singleton_vault::define_singleton;
//!
//! #[derive(Default)]
//! pub struct Settings {
//!     pub verbose: bool,
//! }
//!
//! define_singleton!(pub AppSettings: Settings);
//!
//! let settings: &'static Settings = AppSettings::get();
//! assert!(!settings.verbose);
//! assert!(std::ptr::eq(settings, AppSettings::get()));
//! ```
//!
//! ## Features
//!
//! - **Thread-safe**: concurrent first use constructs exactly once
//! - **Retry on failure**: construction errors are returned, never cached
//! - **Ordered teardown**: lower priorities are destroyed first; within a
//!   priority the most recently registered singleton goes first
//! - **No allocation for small types**: instances up to
//!   [`HEAP_THRESHOLD`] bytes live in static memory
//! - **Tracing support**: optional callback for vault events
//!
//! ## Main Items
//!
//! - [`define_singleton!`] - declare a singleton handle
//! - [`define_tag!`] - declare a tag with default construction
//! - [`SingletonTraits`] - custom construction for a tag
//! - [`Vault`] / [`Lifecycle`] - the registry and its state machine, usable
//!   in isolation
//! - [`set_trace_callback`] - observe vault events

mod lifecycle;
mod macros;
#[doc(hidden)]
pub mod singleton;
pub mod storage;
mod traits;
mod vault;
mod vault_error;
mod vault_event;

// Re-export the main public API
pub use lifecycle::{AtExit, Finalizer, Lifecycle, VaultState};
pub use singleton::{clear_trace_callback, is_constructed, set_trace_callback, vault_state};
pub use storage::HEAP_THRESHOLD;
pub use traits::{ConstructError, DefaultTag, SingletonTraits, DEFAULT_PRIORITY};
pub use vault::{Key, Resident, TraceCallback, Vault};
pub use vault_error::{LifecycleError, VaultError};
pub use vault_event::VaultEvent;
