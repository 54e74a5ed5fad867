use crate::vault::Key;

/// Events emitted by the vault while it creates and destroys singletons.
///
/// These events are passed to the tracing callback set via
/// [`Vault::set_trace_callback`](crate::Vault::set_trace_callback) or the
/// global [`set_trace_callback`](crate::set_trace_callback).
/// The `Clone` derive allows callbacks to store or forward events if needed.
///
/// # Examples
///
/// ```rust
/// use singleton_vault::{DefaultTag, Key, VaultEvent};
///
/// let event = VaultEvent::Construct { key: Key::of::<i32, DefaultTag>(), priority: 0 };
/// assert_eq!(event.to_string(), "construct { key: i32[singleton_vault::traits::DefaultTag], priority: 0 }");
/// ```
#[derive(Debug, Clone)]
pub enum VaultEvent {
    /// An instance was constructed and published.
    Construct { key: Key, priority: i32 },

    /// The construction trait failed; the entry stays unconstructed.
    ConstructFailed {
        key: Key,
        priority: i32,
        /// Rendered construction error.
        error: String,
    },

    /// An instance was destroyed during teardown.
    Destroy { key: Key, priority: i32 },

    /// Teardown finished.
    Teardown {
        /// Number of instances that were destroyed.
        destroyed: usize,
    },
}

impl std::fmt::Display for VaultEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultEvent::Construct { key, priority } => {
                write!(f, "construct {{ key: {}, priority: {} }}", key, priority)
            }
            VaultEvent::ConstructFailed {
                key,
                priority,
                error,
            } => write!(
                f,
                "construct failed {{ key: {}, priority: {}, error: {} }}",
                key, priority, error
            ),
            VaultEvent::Destroy { key, priority } => {
                write!(f, "destroy {{ key: {}, priority: {} }}", key, priority)
            }
            VaultEvent::Teardown { destroyed } => {
                write!(f, "teardown {{ destroyed: {} }}", destroyed)
            }
        }
    }
}
