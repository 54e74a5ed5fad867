//! Construction traits consumed by the vault.
//!
//! A singleton is keyed by its type and a *tag* type. The tag decides how the
//! instance is built: it implements [`SingletonTraits`] for every type it can
//! construct. Destruction is always the type's own `Drop`, run in place.

use std::mem::MaybeUninit;

/// Error raised by a construction trait.
///
/// A failed construction is not cached: the entry stays unconstructed and the
/// next caller retries.
pub type ConstructError = Box<dyn std::error::Error + Send + Sync>;

/// Teardown group used when a definition does not name one.
pub const DEFAULT_PRIORITY: i32 = 0;

/// How a tag constructs instances of `T`.
///
/// # Examples
///
/// ```rust
/// use std::mem::MaybeUninit;
/// use singleton_vault::{define_singleton, ConstructError, SingletonTraits};
///
/// pub struct Answer;
///
/// impl SingletonTraits<i32> for Answer {
///     fn construct(slot: &mut MaybeUninit<i32>) -> Result<&mut i32, ConstructError> {
///         Ok(slot.write(42))
///     }
/// }
///
/// define_singleton!(TheAnswer: i32, Answer);
/// assert_eq!(*TheAnswer::get(), 42);
/// ```
pub trait SingletonTraits<T>: 'static {
    /// Whether `construct` builds the value directly inside the slot.
    ///
    /// Traits that build a finished value and move it into the slot must set
    /// this to `false`. `define_singleton!` rejects them at compile time for
    /// types above [`HEAP_THRESHOLD`](crate::HEAP_THRESHOLD), since the value
    /// passes through the stack first.
    const IN_PLACE: bool = true;

    /// Constructs the instance inside `slot` and returns a reference to it.
    ///
    /// The returned reference must point into `slot`. On error the slot is
    /// treated as uninitialized and its memory is released.
    fn construct(slot: &mut MaybeUninit<T>) -> Result<&mut T, ConstructError>;
}

/// Tag used when a singleton does not name one. Constructs `T::default()`.
///
/// `T::default()` returns the value on the stack, so this tag only serves
/// types up to [`HEAP_THRESHOLD`](crate::HEAP_THRESHOLD). A larger type needs
/// its own [`SingletonTraits`] that writes into the slot in place:
///
/// ```compile_fail
/// use singleton_vault::define_singleton;
///
/// pub struct Huge {
///     data: [u8; 4 * 1024 * 1024],
/// }
///
/// impl Default for Huge {
///     fn default() -> Self {
///         Huge { data: [0; 4 * 1024 * 1024] }
///     }
/// }
///
/// define_singleton!(TooBig: Huge);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTag;

impl<T: Default + Send + Sync + 'static> SingletonTraits<T> for DefaultTag {
    const IN_PLACE: bool = false;

    fn construct(slot: &mut MaybeUninit<T>) -> Result<&mut T, ConstructError> {
        Ok(slot.write(T::default()))
    }
}
