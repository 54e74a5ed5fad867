//! The vault: one entry per (type, tag) key, constructed at most once and
//! torn down by priority group.
//!
//! Two lock levels are used. The vault lock guards only the key map and the
//! priority index and is never held while user code runs. Each entry has its
//! own lock, held across construction and destruction of that one instance.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, PoisonError};

use crate::traits::ConstructError;
use crate::{VaultError, VaultEvent};

/// Type alias for the user-supplied tracing callback.
pub type TraceCallback = dyn Fn(&VaultEvent) + Send + Sync + 'static;

/// Identity of one singleton: its type and its tag.
#[derive(Clone, Copy)]
pub struct Key {
    type_id: TypeId,
    tag_id: TypeId,
    type_name: &'static str,
    tag_name: &'static str,
}

impl Key {
    pub fn of<T: ?Sized + 'static, Tag: ?Sized + 'static>() -> Self {
        Key {
            type_id: TypeId::of::<T>(),
            tag_id: TypeId::of::<Tag>(),
            type_name: std::any::type_name::<T>(),
            tag_name: std::any::type_name::<Tag>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn tag_name(&self) -> &'static str {
        self.tag_name
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.tag_id == other.tag_id
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.tag_id.hash(state);
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.type_name, self.tag_name)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}

/// A constructed instance together with the code that destroys it.
pub struct Resident {
    instance: NonNull<()>,
    destroy: Box<dyn FnOnce(NonNull<()>) + Send>,
}

// SAFETY: residents are built for `Send + Sync` instances only; the pointer is
// handed to `destroy` exactly once.
unsafe impl Send for Resident {}

impl Resident {
    /// Wraps an instance living at `instance`.
    ///
    /// # Safety
    ///
    /// `instance` must point to a live `Send + Sync` value that stays valid
    /// until `destroy` is called with it.
    pub unsafe fn new(
        instance: NonNull<()>,
        destroy: impl FnOnce(NonNull<()>) + Send + 'static,
    ) -> Self {
        Resident {
            instance,
            destroy: Box::new(destroy),
        }
    }

    /// Moves an already built value into the vault's ownership.
    pub fn from_box<T: Send + Sync + 'static>(value: Box<T>) -> Self {
        let instance = NonNull::from(Box::leak(value)).cast::<()>();
        // SAFETY: the box stays leaked until destroy reclaims it.
        unsafe {
            Resident::new(instance, |instance| {
                drop(Box::from_raw(instance.cast::<T>().as_ptr()));
            })
        }
    }

    pub fn instance(&self) -> NonNull<()> {
        self.instance
    }

    fn destroy(self) {
        (self.destroy)(self.instance);
    }
}

struct Entry {
    key: Key,
    priority: i32,
    resident: Mutex<Option<Resident>>,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<Key, Arc<Entry>>,
    /// Priority group -> entries in registration order.
    ordered: BTreeMap<i32, Vec<Arc<Entry>>>,
}

/// The registry of every singleton entry.
///
/// A vault is normally owned by a [`Lifecycle`](crate::Lifecycle); building
/// one directly is useful to exercise it in isolation.
#[derive(Default)]
pub struct Vault {
    registry: Mutex<Registry>,
    trace: Mutex<Option<Arc<TraceCallback>>>,
}

impl Vault {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------------------------------
    // Tracing
    // -------------------------------------------------------------------------------------------------

    /// Set a tracing callback for vault operations.
    ///
    /// The callback must not create singletons in this vault: it may run
    /// while the vault is tearing down.
    pub fn set_trace_callback(&self, callback: impl Fn(&VaultEvent) + Send + Sync + 'static) {
        let mut guard = self.trace.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(Arc::new(callback));
    }

    /// Clear the tracing callback.
    pub fn clear_trace_callback(&self) {
        let mut guard = self.trace.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
    }

    fn emit_event(&self, event: &VaultEvent) {
        let callback = self
            .trace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(event);
        }
    }

    // -------------------------------------------------------------------------------------------------
    // Entries
    // -------------------------------------------------------------------------------------------------

    /// Returns the instance for `key`, constructing it with `create` if no
    /// instance exists yet.
    ///
    /// `create` runs under the entry lock, so it runs at most once
    /// successfully per key and every caller observes the same pointer. A
    /// failed `create` leaves the entry unconstructed; the error goes to this
    /// caller only.
    ///
    /// # Errors
    ///
    /// - [`VaultError::PriorityConflict`] if `key` was first registered with
    ///   a different priority
    /// - [`VaultError::Construct`] if `create` failed
    pub fn create_or_get<F>(
        &self,
        key: Key,
        priority: i32,
        create: F,
    ) -> Result<NonNull<()>, VaultError>
    where
        F: FnOnce() -> Result<Resident, ConstructError>,
    {
        let entry = self.entry(key, priority);

        if entry.priority != priority {
            return Err(VaultError::PriorityConflict {
                key,
                existing: entry.priority,
                requested: priority,
            });
        }

        let mut resident = entry
            .resident
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(resident) = resident.as_ref() {
            return Ok(resident.instance());
        }

        match create() {
            Ok(created) => {
                let instance = created.instance();
                *resident = Some(created);
                drop(resident);

                log::debug!("constructed singleton {} with priority {}", key, priority);
                self.emit_event(&VaultEvent::Construct { key, priority });
                Ok(instance)
            }
            Err(source) => {
                drop(resident);

                log::warn!("construction of singleton {} failed: {}", key, source);
                self.emit_event(&VaultEvent::ConstructFailed {
                    key,
                    priority,
                    error: source.to_string(),
                });
                Err(VaultError::Construct { key, source })
            }
        }
    }

    /// Finds or inserts the entry for `key`. A new entry joins its priority
    /// group here, before construction is attempted.
    fn entry(&self, key: Key, priority: i32) -> Arc<Entry> {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = registry.entries.get(&key) {
            return Arc::clone(entry);
        }

        let entry = Arc::new(Entry {
            key,
            priority,
            resident: Mutex::new(None),
        });
        registry.entries.insert(key, Arc::clone(&entry));
        registry
            .ordered
            .entry(priority)
            .or_default()
            .push(Arc::clone(&entry));
        entry
    }

    /// Whether an instance for `key` is currently constructed.
    pub fn is_constructed(&self, key: Key) -> bool {
        let entry = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .get(&key)
            .cloned();

        entry.is_some_and(|entry| {
            entry
                .resident
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
        })
    }

    /// Number of known keys, constructed or not.
    pub fn len(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroys every constructed instance.
    ///
    /// Groups run in ascending priority; inside a group the most recently
    /// registered entry goes first. Entries that were never constructed are
    /// skipped. The vault is empty afterwards.
    pub fn teardown_all(&self) {
        let Registry { entries, ordered } =
            std::mem::take(&mut *self.registry.lock().unwrap_or_else(PoisonError::into_inner));

        let mut destroyed = 0;
        for group in ordered.values() {
            for entry in group.iter().rev() {
                let mut resident = entry
                    .resident
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                let Some(instance) = resident.take() else {
                    continue;
                };

                log::debug!(
                    "destroying singleton {} with priority {}",
                    entry.key,
                    entry.priority
                );
                instance.destroy();
                drop(resident);

                destroyed += 1;
                self.emit_event(&VaultEvent::Destroy {
                    key: entry.key,
                    priority: entry.priority,
                });
            }
        }
        drop(entries);

        log::info!("singleton vault torn down, {} instances destroyed", destroyed);
        self.emit_event(&VaultEvent::Teardown { destroyed });
    }
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------
