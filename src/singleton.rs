//! The process-wide vault and the functions `define_singleton!` expands to.

use std::fmt::Display;
use std::mem;
use std::ptr;

use crate::lifecycle::{AtExit, Lifecycle, VaultState};
use crate::storage::Memory;
use crate::traits::{ConstructError, SingletonTraits};
use crate::vault::{Key, Resident, Vault};
use crate::{VaultError, VaultEvent};

static GLOBAL: Lifecycle = Lifecycle::new(teardown_global);

fn teardown_global() {
    // SAFETY: runs from the exit hook; singletons are not used past this point.
    if let Err(err) = unsafe { GLOBAL.teardown() } {
        fatal(&err);
    }
}

/// Reports a violated global invariant and aborts the process.
pub(crate) fn fatal(diagnostic: &dyn Display) -> ! {
    log::error!("{}", diagnostic);
    eprintln!("FATAL: {}", diagnostic);
    std::process::abort()
}

fn global_vault() -> &'static Vault {
    GLOBAL.vault(&AtExit).unwrap_or_else(|err| fatal(&err))
}

/// Current state of the process-wide vault.
pub fn vault_state() -> VaultState {
    GLOBAL.state()
}

/// Whether the singleton for `(T, Tag)` has been constructed.
///
/// Initializes the vault if needed; aborts once teardown has started.
pub fn is_constructed<T: 'static, Tag: 'static>() -> bool {
    global_vault().is_constructed(Key::of::<T, Tag>())
}

/// Set a tracing callback on the process-wide vault.
///
/// # Example
/// ```rust
/// use singleton_vault::{clear_trace_callback, set_trace_callback};
///
/// set_trace_callback(|event| println!("[vault-trace] {}", event));
/// clear_trace_callback();
/// ```
pub fn set_trace_callback(callback: impl Fn(&VaultEvent) + Send + Sync + 'static) {
    global_vault().set_trace_callback(callback);
}

/// Clears the tracing callback on the process-wide vault.
pub fn clear_trace_callback() {
    global_vault().clear_trace_callback();
}

/// Aborts unless the process-wide vault is initialized. Checked on cached
/// lookups, so a stale call site cannot reach a destroyed instance.
#[doc(hidden)]
pub fn ensure_alive() {
    match GLOBAL.state() {
        VaultState::Initialized => {}
        VaultState::Destroying => fatal(&crate::LifecycleError::Destroying),
        VaultState::Destroyed => fatal(&crate::LifecycleError::Destroyed),
        state => {
            let diagnostic = format!("singleton handed out while the vault is {}", state);
            fatal(&diagnostic)
        }
    }
}

/// Finds or constructs the `(T, Tag)` singleton in the process-wide vault.
///
/// `memory` is where the instance is built if this call constructs it.
///
/// # Errors
///
/// The construction error, if `Tag` failed to build the instance. Priority
/// conflicts and lifecycle violations abort instead.
#[doc(hidden)]
pub fn resolve<T, Tag, M>(priority: i32, memory: &'static M) -> Result<&'static T, ConstructError>
where
    T: Send + Sync + 'static,
    Tag: SingletonTraits<T>,
    M: Memory<T>,
{
    let key = Key::of::<T, Tag>();
    match global_vault().create_or_get(key, priority, || construct_in::<T, Tag, M>(memory)) {
        // SAFETY: the vault keeps the instance alive until process teardown.
        Ok(instance) => Ok(unsafe { instance.cast::<T>().as_ref() }),
        Err(VaultError::Construct { source, .. }) => Err(source),
        Err(err @ VaultError::PriorityConflict { .. }) => fatal(&err),
    }
}

/// Gives `memory` back if construction errors out or unwinds.
struct ReleaseOnFailure<'a, T, M: Memory<T>> {
    memory: &'a M,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T, M: Memory<T>> Drop for ReleaseOnFailure<'_, T, M> {
    fn drop(&mut self) {
        // SAFETY: construction did not complete, nothing lives in the region.
        unsafe { self.memory.release() };
    }
}

fn construct_in<T, Tag, M>(memory: &'static M) -> Result<Resident, ConstructError>
where
    T: Send + Sync + 'static,
    Tag: SingletonTraits<T>,
    M: Memory<T>,
{
    let region = memory.acquire();
    let release = ReleaseOnFailure::<T, M> {
        memory,
        _marker: std::marker::PhantomData,
    };

    // SAFETY: the entry lock gives this call exclusive use of the region.
    let slot = unsafe { &mut *region.as_ptr() };
    let constructed: *const T = Tag::construct(slot)?;
    if !ptr::eq(constructed, region.as_ptr().cast::<T>()) {
        fatal(&format_args!(
            "construction traits {} returned an instance outside the provided slot for {}",
            std::any::type_name::<Tag>(),
            std::any::type_name::<T>()
        ));
    }
    mem::forget(release);

    // SAFETY: the instance lives in `memory` until destroy drops it and
    // releases the region.
    Ok(unsafe {
        Resident::new(region.cast(), move |instance| {
            ptr::drop_in_place(instance.cast::<T>().as_ptr());
            memory.release();
        })
    })
}
