//! Birth and death of the vault itself.
//!
//! The vault moves through five states, strictly forward:
//!
//! ```text
//! Uninitialized -> Initializing -> Initialized -> Destroying -> Destroyed
//! ```
//!
//! The first [`Lifecycle::vault`] call builds the vault in place and registers
//! the exit hook with a [`Finalizer`]. The hook calls [`Lifecycle::teardown`]
//! once; every access after that is an error.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, Once, PoisonError};

use crate::singleton::fatal;
use crate::{LifecycleError, Vault};

/// State of a [`Lifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum VaultState {
    Uninitialized = 0,
    Initializing = 1,
    Initialized = 2,
    Destroying = 3,
    Destroyed = 4,
}

impl VaultState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => VaultState::Uninitialized,
            1 => VaultState::Initializing,
            2 => VaultState::Initialized,
            3 => VaultState::Destroying,
            _ => VaultState::Destroyed,
        }
    }
}

impl fmt::Display for VaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VaultState::Uninitialized => "uninitialized",
            VaultState::Initializing => "initializing",
            VaultState::Initialized => "initialized",
            VaultState::Destroying => "destroying",
            VaultState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Capability to run a hook when the process exits.
pub trait Finalizer {
    /// Arrange for `hook` to run once at exit.
    fn register(&self, hook: fn());
}

/// [`Finalizer`] backed by the C runtime's `atexit`.
///
/// Hooks run in reverse registration order, after `main` returns or on
/// `std::process::exit`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtExit;

static EXIT_HOOKS: Mutex<Vec<fn()>> = Mutex::new(Vec::new());
static EXIT_TRAMPOLINE: Once = Once::new();

extern "C" fn run_exit_hooks() {
    let hooks = std::mem::take(&mut *EXIT_HOOKS.lock().unwrap_or_else(PoisonError::into_inner));
    for hook in hooks.into_iter().rev() {
        hook();
    }
}

impl Finalizer for AtExit {
    fn register(&self, hook: fn()) {
        EXIT_HOOKS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);

        EXIT_TRAMPOLINE.call_once(|| {
            // SAFETY: run_exit_hooks is a plain extern "C" fn with no arguments.
            if unsafe { libc::atexit(run_exit_hooks) } != 0 {
                fatal(&"couldn't register the singleton vault exit hook");
            }
        });
    }
}

/// Owner of a [`Vault`] and the state machine around it.
///
/// `Lifecycle::new` is `const`, so a lifecycle can live in a `static`.
pub struct Lifecycle {
    state: AtomicU8,
    vault: UnsafeCell<MaybeUninit<Vault>>,
    exit_hook: fn(),
}

// SAFETY: the vault slot is written once by the thread that wins the
// Uninitialized -> Initializing transition and read only after Initialized
// is published with release ordering.
unsafe impl Sync for Lifecycle {}

impl Lifecycle {
    /// Creates an uninitialized lifecycle. `exit_hook` is what gets registered
    /// with the finalizer; it is expected to call [`Lifecycle::teardown`].
    pub const fn new(exit_hook: fn()) -> Self {
        Lifecycle {
            state: AtomicU8::new(VaultState::Uninitialized as u8),
            vault: UnsafeCell::new(MaybeUninit::uninit()),
            exit_hook,
        }
    }

    pub fn state(&self) -> VaultState {
        VaultState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn vault_ref(&self) -> &Vault {
        // SAFETY: only called once Initialized has been observed.
        unsafe { (*self.vault.get()).assume_init_ref() }
    }

    /// Returns the vault, building it on first use.
    ///
    /// Exactly one caller builds the vault and registers the exit hook with
    /// `finalizer`; concurrent callers yield until it is published.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::Destroying`] / [`LifecycleError::Destroyed`] once
    ///   teardown has started
    /// - [`LifecycleError::WaitedOnUninitialized`] if the state moves
    ///   backwards while waiting
    pub fn vault<F: Finalizer + ?Sized>(&self, finalizer: &F) -> Result<&Vault, LifecycleError> {
        match self.state() {
            VaultState::Initialized => return Ok(self.vault_ref()),
            VaultState::Destroying => return Err(LifecycleError::Destroying),
            VaultState::Destroyed => return Err(LifecycleError::Destroyed),
            VaultState::Uninitialized | VaultState::Initializing => {}
        }

        if self
            .state
            .compare_exchange(
                VaultState::Uninitialized as u8,
                VaultState::Initializing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return self.wait_initialized();
        }

        // SAFETY: winning the transition grants exclusive access to the slot.
        unsafe { (*self.vault.get()).write(Vault::new()) };
        finalizer.register(self.exit_hook);
        self.state
            .store(VaultState::Initialized as u8, Ordering::Release);

        log::debug!("singleton vault initialized");
        Ok(self.vault_ref())
    }

    fn wait_initialized(&self) -> Result<&Vault, LifecycleError> {
        loop {
            match self.state() {
                VaultState::Initializing => std::thread::yield_now(),
                VaultState::Initialized => return Ok(self.vault_ref()),
                VaultState::Uninitialized => return Err(LifecycleError::WaitedOnUninitialized),
                VaultState::Destroying => return Err(LifecycleError::Destroying),
                VaultState::Destroyed => return Err(LifecycleError::Destroyed),
            }
        }
    }

    /// Destroys every singleton and then the vault.
    ///
    /// The state ends as `Destroyed` even if a destructor panics.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::TeardownFrom`] if the lifecycle is not `Initialized`;
    /// the state is left untouched in that case.
    ///
    /// # Safety
    ///
    /// No reference obtained from this vault, nor any instance it handed
    /// out, may be used after this call.
    pub unsafe fn teardown(&self) -> Result<(), LifecycleError> {
        if let Err(observed) = self.state.compare_exchange(
            VaultState::Initialized as u8,
            VaultState::Destroying as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(LifecycleError::TeardownFrom(VaultState::from_u8(observed)));
        }

        struct MarkDestroyed<'a>(&'a AtomicU8);

        impl Drop for MarkDestroyed<'_> {
            fn drop(&mut self) {
                self.0.store(VaultState::Destroyed as u8, Ordering::Release);
            }
        }

        let _destroyed = MarkDestroyed(&self.state);

        let vault = (*self.vault.get()).assume_init_mut();
        vault.teardown_all();
        std::ptr::drop_in_place(vault);
        Ok(())
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if self.state() == VaultState::Initialized {
            // SAFETY: `&mut self` proves nothing borrows the vault any more.
            let _ = unsafe { self.teardown() };
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use crate::{Key, Resident};

    /// Finalizer that only remembers what was registered.
    #[derive(Default)]
    struct ManualExit {
        hooks: Mutex<Vec<fn()>>,
    }

    impl Finalizer for ManualExit {
        fn register(&self, hook: fn()) {
            self.hooks.lock().unwrap().push(hook);
        }
    }

    fn noop() {}

    struct Tag;

    #[test]
    fn test_state_progression() {
        let lifecycle = Lifecycle::new(noop);
        let exit = ManualExit::default();
        assert_eq!(lifecycle.state(), VaultState::Uninitialized);

        lifecycle.vault(&exit).unwrap();
        assert_eq!(lifecycle.state(), VaultState::Initialized);

        // SAFETY: nothing obtained from the vault is used afterwards.
        unsafe { lifecycle.teardown() }.unwrap();
        assert_eq!(lifecycle.state(), VaultState::Destroyed);
    }

    #[test]
    fn test_exit_hook_registered_once() {
        let lifecycle = Lifecycle::new(noop);
        let exit = ManualExit::default();

        let first = lifecycle.vault(&exit).unwrap() as *const Vault;
        let second = lifecycle.vault(&exit).unwrap() as *const Vault;

        assert_eq!(first, second);
        assert_eq!(exit.hooks.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_access_after_teardown_fails() {
        let lifecycle = Lifecycle::new(noop);
        let exit = ManualExit::default();
        lifecycle.vault(&exit).unwrap();
        // SAFETY: nothing obtained from the vault is used afterwards.
        unsafe { lifecycle.teardown() }.unwrap();

        assert_eq!(lifecycle.vault(&exit).err(), Some(LifecycleError::Destroyed));
        assert_eq!(exit.hooks.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_teardown_requires_initialized() {
        let lifecycle = Lifecycle::new(noop);
        // SAFETY: the vault was never built.
        let err = unsafe { lifecycle.teardown() }.unwrap_err();
        assert_eq!(err, LifecycleError::TeardownFrom(VaultState::Uninitialized));
        assert_eq!(lifecycle.state(), VaultState::Uninitialized);

        lifecycle.vault(&ManualExit::default()).unwrap();
        // SAFETY: nothing obtained from the vault is used afterwards.
        unsafe { lifecycle.teardown() }.unwrap();
        let err = unsafe { lifecycle.teardown() }.unwrap_err();
        assert_eq!(err, LifecycleError::TeardownFrom(VaultState::Destroyed));
    }

    #[test]
    fn test_concurrent_initialization() {
        const THREADS: usize = 8;

        let lifecycle = Lifecycle::new(noop);
        let exit = ManualExit::default();
        let barrier = Barrier::new(THREADS);

        let vaults: Vec<usize> = thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        lifecycle.vault(&exit).unwrap() as *const Vault as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(vaults.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(exit.hooks.lock().unwrap().len(), 1);
    }

    static HOOKED: Lifecycle = Lifecycle::new(hooked_teardown);
    static HOOKED_DROPS: AtomicUsize = AtomicUsize::new(0);

    fn hooked_teardown() {
        // SAFETY: the test stops using the vault before firing the hook.
        unsafe { HOOKED.teardown() }.unwrap();
    }

    struct CountsDrop;

    impl Drop for CountsDrop {
        fn drop(&mut self) {
            HOOKED_DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_registered_hook_tears_down() {
        let exit = ManualExit::default();
        let vault = HOOKED.vault(&exit).unwrap();
        vault
            .create_or_get(Key::of::<CountsDrop, Tag>(), 0, || {
                Ok(Resident::from_box(Box::new(CountsDrop)))
            })
            .unwrap();

        let hooks = std::mem::take(&mut *exit.hooks.lock().unwrap());
        assert_eq!(hooks.len(), 1);
        hooks[0]();

        assert_eq!(HOOKED.state(), VaultState::Destroyed);
        assert_eq!(HOOKED_DROPS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_tears_down() {
        let drops = Arc::new(AtomicUsize::new(0));

        struct Counted(Arc<AtomicUsize>);

        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        {
            let lifecycle = Lifecycle::new(noop);
            let counted = Counted(Arc::clone(&drops));
            lifecycle
                .vault(&ManualExit::default())
                .unwrap()
                .create_or_get(Key::of::<Counted, Tag>(), 0, move || {
                    Ok(Resident::from_box(Box::new(counted)))
                })
                .unwrap();
        }

        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(VaultState::Initializing.to_string(), "initializing");
        assert!(VaultState::Uninitialized < VaultState::Destroyed);
    }
}
