//! Integration tests for concurrent first use of a singleton.

use singleton_vault::{define_singleton, vault_state, ConstructError, SingletonTraits, VaultState};
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const THREADS: usize = 16;

pub struct Slow {
    value: usize,
}

pub struct SlowTag;

static SLOW_CTOR_CALLS: AtomicUsize = AtomicUsize::new(0);

impl SingletonTraits<Slow> for SlowTag {
    fn construct(slot: &mut MaybeUninit<Slow>) -> Result<&mut Slow, ConstructError> {
        SLOW_CTOR_CALLS.fetch_add(1, Ordering::SeqCst);
        // give the other threads time to pile up on the entry lock
        thread::sleep(Duration::from_millis(20));
        Ok(slot.write(Slow { value: 17 }))
    }
}

define_singleton!(SlowHandle: Slow, SlowTag);

#[test]
fn test_concurrent_first_use_constructs_once() {
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                SlowHandle::get() as *const Slow as usize
            })
        })
        .collect();

    let pointers: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(SLOW_CTOR_CALLS.load(Ordering::SeqCst), 1);
    assert!(pointers.iter().all(|&p| p == pointers[0]));
    assert_eq!(SlowHandle::get().value, 17);
    assert_eq!(vault_state(), VaultState::Initialized);
}

pub struct Flaky;

pub struct FlakyTag;

static FLAKY_ATTEMPTS: AtomicUsize = AtomicUsize::new(0);

impl SingletonTraits<Flaky> for FlakyTag {
    fn construct(slot: &mut MaybeUninit<Flaky>) -> Result<&mut Flaky, ConstructError> {
        if FLAKY_ATTEMPTS.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err("first attempt fails".into());
        }
        Ok(slot.write(Flaky))
    }
}

define_singleton!(FlakyHandle: Flaky, FlakyTag);

#[test]
fn test_failure_is_reported_to_one_caller_only() {
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                FlakyHandle::try_get().map(|flaky| flaky as *const Flaky as usize)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let failures = results.iter().filter(|r| r.is_err()).count();
    let pointers: Vec<usize> = results.into_iter().filter_map(Result::ok).collect();

    assert_eq!(failures, 1);
    assert_eq!(pointers.len(), THREADS - 1);
    assert!(pointers.iter().all(|&p| p == pointers[0]));
    assert_eq!(FLAKY_ATTEMPTS.load(Ordering::SeqCst), 2);
}

#[derive(Default)]
pub struct PairA;

#[derive(Default)]
pub struct PairB;

define_singleton!(PairAHandle: PairA);
define_singleton!(PairBHandle: PairB);

#[test]
fn test_two_threads_two_keys() {
    let a = thread::spawn(|| PairAHandle::get() as *const PairA as usize);
    let b = thread::spawn(|| PairBHandle::get() as *const PairB as usize);

    assert_eq!(a.join().unwrap(), PairAHandle::get() as *const PairA as usize);
    assert_eq!(b.join().unwrap(), PairBHandle::get() as *const PairB as usize);
}
