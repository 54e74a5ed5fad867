//! Macros for declaring singletons and tags.

/// Declares a handle type for the `(T, Tag)` singleton.
///
/// The macro generates a unit struct with:
/// - `get()` - the instance, constructing it on first use (panics if the
///   construction traits fail)
/// - `try_get()` - the same, returning the construction error instead
/// - `is_constructed()` - whether the instance exists yet
/// - `PRIORITY` - the teardown group; lower groups are destroyed first
///
/// Storage is declared next to the handle: a `static` for small types, a
/// heap block for types larger than [`HEAP_THRESHOLD`](crate::HEAP_THRESHOLD).
/// Types that large must use a tag that constructs in place; default
/// construction is rejected at compile time (see [`DefaultTag`](crate::DefaultTag)).
///
/// # Examples
///
/// ```rust
/// use singleton_vault::define_singleton;
///
/// #[derive(Default)]
/// pub struct Counters {
///     pub hits: std::sync::atomic::AtomicU64,
/// }
///
/// define_singleton!(pub Stats: Counters);
///
/// Stats::get().hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
/// assert!(std::ptr::eq(Stats::get(), Stats::get()));
/// ```
///
/// # Tags and priorities
///
/// Two handles naming the same type and tag share one instance, wherever
/// they are declared. They must agree on the priority.
///
/// ```rust
/// use singleton_vault::{define_singleton, define_tag};
///
/// define_tag!(pub Secondary);
///
/// define_singleton!(Primary: String);
/// define_singleton!(Other: String, Secondary, 10);
///
/// assert!(!std::ptr::eq(Primary::get(), Other::get()));
/// assert_eq!(Other::PRIORITY, 10);
/// ```
#[macro_export]
macro_rules! define_singleton {
    ($(#[$meta:meta])* $vis:vis $name:ident : $ty:ty) => {
        $crate::define_singleton!(
            $(#[$meta])* $vis $name: $ty, $crate::DefaultTag, $crate::DEFAULT_PRIORITY
        );
    };
    ($(#[$meta:meta])* $vis:vis $name:ident : $ty:ty, $tag:ty) => {
        $crate::define_singleton!(
            $(#[$meta])* $vis $name: $ty, $tag, $crate::DEFAULT_PRIORITY
        );
    };
    ($(#[$meta:meta])* $vis:vis $name:ident : $ty:ty, $tag:ty, $priority:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default)]
        $vis struct $name;

        #[allow(dead_code)]
        impl $name {
            /// Teardown group of this singleton.
            pub const PRIORITY: i32 = $priority;

            /// The instance, constructed on first use.
            ///
            /// # Panics
            ///
            /// If the construction traits fail. The next call retries.
            pub fn get() -> &'static $ty {
                match Self::try_get() {
                    Ok(instance) => instance,
                    Err(err) => panic!(
                        "failed to construct singleton {}: {}",
                        ::std::any::type_name::<$ty>(),
                        err
                    ),
                }
            }

            /// The instance, constructed on first use.
            pub fn try_get() -> ::std::result::Result<&'static $ty, $crate::ConstructError> {
                const _: () = ::std::assert!(
                    <$tag as $crate::SingletonTraits<$ty>>::IN_PLACE
                        || !$crate::storage::is_heap_allocated(::std::mem::size_of::<$ty>()),
                    "type too large for default construction: implement SingletonTraits \
                     for a tag that writes the value into the slot in place",
                );

                type Slot = <$crate::storage::Placement<
                    { $crate::storage::is_heap_allocated(::std::mem::size_of::<$ty>()) },
                > as $crate::storage::Select<$ty>>::Memory;

                static MEMORY: Slot = <Slot as $crate::storage::Memory<$ty>>::EMPTY;
                static CACHE: ::std::sync::atomic::AtomicPtr<$ty> =
                    ::std::sync::atomic::AtomicPtr::new(::std::ptr::null_mut());

                let cached = CACHE.load(::std::sync::atomic::Ordering::Acquire);
                if !cached.is_null() {
                    $crate::singleton::ensure_alive();
                    // SAFETY: the vault keeps the instance alive while it is initialized.
                    return Ok(unsafe { &*cached });
                }

                let instance =
                    $crate::singleton::resolve::<$ty, $tag, Slot>(Self::PRIORITY, &MEMORY)?;
                CACHE.store(
                    instance as *const $ty as *mut $ty,
                    ::std::sync::atomic::Ordering::Release,
                );
                Ok(instance)
            }

            /// Whether the instance has been constructed.
            pub fn is_constructed() -> bool {
                $crate::is_constructed::<$ty, $tag>()
            }
        }
    };
}

/// Declares a tag type whose singletons are built with `T::default()`.
///
/// Use it to key several default-constructed instances of one type.
///
/// ```rust
/// use singleton_vault::{define_singleton, define_tag};
///
/// define_tag!(Left);
/// define_tag!(Right);
///
/// define_singleton!(LeftQueue: Vec<u8>, Left);
/// define_singleton!(RightQueue: Vec<u8>, Right);
///
/// assert!(!std::ptr::eq(LeftQueue::get(), RightQueue::get()));
/// ```
#[macro_export]
macro_rules! define_tag {
    ($(#[$meta:meta])* $vis:vis $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default)]
        $vis struct $name;

        impl<T> $crate::SingletonTraits<T> for $name
        where
            T: ::std::default::Default + ::std::marker::Send + ::std::marker::Sync + 'static,
        {
            const IN_PLACE: bool = false;

            fn construct(
                slot: &mut ::std::mem::MaybeUninit<T>,
            ) -> ::std::result::Result<&mut T, $crate::ConstructError> {
                ::std::result::Result::Ok(slot.write(T::default()))
            }
        }
    };
}
