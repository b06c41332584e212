//! A wrapper around the core::sync::atomic.
//!
//! Atomic types provide primitive shared-memory communication between
//! threads, and are the building blocks of other concurrent types.
//!
//! The wrappers in this module always use [`Ordering::SeqCst`], so the
//! projects never have to reason about weaker orderings. Sharing them between
//! threads is done the usual way, by putting them into an [`Arc`].
//!
//! [`Arc`]: std::sync::Arc

use core::sync::atomic::Ordering;

macro_rules! atomic_int {
    ($(#[$m:meta])* $name:ident, $inner:ty, $t:ty) => {
        $(#[$m])*
        #[derive(Default, Debug)]
        pub struct $name($inner);

        impl $name {
            #[doc = concat!("Creates a new `", stringify!($name), "`.")]
            #[inline]
            #[must_use]
            pub const fn new(v: $t) -> Self {
                Self(<$inner>::new(v))
            }

            /// Loads a value from the atomic integer.
            #[inline]
            pub fn load(&self) -> $t {
                self.0.load(Ordering::SeqCst)
            }

            /// Stores a value into the atomic integer.
            #[inline]
            pub fn store(&self, v: $t) {
                self.0.store(v, Ordering::SeqCst)
            }

            /// Stores a value into the atomic integer, returning the previous
            /// value.
            #[inline]
            pub fn swap(&self, v: $t) -> $t {
                self.0.swap(v, Ordering::SeqCst)
            }

            /// Adds to the current value, returning the previous value.
            ///
            /// This operation wraps around on overflow.
            #[inline]
            pub fn fetch_add(&self, v: $t) -> $t {
                self.0.fetch_add(v, Ordering::SeqCst)
            }

            /// Subtracts from the current value, returning the previous value.
            ///
            /// This operation wraps around on overflow.
            #[inline]
            pub fn fetch_sub(&self, v: $t) -> $t {
                self.0.fetch_sub(v, Ordering::SeqCst)
            }

            /// Maximum with the current value, returning the previous value.
            #[inline]
            pub fn fetch_max(&self, v: $t) -> $t {
                self.0.fetch_max(v, Ordering::SeqCst)
            }

            /// Stores `new` if the current value is `current`.
            ///
            /// The return value is a result indicating whether the new value
            /// was written and containing the previous value.
            #[inline]
            pub fn compare_exchange(&self, current: $t, new: $t) -> Result<$t, $t> {
                self.0
                    .compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst)
            }

            /// Consumes the atomic and returns the contained value.
            #[inline]
            pub fn into_inner(self) -> $t {
                self.0.into_inner()
            }
        }
    };
}

atomic_int!(
    /// An integer type which can be safely shared between threads.
    AtomicUsize,
    core::sync::atomic::AtomicUsize,
    usize
);
atomic_int!(
    /// An integer type which can be safely shared between threads.
    AtomicU64,
    core::sync::atomic::AtomicU64,
    u64
);
atomic_int!(
    /// An integer type which can be safely shared between threads.
    AtomicI32,
    core::sync::atomic::AtomicI32,
    i32
);

/// A boolean type which can be safely shared between threads.
#[derive(Default, Debug)]
pub struct AtomicBool(core::sync::atomic::AtomicBool);

impl AtomicBool {
    /// Creates a new `AtomicBool`.
    #[inline]
    #[must_use]
    pub const fn new(v: bool) -> AtomicBool {
        Self(core::sync::atomic::AtomicBool::new(v))
    }

    /// Loads a value from the bool.
    #[inline]
    pub fn load(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Stores a value into the bool.
    #[inline]
    pub fn store(&self, v: bool) {
        self.0.store(v, Ordering::SeqCst)
    }

    /// Stores a value into the bool, returning the previous value.
    #[inline]
    pub fn swap(&self, v: bool) -> bool {
        self.0.swap(v, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters() {
        let a = AtomicUsize::new(3);
        assert_eq!(a.fetch_add(2), 3);
        assert_eq!(a.fetch_sub(1), 5);
        assert_eq!(a.fetch_max(10), 4);
        assert_eq!(a.compare_exchange(10, 11), Ok(10));
        assert_eq!(a.compare_exchange(10, 12), Err(11));
        assert_eq!(a.into_inner(), 11);
    }
}
