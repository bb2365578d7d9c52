//! Existence-keyed memoization.
//!
//! Every caching layer in crownscan (feature artifacts, report plots,
//! remote objects) follows the same rule: if the output for a key is
//! already present, do nothing; otherwise compute it. [`Presence`]
//! answers the existence question and [`compute_if_absent`] applies the
//! rule. The computation is responsible for making the output present.

/// Something that can tell whether the output for a key already exists.
pub trait Presence {
    /// Key type, e.g. an artifact name or a relative path.
    type Key: ?Sized;
    /// Error raised while checking.
    type Error;

    /// Returns `true` if the output for `key` exists.
    ///
    /// # Errors
    ///
    /// Returns the implementor's error if existence cannot be determined.
    fn is_present(&self, key: &Self::Key) -> Result<bool, Self::Error>;
}

impl<P: Presence + ?Sized> Presence for &P {
    type Key = P::Key;
    type Error = P::Error;

    fn is_present(&self, key: &Self::Key) -> Result<bool, Self::Error> {
        (**self).is_present(key)
    }
}

/// Outcome of [`compute_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Cached<T> {
    /// The output already existed; nothing was computed.
    Hit,
    /// The output was computed.
    Computed(T),
}

impl<T> Cached<T> {
    /// Returns `true` if nothing was computed.
    pub const fn is_hit(&self) -> bool {
        matches!(self, Self::Hit)
    }

    /// The computed value, if any.
    pub fn computed(self) -> Option<T> {
        match self {
            Self::Hit => None,
            Self::Computed(value) => Some(value),
        }
    }
}

/// Run `compute` for `key` unless `presence` reports it already exists.
///
/// There is no lock between the check and the computation; concurrent
/// callers may both compute. Outputs must be deterministic so the
/// duplicate work is harmless.
///
/// # Errors
///
/// Propagates the presence check error (converted into `E`) or the error
/// returned by `compute`.
///
/// ```
/// use std::collections::HashSet;
/// use std::convert::Infallible;
/// use crownscan_pipeline::cache::{Cached, Presence, compute_if_absent};
///
/// struct Done(HashSet<&'static str>);
///
/// impl Presence for Done {
///     type Key = str;
///     type Error = Infallible;
///     fn is_present(&self, key: &str) -> Result<bool, Infallible> {
///         Ok(self.0.contains(key))
///     }
/// }
///
/// let done = Done(HashSet::from(["a"]));
/// let hit: Result<Cached<u8>, Infallible> = compute_if_absent(&done, "a", |_| Ok(1));
/// assert_eq!(hit, Ok(Cached::Hit));
/// let miss: Result<Cached<u8>, Infallible> = compute_if_absent(&done, "b", |_| Ok(2));
/// assert_eq!(miss, Ok(Cached::Computed(2)));
/// ```
pub fn compute_if_absent<P, T, E, F>(presence: &P, key: &P::Key, compute: F) -> Result<Cached<T>, E>
where
    P: Presence + ?Sized,
    E: From<P::Error>,
    F: FnOnce(&P::Key) -> Result<T, E>,
{
    if presence.is_present(key)? {
        return Ok(Cached::Hit);
    }
    compute(key).map(Cached::Computed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::HashSet;

    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum TestError {
        Check,
        Compute,
    }

    struct Store {
        keys: RefCell<HashSet<String>>,
        fail_check: bool,
    }

    impl Store {
        fn new() -> Self {
            Self {
                keys: RefCell::new(HashSet::new()),
                fail_check: false,
            }
        }
    }

    impl Presence for Store {
        type Key = str;
        type Error = TestError;

        fn is_present(&self, key: &str) -> Result<bool, TestError> {
            if self.fail_check {
                return Err(TestError::Check);
            }
            Ok(self.keys.borrow().contains(key))
        }
    }

    #[test]
    fn second_call_is_a_hit() {
        let store = Store::new();
        let calls = Cell::new(0);
        let fill = |key: &str| -> Result<(), TestError> {
            calls.set(calls.get() + 1);
            store.keys.borrow_mut().insert(key.to_owned());
            Ok(())
        };

        let first = compute_if_absent(&store, "tree_0", fill).unwrap();
        assert_eq!(first, Cached::Computed(()));
        let second = compute_if_absent(&store, "tree_0", fill).unwrap();
        assert!(second.is_hit());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn check_error_skips_computation() {
        let store = Store {
            fail_check: true,
            ..Store::new()
        };
        let result: Result<Cached<()>, TestError> =
            compute_if_absent(&store, "x", |_| unreachable!("must not compute"));
        assert_eq!(result, Err(TestError::Check));
    }

    #[test]
    fn compute_error_propagates() {
        let store = Store::new();
        let result: Result<Cached<()>, TestError> =
            compute_if_absent(&store, "x", |_| Err(TestError::Compute));
        assert_eq!(result, Err(TestError::Compute));
        assert!(!store.is_present("x").unwrap());
    }

    #[test]
    fn computed_yields_value() {
        assert_eq!(Cached::Computed(3).computed(), Some(3));
        assert_eq!(Cached::<u8>::Hit.computed(), None);
    }
}
