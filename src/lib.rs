//! Single-assignment future cells.
//!
//! A [`FutureCell`] holds one value that a producer resolves at most once.
//! Any number of consumers may poll it, block on it (with or without a
//! timeout), await it, or attach callbacks that run on their own background
//! task once the value is known.
//!
//! # Examples
//!
//! ```
//! use future_cell::{FutureCell, Promise};
//! use std::time::Duration;
//!
//! let numbers = FutureCell::delayed(vec![1, 2, 3], Duration::from_millis(20)).unwrap();
//! let sum = numbers.map(|v| v.iter().sum::<i32>()).unwrap();
//!
//! assert_eq!(sum.get_now(), (false, 0));
//! assert_eq!(sum.get_wait(), 6);
//! assert_eq!(numbers.get_now(), (true, vec![1, 2, 3]));
//! ```
use std::time::Duration;

mod cell;
mod chain;
mod launcher;
mod wait;

pub use cell::FutureCell;
pub use chain::chain;
pub use launcher::{active_count, exited_count, launched_count, Builder, Launcher, Stats};
pub use wait::Wait;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The cell already holds its value, either from an earlier `set` or
    /// because it was built resolved.
    #[error("future cell is already resolved")]
    AlreadyResolved,
    #[error("failed to spawn background task: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Read and write access to an eventually-known value.
///
/// Getters that report `false` hand back the placeholder the cell was built
/// with. A `true` is only ever reported after the write has been observed
/// through the cell's gate, so the returned value is the one `set` stored.
pub trait Promise<T> {
    /// Returns immediately with the value if it is known.
    fn get_now(&self) -> (bool, T);

    /// Blocks until the value is known or `timeout` elapses. A zero timeout
    /// behaves like [`Promise::get_now`]. Timing out does not stop the
    /// producer.
    fn get_timeout(&self, timeout: Duration) -> (bool, T);

    /// Blocks until the value is known.
    fn get_wait(&self) -> T;

    /// Stores the value and releases every waiter. Only the first call on a
    /// pending cell succeeds; every other call returns
    /// [`Error::AlreadyResolved`] and leaves the value as it was.
    fn set(&self, value: T) -> Result<(), Error>;
}
