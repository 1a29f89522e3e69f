use crate::{Error, FutureCell, Launcher, Promise};

/// Builds a new cell holding `transform` applied to `source`'s eventual
/// value, without blocking the caller.
///
/// The transform runs on a background task started by `launcher`. The new
/// cell is independent of `source`, which is only ever read.
///
/// # Examples
///
/// ```
/// use future_cell::{chain, FutureCell, Launcher, Promise};
/// use std::time::Duration;
///
/// let launcher = Launcher::new();
/// let words = launcher.delayed("a b c".to_string(), Duration::from_millis(10)).unwrap();
/// let count = chain(&launcher, words, |s| s.split_whitespace().count()).unwrap();
/// assert_eq!(count.get_wait(), 3);
/// ```
pub fn chain<S, F, T, M>(launcher: &Launcher, source: S, transform: M) -> Result<FutureCell<T>, Error>
where
    S: Promise<F> + Send + 'static,
    T: Default + Send + Sync + 'static,
    M: FnOnce(F) -> T + Send + 'static,
{
    launcher.computed(move || transform(source.get_wait()))
}
