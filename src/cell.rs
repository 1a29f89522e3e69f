use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll, Waker},
    time::{Duration, Instant},
};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::{chain, Error, Launcher, Promise, Wait};

/// A single-assignment value shared by every clone of the handle.
///
/// A cell is either built resolved ([`FutureCell::instant`]) or pending. A
/// pending cell is resolved exactly once, by [`Promise::set`] or by the
/// background task of [`FutureCell::delayed`] / [`FutureCell::computed`].
///
/// # Examples
///
/// ```
/// use future_cell::{FutureCell, Promise};
/// use std::{thread, time::Duration};
///
/// let cell = FutureCell::pending(0);
/// let producer = cell.clone();
/// thread::spawn(move || {
///     thread::sleep(Duration::from_millis(10));
///     producer.set(42).unwrap();
/// });
///
/// assert_eq!(cell.get_wait(), 42);
/// assert!(cell.set(7).is_err());
/// assert_eq!(cell.get_now(), (true, 42));
/// ```
pub struct FutureCell<T> {
    cell: Arc<Cell<T>>,
    launcher: Launcher,
}

enum Cell<T> {
    Resolved(T),
    Pending(Gate<T>),
}

/// One-shot gate of a pending cell. `value` is only ever written and read
/// with `slot` locked, and it goes from `None` to `Some` exactly once.
struct Gate<T> {
    placeholder: T,
    claimed: AtomicBool,
    slot: Mutex<Slot<T>>,
    fired: Condvar,
}

/// Async waiters are keyed so a dropped [`Wait`] can take its waker back out.
struct Slot<T> {
    value: Option<T>,
    wakers: Vec<(u64, Waker)>,
    next_key: u64,
}

impl<T> FutureCell<T> {
    /// A resolved cell. Uses the process-wide launcher for callbacks.
    pub fn instant(value: T) -> Self {
        Launcher::global().instant(value)
    }

    /// A pending cell that reports `placeholder` until it is set. Uses the
    /// process-wide launcher for callbacks.
    pub fn pending(placeholder: T) -> Self {
        Launcher::global().pending(placeholder)
    }

    pub(crate) fn resolved_on(launcher: Launcher, value: T) -> Self {
        Self {
            cell: Arc::new(Cell::Resolved(value)),
            launcher,
        }
    }

    pub(crate) fn pending_on(launcher: Launcher, placeholder: T) -> Self {
        let gate = Gate {
            placeholder,
            claimed: AtomicBool::new(false),
            slot: Mutex::new(Slot {
                value: None,
                wakers: Vec::new(),
                next_key: 0,
            }),
            fired: Condvar::new(),
        };
        Self {
            cell: Arc::new(Cell::Pending(gate)),
            launcher,
        }
    }

    /// The launcher that runs this cell's callbacks.
    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    /// Whether the value is known. Never blocks on the producer.
    pub fn is_resolved(&self) -> bool {
        match &*self.cell {
            Cell::Resolved(_) => true,
            Cell::Pending(gate) => gate.slot.lock().value.is_some(),
        }
    }

    /// The write behind [`Promise::set`]. Needs no `Clone` so producers of
    /// any value type can use it.
    pub(crate) fn resolve(&self, value: T) -> Result<(), Error> {
        let gate = match &*self.cell {
            Cell::Resolved(_) => {
                warn!("set called on a cell that was built resolved");
                return Err(Error::AlreadyResolved);
            }
            Cell::Pending(gate) => gate,
        };
        if gate
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("set called twice on the same cell");
            return Err(Error::AlreadyResolved);
        }

        let wakers = {
            let mut slot = gate.slot.lock();
            slot.value = Some(value);
            gate.fired.notify_all();
            std::mem::take(&mut slot.wakers)
        };
        debug!("cell resolved, waking {} async waiters", wakers.len());
        for (_, waker) in wakers {
            waker.wake();
        }
        Ok(())
    }

    /// Drops the waker registered under `key`, if it is still there.
    pub(crate) fn forget_waker(&self, key: u64) {
        if let Cell::Pending(gate) = &*self.cell {
            gate.slot.lock().wakers.retain(|(k, _)| *k != key);
        }
    }

    #[cfg(test)]
    pub(crate) fn waker_count(&self) -> usize {
        match &*self.cell {
            Cell::Resolved(_) => 0,
            Cell::Pending(gate) => gate.slot.lock().wakers.len(),
        }
    }
}

impl<T: Clone> FutureCell<T> {
    /// The value if it is known, without blocking.
    pub fn try_get(&self) -> Option<T> {
        match self.get_now() {
            (true, value) => Some(value),
            (false, _) => None,
        }
    }

    /// Awaits the value. Dropping the returned future does not affect the
    /// cell.
    pub fn wait(&self) -> Wait<T> {
        Wait::new(self.clone())
    }

    /// Polls on behalf of one waiter. `key` is the waiter's entry in the
    /// waker list; it is assigned on the first pending poll.
    pub(crate) fn poll_value(&self, key: &mut Option<u64>, cx: &mut Context<'_>) -> Poll<T> {
        let gate = match &*self.cell {
            Cell::Resolved(value) => return Poll::Ready(value.clone()),
            Cell::Pending(gate) => gate,
        };
        let mut slot = gate.slot.lock();
        if let Some(value) = &slot.value {
            return Poll::Ready(value.clone());
        }
        let registered = key.and_then(|k| slot.wakers.iter().position(|entry| entry.0 == k));
        match registered {
            Some(index) => {
                let waker = &mut slot.wakers[index].1;
                if !waker.will_wake(cx.waker()) {
                    *waker = cx.waker().clone();
                }
            }
            None => {
                let k = slot.next_key;
                slot.next_key += 1;
                slot.wakers.push((k, cx.waker().clone()));
                *key = Some(k);
            }
        }
        Poll::Pending
    }
}

impl<T> FutureCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Runs `callback` with the value on a new background task once the
    /// cell resolves, and returns this same cell so calls can be chained.
    ///
    /// Every registration gets its own task. Callbacks run in no particular
    /// order relative to each other or to the caller; to sequence work after
    /// a callback, build a follow-up cell with [`FutureCell::map`] instead.
    pub fn then<F>(&self, callback: F) -> Result<&Self, Error>
    where
        F: FnOnce(T) + Send + 'static,
    {
        let cell = self.clone();
        self.launcher.launch(move || callback(cell.get_wait()))?;
        Ok(self)
    }

    /// A new cell resolved with `transform` applied to this cell's value.
    /// Does not block; the transform runs on this cell's launcher.
    pub fn map<U, M>(&self, transform: M) -> Result<FutureCell<U>, Error>
    where
        U: Default + Send + Sync + 'static,
        M: FnOnce(T) -> U + Send + 'static,
    {
        chain(&self.launcher, self.clone(), transform)
    }
}

impl<T> FutureCell<T>
where
    T: Default + Send + Sync + 'static,
{
    /// A pending cell resolved with `value` after `after` elapses, on the
    /// process-wide launcher.
    pub fn delayed(value: T, after: Duration) -> Result<Self, Error> {
        Launcher::global().delayed(value, after)
    }

    /// A pending cell resolved with the result of `f`, which runs on the
    /// process-wide launcher.
    pub fn computed<F>(f: F) -> Result<Self, Error>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Launcher::global().computed(f)
    }
}

impl<T: Clone> Promise<T> for FutureCell<T> {
    fn get_now(&self) -> (bool, T) {
        match &*self.cell {
            Cell::Resolved(value) => (true, value.clone()),
            Cell::Pending(gate) => gate.read(&gate.slot.lock()),
        }
    }

    fn get_timeout(&self, timeout: Duration) -> (bool, T) {
        if timeout.is_zero() {
            return self.get_now();
        }
        let gate = match &*self.cell {
            Cell::Resolved(value) => return (true, value.clone()),
            Cell::Pending(gate) => gate,
        };
        let deadline = match Instant::now().checked_add(timeout) {
            Some(deadline) => deadline,
            None => return (true, self.get_wait()),
        };

        let mut slot = gate.slot.lock();
        while slot.value.is_none() {
            if gate.fired.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        gate.read(&slot)
    }

    fn get_wait(&self) -> T {
        let gate = match &*self.cell {
            Cell::Resolved(value) => return value.clone(),
            Cell::Pending(gate) => gate,
        };
        let mut slot = gate.slot.lock();
        loop {
            if let Some(value) = &slot.value {
                return value.clone();
            }
            gate.fired.wait(&mut slot);
        }
    }

    fn set(&self, value: T) -> Result<(), Error> {
        self.resolve(value)
    }
}

impl<T: Clone> Gate<T> {
    fn read(&self, slot: &Slot<T>) -> (bool, T) {
        match &slot.value {
            Some(value) => (true, value.clone()),
            None => (false, self.placeholder.clone()),
        }
    }
}

impl<T> Clone for FutureCell<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            launcher: self.launcher.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for FutureCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("FutureCell");
        match &*self.cell {
            Cell::Resolved(value) => out.field("value", value),
            Cell::Pending(gate) => match &gate.slot.lock().value {
                Some(value) => out.field("value", value),
                None => out.field("pending", &gate.placeholder),
            },
        };
        out.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_instant_is_resolved() {
        let cell = Launcher::new().instant(15);
        assert!(cell.is_resolved());
        assert_eq!(cell.get_now(), (true, 15));
        assert_eq!(cell.get_timeout(Duration::from_secs(10)), (true, 15));
        assert_eq!(cell.get_wait(), 15);
    }

    #[test]
    fn test_pending_reports_placeholder() {
        let cell = Launcher::new().pending(String::from("none"));
        assert!(!cell.is_resolved());
        assert_eq!(cell.get_now(), (false, String::from("none")));
        assert_eq!(cell.try_get(), None);
    }

    #[test]
    fn test_zero_timeout_does_not_block() {
        let cell = Launcher::new().pending(0);
        let started = Instant::now();
        assert_eq!(cell.get_timeout(Duration::ZERO), (false, 0));
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_timeout_blocks_for_duration() {
        let cell = Launcher::new().pending(0);
        let started = Instant::now();
        assert_eq!(cell.get_timeout(Duration::from_millis(30)), (false, 0));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(30));
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn test_second_set_is_rejected() {
        let cell = Launcher::new().pending(0);
        cell.set(1).unwrap();
        assert!(matches!(cell.set(2), Err(Error::AlreadyResolved)));
        assert_eq!(cell.get_now(), (true, 1));
    }

    #[test]
    fn test_set_on_instant_is_rejected() {
        let cell = Launcher::new().instant(1);
        assert!(matches!(cell.set(2), Err(Error::AlreadyResolved)));
        assert_eq!(cell.get_wait(), 1);
    }

    #[test]
    fn test_racing_setters_have_one_winner() {
        let cell = Launcher::new().pending(0);
        let handles: Vec<_> = (1..=8)
            .map(|i| {
                let cell = cell.clone();
                thread::spawn(move || cell.set(i).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("setter thread panicked"))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        let (ready, value) = cell.get_now();
        assert!(ready);
        assert!((1..=8).contains(&value));
    }

    #[test]
    fn test_concurrent_readers_see_same_value() {
        let cell = Launcher::new().pending(0u64);
        let readers: Vec<_> = (0..6)
            .map(|_| {
                let cell = cell.clone();
                thread::spawn(move || cell.get_wait())
            })
            .collect();
        thread::sleep(Duration::from_millis(10));
        cell.set(99).unwrap();
        for reader in readers {
            assert_eq!(reader.join().expect("reader thread panicked"), 99);
        }
    }

    #[test]
    fn test_then_runs_each_callback_once() {
        let launcher = Launcher::new();
        let cell = launcher.pending(0);
        let (tx, rx) = mpsc::channel();
        let first = tx.clone();
        let second = tx;
        cell.then(move |v| first.send(("first", v)).unwrap())
            .unwrap()
            .then(move |v| second.send(("second", v)).unwrap())
            .unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());
        cell.set(5).unwrap();

        let mut got: Vec<_> = rx.iter().collect();
        got.sort();
        assert_eq!(got, vec![("first", 5), ("second", 5)]);
        assert_eq!(launcher.launched(), 2);
    }

    #[test]
    fn test_then_on_instant_cell() {
        let cell = Launcher::new().instant("ready");
        let (tx, rx) = mpsc::channel();
        cell.then(move |v| tx.send(v).unwrap()).unwrap();
        assert_eq!(rx.recv().unwrap(), "ready");
    }

    #[test]
    fn test_await_pending_cell() {
        let cell = Launcher::new().pending(0);
        let producer = cell.clone();
        let waiter = thread::spawn(move || block_on(cell.wait()));
        thread::sleep(Duration::from_millis(10));
        producer.set(3).unwrap();
        assert_eq!(waiter.join().expect("waiter thread panicked"), 3);
    }

    #[test]
    fn test_debug_shows_state() {
        let cell = Launcher::new().pending(0);
        assert_eq!(format!("{:?}", cell), "FutureCell { pending: 0 }");
        cell.set(4).unwrap();
        assert_eq!(format!("{:?}", cell), "FutureCell { value: 4 }");
    }
}
