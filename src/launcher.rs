//! Background task launcher.
//!
//! Every unit of work gets its own OS thread; there is no pool, queue or
//! backpressure. A launcher counts what it starts so callers can observe
//! how many tasks are still running.
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock,
    },
    thread,
    time::Duration,
};

use log::{error, trace};

use crate::{Error, FutureCell};

const DEFAULT_NAME: &str = "future-cell";

/// Launcher configuration.
///
/// # Examples
///
/// ```
/// use future_cell::{Launcher, Promise};
///
/// let launcher = Launcher::builder().name("worker").stack_size(256 * 1024).build();
/// let cell = launcher
///     .computed(|| std::thread::current().name().map(String::from).unwrap_or_default())
///     .unwrap();
/// assert!(cell.get_wait().starts_with("worker-"));
/// ```
#[derive(Debug, Clone)]
pub struct Builder {
    name: String,
    stack_size: Option<usize>,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            stack_size: None,
        }
    }

    /// Prefix for background thread names. Threads are named `<prefix>-<n>`
    /// where `n` is the launch sequence number.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Stack size in bytes for background threads.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    pub fn build(self) -> Launcher {
        Launcher {
            shared: Arc::new(Shared {
                options: self,
                counters: Counters::default(),
            }),
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct Counters {
    launched: AtomicU64,
    active: AtomicU64,
    exited: AtomicU64,
}

#[derive(Debug)]
struct Shared {
    options: Builder,
    counters: Counters,
}

/// Snapshot of a launcher's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub launched: u64,
    pub active: u64,
    pub exited: u64,
}

/// Spawns background tasks and keeps the `launched`/`active`/`exited`
/// counters for them. Cloning shares the counters.
#[derive(Debug, Clone)]
pub struct Launcher {
    shared: Arc<Shared>,
}

impl Launcher {
    /// A launcher with default options and its own counters.
    pub fn new() -> Self {
        Builder::new().build()
    }

    /// Starts configuring a launcher.
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// The process-wide launcher used by the `FutureCell` constructors that
    /// do not take one explicitly.
    pub fn global() -> &'static Launcher {
        static GLOBAL: OnceLock<Launcher> = OnceLock::new();
        GLOBAL.get_or_init(Launcher::new)
    }

    /// Runs `unit` on a new background thread.
    ///
    /// `launched` and `active` go up before the thread starts; when `unit`
    /// returns or unwinds, `active` goes down and `exited` goes up. A launch
    /// the OS refuses stays counted as launched and moves straight to
    /// `exited`, so `launched` never decreases and names are never reused.
    pub fn launch<F>(&self, unit: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        let counters = &self.shared.counters;
        let seq = counters.launched.fetch_add(1, Ordering::SeqCst) + 1;
        counters.active.fetch_add(1, Ordering::SeqCst);

        let options = &self.shared.options;
        let mut builder = thread::Builder::new().name(format!("{}-{}", options.name, seq));
        if let Some(size) = options.stack_size {
            builder = builder.stack_size(size);
        }

        let shared = Arc::clone(&self.shared);
        let spawned = builder.spawn(move || {
            let _finish = Finish { shared, seq };
            trace!("task {} started", seq);
            unit();
        });

        match spawned {
            Ok(_) => Ok(()),
            Err(err) => {
                // The closure never ran, so no Finish guard exists for it.
                counters.active.fetch_sub(1, Ordering::SeqCst);
                counters.exited.fetch_add(1, Ordering::SeqCst);
                error!("failed to spawn task {}: {}", seq, err);
                Err(Error::Spawn(err))
            }
        }
    }

    /// Tasks started so far, including refused launches.
    pub fn launched(&self) -> u64 {
        self.shared.counters.launched.load(Ordering::SeqCst)
    }

    /// Tasks that have not finished yet.
    pub fn active(&self) -> u64 {
        self.shared.counters.active.load(Ordering::SeqCst)
    }

    /// Tasks that returned, unwound or were refused by the OS.
    pub fn exited(&self) -> u64 {
        self.shared.counters.exited.load(Ordering::SeqCst)
    }

    /// All three counters, each read once.
    pub fn stats(&self) -> Stats {
        Stats {
            launched: self.launched(),
            active: self.active(),
            exited: self.exited(),
        }
    }

    /// A resolved cell whose callbacks run on this launcher.
    pub fn instant<T>(&self, value: T) -> FutureCell<T> {
        FutureCell::resolved_on(self.clone(), value)
    }

    /// A pending cell reporting `placeholder` until someone calls `set`.
    pub fn pending<T>(&self, placeholder: T) -> FutureCell<T> {
        FutureCell::pending_on(self.clone(), placeholder)
    }

    /// A pending cell resolved with the result of `f`, which runs on a new
    /// background task. If `f` panics the cell stays pending.
    pub fn computed<T, F>(&self, f: F) -> Result<FutureCell<T>, Error>
    where
        T: Default + Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let cell = self.pending(T::default());
        let target = cell.clone();
        self.launch(move || {
            let value = f();
            if target.resolve(value).is_err() {
                trace!("computed value discarded, cell was set elsewhere");
            }
        })?;
        Ok(cell)
    }

    /// A pending cell resolved with `value` once `after` has elapsed.
    pub fn delayed<T>(&self, value: T, after: Duration) -> Result<FutureCell<T>, Error>
    where
        T: Default + Send + Sync + 'static,
    {
        self.computed(move || {
            thread::sleep(after);
            value
        })
    }
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new()
    }
}

struct Finish {
    shared: Arc<Shared>,
    seq: u64,
}

impl Drop for Finish {
    fn drop(&mut self) {
        let counters = &self.shared.counters;
        counters.active.fetch_sub(1, Ordering::SeqCst);
        counters.exited.fetch_add(1, Ordering::SeqCst);
        if thread::panicking() {
            error!("task {} panicked", self.seq);
        } else {
            trace!("task {} finished", self.seq);
        }
    }
}

/// Tasks ever started by the process-wide launcher.
pub fn launched_count() -> u64 {
    Launcher::global().launched()
}

/// Tasks of the process-wide launcher that have not finished yet.
pub fn active_count() -> u64 {
    Launcher::global().active()
}

/// Tasks of the process-wide launcher that have finished.
pub fn exited_count() -> u64 {
    Launcher::global().exited()
}
