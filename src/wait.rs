use std::{
    future::{Future, IntoFuture},
    pin::Pin,
    task::{Context, Poll},
};

use crate::FutureCell;

/// Future returned by [`FutureCell::wait`].
///
/// # Examples
///
/// ```
/// use future_cell::{FutureCell, Promise};
/// use futures::executor::block_on;
/// use std::thread;
///
/// let cell = FutureCell::pending(String::new());
/// let producer = cell.clone();
/// let task = thread::spawn(move || block_on(async { cell.await }));
/// producer.set("🍓".into()).unwrap();
/// assert_eq!(task.join().expect("the waiting thread has panicked"), "🍓");
/// ```
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Wait<T> {
    cell: FutureCell<T>,
    key: Option<u64>,
}

impl<T> Wait<T> {
    pub(crate) fn new(cell: FutureCell<T>) -> Self {
        Self { cell, key: None }
    }
}

impl<T> Drop for Wait<T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.cell.forget_waker(key);
        }
    }
}

impl<T: Clone> Future for Wait<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let ready = this.cell.poll_value(&mut this.key, cx);
        if ready.is_ready() {
            this.key = None;
        }
        ready
    }
}

impl<T: Clone> IntoFuture for FutureCell<T> {
    type Output = T;
    type IntoFuture = Wait<T>;

    fn into_future(self) -> Self::IntoFuture {
        Wait::new(self)
    }
}
