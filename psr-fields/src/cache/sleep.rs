use std::time::Duration;

/// Blocking pause used between read attempts and lock polls.
///
/// Fields take this as a trait object so tests can observe waits, or mutate
/// the filesystem while a worker is "sleeping", without real delays.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<F> Sleeper for F
where
    F: Fn(Duration) + Send + Sync,
{
    fn sleep(&self, duration: Duration) {
        self(duration)
    }
}
