use parking_lot::Mutex;

/// A reference counter that runs an `open` action on the 0 → 1 transition and a `close` action
/// on the 1 → 0 transition.
///
/// The actions run while the counter is locked, so overlapping references from concurrent
/// queries never observe a half-opened resource.
#[derive(Debug, Default)]
pub struct RefCounter {
    count: Mutex<usize>,
}

impl RefCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the counter, calling `open` first if it was zero. If `open` fails the counter
    /// is left unchanged.
    pub fn acquire<E>(&self, open: impl FnOnce() -> Result<(), E>) -> Result<(), E> {
        let mut count = self.count.lock();
        if *count == 0 {
            open()?;
        }
        *count += 1;
        Ok(())
    }

    /// Decrements the counter, calling `close` if it drops to zero. Releasing a counter that is
    /// already zero is a no-op.
    pub fn release(&self, close: impl FnOnce()) {
        let mut count = self.count.lock();
        match *count {
            0 => tracing::warn!("Unbalanced release of a reference counter"),
            1 => {
                *count = 0;
                close();
            }
            _ => *count -= 1,
        }
    }

    /// The number of outstanding references.
    pub fn count(&self) -> usize {
        *self.count.lock()
    }
}
