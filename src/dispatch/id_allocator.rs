use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{DispatchError, Result};

/// Process-wide monotone task id counter. Ids start at 1 and never repeat
/// within a process lifetime.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Returns the next id, failing fast instead of wrapping on overflow.
    pub fn next(&self) -> Result<u64> {
        let mut current = self.next.load(Ordering::SeqCst);
        loop {
            let next = current
                .checked_add(1)
                .ok_or_else(|| DispatchError::Internal(anyhow::anyhow!("task id space exhausted")))?;
            match self.next.compare_exchange_weak(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(id) => return Ok(id),
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_monotone() {
        let alloc = IdAllocator::new();
        let a = alloc.next().unwrap();
        let b = alloc.next().unwrap();
        let c = alloc.next().unwrap();
        assert!(a < b);
        assert!(b < c);
    }
}
