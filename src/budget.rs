use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Soft byte budget; leasing never blocks and may drive it negative.
#[derive(Debug)]
pub struct MemoryBudget {
    remaining: AtomicI64,
    in_flight: AtomicUsize,
}

impl MemoryBudget {
    pub fn new(bytes: u64) -> Self {
        Self {
            remaining: AtomicI64::new(clamp(bytes)),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn lease(self: &Arc<Self>, bytes: u64) -> Lease {
        self.remaining.fetch_sub(clamp(bytes), Ordering::SeqCst);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Lease {
            budget: self.clone(),
            bytes,
        }
    }

    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() < 0
    }
}

#[derive(Debug)]
pub struct Lease {
    budget: Arc<MemoryBudget>,
    bytes: u64,
}

impl Lease {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.budget
            .remaining
            .fetch_add(clamp(self.bytes), Ordering::SeqCst);
        self.budget.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn clamp(bytes: u64) -> i64 {
    bytes.min(i64::MAX as u64) as i64
}

#[cfg(test)]
mod tests {
    use super::MemoryBudget;
    use std::sync::Arc;

    #[test]
    fn test_lease() {
        let budget = Arc::new(MemoryBudget::new(100));

        let a = budget.lease(60);
        assert_eq!(budget.remaining(), 40);
        assert!(!budget.is_exhausted());

        let b = budget.lease(60);
        assert_eq!(budget.remaining(), -20);
        assert_eq!(budget.in_flight(), 2);
        assert!(budget.is_exhausted());

        drop(a);
        assert_eq!(budget.remaining(), 40);
        assert_eq!(b.bytes(), 60);

        drop(b);
        assert_eq!(budget.remaining(), 100);
        assert_eq!(budget.in_flight(), 0);
    }
}
