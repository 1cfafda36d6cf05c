use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Shared loading gate.
///
/// Counts fetches in flight across all channels. Older-history backfills only
/// start when nothing else is loading; initial and push-driven loads always
/// proceed and simply hold the gate while they run. Every holder owns a
/// [`LoadingPermit`] that releases on drop.
#[derive(Debug, Clone, Default)]
pub struct LoadingGate {
    in_flight: Arc<AtomicUsize>,
}

impl LoadingGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Succeeds only if no fetch is in flight.
    pub fn try_acquire(&self) -> Option<LoadingPermit> {
        self.in_flight
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LoadingPermit {
                in_flight: Arc::clone(&self.in_flight),
            })
    }

    /// Marks a fetch in flight without checking the gate.
    pub fn hold(&self) -> LoadingPermit {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        LoadingPermit {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }
}

#[derive(Debug)]
#[must_use = "the gate is released as soon as the permit is dropped"]
pub struct LoadingPermit {
    in_flight: Arc<AtomicUsize>,
}

impl LoadingPermit {
    pub fn release(self) {}
}

impl Drop for LoadingPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
