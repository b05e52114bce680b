use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use crate::{
    capture::{CapturingRequest, StopReason},
    metadata::{method::MethodId, typesystem::PrimitiveKind},
};

/// A single argument as handed over by an installed probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeValue {
    /// A primitive, its bits zero-extended to 64
    Primitive {
        /// Kind of the primitive
        kind: PrimitiveKind,
        /// Raw bits of the value
        bits: u64,
    },
    /// Handle of a managed object, boxed value types included
    Object(u64),
    /// A null reference
    Null,
    /// The slot's boxing instruction is unsupported; no value was captured
    Unavailable,
}

/// The narrow capability installed probes call into, inline, on application threads.
///
/// Implementations must never block: they run on arbitrary hot paths of the monitored
/// process.
pub trait CaptureSurface: Send + Sync {
    /// Offer the arguments of one invocation of `method`. Returns `true` if a capture was
    /// actually taken.
    fn try_capture(&self, method: MethodId, args: &[ProbeValue]) -> bool;
}

/// Capture-count circuit breaker around another [`CaptureSurface`].
///
/// Once the configured number of captures has been taken, the guard trips: it resolves the
/// owning request's stop signal with [`StopReason::LimitReached`] and every later invocation
/// returns `false` after a single relaxed load. Only the increment that lands exactly on the
/// limit resolves the signal, no matter how many threads race past it.
pub struct CaptureLimitGuard {
    inner: Arc<dyn CaptureSurface>,
    request: Arc<CapturingRequest>,
    limit: u64,
    captured: AtomicU64,
    stopped: AtomicBool,
}

impl CaptureLimitGuard {
    /// Wrap `inner`, stopping `request` after `limit` captures
    #[must_use]
    pub fn new(inner: Arc<dyn CaptureSurface>, request: Arc<CapturingRequest>, limit: u64) -> Self {
        CaptureLimitGuard {
            inner,
            request,
            limit,
            captured: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    /// Number of captures taken through this guard
    #[must_use]
    pub fn captured(&self) -> u64 {
        self.captured.load(Ordering::Acquire)
    }

    /// Returns true once the limit has been reached
    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

impl CaptureSurface for CaptureLimitGuard {
    fn try_capture(&self, method: MethodId, args: &[ProbeValue]) -> bool {
        if self.stopped.load(Ordering::Relaxed) {
            return false;
        }

        if !self.inner.try_capture(method, args) {
            return false;
        }

        if self.captured.fetch_add(1, Ordering::AcqRel) + 1 == self.limit {
            self.stopped.store(true, Ordering::Relaxed);
            self.request.stop_signal().resolve(StopReason::LimitReached);
            tracing::debug!(
                request_id = %self.request.id(),
                limit = self.limit,
                "Capture limit reached"
            );
        }

        true
    }
}
