use std::{collections::HashSet, sync::Arc};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::{
    boxing::{MethodBoxingInstructions, SignatureClassifier, SignatureDecoder},
    capture::{
        CaptureConfig, CaptureLimitGuard, CaptureSurface, CapturingCallbacks, CapturingRequest,
        CapturingRequestPayload, FailureReason, MethodDescriptionValidator, MethodResolver,
        ProbeManager, RequestId, RequestRegistry, RequestState, StopReason,
    },
    metadata::method::{MethodId, ResolvedMethod},
    Error, Result,
};

/// The collaborators an orchestrator is wired to.
#[derive(Clone)]
pub struct CaptureServices {
    /// Policy engine consulted at admission
    pub validator: Arc<dyn MethodDescriptionValidator>,
    /// Maps descriptions onto methods
    pub resolver: Arc<dyn MethodResolver>,
    /// Installs and removes probes
    pub probes: Arc<dyn ProbeManager>,
    /// Outbound notifications
    pub callbacks: Arc<dyn CapturingCallbacks>,
    /// Where probes deliver their captures
    pub surface: Arc<dyn CaptureSurface>,
}

/// Admission and control handle of the capturing pipeline.
///
/// The handle is cheap to share and is called from arbitrary threads. All long running work
/// happens in the paired [`CapturingLoop`], which processes one request at a time from start
/// to finish. Between them sits a queue with a single slot: at most one request waits while
/// another is active, and a submission that finds the slot occupied is rejected with
/// [`Error::TooManyRequests`]. Single-flight capturing therefore holds by construction.
///
/// # Example
///
/// ```rust,ignore
/// let (orchestrator, consumer) = CapturingOrchestrator::new(CaptureConfig::default(), services);
/// let shutdown = CancellationToken::new();
/// tokio::spawn(consumer.run(shutdown.clone()));
///
/// orchestrator.submit_request(payload)?;
/// // ...
/// orchestrator.request_stop(request_id)?;
/// ```
pub struct CapturingOrchestrator {
    config: CaptureConfig,
    registry: Arc<RequestRegistry>,
    queue: mpsc::Sender<Arc<CapturingRequest>>,
    validator: Arc<dyn MethodDescriptionValidator>,
    callbacks: Arc<dyn CapturingCallbacks>,
}

/// The single consumer of admitted requests.
pub struct CapturingLoop {
    registry: Arc<RequestRegistry>,
    queue: mpsc::Receiver<Arc<CapturingRequest>>,
    classifier: SignatureClassifier,
    resolver: Arc<dyn MethodResolver>,
    probes: Arc<dyn ProbeManager>,
    callbacks: Arc<dyn CapturingCallbacks>,
    surface: Arc<dyn CaptureSurface>,
}

impl CapturingOrchestrator {
    /// Create the admission handle and its consumer loop.
    ///
    /// The loop does nothing until [`CapturingLoop::run`] is polled.
    #[must_use]
    pub fn new(config: CaptureConfig, services: CaptureServices) -> (Self, CapturingLoop) {
        let (sender, receiver) = mpsc::channel(1);
        let registry = Arc::new(RequestRegistry::new());
        let classifier =
            SignatureClassifier::with_decoder(SignatureDecoder::with_max_depth(
                config.max_signature_depth,
            ))
            .parallel(config.parallel_classification);

        let orchestrator = CapturingOrchestrator {
            config,
            registry: registry.clone(),
            queue: sender,
            validator: services.validator,
            callbacks: services.callbacks.clone(),
        };
        let consumer = CapturingLoop {
            registry,
            queue: receiver,
            classifier,
            resolver: services.resolver,
            probes: services.probes,
            callbacks: services.callbacks,
            surface: services.surface,
        };

        (orchestrator, consumer)
    }

    /// Admit a request.
    ///
    /// Every check happens synchronously, before any asynchronous work begins. Requests
    /// rejected by policy or by the single-slot queue are reported through
    /// [`CapturingCallbacks::on_failed_to_capture`] as well as returned.
    ///
    /// # Errors
    /// - [`Error::EmptyRequest`], [`Error::InvalidCaptureLimit`], [`Error::InvalidDuration`]
    ///   for malformed payloads
    /// - [`Error::DeniedMethods`] if the policy refuses any method
    /// - [`Error::DuplicateRequest`] if the id is already tracked
    /// - [`Error::TooManyRequests`] if a request is already waiting
    /// - [`Error::ShuttingDown`] if the consumer loop has exited
    pub fn submit_request(&self, mut payload: CapturingRequestPayload) -> Result<()> {
        if payload.methods.is_empty() {
            return Err(Error::EmptyRequest);
        }

        payload.capture_limit = payload
            .capture_limit
            .or(self.config.default_capture_limit);
        if payload.capture_limit == Some(0) {
            return Err(Error::InvalidCaptureLimit);
        }

        if payload.duration.is_zero() || payload.duration > self.config.max_duration {
            return Err(Error::InvalidDuration(payload.duration));
        }

        let request = Arc::new(CapturingRequest::new(payload));
        let request_id = request.id();
        request.set_state(RequestState::Validating);

        let denied: Vec<_> = request
            .methods()
            .iter()
            .filter(|description| !self.validator.is_allowed(description))
            .cloned()
            .collect();
        if !denied.is_empty() {
            let error = Error::DeniedMethods(denied);
            self.reject(&request, FailureReason::DeniedMethods, &error);
            return Err(error);
        }

        self.registry.try_insert(request.clone())?;

        match self.queue.try_send(request.clone()) {
            Ok(()) => {
                tracing::debug!(%request_id, "Request admitted");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.registry.remove(&request_id);
                let error = Error::TooManyRequests;
                self.reject(&request, FailureReason::TooManyRequests, &error);
                Err(error)
            }
            Err(TrySendError::Closed(_)) => {
                self.registry.remove(&request_id);
                request.stop_signal().resolve(StopReason::Cancelled);
                request.set_state(RequestState::Denied);
                Err(Error::ShuttingDown)
            }
        }
    }

    /// Ask a pending or active request to stop.
    ///
    /// Racing the duration timer and the capture limit is harmless: only the first stop
    /// takes effect, and asking again is a no-op.
    ///
    /// # Errors
    /// Returns [`Error::UnknownRequest`] if no request with this id is tracked.
    pub fn request_stop(&self, request_id: RequestId) -> Result<()> {
        let request = self
            .registry
            .get(&request_id)
            .ok_or(Error::UnknownRequest(request_id))?;

        if request.stop_signal().resolve(StopReason::Explicit) {
            tracing::debug!(%request_id, "Stop requested");
        }
        Ok(())
    }

    /// Forward a probe fault for `method` to the control plane, attributed to the request
    /// whose probes are installed, including one that is still removing them. Faults that
    /// cannot be attributed are logged and dropped.
    pub fn report_probe_fault(&self, method: MethodId) {
        let faulting = self.registry.active().and_then(|request| {
            request
                .instrumented()
                .and_then(|methods| methods.iter().find(|m| m.method.id == method))
                .map(|m| (request.id(), m.method.clone()))
        });

        match faulting {
            Some((request_id, resolved)) => {
                tracing::warn!(%request_id, method = %resolved, "Probe faulted");
                self.callbacks.on_probe_fault(request_id, &resolved);
            }
            None => tracing::warn!(%method, "Probe fault for a method no active request owns"),
        }
    }

    /// Look up a tracked request
    #[must_use]
    pub fn request(&self, request_id: RequestId) -> Option<Arc<CapturingRequest>> {
        self.registry.get(&request_id)
    }

    /// Number of requests currently tracked (active plus waiting)
    #[must_use]
    pub fn tracked_requests(&self) -> usize {
        self.registry.len()
    }

    fn reject(&self, request: &CapturingRequest, reason: FailureReason, error: &Error) {
        request.stop_signal().resolve(StopReason::Cancelled);
        request.set_state(RequestState::Denied);
        tracing::warn!(request_id = %request.id(), %reason, %error, "Request rejected");
        self.callbacks
            .on_failed_to_capture(request.id(), reason, &error.to_string());
    }
}

impl CapturingLoop {
    /// Process admitted requests one at a time until `token` is cancelled or every
    /// [`CapturingOrchestrator`] handle is dropped.
    ///
    /// On cancellation the active request is drained: its probes are removed using the same
    /// token and it completes without a failure report. A request still waiting in the
    /// queue is stopped without ever becoming active.
    pub async fn run(mut self, token: CancellationToken) {
        loop {
            let request = tokio::select! {
                biased;
                () = token.cancelled() => break,
                request = self.queue.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            self.process(&request, &token).await;
            self.registry.remove(&request.id());

            if token.is_cancelled() {
                break;
            }
        }

        self.queue.close();
        while let Ok(request) = self.queue.try_recv() {
            request.stop_signal().resolve(StopReason::Shutdown);
            self.complete(&request);
            self.registry.remove(&request.id());
        }

        tracing::debug!("Capturing loop exited");
    }

    #[tracing::instrument(skip_all, fields(request_id = %request.id()))]
    async fn process(&self, request: &Arc<CapturingRequest>, token: &CancellationToken) {
        if let Some(reason) = request.stop_signal().reason() {
            tracing::debug!(%reason, "Request stopped before it became active");
            self.complete(request);
            return;
        }

        request.set_state(RequestState::Resolving);
        let resolved = match self.resolve(request) {
            Ok(resolved) => resolved,
            Err(error) => {
                self.fault(request, &error);
                return;
            }
        };

        let methods: Arc<[MethodBoxingInstructions]> =
            self.classifier.classify_methods(resolved).into();
        request.set_instrumented(methods.clone());

        let surface: Arc<dyn CaptureSurface> = match request.capture_limit() {
            Some(limit) => Arc::new(CaptureLimitGuard::new(
                self.surface.clone(),
                request.clone(),
                limit,
            )),
            None => self.surface.clone(),
        };

        if let Err(error) = self.probes.start_capturing(&methods, surface, token).await {
            // Some probes may have been installed before the failure
            if let Err(cleanup) = self.probes.stop_capturing(token).await {
                tracing::warn!(error = %cleanup, "Failed to remove probes after a failed start");
            }

            if token.is_cancelled() {
                tracing::debug!(%error, "Instrumentation interrupted by shutdown");
                request.stop_signal().resolve(StopReason::Shutdown);
                self.complete(request);
            } else {
                self.fault(request, &error);
            }
            return;
        }

        request.set_state(RequestState::Active);
        tracing::info!(
            methods = methods.len(),
            duration = ?request.duration(),
            capture_limit = ?request.capture_limit(),
            "Capturing started"
        );
        self.callbacks.on_capturing_start(request, &methods);

        let stop = request.stop_signal();
        tokio::select! {
            _ = stop.wait() => {}
            () = tokio::time::sleep(request.duration()) => {
                stop.resolve(StopReason::DurationElapsed);
            }
            () = token.cancelled() => {
                stop.resolve(StopReason::Shutdown);
            }
        }
        let reason = stop.wait().await;

        request.set_state(RequestState::Stopping);
        match self.probes.stop_capturing(token).await {
            Ok(()) => {
                tracing::info!(%reason, "Capturing stopped");
                self.complete(request);
            }
            Err(error) if token.is_cancelled() => {
                tracing::warn!(%reason, %error, "Failed to remove probes during shutdown");
                self.complete(request);
            }
            Err(error) => self.fault(request, &error),
        }
    }

    /// Resolve every description, all or nothing.
    fn resolve(&self, request: &CapturingRequest) -> Result<Vec<ResolvedMethod>> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();

        for description in request.methods() {
            let methods = self.resolver.resolve(description)?;
            if methods.is_empty() {
                unresolved.push(description.clone());
                continue;
            }

            resolved.extend(methods.into_iter().filter(|method| seen.insert(method.id)));
        }

        if !unresolved.is_empty() {
            return Err(Error::UnresolvedMethods(unresolved));
        }

        Ok(resolved)
    }

    fn complete(&self, request: &CapturingRequest) {
        request.set_state(RequestState::Completed);
        self.callbacks.on_capturing_stop(request.id());
    }

    fn fault(&self, request: &CapturingRequest, error: &Error) {
        let reason = match error {
            Error::UnresolvedMethods(_) => FailureReason::UnresolvedMethods,
            _ => FailureReason::InternalError,
        };

        tracing::warn!(%reason, %error, "Capturing failed");
        request.stop_signal().resolve(StopReason::Cancelled);
        request.set_state(RequestState::Faulted);
        self.callbacks
            .on_failed_to_capture(request.id(), reason, &error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};

    use super::*;
    use crate::{
        capture::ProbeValue,
        metadata::typesystem::{PrimitiveKind, TypeShape},
        test::{
            factories::{describe, payload, payload_with, test_method_id, MethodBuilder},
            mocks::{
                AllowList, CallbackEvent, CountingSurface, MockProbeManager, RecordingCallbacks,
                StaticResolver,
            },
        },
    };

    const LONG: Duration = Duration::from_secs(30 * 60);

    struct Harness {
        orchestrator: CapturingOrchestrator,
        probes: Arc<MockProbeManager>,
        events: UnboundedReceiver<CallbackEvent>,
        token: CancellationToken,
        consumer: JoinHandle<()>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with(MockProbeManager::new(), AllowList::everything())
        }

        fn with(probes: MockProbeManager, validator: AllowList) -> Self {
            let resolver = StaticResolver::new()
                .with("Place", vec![MethodBuilder::instance("Place").token(0x0600_0001).build()])
                .with(
                    "Cancel",
                    vec![MethodBuilder::static_method("Cancel")
                        .token(0x0600_0002)
                        .param("id", TypeShape::Primitive(PrimitiveKind::Int64))
                        .build()],
                );
            let (callbacks, events) = RecordingCallbacks::new();
            let probes = Arc::new(probes);

            let (orchestrator, consumer) = CapturingOrchestrator::new(
                CaptureConfig::default(),
                CaptureServices {
                    validator: Arc::new(validator),
                    resolver: Arc::new(resolver),
                    probes: probes.clone(),
                    callbacks: Arc::new(callbacks),
                    surface: Arc::new(CountingSurface::accepting()),
                },
            );

            let token = CancellationToken::new();
            let consumer = tokio::spawn(consumer.run(token.clone()));

            Harness {
                orchestrator,
                probes,
                events,
                token,
                consumer,
            }
        }

        async fn next_event(&mut self) -> CallbackEvent {
            self.events.recv().await.expect("callbacks dropped")
        }

        async fn shutdown(mut self) -> Vec<CallbackEvent> {
            self.token.cancel();
            self.consumer.await.unwrap();
            let mut remaining = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                remaining.push(event);
            }
            remaining
        }
    }

    fn id(value: u128) -> RequestId {
        RequestId::from_u128(value)
    }

    #[tokio::test]
    async fn test_admission_rejects_malformed_payloads() {
        let harness = Harness::new();

        let empty = payload_with(1, &[], LONG, None);
        assert!(matches!(
            harness.orchestrator.submit_request(empty),
            Err(Error::EmptyRequest)
        ));

        let zero_limit = payload_with(2, &["Place"], LONG, Some(0));
        assert!(matches!(
            harness.orchestrator.submit_request(zero_limit),
            Err(Error::InvalidCaptureLimit)
        ));

        let zero_duration = payload_with(3, &["Place"], Duration::ZERO, None);
        assert!(matches!(
            harness.orchestrator.submit_request(zero_duration),
            Err(Error::InvalidDuration(_))
        ));

        let too_long = payload_with(4, &["Place"], Duration::from_secs(24 * 3600), None);
        assert!(matches!(
            harness.orchestrator.submit_request(too_long),
            Err(Error::InvalidDuration(_))
        ));

        assert_eq!(harness.orchestrator.tracked_requests(), 0);
        assert!(harness.shutdown().await.is_empty());
    }

    #[tokio::test]
    async fn test_denied_methods_are_reported_and_not_tracked() {
        let mut harness = Harness::with(MockProbeManager::new(), AllowList::denying(&["Cancel"]));

        let result = harness
            .orchestrator
            .submit_request(payload(1, &["Place", "Cancel"]));
        assert!(matches!(result, Err(Error::DeniedMethods(ref denied)) if denied.len() == 1));
        assert_eq!(harness.orchestrator.tracked_requests(), 0);

        match harness.next_event().await {
            CallbackEvent::Failed(request_id, FailureReason::DeniedMethods, details) => {
                assert_eq!(request_id, id(1));
                assert!(details.contains("Cancel"));
                assert!(!details.contains("Place"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(harness.probes.starts(), 0);
    }

    #[tokio::test]
    async fn test_explicit_stop_lifecycle() {
        let mut harness = Harness::new();
        harness
            .orchestrator
            .submit_request(payload(1, &["Place", "Cancel"]))
            .unwrap();

        match harness.next_event().await {
            CallbackEvent::Started(request_id, methods) => {
                assert_eq!(request_id, id(1));
                assert_eq!(methods, 2);
            }
            other => panic!("unexpected event {other:?}"),
        }
        let request = harness.orchestrator.request(id(1)).unwrap();
        assert_eq!(request.state(), RequestState::Active);
        assert_eq!(request.instrumented().map(<[_]>::len), Some(2));

        harness.orchestrator.request_stop(id(1)).unwrap();
        // Idempotent
        harness.orchestrator.request_stop(id(1)).unwrap();

        assert_eq!(harness.next_event().await, CallbackEvent::Stopped(id(1)));
        assert_eq!(request.stop_signal().reason(), Some(StopReason::Explicit));
        assert_eq!(request.state(), RequestState::Completed);
        assert_eq!(harness.probes.starts(), 1);
        assert_eq!(harness.probes.stops(), 1);
        assert!(harness.orchestrator.request(id(1)).is_none());

        assert!(matches!(
            harness.orchestrator.request_stop(id(1)),
            Err(Error::UnknownRequest(_))
        ));
        assert!(harness.shutdown().await.is_empty());
    }

    #[tokio::test]
    async fn test_single_flight_admission() {
        let mut harness = Harness::new();
        harness.orchestrator.submit_request(payload(1, &["Place"])).unwrap();
        assert!(matches!(harness.next_event().await, CallbackEvent::Started(..)));

        // One request may wait behind the active one
        harness.orchestrator.submit_request(payload(2, &["Place"])).unwrap();

        let result = harness.orchestrator.submit_request(payload(3, &["Place"]));
        assert!(matches!(result, Err(Error::TooManyRequests)));
        assert_eq!(
            harness.next_event().await,
            CallbackEvent::Failed(
                id(3),
                FailureReason::TooManyRequests,
                Error::TooManyRequests.to_string()
            )
        );
        assert!(harness.orchestrator.request(id(3)).is_none());

        harness.orchestrator.request_stop(id(1)).unwrap();
        assert_eq!(harness.next_event().await, CallbackEvent::Stopped(id(1)));
        assert!(matches!(harness.next_event().await, CallbackEvent::Started(r, _) if r == id(2)));

        harness.orchestrator.request_stop(id(2)).unwrap();
        assert_eq!(harness.next_event().await, CallbackEvent::Stopped(id(2)));

        // Capacity is back once everything completed
        harness.orchestrator.submit_request(payload(4, &["Place"])).unwrap();
        assert!(matches!(harness.next_event().await, CallbackEvent::Started(r, _) if r == id(4)));
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_request_id() {
        let mut harness = Harness::new();
        harness.orchestrator.submit_request(payload(1, &["Place"])).unwrap();
        assert!(matches!(harness.next_event().await, CallbackEvent::Started(..)));

        assert!(matches!(
            harness.orchestrator.submit_request(payload(1, &["Cancel"])),
            Err(Error::DuplicateRequest(_))
        ));
        // The tracked request is untouched
        assert_eq!(
            harness.orchestrator.request(id(1)).map(|r| r.state()),
            Some(RequestState::Active)
        );
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_unresolved_methods_fail_whole_request() {
        let mut harness = Harness::new();
        harness
            .orchestrator
            .submit_request(payload(1, &["Place", "Missing"]))
            .unwrap();

        match harness.next_event().await {
            CallbackEvent::Failed(request_id, FailureReason::UnresolvedMethods, details) => {
                assert_eq!(request_id, id(1));
                assert!(details.contains("Missing"));
                assert!(!details.contains("Place"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(harness.probes.starts(), 0);
        assert!(harness.shutdown().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_does_not_halt_loop() {
        let mut harness =
            Harness::with(MockProbeManager::failing_first_start(), AllowList::everything());
        harness.orchestrator.submit_request(payload(1, &["Place"])).unwrap();

        assert!(matches!(
            harness.next_event().await,
            CallbackEvent::Failed(r, FailureReason::InternalError, _) if r == id(1)
        ));
        assert!(harness.orchestrator.request(id(1)).is_none());
        // Partially installed probes are removed
        assert_eq!(harness.probes.starts(), 0);
        assert_eq!(harness.probes.stops(), 1);

        harness.orchestrator.submit_request(payload(2, &["Place"])).unwrap();
        assert!(matches!(harness.next_event().await, CallbackEvent::Started(r, _) if r == id(2)));
        harness.orchestrator.request_stop(id(2)).unwrap();
        assert_eq!(harness.next_event().await, CallbackEvent::Stopped(id(2)));
        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_elapses() {
        let mut harness = Harness::new();
        harness
            .orchestrator
            .submit_request(payload_with(1, &["Place"], Duration::from_secs(5), None))
            .unwrap();
        assert!(matches!(harness.next_event().await, CallbackEvent::Started(..)));
        let request = harness.orchestrator.request(id(1)).unwrap();

        assert_eq!(harness.next_event().await, CallbackEvent::Stopped(id(1)));
        assert_eq!(
            request.stop_signal().reason(),
            Some(StopReason::DurationElapsed)
        );
        assert!(harness.shutdown().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_racing_duration_stops_once() {
        let mut harness = Harness::new();
        let duration = Duration::from_secs(5);
        harness
            .orchestrator
            .submit_request(payload_with(1, &["Place"], duration, None))
            .unwrap();
        assert!(matches!(harness.next_event().await, CallbackEvent::Started(..)));

        tokio::time::advance(duration).await;
        let _ = harness.orchestrator.request_stop(id(1));

        assert_eq!(harness.next_event().await, CallbackEvent::Stopped(id(1)));
        assert_eq!(harness.probes.stops(), 1);
        assert!(harness.shutdown().await.is_empty());
    }

    #[tokio::test]
    async fn test_capture_limit_stops_request() {
        let mut harness = Harness::new();
        harness
            .orchestrator
            .submit_request(payload_with(1, &["Place"], LONG, Some(2)))
            .unwrap();
        assert!(matches!(harness.next_event().await, CallbackEvent::Started(..)));
        let request = harness.orchestrator.request(id(1)).unwrap();

        let surface = harness.probes.surface().unwrap();
        let method = test_method_id(0x0600_0001);
        assert!(surface.try_capture(method, &[ProbeValue::Object(1)]));
        assert!(surface.try_capture(method, &[ProbeValue::Object(2)]));
        assert!(!surface.try_capture(method, &[ProbeValue::Object(3)]));

        assert_eq!(harness.next_event().await, CallbackEvent::Stopped(id(1)));
        assert_eq!(request.stop_signal().reason(), Some(StopReason::LimitReached));
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_while_queued_skips_instrumentation() {
        let mut harness = Harness::new();
        harness.orchestrator.submit_request(payload(1, &["Place"])).unwrap();
        assert!(matches!(harness.next_event().await, CallbackEvent::Started(..)));
        harness.orchestrator.submit_request(payload(2, &["Place"])).unwrap();

        harness.orchestrator.request_stop(id(2)).unwrap();
        harness.orchestrator.request_stop(id(1)).unwrap();

        assert_eq!(harness.next_event().await, CallbackEvent::Stopped(id(1)));
        assert_eq!(harness.next_event().await, CallbackEvent::Stopped(id(2)));
        assert_eq!(harness.probes.starts(), 1);
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_active_and_queued() {
        let mut harness = Harness::new();
        harness.orchestrator.submit_request(payload(1, &["Place"])).unwrap();
        assert!(matches!(harness.next_event().await, CallbackEvent::Started(..)));
        harness.orchestrator.submit_request(payload(2, &["Place"])).unwrap();
        let active = harness.orchestrator.request(id(1)).unwrap();
        let queued = harness.orchestrator.request(id(2)).unwrap();

        let remaining = harness.shutdown().await;
        assert_eq!(
            remaining,
            vec![CallbackEvent::Stopped(id(1)), CallbackEvent::Stopped(id(2))]
        );
        assert_eq!(active.stop_signal().reason(), Some(StopReason::Shutdown));
        assert_eq!(queued.stop_signal().reason(), Some(StopReason::Shutdown));
        assert_eq!(queued.state(), RequestState::Completed);
    }

    #[tokio::test]
    async fn test_shutdown_fault_does_not_mask_cancellation() {
        let mut harness = Harness::with(MockProbeManager::failing_stop(), AllowList::everything());
        harness.orchestrator.submit_request(payload(1, &["Place"])).unwrap();
        assert!(matches!(harness.next_event().await, CallbackEvent::Started(..)));

        let remaining = harness.shutdown().await;
        assert_eq!(remaining, vec![CallbackEvent::Stopped(id(1))]);
    }

    #[tokio::test]
    async fn test_stop_failure_without_shutdown_is_a_fault() {
        let mut harness = Harness::with(MockProbeManager::failing_stop(), AllowList::everything());
        harness.orchestrator.submit_request(payload(1, &["Place"])).unwrap();
        assert!(matches!(harness.next_event().await, CallbackEvent::Started(..)));

        harness.orchestrator.request_stop(id(1)).unwrap();
        assert!(matches!(
            harness.next_event().await,
            CallbackEvent::Failed(r, FailureReason::InternalError, _) if r == id(1)
        ));
        assert!(harness.shutdown().await.is_empty());
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let harness = Harness::new();
        harness.token.cancel();
        // Wait for the loop to close its queue
        while !harness.consumer.is_finished() {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            harness.orchestrator.submit_request(payload(1, &["Place"])),
            Err(Error::ShuttingDown)
        ));
        assert_eq!(harness.orchestrator.tracked_requests(), 0);
    }

    #[tokio::test]
    async fn test_probe_fault_is_attributed_to_active_request() {
        let mut harness = Harness::new();
        harness.orchestrator.submit_request(payload(1, &["Cancel"])).unwrap();
        assert!(matches!(harness.next_event().await, CallbackEvent::Started(..)));

        let method = test_method_id(0x0600_0002);
        harness.orchestrator.report_probe_fault(method);
        assert_eq!(
            harness.next_event().await,
            CallbackEvent::ProbeFault(id(1), method)
        );

        // Unknown methods are dropped
        harness
            .orchestrator
            .report_probe_fault(test_method_id(0x0600_0099));
        let remaining = harness.shutdown().await;
        assert_eq!(remaining, vec![CallbackEvent::Stopped(id(1))]);
    }

    #[tokio::test]
    async fn test_probe_fault_while_probes_are_removed() {
        let mut harness = Harness::with(MockProbeManager::blocking_stop(), AllowList::everything());
        harness.orchestrator.submit_request(payload(1, &["Cancel"])).unwrap();
        assert!(matches!(harness.next_event().await, CallbackEvent::Started(..)));

        harness.orchestrator.request_stop(id(1)).unwrap();
        harness.probes.stop_entered().await;
        assert_eq!(
            harness.orchestrator.request(id(1)).map(|r| r.state()),
            Some(RequestState::Stopping)
        );

        let method = test_method_id(0x0600_0002);
        harness.orchestrator.report_probe_fault(method);
        assert_eq!(
            harness.next_event().await,
            CallbackEvent::ProbeFault(id(1), method)
        );

        harness.probes.release_stop();
        assert_eq!(harness.next_event().await, CallbackEvent::Stopped(id(1)));

        // Probes are gone; nothing owns the method any more
        harness.orchestrator.report_probe_fault(method);
        assert!(harness.shutdown().await.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_requests_end_cancelled_and_denied() {
        let mut harness = Harness::new();
        let rejections = [
            (1, FailureReason::TooManyRequests, Error::TooManyRequests),
            (
                2,
                FailureReason::DeniedMethods,
                Error::DeniedMethods(vec![describe("Cancel")]),
            ),
        ];

        for (value, reason, error) in rejections {
            let request = CapturingRequest::new(payload(value, &["Cancel"]));
            request.set_state(RequestState::Validating);

            harness.orchestrator.reject(&request, reason, &error);
            assert_eq!(request.stop_signal().reason(), Some(StopReason::Cancelled));
            assert_eq!(request.state(), RequestState::Denied);
            // A later stop cannot override the outcome
            assert!(!request.stop_signal().resolve(StopReason::Explicit));
            assert_eq!(
                harness.next_event().await,
                CallbackEvent::Failed(id(value), reason, error.to_string())
            );
        }

        assert_eq!(harness.orchestrator.tracked_requests(), 0);
        assert!(harness.shutdown().await.is_empty());
    }
}
