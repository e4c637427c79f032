//! # Dispatch Pipeline
//!
//! One run per delivery attempt:
//!
//! ```text
//! Received -> Decoded -> TraceBegun -> HandlerRunning -> HandlerDone -> TraceFinished -> Outcome
//! ```
//!
//! - Decode failures return before a span is opened and before the handler
//!   runs.
//! - A span that was begun is finished exactly once, including when the
//!   pipeline future is dropped mid-handler.
//! - The handler always runs inside [`run_isolated`], so a panic becomes
//!   [`DispatchError::Panicked`] instead of unwinding into the broker.

use crate::domain::{
    DeliveryAttempt, DeliveryContext, DeliveryOutcome, MessageSpan, SpanOutcome,
    SubscriptionDescriptor,
};
use crate::error::DispatchError;
use crate::ports::{
    DeliveryCallback, DeliveryFuture, DispatchMetrics, EnvelopeCodec, MessageHandler, SpanHandle,
    Tracer,
};
use crate::service::isolation::run_isolated;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, Instrument};

/// Runs delivery attempts for one subscription.
pub struct Dispatcher<T> {
    descriptor: SubscriptionDescriptor,
    handler: Arc<dyn MessageHandler<T>>,
    codec: Arc<dyn EnvelopeCodec<T>>,
    tracer: Arc<dyn Tracer>,
    metrics: Arc<dyn DispatchMetrics>,
}

impl<T> Dispatcher<T>
where
    T: Send + 'static,
{
    pub fn new(
        descriptor: SubscriptionDescriptor,
        handler: Arc<dyn MessageHandler<T>>,
        codec: Arc<dyn EnvelopeCodec<T>>,
        tracer: Arc<dyn Tracer>,
        metrics: Arc<dyn DispatchMetrics>,
    ) -> Self {
        Self {
            descriptor,
            handler,
            codec,
            tracer,
            metrics,
        }
    }

    pub fn descriptor(&self) -> &SubscriptionDescriptor {
        &self.descriptor
    }

    /// Run the pipeline for one attempt and report its outcome.
    ///
    /// `Ok(())` acknowledges the message. Any error asks the broker to
    /// redeliver. The recorded duration covers the handler only and is zero
    /// when the handler never ran.
    pub async fn dispatch(
        &self,
        cancel: CancellationToken,
        attempt: DeliveryAttempt,
    ) -> Result<(), DispatchError> {
        let (result, handler_elapsed) = self.run(cancel, attempt).await;
        self.metrics.record_outcome(
            &self.descriptor,
            DeliveryOutcome::from_result(&result),
            handler_elapsed,
        );
        result
    }

    /// Wrap this dispatcher as a broker callback.
    pub fn into_callback(self: Arc<Self>) -> DeliveryCallback {
        Arc::new(move |cancel: CancellationToken, attempt: DeliveryAttempt| -> DeliveryFuture {
            let dispatcher = Arc::clone(&self);
            Box::pin(async move { dispatcher.dispatch(cancel, attempt).await })
        })
    }

    async fn run(
        &self,
        cancel: CancellationToken,
        attempt: DeliveryAttempt,
    ) -> (Result<(), DispatchError>, Duration) {
        let message = match self.codec.decode(&attempt.attributes, &attempt.payload) {
            Ok(message) => message,
            Err(err) => {
                error!(
                    topic = %self.descriptor.topic,
                    subscription = %self.descriptor.subscription,
                    msg_id = %attempt.message_id,
                    delivery_attempt = attempt.attempt,
                    error = %err,
                    "failed to unmarshal message"
                );
                return (Err(DispatchError::Decode(err)), Duration::ZERO);
            }
        };

        let guard = if self.tracer.in_active_trace() {
            None
        } else {
            let request = MessageSpan::for_attempt(&self.descriptor, &attempt);
            match self.tracer.begin_span(&request) {
                Ok(handle) => Some(SpanGuard::new(self.tracer.as_ref(), handle)),
                Err(err) => {
                    error!(
                        topic = %self.descriptor.topic,
                        subscription = %self.descriptor.subscription,
                        msg_id = %attempt.message_id,
                        delivery_attempt = attempt.attempt,
                        error = %err,
                        "failed to begin request"
                    );
                    return (Err(DispatchError::Trace(err)), Duration::ZERO);
                }
            }
        };

        let ctx = DeliveryContext::new(cancel, &self.descriptor, &attempt);
        let handler = Arc::clone(&self.handler);
        let invocation = async move { handler.handle(ctx, message).await };

        let span = guard.as_ref().map_or_else(tracing::Span::none, SpanGuard::span);
        let started = Instant::now();
        let result = run_isolated(invocation).instrument(span).await;
        let handler_elapsed = started.elapsed();

        match &result {
            Ok(()) => {}
            Err(DispatchError::Panicked(payload)) => {
                error!(
                    topic = %self.descriptor.topic,
                    subscription = %self.descriptor.subscription,
                    msg_id = %attempt.message_id,
                    delivery_attempt = attempt.attempt,
                    panic = %payload,
                    "subscriber panicked"
                );
            }
            Err(err) => {
                debug!(
                    topic = %self.descriptor.topic,
                    subscription = %self.descriptor.subscription,
                    msg_id = %attempt.message_id,
                    delivery_attempt = attempt.attempt,
                    error = %err,
                    "handler returned error"
                );
            }
        }

        if let Some(guard) = guard {
            guard.finish(&result);
        }
        (result, handler_elapsed)
    }
}

/// Finishes a span exactly once.
///
/// Dropping the guard without calling [`SpanGuard::finish`] finishes the span
/// as [`SpanOutcome::Cancelled`].
struct SpanGuard<'a> {
    tracer: &'a dyn Tracer,
    handle: Option<SpanHandle>,
}

impl<'a> SpanGuard<'a> {
    fn new(tracer: &'a dyn Tracer, handle: SpanHandle) -> Self {
        Self {
            tracer,
            handle: Some(handle),
        }
    }

    fn span(&self) -> tracing::Span {
        self.handle
            .as_ref()
            .map_or_else(tracing::Span::none, |h| h.span().clone())
    }

    fn finish(mut self, result: &Result<(), DispatchError>) {
        if let Some(handle) = self.handle.take() {
            self.tracer.finish_span(handle, SpanOutcome::from_result(result));
        }
    }
}

impl Drop for SpanGuard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.tracer.finish_span(handle, SpanOutcome::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ContentTypeCodec, RecordedOutcome, RecordingTracer};
    use crate::error::{ErrorCode, HandlerError};
    use crate::ports::NoOpMetrics;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn dispatcher<H>(handler: H, tracer: Arc<RecordingTracer>) -> Dispatcher<u64>
    where
        H: MessageHandler<u64> + 'static,
    {
        Dispatcher::new(
            SubscriptionDescriptor::test_stub("orders", "order-events"),
            Arc::new(handler),
            Arc::new(ContentTypeCodec),
            tracer,
            Arc::new(NoOpMetrics),
        )
    }

    #[derive(Default)]
    struct ElapsedMetrics {
        recorded: Mutex<Vec<(DeliveryOutcome, Duration)>>,
    }

    impl DispatchMetrics for ElapsedMetrics {
        fn record_outcome(&self, _: &SubscriptionDescriptor, outcome: DeliveryOutcome, elapsed: Duration) {
            self.recorded.lock().push((outcome, elapsed));
        }
    }

    fn timed_dispatcher<H>(handler: H, metrics: Arc<ElapsedMetrics>) -> Dispatcher<u64>
    where
        H: MessageHandler<u64> + 'static,
    {
        Dispatcher::new(
            SubscriptionDescriptor::test_stub("orders", "order-events"),
            Arc::new(handler),
            Arc::new(ContentTypeCodec),
            Arc::new(RecordingTracer::new()),
            metrics,
        )
    }

    fn attempt(payload: &str) -> DeliveryAttempt {
        DeliveryAttempt::new("m1", payload.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_success_finishes_span_ok() {
        let tracer = Arc::new(RecordingTracer::new());
        let d = dispatcher(
            |_ctx: DeliveryContext, _id: u64| async { Ok::<(), HandlerError>(()) },
            tracer.clone(),
        );

        d.dispatch(CancellationToken::new(), attempt("42")).await.unwrap();

        let spans = tracer.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].outcome, Some(RecordedOutcome::Ok));
        assert_eq!(spans[0].finish_count, 1);
        assert_eq!(spans[0].request.message_id, "m1");
    }

    #[tokio::test]
    async fn test_handler_sees_decoded_value_and_context() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let d = dispatcher(
            move |ctx: DeliveryContext, id: u64| {
                let sink = sink.clone();
                async move {
                    *sink.lock() = Some((id, ctx.attempt(), ctx.message_id().to_string()));
                    Ok::<(), HandlerError>(())
                }
            },
            Arc::new(RecordingTracer::new()),
        );

        d.dispatch(CancellationToken::new(), attempt("7").with_attempt(3))
            .await
            .unwrap();

        assert_eq!(*seen.lock(), Some((7, 3, "m1".to_string())));
    }

    #[tokio::test]
    async fn test_decode_failure_skips_span_and_handler() {
        let tracer = Arc::new(RecordingTracer::new());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let d = dispatcher(
            move |_ctx: DeliveryContext, _id: u64| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), HandlerError>(()) }
            },
            tracer.clone(),
        );

        let err = d
            .dispatch(CancellationToken::new(), attempt("not-a-number"))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Decode(_)));
        assert_eq!(err.code(), ErrorCode::Internal);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(tracer.begun(), 0);
    }

    #[tokio::test]
    async fn test_trace_begin_failure_skips_handler() {
        let tracer = Arc::new(RecordingTracer::failing_begin());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let d = dispatcher(
            move |_ctx: DeliveryContext, _id: u64| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), HandlerError>(()) }
            },
            tracer,
        );

        let err = d
            .dispatch(CancellationToken::new(), attempt("1"))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Trace(_)));
        assert!(err.is_internal());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_active_trace_skips_span() {
        let tracer = Arc::new(RecordingTracer::inside_active_trace());
        let d = dispatcher(
            |_ctx: DeliveryContext, _id: u64| async { Ok::<(), HandlerError>(()) },
            tracer.clone(),
        );

        d.dispatch(CancellationToken::new(), attempt("1")).await.unwrap();
        assert_eq!(tracer.begun(), 0);
    }

    #[tokio::test]
    async fn test_panic_finishes_span_with_error() {
        let tracer = Arc::new(RecordingTracer::new());
        let d = dispatcher(
            |_ctx: DeliveryContext, id: u64| async move {
                let items: Vec<u64> = Vec::new();
                let _ = items[id as usize];
                Ok::<(), HandlerError>(())
            },
            tracer.clone(),
        );

        let err = d
            .dispatch(CancellationToken::new(), attempt("3"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("index out of bounds"));
        let spans = tracer.spans();
        assert!(matches!(
            spans[0].outcome,
            Some(RecordedOutcome::Err { code: ErrorCode::Internal, .. })
        ));
    }

    #[tokio::test]
    async fn test_dropped_dispatch_finishes_span_cancelled() {
        let tracer = Arc::new(RecordingTracer::new());
        let d = dispatcher(
            |_ctx: DeliveryContext, _id: u64| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<(), HandlerError>(())
            },
            tracer.clone(),
        );

        let timed_out = tokio::time::timeout(
            Duration::from_millis(20),
            d.dispatch(CancellationToken::new(), attempt("1")),
        )
        .await;

        assert!(timed_out.is_err());
        let spans = tracer.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].outcome, Some(RecordedOutcome::Cancelled));
        assert_eq!(spans[0].finish_count, 1);
    }

    #[tokio::test]
    async fn test_metrics_time_the_handler() {
        let metrics = Arc::new(ElapsedMetrics::default());
        let d = timed_dispatcher(
            |_ctx: DeliveryContext, _id: u64| async {
                tokio::time::sleep(Duration::from_millis(25)).await;
                Ok::<(), HandlerError>(())
            },
            metrics.clone(),
        );

        d.dispatch(CancellationToken::new(), attempt("1")).await.unwrap();

        let recorded = metrics.recorded.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, DeliveryOutcome::Acked);
        assert!(recorded[0].1 >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn test_decode_failure_records_zero_handler_time() {
        let metrics = Arc::new(ElapsedMetrics::default());
        let d = timed_dispatcher(
            |_ctx: DeliveryContext, _id: u64| async { Ok::<(), HandlerError>(()) },
            metrics.clone(),
        );

        d.dispatch(CancellationToken::new(), attempt("not-a-number"))
            .await
            .unwrap_err();

        let recorded = metrics.recorded.lock();
        assert_eq!(*recorded, vec![(DeliveryOutcome::DecodeError, Duration::ZERO)]);
    }

    #[tokio::test]
    async fn test_callback_forwards_cancellation() {
        let observed = Arc::new(Mutex::new(None));
        let sink = observed.clone();
        let d = Arc::new(dispatcher(
            move |ctx: DeliveryContext, _id: u64| {
                let sink = sink.clone();
                async move {
                    *sink.lock() = Some(ctx.is_cancelled());
                    Ok::<(), HandlerError>(())
                }
            },
            Arc::new(RecordingTracer::new()),
        ));

        let callback = d.into_callback();
        let token = CancellationToken::new();
        token.cancel();
        callback(token, attempt("1")).await.unwrap();

        assert_eq!(*observed.lock(), Some(true));
    }
}
