use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use super::types::{PublishRequest, PublishResponse};
use tower::{Layer, Service};
use tracing::{debug, error, Instrument, Span};

/// Tower layer that logs every publish with its subject and latency
#[derive(Clone, Default)]
pub struct NatsPublishLoggingLayer;

impl NatsPublishLoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for NatsPublishLoggingLayer {
    type Service = NatsPublishLoggingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        NatsPublishLoggingService { inner: service }
    }
}

#[derive(Clone)]
pub struct NatsPublishLoggingService<S> {
    inner: S,
}

impl<S> Service<PublishRequest> for NatsPublishLoggingService<S>
where
    S: Service<PublishRequest, Response = PublishResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        let subject = req.subject.clone();
        let payload_bytes = req.payload.len();
        let start = Instant::now();
        let mut inner = self.inner.clone();
        let span = Span::current();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let duration_ms = start.elapsed().as_millis();

                match &result {
                    Ok(_) => debug!(
                        subject = %subject,
                        payload_bytes,
                        duration_ms = %duration_ms,
                        "published status event to {subject} in {duration_ms}ms"
                    ),
                    Err(e) => error!(
                        subject = %subject,
                        payload_bytes,
                        duration_ms = %duration_ms,
                        error = %e,
                        "failed to publish status event to {subject}: {e}"
                    ),
                }

                result
            }
            .instrument(span),
        )
    }
}
