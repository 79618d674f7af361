use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use super::types::{PublishRequest, PublishResponse};
use super::{NatsPublishLoggingLayer, NatsPublishLoggingService};
use crate::nats::JetStreamPublisher;
use anyhow::Result;
use tower::{Service, ServiceBuilder};

/// Innermost service: hands the request to JetStream and waits for the ack
#[derive(Clone)]
pub struct NatsPublishService {
    publisher: Arc<dyn JetStreamPublisher>,
}

impl NatsPublishService {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>) -> Self {
        Self { publisher }
    }
}

impl Service<PublishRequest> for NatsPublishService {
    type Response = PublishResponse;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        let publisher = Arc::clone(&self.publisher);
        let subject = req.subject.clone();

        Box::pin(async move {
            publisher
                .publish_with_headers(subject.clone(), req.headers, req.payload)
                .await?;
            Ok(PublishResponse { subject })
        })
    }
}

pub struct NatsPublisherBuilder {
    publisher: Arc<dyn JetStreamPublisher>,
    with_logging: bool,
}

impl NatsPublisherBuilder {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>) -> Self {
        Self {
            publisher,
            with_logging: false,
        }
    }

    pub fn with_logging(mut self) -> Self {
        self.with_logging = true;
        self
    }

    pub fn build(self) -> LayeredPublisher {
        let inner = NatsPublishService::new(self.publisher);

        if self.with_logging {
            let svc = ServiceBuilder::new()
                .layer(NatsPublishLoggingLayer::new())
                .service(inner);
            LayeredPublisher::Logged(svc)
        } else {
            LayeredPublisher::Plain(inner)
        }
    }
}

/// Concrete publisher type returned by [`NatsPublisherBuilder`]
#[derive(Clone)]
pub enum LayeredPublisher {
    Logged(NatsPublishLoggingService<NatsPublishService>),
    Plain(NatsPublishService),
}

impl Service<PublishRequest> for LayeredPublisher {
    type Response = PublishResponse;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match self {
            LayeredPublisher::Logged(svc) => svc.poll_ready(cx),
            LayeredPublisher::Plain(svc) => svc.poll_ready(cx),
        }
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        match self {
            LayeredPublisher::Logged(svc) => svc.call(req),
            LayeredPublisher::Plain(svc) => svc.call(req),
        }
    }
}
