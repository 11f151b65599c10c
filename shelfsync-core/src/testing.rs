//! Test doubles shared by the unit tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};

type Router = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync>;
type Matcher = Box<dyn Fn(&HttpRequest) -> bool + Send + Sync>;

/// Transport that answers from a script and records every request.
///
/// Queued responses are consumed first; once the queue is empty the router
/// (if any) answers. Requests matched by the stall predicate never complete.
pub(crate) struct ScriptedTransport {
    queue: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    router: Option<Router>,
    stall: Option<Matcher>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            router: None,
            stall: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn routed<F>(router: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            router: Some(Box::new(router)),
            ..Self::new()
        }
    }

    pub(crate) fn stalling_on<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&HttpRequest) -> bool + Send + Sync + 'static,
    {
        self.stall = Some(Box::new(matcher));
        self
    }

    pub(crate) fn push(&self, response: Result<HttpResponse, TransportError>) {
        self.queue.lock().push_back(response);
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request.clone());
        if self.stall.as_ref().is_some_and(|stall| stall(&request)) {
            std::future::pending::<()>().await;
        }
        if let Some(response) = self.queue.lock().pop_front() {
            return response;
        }
        match &self.router {
            Some(router) => router(&request),
            None => Err(TransportError::Request {
                message: format!("no scripted response for {}", request.url),
            }),
        }
    }
}
