//! Shared fixtures for unit tests: a scriptable transport that counts calls.

use std::sync::Mutex;

use async_trait::async_trait;
use url::Url;

use crate::error::FetchError;
use crate::http::{Request, Response, ResponseType, Transport};

pub const ORIGIN: &str = "http://localhost:5000/";

pub fn origin() -> Url {
    Url::parse(ORIGIN).unwrap()
}

pub fn url(path: &str) -> Url {
    origin().join(path).unwrap()
}

pub fn response(url: &Url, status: u16, body: &str) -> Response {
    let response_type = if url.origin() == origin().origin() {
        ResponseType::Basic
    } else {
        ResponseType::Opaque
    };
    Response {
        url: url.to_string(),
        status,
        headers: vec![("content-type".into(), "text/plain".into())],
        body: body.as_bytes().to_vec(),
        response_type,
    }
}

type Handler = Box<dyn Fn(&Request) -> Result<Response, FetchError> + Send + Sync>;

pub struct StubTransport {
    handler: Handler,
    calls: Mutex<Vec<Request>>,
}

impl StubTransport {
    pub fn new(
        handler: impl Fn(&Request) -> Result<Response, FetchError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers 200 with `"body of <path>"` for every URL.
    pub fn serving_everything() -> Self {
        Self::new(|request| Ok(response(&request.url, 200, &format!("body of {}", request.url.path()))))
    }

    /// Answers 200 except for URLs whose path is listed, which are unreachable.
    pub fn failing_paths(paths: &'static [&'static str]) -> Self {
        Self::new(move |request| {
            if paths.contains(&request.url.path()) {
                Err(FetchError::Unreachable(request.url.to_string()))
            } else {
                Ok(response(&request.url, 200, &format!("body of {}", request.url.path())))
            }
        })
    }

    pub fn offline() -> Self {
        Self::new(|request| Err(FetchError::Unreachable(request.url.to_string())))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<Request> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        self.calls.lock().unwrap().push(request.clone());
        (self.handler)(request)
    }
}
