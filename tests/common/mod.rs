//! Scripted transport for integration tests: stub (method, url) pairs with
//! reply sequences and record every submitted call.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use s3porter::transport::{Transport, TransportCall, TransportError, TransportReply};

/// One scripted response.
#[derive(Debug, Clone)]
pub enum Stub {
    Reply {
        status: u16,
        headers: Vec<(String, String)>,
        body: Bytes,
    },
    /// Transport-level failure (connection reset etc.)
    Error(String),
}

impl Stub {
    pub fn ok(body: &str) -> Self {
        Stub::Reply {
            status: 200,
            headers: Vec::new(),
            body: Bytes::copy_from_slice(body.as_bytes()),
        }
    }

    pub fn status(code: u16) -> Self {
        Stub::Reply {
            status: code,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn redirect(location: &str) -> Self {
        Stub::Reply {
            status: 301,
            headers: vec![("location".to_string(), location.to_string())],
            body: Bytes::new(),
        }
    }

    pub fn error(message: &str) -> Self {
        Stub::Error(message.to_string())
    }
}

/// Records calls and replays stubs. The last stub for a target repeats
/// indefinitely; a request with no stub panics the test.
#[derive(Default)]
pub struct MockTransport {
    stubs: Mutex<HashMap<(String, String), VecDeque<Stub>>>,
    calls: Mutex<Vec<TransportCall>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stub(&self, method: &str, url: &str, stub: Stub) {
        self.stubs
            .lock()
            .unwrap()
            .entry((method.to_string(), url.to_string()))
            .or_default()
            .push_back(stub);
    }

    /// Number of submitted requests matching (method, url).
    pub fn requests(&self, method: &str, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.method.as_str() == method && call.url == url)
            .count()
    }

    pub fn total_requests(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    fn next_stub(&self, method: &str, url: &str) -> Stub {
        let mut stubs = self.stubs.lock().unwrap();
        let queue = stubs
            .get_mut(&(method.to_string(), url.to_string()))
            .unwrap_or_else(|| panic!("unexpected request: {method} {url}"));
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or_else(|| panic!("unexpected request: {method} {url}"))
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn submit(&self, call: TransportCall) -> Result<TransportReply, TransportError> {
        let stub = self.next_stub(call.method.as_str(), &call.url);
        self.calls.lock().unwrap().push(call);

        match stub {
            Stub::Error(message) => Err(TransportError::Connect(message)),
            Stub::Reply {
                status,
                headers,
                body,
            } => {
                let mut map = HeaderMap::new();
                for (name, value) in headers {
                    map.insert(
                        name.parse::<HeaderName>().unwrap(),
                        value.parse::<HeaderValue>().unwrap(),
                    );
                }
                Ok(TransportReply {
                    status: StatusCode::from_u16(status).unwrap(),
                    headers: map,
                    body: futures::stream::iter([Ok(body)]).boxed(),
                })
            }
        }
    }
}
