use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{ByteStream, Transport};
use crate::errors::TransportError;
use crate::providers::base::ProviderRequest;

/// One pre-configured reply of the mock transport
pub enum ScriptedReply {
    /// Stream these chunks, then close
    Chunks(Vec<String>),
    /// Stream these chunks, then never yield again
    Stall(Vec<String>),
    /// Fail to open with this HTTP status
    Status(u16),
    /// Stream these chunks, then fail mid-stream
    Broken(Vec<String>),
}

/// A transport that replays scripted replies in order and records every request
pub struct MockTransport {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl MockTransport {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn chunk_stream(chunks: Vec<String>) -> impl futures::Stream<Item = Result<Bytes, TransportError>> {
    stream::iter(chunks.into_iter().map(|chunk| Ok(Bytes::from(chunk))))
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, request: ProviderRequest) -> Result<ByteStream, TransportError> {
        self.requests.lock().unwrap().push(request);
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(ScriptedReply::Chunks(chunks)) => Ok(chunk_stream(chunks).boxed()),
            Some(ScriptedReply::Stall(chunks)) => {
                Ok(chunk_stream(chunks).chain(stream::pending()).boxed())
            }
            Some(ScriptedReply::Status(status)) => Err(TransportError::Status {
                status,
                body: "scripted failure".to_string(),
            }),
            Some(ScriptedReply::Broken(chunks)) => Ok(chunk_stream(chunks)
                .chain(stream::once(async {
                    Err(TransportError::Connection("connection reset".to_string()))
                }))
                .boxed()),
            // Return an empty stream if no more replies are configured
            None => Ok(stream::empty().boxed()),
        }
    }
}
