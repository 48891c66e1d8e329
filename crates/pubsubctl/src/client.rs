//! Thin HTTP client for the broker's control plane and event stream.

use std::pin::Pin;

use anyhow::{anyhow, Context, Result};
use futures::{Stream, StreamExt};
use pubsub_sse::pubsub::ConnectionData;
use serde_json::Value;

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

/// Client bound to one broker endpoint.
pub struct PubSubClient {
    http: reqwest::Client,
    endpoint: String,
}

impl PubSubClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    /// POST a control-plane call and return the JSON body on success.
    pub async fn call(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let response = self
            .http
            .post(self.url(path))
            .query(query)
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.endpoint))?;
        read_reply(response).await
    }

    /// POST a JSON payload to `/pub`.
    pub async fn publish(&self, topic_id: &str, payload: &Value) -> Result<Value> {
        let response = self
            .http
            .post(self.url("/pub"))
            .query(&[("topic_id", topic_id)])
            .json(payload)
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.endpoint))?;
        read_reply(response).await
    }

    /// Open the event stream of an instance.
    pub async fn listen(&self, instance_id: &str) -> Result<EventStream> {
        let response = self
            .http
            .get(self.url("/event"))
            .query(&[("instance_id", instance_id)])
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.endpoint))?;
        if !response.status().is_success() {
            return Err(read_reply(response)
                .await
                .err()
                .unwrap_or_else(|| anyhow!("event stream rejected")));
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()));
        Ok(EventStream {
            body: Box::pin(body),
            parser: FrameParser::default(),
        })
    }
}

async fn read_reply(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .with_context(|| format!("invalid reply (HTTP {status})"))?;
    if body["ok"] == Value::Bool(true) {
        return Ok(body);
    }
    let message = body["error"].as_str().unwrap_or("unknown error");
    Err(anyhow!("{message} (HTTP {status})"))
}

/// Decoded frames of one event stream.
pub struct EventStream {
    body: ByteStream,
    parser: FrameParser,
}

impl EventStream {
    /// Next frame, or `None` once the server closes the stream.
    pub async fn next_frame(&mut self) -> Result<Option<ConnectionData>> {
        loop {
            if let Some(frame) = self.parser.next_frame()? {
                return Ok(Some(frame));
            }
            match self.body.next().await {
                Some(chunk) => self.parser.push(&chunk.context("event stream broke")?),
                None => return Ok(None),
            }
        }
    }
}

/// Splits a Server-Sent-Events byte stream into frames.
#[derive(Default)]
struct FrameParser {
    buffer: String,
}

impl FrameParser {
    fn push(&mut self, chunk: &[u8]) {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
    }

    fn next_frame(&mut self) -> Result<Option<ConnectionData>> {
        while let Some(end) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..end + 2).collect();
            let data: Vec<&str> = block
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|line| line.strip_prefix(' ').unwrap_or(line))
                .collect();
            // Comment-only blocks are keep-alives.
            if data.is_empty() {
                continue;
            }
            let frame = serde_json::from_str(&data.join("\n")).context("malformed frame")?;
            return Ok(Some(frame));
        }
        Ok(None)
    }
}
