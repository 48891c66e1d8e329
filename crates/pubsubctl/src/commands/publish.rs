//! Publish command implementation.

use std::fs;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::client::PubSubClient;
use crate::OutputFormat;

#[derive(Serialize)]
struct PublishOutput {
    topic: String,
    payload_size: usize,
}

pub async fn run(
    client: &PubSubClient,
    topic: &str,
    payload: Option<String>,
    file: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let raw = match (payload, file) {
        (Some(p), None) => p,
        (None, Some(f)) => {
            fs::read_to_string(&f).with_context(|| format!("failed to read file: {}", f))?
        }
        (Some(_), Some(_)) => {
            return Err(anyhow!("cannot specify both payload and --file"));
        }
        (None, None) => {
            return Err(anyhow!("must specify either payload or --file"));
        }
    };

    let data = parse_payload(&raw);
    client.publish(topic, &data).await?;

    let output = PublishOutput {
        topic: topic.to_string(),
        payload_size: raw.len(),
    };
    match format {
        OutputFormat::Text => {
            println!(
                "Published {} byte(s) to '{}'",
                output.payload_size, output.topic
            );
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(&output)?);
        }
    }

    Ok(())
}

/// JSON payloads are sent as-is; anything else becomes a JSON string.
fn parse_payload(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
