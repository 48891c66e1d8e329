//! Instance commands.

use anyhow::Result;

use super::{field, print_reply};
use crate::client::PubSubClient;
use crate::OutputFormat;

pub async fn new(
    client: &PubSubClient,
    connection: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let query: Vec<(&str, &str)> = connection
        .map(|id| vec![("connection_id", id)])
        .unwrap_or_default();
    let reply = client.call("/add/instance", &query).await?;
    let text = format!(
        "instance {} on connection {}",
        field(&reply, "instance_id"),
        field(&reply, "connection_id")
    );
    print_reply(format, &reply, &text)
}

pub async fn remove(client: &PubSubClient, instance: &str, format: OutputFormat) -> Result<()> {
    let reply = client
        .call("/remove/instance", &[("instance_id", instance)])
        .await?;
    print_reply(format, &reply, &format!("removed instance {}", instance))
}
