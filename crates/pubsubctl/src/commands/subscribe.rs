//! Subscription commands.

use anyhow::Result;

use super::print_reply;
use crate::client::PubSubClient;
use crate::OutputFormat;

pub async fn sub(
    client: &PubSubClient,
    instance: &str,
    topic: &str,
    format: OutputFormat,
) -> Result<()> {
    let reply = client
        .call("/sub", &[("instance_id", instance), ("topic_id", topic)])
        .await?;
    print_reply(format, &reply, &format!("{} subscribed to {}", instance, topic))
}

pub async fn unsub(
    client: &PubSubClient,
    instance: &str,
    topic: &str,
    format: OutputFormat,
) -> Result<()> {
    let reply = client
        .call("/unsub", &[("instance_id", instance), ("topic_id", topic)])
        .await?;
    print_reply(
        format,
        &reply,
        &format!("{} unsubscribed from {}", instance, topic),
    )
}
