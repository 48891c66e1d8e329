//! Group commands.

use anyhow::Result;

use super::{field, print_reply};
use crate::client::PubSubClient;
use crate::OutputFormat;

pub async fn new(client: &PubSubClient, format: OutputFormat) -> Result<()> {
    let reply = client.call("/add/group", &[]).await?;
    print_reply(format, &reply, &format!("group {}", field(&reply, "group_id")))
}

pub async fn remove(client: &PubSubClient, group: &str, format: OutputFormat) -> Result<()> {
    let reply = client.call("/remove/group", &[("group_id", group)]).await?;
    print_reply(format, &reply, &format!("removed group {}", group))
}

pub async fn join(
    client: &PubSubClient,
    group: &str,
    instance: &str,
    format: OutputFormat,
) -> Result<()> {
    let reply = client
        .call("/group/join", &[("group_id", group), ("instance_id", instance)])
        .await?;
    print_reply(format, &reply, &format!("{} joined {}", instance, group))
}

pub async fn leave(
    client: &PubSubClient,
    group: &str,
    instance: &str,
    format: OutputFormat,
) -> Result<()> {
    let reply = client
        .call("/group/leave", &[("group_id", group), ("instance_id", instance)])
        .await?;
    print_reply(format, &reply, &format!("{} left {}", instance, group))
}
