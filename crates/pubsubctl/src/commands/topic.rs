//! Topic commands.

use anyhow::Result;

use super::{field, print_reply};
use crate::client::PubSubClient;
use crate::OutputFormat;

/// Where a new topic is created.
pub enum Owner<'a> {
    Public,
    Instance(&'a str),
    Group(&'a str),
}

pub async fn new(client: &PubSubClient, owner: Owner<'_>, format: OutputFormat) -> Result<()> {
    let (path, query) = match owner {
        Owner::Public => ("/add/topic/public", vec![]),
        Owner::Instance(id) => ("/add/topic/private", vec![("instance_id", id)]),
        Owner::Group(id) => ("/add/topic/group", vec![("group_id", id)]),
    };
    let reply = client.call(path, &query).await?;
    print_reply(format, &reply, &format!("topic {}", field(&reply, "topic_id")))
}

pub async fn remove(
    client: &PubSubClient,
    topic: &str,
    owner: Owner<'_>,
    format: OutputFormat,
) -> Result<()> {
    let mut query = vec![("topic_id", topic)];
    match owner {
        Owner::Public => {}
        Owner::Instance(id) => query.push(("instance_id", id)),
        Owner::Group(id) => query.push(("group_id", id)),
    }
    let reply = client.call("/remove/topic", &query).await?;
    print_reply(format, &reply, &format!("removed topic {}", topic))
}
