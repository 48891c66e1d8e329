//! Listen command implementation.

use anyhow::{Context, Result};
use pubsub_sse::pubsub::{ConnectionData, SysEventKind};
use tokio::signal;

use crate::client::PubSubClient;
use crate::OutputFormat;

pub async fn run(
    client: &PubSubClient,
    instance: &str,
    count: u64,
    format: OutputFormat,
) -> Result<()> {
    let mut events = client
        .listen(instance)
        .await
        .context("failed to open event stream")?;

    if format == OutputFormat::Text {
        eprintln!("Listening on instance '{}'", instance);
        eprintln!("Press Ctrl+C to stop...\n");
    }

    let mut received: u64 = 0;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                if format == OutputFormat::Text {
                    eprintln!("\nReceived {} frame(s)", received);
                }
                break;
            }
            result = events.next_frame() => {
                match result {
                    Ok(Some(frame)) => {
                        received += 1;
                        match format {
                            OutputFormat::Text => {
                                for line in render(&frame) {
                                    println!("{}", line);
                                }
                            }
                            OutputFormat::Json => {
                                println!("{}", serde_json::to_string(&frame)?);
                            }
                        }

                        if count > 0 && received >= count {
                            if format == OutputFormat::Text {
                                eprintln!("\nReached frame limit ({})", count);
                            }
                            break;
                        }
                    }
                    Ok(None) => {
                        if format == OutputFormat::Text {
                            eprintln!("Stream ended");
                        }
                        break;
                    }
                    Err(e) => {
                        eprintln!("Error reading stream: {:#}", e);
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// One line per topology change or update.
fn render(frame: &ConnectionData) -> Vec<String> {
    let mut lines = Vec::new();
    for instance in &frame.instances {
        for sys in &instance.data.sys {
            let label = match sys.kind {
                SysEventKind::Topics => "topics",
                SysEventKind::Subscribed => "subscribed",
                SysEventKind::Unsubscribed => "unsubscribed",
            };
            let topics: Vec<String> = sys
                .list
                .iter()
                .map(|topic| match topic.kind {
                    Some(kind) => format!("{}({})", topic.id, kind),
                    None => topic.id.clone(),
                })
                .collect();
            lines.push(format!("[{}] {}: {}", instance.id, label, topics.join(" ")));
        }
        for update in &instance.data.updates {
            lines.push(format!("[{}] {} <- {}", instance.id, update.topic, update.data));
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_frame() {
        let frame: ConnectionData = serde_json::from_str(
            r#"{"instances":[{"id":"I-1","data":{
                "sys":[{"type":"topics","list":[{"id":"T-1","type":"public"}]},
                       {"type":"subscribed","list":[{"id":"T-1"}]}],
                "updates":[{"topic":"T-1","data":{"n":1}}]}}]}"#,
        )
        .unwrap();

        assert_eq!(
            render(&frame),
            vec![
                "[I-1] topics: T-1(public)".to_string(),
                "[I-1] subscribed: T-1".to_string(),
                "[I-1] T-1 <- {\"n\":1}".to_string(),
            ]
        );
    }
}
