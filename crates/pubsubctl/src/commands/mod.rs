//! Subcommand implementations.

pub mod group;
pub mod instance;
pub mod listen;
pub mod publish;
pub mod subscribe;
pub mod topic;

use anyhow::Result;
use serde_json::Value;

use crate::OutputFormat;

/// Print a control-plane reply: `text` in text mode, the raw body otherwise.
pub(crate) fn print_reply(format: OutputFormat, reply: &Value, text: &str) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", text),
        OutputFormat::Json => println!("{}", serde_json::to_string(reply)?),
    }
    Ok(())
}

/// String field of a reply, or `-` when absent.
pub(crate) fn field<'a>(reply: &'a Value, key: &str) -> &'a str {
    reply[key].as_str().unwrap_or("-")
}
