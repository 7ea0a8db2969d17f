use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use llprotocol_message::CompletedMessage;
use serde::Serialize;
use serde_json::{Map, Value};

const BODY_PREVIEW_LIMIT: usize = 256;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    id: String,
    #[serde(rename = "type")]
    message_type: &'a str,
    header: &'a Map<String, Value>,
    body_size: usize,
    body: String,
    peer: &'a str,
    timestamp: String,
}

pub fn print_message(message: &CompletedMessage, peer: &str, format: OutputFormat) {
    let header = &message.header;
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                id: format_id(message.id),
                message_type: header.message_type(),
                header: header.fields(),
                body_size: message.body.len(),
                body: body_text(message.body.as_ref()),
                peer,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ID", "TYPE", "SIZE", "PEER", "BODY"])
                .add_row(vec![
                    format_id(message.id),
                    header.message_type().to_string(),
                    message.body.len().to_string(),
                    peer.to_string(),
                    body_preview(message.body.as_ref()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "id={} type={} size={} peer={} header={} body={}",
                format_id(message.id),
                header.message_type(),
                message.body.len(),
                peer,
                Value::Object(header.fields().clone()),
                body_preview(message.body.as_ref())
            );
        }
        OutputFormat::Raw => {
            print_raw(message.body.as_ref());
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn format_id(id: u32) -> String {
    format!("{id:08x}")
}

fn body_text(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", body.len()),
    }
}

fn body_preview(body: &[u8]) -> String {
    let text = body_text(body);
    if text.chars().count() <= BODY_PREVIEW_LIMIT {
        return text;
    }
    let cut: String = text.chars().take(BODY_PREVIEW_LIMIT).collect();
    format!("{cut}... ({} bytes)", body.len())
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
