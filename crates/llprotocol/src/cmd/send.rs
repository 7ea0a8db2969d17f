use std::fs::File;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use llprotocol_message::{Connection, ConnectionConfig, Delivery, MessageHeader, Router};
use serde_json::Value;

use crate::cmd::SendArgs;
use crate::exit::{io_error, message_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT, USAGE};
use crate::output::{format_id, print_message, OutputFormat};

enum Body {
    Bytes(Vec<u8>),
    File(File),
}

pub fn run(args: SendArgs, format: OutputFormat, config: ConnectionConfig) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let header = build_header(&args.message_type, &args.headers)?;
    let body = resolve_body(&args)?;

    let (tx, rx) = mpsc::channel();
    let router = if args.wait {
        Router::new().on_any(Delivery::buffered(move |message| {
            let _ = tx.send(message);
        }))
    } else {
        Router::new()
    };
    let connection = Connection::connect(&args.endpoint, router, config)
        .map_err(|err| message_error("connect failed", err))?;

    let sent = match body {
        Body::Bytes(bytes) => connection.send(&header, &bytes),
        Body::File(file) => connection.sender().send_reader(&header, file),
    }
    .map_err(|err| message_error("send failed", err))?;
    tracing::info!(id = %format_id(sent), message_type = header.message_type(), "message sent");

    if args.wait {
        let reply = match rx.recv_timeout(wait_timeout) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("no reply within {}ms", wait_timeout.as_millis()),
                ))
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CliError::new(FAILURE, "connection closed before a reply"))
            }
        };
        print_message(&reply, connection.peer(), format);
    }

    connection
        .close()
        .map_err(|err| message_error("close failed", err))?;
    Ok(SUCCESS)
}

fn build_header(message_type: &str, fields: &[String]) -> CliResult<MessageHeader> {
    if message_type.trim().is_empty() {
        return Err(CliError::new(USAGE, "--type must not be empty"));
    }
    let mut header = MessageHeader::new(message_type);
    for field in fields {
        let (key, raw) = field
            .split_once('=')
            .ok_or_else(|| CliError::new(USAGE, format!("--header expects KEY=VALUE, got {field}")))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        header
            .insert(key, value)
            .map_err(|err| CliError::new(USAGE, format!("--header {key}: {err}")))?;
    }
    Ok(header)
}

fn resolve_body(args: &SendArgs) -> CliResult<Body> {
    if let Some(json) = &args.json {
        serde_json::from_str::<Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(Body::Bytes(json.as_bytes().to_vec()));
    }
    if let Some(data) = &args.data {
        return Ok(Body::Bytes(data.as_bytes().to_vec()));
    }
    if let Some(path) = &args.file {
        let file = File::open(path)
            .map_err(|err| io_error(&format!("failed opening {}", path.display()), err))?;
        return Ok(Body::File(file));
    }
    Ok(Body::Bytes(Vec::new()))
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration: {input:?}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }
    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
