use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::time::Duration;

use llprotocol_message::{CompletedMessage, Connection, ConnectionConfig, Delivery, Router};
use llprotocol_transport::{Channel, Listener};

use crate::cmd::{install_ctrlc_handler, EchoArgs};
use crate::exit::{io_error, message_error, transport_error, CliError, CliResult, SUCCESS};
use crate::output::format_id;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(args: EchoArgs, config: ConnectionConfig) -> CliResult<i32> {
    let listener =
        Listener::bind(&args.endpoint).map_err(|err| transport_error("bind failed", err))?;
    tracing::info!(endpoint = %args.endpoint, "echo server listening");
    let running = install_ctrlc_handler()?;

    let (failed_tx, failed_rx) = mpsc::channel::<CliError>();
    std::thread::Builder::new()
        .name("llp-accept".to_string())
        .spawn(move || loop {
            match listener.accept() {
                Ok(channel) => serve(channel, config.clone()),
                Err(err) => {
                    let _ = failed_tx.send(transport_error("accept failed", err));
                    return;
                }
            }
        })
        .map_err(|err| io_error("failed to start accept thread", err))?;

    while running.load(Ordering::SeqCst) {
        match failed_rx.recv_timeout(POLL_INTERVAL) {
            Ok(err) => return Err(err),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(SUCCESS)
}

// One echo thread per peer; it ends once the peer's reader thread drops the router.
fn serve(channel: Channel, config: ConnectionConfig) {
    let peer = channel.peer().to_string();
    let (tx, rx) = mpsc::channel::<CompletedMessage>();
    let router = Router::new().on_any(Delivery::buffered(move |message| {
        let _ = tx.send(message);
    }));
    let connection = match Connection::start(channel, router, config) {
        Ok(connection) => connection,
        Err(err) => {
            tracing::warn!(%peer, error = %message_error("connection setup failed", err), "dropping peer");
            return;
        }
    };
    tracing::info!(%peer, "peer connected");

    let spawned = std::thread::Builder::new()
        .name("llp-echo".to_string())
        .spawn(move || {
            for message in rx {
                tracing::info!(
                    id = %format_id(message.id),
                    message_type = message.header.message_type(),
                    size = message.body.len(),
                    "echoing message"
                );
                if let Err(err) = connection.send(&message.header, &message.body) {
                    tracing::warn!(peer = connection.peer(), %err, "echo send failed");
                    break;
                }
            }
            tracing::info!(peer = connection.peer(), "peer disconnected");
        });
    if let Err(err) = spawned {
        tracing::warn!(%peer, %err, "failed to start echo thread");
    }
}
