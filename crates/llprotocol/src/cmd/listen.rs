use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use llprotocol_message::{CompletedMessage, Connection, ConnectionConfig, Delivery, Router};
use llprotocol_transport::Listener;

use crate::cmd::{install_ctrlc_handler, ListenArgs};
use crate::exit::{message_error, transport_error, CliError, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

enum Event {
    Message { peer: String, message: CompletedMessage },
    Failed(CliError),
}

pub fn run(args: ListenArgs, format: OutputFormat, config: ConnectionConfig) -> CliResult<i32> {
    let listener =
        Listener::bind(&args.endpoint).map_err(|err| transport_error("bind failed", err))?;
    tracing::info!(endpoint = %args.endpoint, "listening");
    let running = install_ctrlc_handler()?;

    let (tx, rx) = mpsc::channel();
    let types = args.types.clone();
    std::thread::Builder::new()
        .name("llp-accept".to_string())
        .spawn(move || accept_loop(listener, types, config, tx))
        .map_err(|err| crate::exit::io_error("failed to start accept thread", err))?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Event::Message { peer, message }) => {
                print_message(&message, &peer, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    return Ok(SUCCESS);
                }
            }
            Ok(Event::Failed(err)) => return Err(err),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(SUCCESS)
}

fn accept_loop(
    listener: Listener,
    types: Option<Vec<String>>,
    config: ConnectionConfig,
    events: mpsc::Sender<Event>,
) {
    let mut connections: Vec<Connection> = Vec::new();
    loop {
        let channel = match listener.accept() {
            Ok(channel) => channel,
            Err(err) => {
                let _ = events.send(Event::Failed(transport_error("accept failed", err)));
                return;
            }
        };
        let peer = channel.peer().to_string();
        tracing::info!(%peer, "peer connected");

        match Connection::start(channel, printing_router(&peer, types.as_deref(), &events), config.clone()) {
            Ok(connection) => {
                connections.retain(|connection| !connection.is_closed());
                connections.push(connection);
            }
            Err(err) => {
                tracing::warn!(%peer, error = %message_error("connection setup failed", err), "dropping peer");
            }
        }
    }
}

fn printing_router(peer: &str, types: Option<&[String]>, events: &mpsc::Sender<Event>) -> Router {
    let events = events.clone();
    let peer = peer.to_string();
    let delivery = Delivery::buffered(move |message| {
        let _ = events.send(Event::Message {
            peer: peer.clone(),
            message,
        });
    });
    match types {
        Some(types) => types
            .iter()
            .fold(Router::new(), |router, message_type| {
                router.on(message_type.as_str(), delivery.clone())
            }),
        None => Router::new().on_any(delivery),
    }
}
