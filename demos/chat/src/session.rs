//! Interactive loop: stdin in, socket events out.

use serde_json::{Value, json};
use sockio_client::{Events, Socket, SocketEvent};
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(socket: Socket, mut events: Events, nick: String) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    socket.disconnect()?;
                    break;
                };
                if !handle_line(&socket, &nick, line.trim())? {
                    break;
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if !handle_event(event) {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Returns `false` when the user asked to quit.
fn handle_line(socket: &Socket, nick: &str, line: &str) -> anyhow::Result<bool> {
    match line.split_once(' ').unwrap_or((line, "")) {
        ("", _) => {}
        ("/quit", _) => {
            socket.disconnect()?;
            return Ok(false);
        }
        ("/join", endpoint) if !endpoint.is_empty() => socket.join(endpoint, None)?,
        ("/leave", endpoint) if !endpoint.is_empty() => socket.leave(endpoint)?,
        _ => {
            let text = line.to_string();
            socket.send_event_with_ack(
                "message",
                vec![json!({ "from": nick, "text": text })],
                |args| tracing::debug!(?args, "message acknowledged"),
            )?;
        }
    }
    Ok(true)
}

/// Returns `false` once the session is over.
fn handle_event(event: SocketEvent) -> bool {
    match event {
        SocketEvent::Connected => println!("* connected"),
        SocketEvent::EndpointConnected { endpoint } => println!("* joined {endpoint}"),
        SocketEvent::EndpointDisconnected { endpoint } => println!("* left {endpoint}"),
        SocketEvent::Message {
            endpoint,
            data,
            ack,
        } => {
            println!("[{endpoint}] {data}");
            acknowledge(ack);
        }
        SocketEvent::Json {
            endpoint,
            data,
            ack,
        } => {
            println!("[{endpoint}] {data}");
            acknowledge(ack);
        }
        SocketEvent::Event {
            endpoint,
            name,
            args,
            ack,
        } => {
            println!("[{endpoint}] {name} {}", Value::Array(args));
            acknowledge(ack);
        }
        SocketEvent::Error {
            endpoint,
            reason,
            advice,
        } => {
            tracing::warn!(%endpoint, ?reason, ?advice, "server error");
        }
        SocketEvent::DecodeFailed { frame, error } => {
            tracing::warn!(%frame, %error, "undecodable frame");
        }
        SocketEvent::MessageSent { .. } => {}
        SocketEvent::HandshakeFailed { error } => {
            eprintln!("* handshake failed: {error}");
            return false;
        }
        SocketEvent::Disconnected { reason } => {
            println!("* disconnected: {reason}");
            return false;
        }
    }
    true
}

fn acknowledge(ack: Option<sockio_client::AckResponder>) {
    if let Some(ack) = ack {
        if let Err(e) = ack.respond(Vec::new()) {
            tracing::warn!("Failed to acknowledge: {}", e);
        }
    }
}
