//! Console chat client.
//!
//! Connects to a socket.io 0.9 server, prints what arrives and sends each
//! line typed on stdin as a `message` event. Lines starting with `/join`,
//! `/leave` or `/quit` control the session.
//!
//!   cargo run -p sockio-demo-chat -- --host localhost --port 3000 --endpoint /chat

mod session;

use sockio_client::{ClientConfig, ConnectRequest, Socket};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sockio_client=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let host = parse_arg_string(&args, "--host").unwrap_or_else(|| "localhost".to_string());
    let port = parse_arg(&args, "--port").unwrap_or(3000);
    let endpoint = parse_arg_string(&args, "--endpoint");
    let nick = parse_arg_string(&args, "--nick").unwrap_or_else(|| "guest".to_string());

    let config = match parse_arg_string(&args, "--config") {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };

    let mut request = ConnectRequest::new(host, port)
        .secure(args.iter().any(|a| a == "--secure"))
        .param("nick", nick.as_str());
    if let Some(endpoint) = endpoint {
        request = request.endpoint(endpoint);
    }

    tracing::info!("Connecting to {}", request.origin);
    let (socket, events) = Socket::spawn(config);
    socket.connect(request).await?;

    session::run(socket, events, nick).await
}

fn parse_arg(args: &[String], flag: &str) -> Option<u16> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}

fn parse_arg_string(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
