//! Echo service node example
//!
//! Run with: cargo run --example echo_node [BIND_ADDR]
//!
//! Starts an echo server that registers itself with an in-process
//! discovery registry, subscribes to the `echo.events` topic on an
//! in-process broker, refreshes its registration every 10 seconds, and
//! shuts down cleanly on Ctrl-C.
//!
//! Try it:
//!   cargo run --example echo_node
//!   nc 127.0.0.1 9000        # anything you type is echoed back

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use svcnode_rs::broker::{Broker, MemoryBroker, Message};
use svcnode_rs::registry::{Endpoint, MemoryRegistry, Registry};
use svcnode_rs::{Connection, ConnectionHandler, Server, ServerConfig, Subscriber};

/// Echoes every byte back to the peer
struct EchoHandler;

#[async_trait::async_trait]
impl ConnectionHandler for EchoHandler {
    fn endpoints(&self) -> Vec<Endpoint> {
        vec![Endpoint::new("Echo.Stream")]
    }

    async fn serve(&self, mut conn: Connection) {
        let peer = conn.peer_addr();
        let (mut rd, mut wr) = tokio::io::split(&mut conn);
        match tokio::io::copy(&mut rd, &mut wr).await {
            Ok(bytes) => println!("[{peer}] echoed {bytes} bytes"),
            Err(e) => println!("[{peer}] connection error: {e}"),
        }
    }
}

fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 9000;

    let normalized = arg.replace("localhost", "127.0.0.1");
    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }
    Err(format!(
        "Invalid bind address: '{arg}'. Expected IP:PORT, IP, or 'localhost'"
    ))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("svcnode_rs=debug".parse()?),
        )
        .init();

    let bind_addr = match std::env::args().nth(1) {
        Some(arg) => parse_bind_addr(&arg).map_err(std::io::Error::other)?,
        None => "127.0.0.1:9000".parse()?,
    };

    let registry = Arc::new(MemoryRegistry::new());
    let broker = Arc::new(MemoryBroker::new());

    let config = ServerConfig::new(
        Arc::clone(&registry) as Arc<dyn Registry>,
        Arc::clone(&broker) as Arc<dyn Broker>,
    )
    .bind(bind_addr)
    .name("echo")
    .version("1.0.0")
    .register_ttl(Duration::from_secs(30))
    .register_interval(Duration::from_secs(10));

    let server = Arc::new(Server::new(config, EchoHandler));

    server
        .subscribe(Arc::new(
            Subscriber::new("echo.events").handler(|msg: Message| async move {
                println!("event on {}: {:?}", msg.topic, msg.body);
                Ok(())
            }),
        ))
        .await?;

    server.start().await?;
    let addr = server.address().await.expect("server just started");
    println!("echo node listening on {addr}");

    for service in registry.get_service("echo").await? {
        println!(
            "registered as {} v{} with {} endpoints",
            service.name,
            service.version,
            service.endpoints.len()
        );
    }

    // Prove the subscription is live
    broker
        .publish("echo.events", Message::new("echo.events", "node started"))
        .await?;

    tokio::signal::ctrl_c().await?;
    println!("\nshutting down...");
    server.stop().await?;
    Ok(())
}
