use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use crate::protocol::{encode, ServerMessage};

#[derive(Parser, Debug)]
#[command(name = "floodgate")]
#[command(about = "Floodgate signaling server and debug client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Listen port override for the server
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poke a running server over its control channel
    Debug {
        /// Server URL (e.g., ws://localhost:8080)
        #[arg(short, long, default_value = "ws://localhost:8080")]
        url: String,

        #[command(subcommand)]
        command: DebugCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum DebugCommands {
    /// Check liveness over the control channel
    Ping,
    /// Publish a stream and wait for the server's reply
    Publish {
        #[arg(short, long)]
        stream: String,
    },
}

pub async fn run_debug_client(url: String, command: DebugCommands) -> Result<()> {
    let ws_url = format!("{}/ws", url);
    debug!("connecting to {}", ws_url);

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&ws_url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => return Err(anyhow::anyhow!("connection failed: {e}")),
        Err(_) => {
            return Err(anyhow::anyhow!(
                "connection timeout - is the server running?"
            ))
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let request = match &command {
        DebugCommands::Ping => serde_json::json!({ "command": "ping" }),
        DebugCommands::Publish { stream } => {
            serde_json::json!({ "command": "publish", "streamId": stream })
        }
    };
    write.send(Message::Text(request.to_string().into())).await?;

    let reply = timeout(Duration::from_secs(5), async {
        while let Some(msg) = read.next().await {
            if let Message::Text(text) = msg? {
                let server_msg: ServerMessage = serde_json::from_str(&text)?;
                return Ok::<_, anyhow::Error>(server_msg);
            }
        }
        Err(anyhow::anyhow!("connection closed unexpectedly"))
    })
    .await;

    match reply {
        Ok(Ok(message)) => {
            println!("{}", encode(&message));
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(anyhow::anyhow!("timeout waiting for server reply")),
    }
}
