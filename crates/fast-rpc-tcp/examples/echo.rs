//! Echo server and client over TCP.
//!
//! The server answers `echo` calls and, once a client is connected, asks the
//! client for its name through the same connection.

use proven_fast_rpc::{ApiTable, BincodeSerializer, DispatchError};
use proven_fast_rpc_tcp::{ServerConfig, TcpClient, TcpServer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Echo response message.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EchoResponse {
    message: String,
    timestamp: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let server_apis = ApiTable::new(BincodeSerializer);
    server_apis.register("echo", |(message,): (String,)| async move {
        println!("Received echo request: {message}");
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| DispatchError::failed(e.to_string()))?
            .as_secs();
        Ok::<_, DispatchError>(EchoResponse { message, timestamp })
    })?;

    let server = Arc::new(
        TcpServer::bind("127.0.0.1:0", Arc::new(server_apis), ServerConfig::default()).await?,
    );
    let serving = Arc::clone(&server);
    tokio::spawn(async move { serving.serve().await });

    let client_apis = ApiTable::new(BincodeSerializer);
    client_apis.register("name", |(): ()| async { Ok::<_, DispatchError>("echo-client".to_string()) })?;

    let client = TcpClient::builder()
        .addr(server.local_addr())
        .dispatcher(Arc::new(client_apis))
        .connect()
        .await?;

    let response: EchoResponse = client
        .session()
        .call_api("echo", &("Hello, Fast!",))?
        .await?;
    println!("Echo response: {} at {}", response.message, response.timestamp);

    if let Some(session) = server.session(&client.local_addr()) {
        let name: String = session.call_api("name", &())?.await?;
        println!("Server is talking to {name}");
    }

    client.close().await;
    server.shutdown().await;
    Ok(())
}
