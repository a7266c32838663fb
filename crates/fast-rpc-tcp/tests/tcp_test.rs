use proven_fast_rpc::{ApiTable, BincodeSerializer, DispatchError, Error};
use proven_fast_rpc_tcp::{ServerConfig, TcpClient, TcpServer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Greeting {
    name: String,
    times: u32,
}

fn server_apis() -> Arc<ApiTable<BincodeSerializer>> {
    let apis = ApiTable::new(BincodeSerializer);
    apis.register("add", |(a, b): (i32, i32)| async move {
        Ok::<_, DispatchError>(a + b)
    })
    .unwrap();
    apis.register("greet", |(greeting,): (Greeting,)| async move {
        Ok::<_, DispatchError>(format!("hello {}", greeting.name).repeat(greeting.times as usize))
    })
    .unwrap();
    apis.register("fail", |(reason,): (String,)| async move {
        Err::<(), _>(DispatchError::failed(reason))
    })
    .unwrap();
    apis.register("sleep", |(millis,): (u64,)| async move {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok::<_, DispatchError>(millis)
    })
    .unwrap();
    Arc::new(apis)
}

async fn start_server(config: ServerConfig) -> Arc<TcpServer> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = Arc::new(
        TcpServer::bind("127.0.0.1:0", server_apis(), config)
            .await
            .unwrap(),
    );
    let serving = Arc::clone(&server);
    tokio::spawn(async move { serving.serve().await });
    server
}

async fn connect(server: &TcpServer) -> TcpClient {
    TcpClient::builder()
        .addr(server.local_addr())
        .connect()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_request_response() {
    let server = start_server(ServerConfig::default()).await;
    let client = connect(&server).await;

    let sum: i32 = client.session().call_api("add", &(2, 3)).unwrap().await.unwrap();
    assert_eq!(sum, 5);

    let greeting = Greeting {
        name: "fast".to_string(),
        times: 2,
    };
    let text: String = client
        .session()
        .call_api("greet", &(greeting,))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(text, "hello fasthello fast");

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_remote_failure_carries_description() {
    let server = start_server(ServerConfig::default()).await;
    let client = connect(&server).await;

    let err = client
        .session()
        .call_api::<(), _>("fail", &("disk on fire",))
        .unwrap()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Remote(ref description) if description == "disk on fire"));

    let err = client
        .session()
        .call_api::<(), _>("missing", &())
        .unwrap()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Remote(ref description) if description.contains("missing")));

    server.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_calls_share_connection() {
    let server = start_server(ServerConfig::default()).await;
    let client = connect(&server).await;

    // Slower calls are issued first so responses come back out of order
    let calls: Vec<_> = (0..10u64)
        .rev()
        .map(|i| client.session().call_api::<u64, _>("sleep", &(i * 10,)).unwrap())
        .collect();

    let results = futures::future::try_join_all(calls).await.unwrap();
    assert_eq!(results, (0..10u64).rev().map(|i| i * 10).collect::<Vec<_>>());
    assert_eq!(client.session().pending_calls(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_server_calls_back_into_client() {
    let server = start_server(ServerConfig::default()).await;

    let client_apis = ApiTable::new(BincodeSerializer);
    client_apis
        .register("whoami", |(): ()| async { Ok::<_, DispatchError>("client".to_string()) })
        .unwrap();
    let client = TcpClient::builder()
        .addr(server.local_addr())
        .dispatcher(Arc::new(client_apis))
        .connect()
        .await
        .unwrap();

    // A round trip guarantees the server has registered the connection
    let _: i32 = client.session().call_api("add", &(0, 0)).unwrap().await.unwrap();
    assert_eq!(server.peers(), vec![client.local_addr()]);

    let session = server.session(&client.local_addr()).unwrap();
    let name: String = session.call_api("whoami", &()).unwrap().await.unwrap();
    assert_eq!(name, "client");

    server.shutdown().await;
}

#[tokio::test]
async fn test_fire_and_forget() {
    let server = start_server(ServerConfig::default()).await;
    let client = connect(&server).await;

    client.session().invoke_api("sleep", &(1u64,)).unwrap();
    assert_eq!(client.session().pending_calls(), 0);

    // The connection keeps working after the unanswered request
    let sum: i32 = client.session().call_api("add", &(1, 1)).unwrap().await.unwrap();
    assert_eq!(sum, 2);

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_fails_pending_calls() {
    let server = start_server(ServerConfig::default()).await;
    let client = connect(&server).await;

    let stuck = client
        .session()
        .call_api::<u64, _>("sleep", &(60_000u64,))
        .unwrap();

    // Let the request reach the server before tearing it down
    let _: i32 = client.session().call_api("add", &(0, 0)).unwrap().await.unwrap();
    server.shutdown().await;

    assert!(stuck.await.unwrap_err().is_connection_closed());
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_client_close_fails_pending_calls() {
    let server = start_server(ServerConfig::default()).await;
    let client = connect(&server).await;
    let session = Arc::clone(client.session());

    let stuck = session.call_api::<u64, _>("sleep", &(60_000u64,)).unwrap();
    client.close().await;

    assert!(stuck.await.unwrap_err().is_connection_closed());
    assert!(session.is_disposed());
    assert!(session.call_api::<i32, _>("add", &(1, 1)).unwrap_err().is_connection_closed());

    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_stream_closes_connection() {
    let server = start_server(ServerConfig::default()).await;

    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    // Valid length, but the is_request flag byte is 7
    stream
        .write_all(&[0, 0, 0, 11, 0, 0, 0, 0, 1, 7, 1])
        .await
        .unwrap();

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(5), async {
        use tokio::io::AsyncReadExt;
        stream.read(&mut buf).await
    })
    .await
    .unwrap();
    // The server hangs up without answering
    assert!(matches!(read, Ok(0) | Err(_)));

    server.shutdown().await;
}

#[tokio::test]
async fn test_max_connections_rejects_extra_clients() {
    let server = start_server(ServerConfig::default().with_max_connections(1)).await;
    let first = connect(&server).await;
    let _: i32 = first.session().call_api("add", &(1, 1)).unwrap().await.unwrap();

    let second = connect(&server).await;
    let outcome = match second.session().call_api::<i32, _>("add", &(1, 2)) {
        Ok(pending) => pending.await,
        Err(e) => Err(e),
    };
    assert!(outcome.unwrap_err().is_connection_closed());

    // The first client is unaffected
    let sum: i32 = first.session().call_api("add", &(2, 2)).unwrap().await.unwrap();
    assert_eq!(sum, 4);

    server.shutdown().await;
}

#[tokio::test]
async fn test_call_timeout() {
    let server = start_server(ServerConfig::default()).await;
    let client = TcpClient::builder()
        .addr(server.local_addr())
        .call_timeout(Duration::from_millis(50))
        .connect()
        .await
        .unwrap();

    let err = client
        .session()
        .call_api::<u64, _>("sleep", &(5_000u64,))
        .unwrap()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert_eq!(client.session().pending_calls(), 0);

    // The late response is dropped and the connection stays usable
    let sum: i32 = client.session().call_api("add", &(3, 4)).unwrap().await.unwrap();
    assert_eq!(sum, 7);

    server.shutdown().await;
}
