//! Request/reply behaviour of a single connection

use serde_json::json;

use crate::common::{listing_names, TestClient, TestDir, TestServer};

#[tokio::test]
async fn test_connect_receives_listing() {
    let dir = TestDir::new();
    dir.add_data_file("a.txt", &[(1.0, 2.0)])
        .add_file("ignored.csv", "");
    let server = TestServer::start(dir.path()).await;

    let (_client, snapshot) = server.connect().await;
    assert_eq!(listing_names(&snapshot), vec!["a.txt"]);
    server.wait_for_connections(1).await;
}

#[tokio::test]
async fn test_unknown_type_keeps_connection_open() {
    let dir = TestDir::new();
    dir.add_data_file("a.txt", &[]);
    let server = TestServer::start(dir.path()).await;
    let (mut client, _) = server.connect().await;

    client.send_text(r#"{"type":"does_not_exist"}"#).await;
    let reply = client.recv_json().await;
    assert_eq!(
        reply,
        json!({
            "type": "error",
            "success": false,
            "request_data": null,
            "error": "unknown message type"
        })
    );

    // Still usable
    client.send_json(json!({"type": "root_subscribe"})).await;
    let listing = client.recv_json().await;
    assert_eq!(listing["type"], "root_subscribe");
    assert_eq!(listing_names(&listing), vec!["a.txt"]);
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_missing_file_reports_read_failure() {
    let dir = TestDir::new();
    let server = TestServer::start(dir.path()).await;
    let (mut client, _) = server.connect().await;

    client
        .send_json(json!({"type": "file_subscribe", "data": {"name": "missing.txt"}}))
        .await;
    let reply = client.recv_json().await;
    assert_eq!(reply["type"], "file_subscribe");
    assert_eq!(reply["success"], false);
    assert_eq!(reply["error"], "reading file failed");
    assert_eq!(reply["request_data"], json!({"name": "missing.txt"}));
}

#[tokio::test]
async fn test_escaping_name_reports_read_failure() {
    let dir = TestDir::new();
    let server = TestServer::start(dir.path()).await;
    let (mut client, _) = server.connect().await;

    client
        .send_json(json!({"type": "file_subscribe", "data": {"name": "../etc/passwd"}}))
        .await;
    let reply = client.recv_json().await;
    assert_eq!(reply["error"], "reading file failed");
}

#[tokio::test]
async fn test_bad_params_and_bad_frames() {
    let dir = TestDir::new();
    let server = TestServer::start(dir.path()).await;
    let (mut client, _) = server.connect().await;

    client
        .send_json(json!({"type": "file_subscribe", "data": {"file": "a.txt"}}))
        .await;
    let reply = client.recv_json().await;
    assert_eq!(reply["type"], "file_subscribe");
    assert_eq!(reply["error"], "parsing params failed");
    assert_eq!(reply["request_data"], json!({"file": "a.txt"}));

    client.send_text("definitely not json").await;
    let reply = client.recv_json().await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["error"], "bad event data format");
    assert_eq!(reply["request_data"], "definitely not json");
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_binary_frames_are_accepted() {
    let dir = TestDir::new();
    dir.add_data_file("a.txt", &[(1.0, 2.0)]);
    let server = TestServer::start(dir.path()).await;
    let (mut client, _) = server.connect().await;

    client
        .send_binary(br#"{"type":"file_subscribe","data":{"name":"a.txt"}}"#)
        .await;
    let reply = client.recv_json().await;
    assert_eq!(reply, json!({"type": "file_subscribe", "data": [[1.0, 2.0]]}));
}

#[tokio::test]
async fn test_file_subscribe_returns_parsed_content() {
    let dir = TestDir::new();
    dir.add_file("a.txt", "header\r\n1.0 2.0\r\nbad row\r\n3.5 4.25\r\n\r\n");
    let server = TestServer::start(dir.path()).await;
    let (mut client, _) = server.connect().await;

    client
        .send_json(json!({"type": "file_subscribe", "data": {"name": "a.txt"}}))
        .await;
    let reply = client.recv_json().await;
    assert_eq!(
        reply,
        json!({"type": "file_subscribe", "data": [[1.0, 2.0], [3.5, 4.25]]})
    );
}

#[tokio::test]
async fn test_wrong_path_is_rejected() {
    let dir = TestDir::new();
    let server = TestServer::start(dir.path()).await;

    let result = TestClient::try_connect(&server.url_for("/other")).await;
    match result {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 404);
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("upgrade on the wrong path succeeded"),
    }
    assert_eq!(server.connection_count(), 0);
}
