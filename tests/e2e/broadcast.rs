//! Filesystem changes fanned out to subscribers

use std::time::Duration;

use serde_json::{json, Value};

use crate::common::{listing_names, TestClient, TestDir, TestServer};

fn file_subscribe(name: &str) -> Value {
    json!({"type": "file_subscribe", "data": {"name": name}})
}

async fn subscribe_to_file(client: &mut TestClient, name: &str) -> Value {
    client.send_json(file_subscribe(name)).await;
    let reply = client.recv_json().await;
    assert_eq!(reply["type"], "file_subscribe", "reply: {}", reply);
    reply
}

#[tokio::test]
async fn test_new_file_is_broadcast_to_root() {
    let dir = TestDir::new();
    dir.add_data_file("a.txt", &[(1.0, 1.0)]);
    let server = TestServer::start(dir.path()).await;

    let (mut client, snapshot) = server.connect().await;
    assert_eq!(listing_names(&snapshot), vec!["a.txt"]);

    dir.add_data_file("b.txt", &[(2.0, 2.0)]);
    let update = client
        .recv_until(|m| m["type"] == "root_subscribe" && listing_names(m).len() == 2)
        .await;
    assert_eq!(listing_names(&update), vec!["a.txt", "b.txt"]);
}

#[tokio::test]
async fn test_removed_file_is_broadcast_to_root() {
    let dir = TestDir::new();
    dir.add_data_file("a.txt", &[]).add_data_file("b.txt", &[]);
    let server = TestServer::start(dir.path()).await;
    let (mut client, _) = server.connect().await;

    dir.remove_file("a.txt");
    let update = client
        .recv_until(|m| m["type"] == "root_subscribe" && listing_names(m) == vec!["b.txt"])
        .await;
    assert_eq!(listing_names(&update), vec!["b.txt"]);
}

#[tokio::test]
async fn test_untracked_files_are_not_broadcast() {
    let dir = TestDir::new();
    let server = TestServer::start(dir.path()).await;
    let (mut client, _) = server.connect().await;

    dir.add_file("notes.md", "x");
    client
        .expect_no_message_of("root_subscribe", Duration::from_millis(500))
        .await;
}

#[tokio::test]
async fn test_write_reaches_only_that_files_subscribers() {
    let dir = TestDir::new();
    dir.add_data_file("a.txt", &[(1.0, 1.0)])
        .add_data_file("b.txt", &[(5.0, 5.0)]);
    let server = TestServer::start(dir.path()).await;

    let (mut first, _) = server.connect().await;
    let (mut second, _) = server.connect().await;
    let (mut other, _) = server.connect().await;

    subscribe_to_file(&mut first, "a.txt").await;
    subscribe_to_file(&mut second, "a.txt").await;
    let initial = subscribe_to_file(&mut other, "b.txt").await;
    assert_eq!(initial["data"], json!([[5.0, 5.0]]));

    dir.add_data_file("a.txt", &[(1.0, 1.0), (2.0, 4.0)]);
    let expected = json!({"type": "file_subscribe", "data": [[1.0, 1.0], [2.0, 4.0]]});

    // A write may be observed mid-way, so wait for the final content
    let seen_by_first = first.recv_until(|m| *m == expected).await;
    let seen_by_second = second.recv_until(|m| *m == expected).await;
    assert_eq!(seen_by_first, seen_by_second);

    other
        .expect_no_message_of("file_subscribe", Duration::from_millis(500))
        .await;
}

#[tokio::test]
async fn test_file_subscriber_leaves_root() {
    let dir = TestDir::new();
    dir.add_data_file("a.txt", &[(1.0, 1.0)]);
    let server = TestServer::start(dir.path()).await;
    let (mut client, _) = server.connect().await;

    subscribe_to_file(&mut client, "a.txt").await;
    dir.add_data_file("new.txt", &[]);

    client
        .expect_no_message_of("root_subscribe", Duration::from_millis(500))
        .await;
}

#[tokio::test]
async fn test_switching_back_to_root() {
    let dir = TestDir::new();
    dir.add_data_file("a.txt", &[(1.0, 1.0)]);
    let server = TestServer::start(dir.path()).await;
    let (mut client, _) = server.connect().await;

    subscribe_to_file(&mut client, "a.txt").await;
    client.send_json(json!({"type": "root_subscribe"})).await;
    let snapshot = client.recv_json().await;
    assert_eq!(listing_names(&snapshot), vec!["a.txt"]);

    // No longer a file subscriber
    dir.add_data_file("a.txt", &[(7.0, 7.0)]);
    client
        .expect_no_message_of("file_subscribe", Duration::from_millis(500))
        .await;
}

#[tokio::test]
async fn test_closed_client_does_not_affect_others() {
    let dir = TestDir::new();
    dir.add_data_file("a.txt", &[]);
    let server = TestServer::start(dir.path()).await;

    let (gone, _) = server.connect().await;
    let (mut stays, _) = server.connect().await;
    server.wait_for_connections(2).await;

    gone.close().await;
    server.wait_for_connections(1).await;

    dir.add_data_file("b.txt", &[]);
    let update = stays
        .recv_until(|m| m["type"] == "root_subscribe" && listing_names(m).len() == 2)
        .await;
    assert_eq!(listing_names(&update), vec!["a.txt", "b.txt"]);
}
