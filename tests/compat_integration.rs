
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use harbor::protocol::native::{Column, ExecuteRequest, Response, ResultSet, Value, ValueType};
use harbor::server::Phase;
use wire_test_support::{
    CountingSessionManager, ScriptedSessionManager, compat_login, password_message, query_message,
    read_message, read_until_ready, spawn_connection, ssl_request, startup_message,
    terminate_message, test_context, wait_closed,
};

#[tokio::test]
async fn test_compat_login_with_default_database_alias() {
    let (manager, sessions) = CountingSessionManager::new();
    let ctx = test_context(manager);
    let mut conn = spawn_connection(&ctx);

    let messages = compat_login(&mut conn.client, "sa", "/", "").await;
    let tags: Vec<u8> = messages.iter().map(|m| m.tag).collect();
    let mut expected = vec![b'R'];
    expected.extend([b'S'; 9]);
    expected.push(b'Z');
    assert_eq!(tags, expected);

    assert_eq!(messages[0].body, 0i32.to_be_bytes());
    assert!(
        messages
            .iter()
            .any(|m| m.tag == b'S' && m.text() == "server_version\08.3.1")
    );
    assert_eq!(messages.last().unwrap().body, b"I");
    assert_eq!(sessions.created(), 1);
}

#[tokio::test]
async fn test_compat_select() {
    let (manager, _sessions) = CountingSessionManager::new();
    let ctx = test_context(manager);
    let mut conn = spawn_connection(&ctx);
    compat_login(&mut conn.client, "SA", "/", "").await;

    conn.client
        .write_all(&query_message("SELECT 1, 'x', true;"))
        .await
        .unwrap();
    let messages = read_until_ready(&mut conn.client).await;
    let tags: Vec<u8> = messages.iter().map(|m| m.tag).collect();
    assert_eq!(tags, b"TDCZ");

    assert_eq!(&messages[0].body[..2], 3i16.to_be_bytes());
    assert_eq!(
        messages[1].data_row(),
        vec![Some("1".to_string()), Some("x".to_string()), Some("t".to_string())]
    );
    assert_eq!(messages[2].text(), "SELECT 1");
}

#[tokio::test]
async fn test_compat_transaction_status() {
    let (manager, _sessions) = CountingSessionManager::new();
    let ctx = test_context(manager);
    let mut conn = spawn_connection(&ctx);
    compat_login(&mut conn.client, "SA", "/", "").await;

    conn.client
        .write_all(&query_message("BEGIN; INSERT INTO t VALUES (1)"))
        .await
        .unwrap();
    let messages = read_until_ready(&mut conn.client).await;
    let texts: Vec<String> = messages[..2].iter().map(|m| m.text()).collect();
    assert_eq!(texts, ["BEGIN", "UPDATE 0"]);
    assert_eq!(messages[2].body, b"T");

    conn.client
        .write_all(&query_message("COMMIT"))
        .await
        .unwrap();
    let messages = read_until_ready(&mut conn.client).await;
    assert_eq!(messages[0].text(), "UPDATE 0");
    assert_eq!(messages[1].body, b"I");
}

#[tokio::test]
async fn test_compat_empty_query() {
    let (manager, _sessions) = CountingSessionManager::new();
    let ctx = test_context(manager);
    let mut conn = spawn_connection(&ctx);
    compat_login(&mut conn.client, "SA", "/", "").await;

    conn.client.write_all(&query_message("  ")).await.unwrap();
    let tags: Vec<u8> = read_until_ready(&mut conn.client)
        .await
        .iter()
        .map(|m| m.tag)
        .collect();
    assert_eq!(tags, b"IZ");
}

#[tokio::test]
async fn test_compat_typbasetype_lookup() {
    let (manager, _sessions) = CountingSessionManager::new();
    let ctx = test_context(manager);
    let mut conn = spawn_connection(&ctx);
    compat_login(&mut conn.client, "SA", "/", "").await;

    conn.client
        .write_all(&query_message(
            "select oid, typbasetype from pg_type where typname = 'lo'",
        ))
        .await
        .unwrap();
    let messages = read_until_ready(&mut conn.client).await;
    let tags: Vec<u8> = messages.iter().map(|m| m.tag).collect();
    assert_eq!(tags, b"TCZ");
    assert_eq!(&messages[0].body[..2], 2i16.to_be_bytes());
    assert_eq!(messages[1].text(), "SELECT 0");
}

#[tokio::test]
async fn test_compat_unsupported_message_keeps_connection() {
    let (manager, _sessions) = CountingSessionManager::new();
    let ctx = test_context(manager);
    let mut conn = spawn_connection(&ctx);
    compat_login(&mut conn.client, "SA", "/", "").await;

    // Flush ('H') is not part of the simple query flow.
    conn.client.write_all(&[b'H', 0, 0, 0, 4]).await.unwrap();
    let messages = read_until_ready(&mut conn.client).await;
    assert_eq!(messages[0].tag, b'E');
    assert_eq!(messages[0].error_field(b'C').as_deref(), Some("0A000"));
    assert!(messages[0].error_field(b'M').unwrap().contains("(H)"));

    conn.client
        .write_all(&query_message("SELECT 2"))
        .await
        .unwrap();
    let messages = read_until_ready(&mut conn.client).await;
    assert_eq!(messages[1].data_row(), vec![Some("2".to_string())]);
}

#[tokio::test]
async fn test_compat_query_error_is_reported() {
    let (manager, _sessions) = CountingSessionManager::new();
    let ctx = test_context(manager);
    let mut conn = spawn_connection(&ctx);
    compat_login(&mut conn.client, "SA", "/", "").await;

    conn.client
        .write_all(&query_message("SELECT * FROM t"))
        .await
        .unwrap();
    let messages = read_until_ready(&mut conn.client).await;
    let tags: Vec<u8> = messages.iter().map(|m| m.tag).collect();
    assert_eq!(tags, b"EZ");
    assert_eq!(messages[0].error_field(b'S').as_deref(), Some("ERROR"));
}

#[tokio::test]
async fn test_compat_bad_password_is_fatal() {
    let (manager, sessions) = CountingSessionManager::new();
    let ctx = test_context(manager);
    let mut conn = spawn_connection(&ctx);

    conn.client
        .write_all(&startup_message("alice", "sales"))
        .await
        .unwrap();
    assert_eq!(read_message(&mut conn.client).await.tag, b'R');
    conn.client
        .write_all(&password_message("wrong"))
        .await
        .unwrap();

    let error = read_message(&mut conn.client).await;
    assert_eq!(error.tag, b'E');
    assert_eq!(error.error_field(b'S').as_deref(), Some("FATAL"));
    assert_eq!(error.error_field(b'C').as_deref(), Some("28P01"));

    let mut rest = Vec::new();
    conn.client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
    wait_closed(&conn.handle).await;
    assert_eq!(sessions.created(), 0);
}

#[tokio::test]
async fn test_compat_unknown_database_is_fatal() {
    let (manager, _sessions) = CountingSessionManager::new();
    let ctx = test_context(manager);
    let mut conn = spawn_connection(&ctx);

    conn.client
        .write_all(&startup_message("SA", "nope"))
        .await
        .unwrap();
    assert_eq!(read_message(&mut conn.client).await.tag, b'R');
    conn.client.write_all(&password_message("")).await.unwrap();

    let error = read_message(&mut conn.client).await;
    assert_eq!(error.error_field(b'C').as_deref(), Some("3D000"));
    wait_closed(&conn.handle).await;
}

#[tokio::test]
async fn test_compat_ssl_request_is_refused() {
    let (manager, _sessions) = CountingSessionManager::new();
    let ctx = test_context(manager);
    let mut conn = spawn_connection(&ctx);

    conn.client.write_all(&ssl_request()).await.unwrap();
    assert_eq!(conn.client.read_u8().await.unwrap(), b'N');

    let messages = compat_login(&mut conn.client, "SA", "/", "").await;
    assert_eq!(messages.last().unwrap().tag, b'Z');
}

#[tokio::test]
async fn test_compat_startup_without_user_is_rejected() {
    let (manager, _sessions) = CountingSessionManager::new();
    let ctx = test_context(manager);
    let mut conn = spawn_connection(&ctx);

    // version 3.0, database only
    let mut packet = Vec::new();
    let body = b"\x00\x03\x00\x00database\0/\0\0";
    packet.extend_from_slice(&(body.len() as i32 + 4).to_be_bytes());
    packet.extend_from_slice(body);
    conn.client.write_all(&packet).await.unwrap();

    let error = read_message(&mut conn.client).await;
    assert_eq!(error.tag, b'E');
    assert_eq!(error.error_field(b'C').as_deref(), Some("08P01"));
    wait_closed(&conn.handle).await;
}

#[tokio::test]
async fn test_compat_client_abandons_password_prompt() {
    let (manager, sessions) = CountingSessionManager::new();
    let ctx = test_context(manager);
    let mut conn = spawn_connection(&ctx);

    conn.client
        .write_all(&startup_message("SA", "/"))
        .await
        .unwrap();
    assert_eq!(read_message(&mut conn.client).await.tag, b'R');
    drop(conn.client);

    wait_closed(&conn.handle).await;
    assert_eq!(sessions.created(), 0);
    assert_eq!(conn.transport.shutdowns(), 1);
}

#[tokio::test]
async fn test_compat_terminate_releases_once() {
    let (manager, sessions) = CountingSessionManager::new();
    let ctx = test_context(manager);
    let mut conn = spawn_connection(&ctx);
    compat_login(&mut conn.client, "SA", "/", "").await;

    conn.client.write_all(&terminate_message()).await.unwrap();
    let mut rest = Vec::new();
    conn.client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    wait_closed(&conn.handle).await;
    assert_eq!(sessions.closed(), 1);
    assert_eq!(conn.transport.shutdowns(), 1);
    assert_eq!(conn.transport.drops(), 1);
    assert!(ctx.registry().is_empty());
}

#[tokio::test]
async fn test_compat_query_after_stop_is_not_dispatched() {
    let (manager, sessions) = CountingSessionManager::new();
    let ctx = test_context(manager);
    let mut conn = spawn_connection(&ctx);
    compat_login(&mut conn.client, "SA", "/", "").await;

    conn.handle.request_stop();
    assert_eq!(conn.handle.phase(), Phase::Closing);

    conn.client
        .write_all(&query_message("SELECT 1"))
        .await
        .unwrap();
    let mut rest = Vec::new();
    conn.client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    wait_closed(&conn.handle).await;
    assert_eq!(sessions.executed(), 0);
    assert_eq!(sessions.closed(), 1);
}

fn nul_label(request: &ExecuteRequest) -> Option<Response> {
    (request.sql == "SELECT label").then(|| {
        Response::Data(ResultSet::from_rows(
            vec![Column::new("a\0b", ValueType::Integer)],
            vec![vec![Value::Integer(1)]],
        ))
    })
}

#[tokio::test]
async fn test_compat_unencodable_reply_becomes_error() {
    let ctx = test_context(ScriptedSessionManager::new(nul_label));
    let mut conn = spawn_connection(&ctx);
    compat_login(&mut conn.client, "SA", "/", "").await;

    conn.client
        .write_all(&query_message("SELECT label"))
        .await
        .unwrap();
    let messages = read_until_ready(&mut conn.client).await;
    let tags: Vec<u8> = messages.iter().map(|m| m.tag).collect();
    assert_eq!(tags, b"EZ");
    assert_eq!(messages[0].error_field(b'C').as_deref(), Some("XX000"));

    conn.client
        .write_all(&query_message("SELECT 2"))
        .await
        .unwrap();
    let messages = read_until_ready(&mut conn.client).await;
    assert_eq!(messages[1].data_row(), vec![Some("2".to_string())]);
}
