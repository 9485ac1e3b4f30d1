//! Simple-protocol integration tests against the scripted server.

mod common;

use common::{ServerConn, connect, spawn_server, test_opts};
use pglink::{Conn, Error, Value};

#[test]
fn exec_returns_command_tag() {
    let (port, server) = spawn_server(|server| {
        server.handshake();

        let payload = server.expect(b'Q');
        assert_eq!(
            ServerConn::query_text(&payload),
            "create table points (x int4)"
        );
        server.command_complete("CREATE TABLE");
        server.ready_for_query(b'I');
    });

    let mut conn = connect(port);
    let tag = conn.exec("create table points (x int4)").unwrap();
    assert_eq!(tag.as_str(), "CREATE TABLE");
    assert_eq!(tag.rows_affected(), 0);
    drop(conn);

    server.join().unwrap();
}

#[test]
fn multi_statement_surfaces_last_tag() {
    let (port, server) = spawn_server(|server| {
        server.handshake();
        server.expect(b'Q');
        server.command_complete("UPDATE 1");
        server.command_complete("UPDATE 7");
        server.ready_for_query(b'I');
    });

    let mut conn = connect(port);
    let tag = conn.exec("update a set x=1; update b set x=2").unwrap();
    assert_eq!(tag.as_str(), "UPDATE 7");
    assert_eq!(tag.rows_affected(), 7);
    drop(conn);

    server.join().unwrap();
}

#[test]
fn empty_query_yields_blank_tag() {
    let (port, server) = spawn_server(|server| {
        server.handshake();
        server.expect(b'Q');
        server.empty_query_response();
        server.ready_for_query(b'I');
    });

    let mut conn = connect(port);
    let tag = conn.exec("").unwrap();
    assert_eq!(tag.as_str(), "");
    drop(conn);

    server.join().unwrap();
}

#[test]
fn server_error_is_surfaced_and_connection_recovers() {
    let (port, server) = spawn_server(|server| {
        server.handshake();

        server.expect(b'Q');
        server.error_response("ERROR", "23505", "duplicate key value");
        server.ready_for_query(b'I');

        server.expect(b'Q');
        server.command_complete("SELECT 1");
        server.ready_for_query(b'I');
    });

    let mut conn = connect(port);
    let err = conn.exec("insert into t values (1)").unwrap_err();
    assert_eq!(err.sqlstate(), Some("23505"));
    assert!(conn.is_alive());

    let tag = conn.exec("select 1").unwrap();
    assert_eq!(tag.as_str(), "SELECT 1");
    drop(conn);

    server.join().unwrap();
}

#[test]
fn fatal_error_kills_connection() {
    let (port, server) = spawn_server(|server| {
        server.handshake();
        server.expect(b'Q');
        server.error_response("FATAL", "57P01", "terminating connection");
        server.ready_for_query(b'I');
    });

    let mut conn = connect(port);
    let err = conn.exec("select 1").unwrap_err();
    assert!(err.is_fatal());
    assert!(!conn.is_alive());
    assert!(conn.death_cause().is_some());

    // Subsequent operations fail fast without touching the socket
    assert!(matches!(conn.exec("select 1"), Err(Error::ConnectionDead)));
    drop(conn);

    server.join().unwrap();
}

#[test]
fn exec_params_interpolates_literals() {
    let (port, server) = spawn_server(|server| {
        server.handshake();

        let payload = server.expect(b'Q');
        assert_eq!(
            ServerConn::query_text(&payload),
            "insert into t values (42, 'it''s')"
        );
        server.command_complete("INSERT 0 1");
        server.ready_for_query(b'I');
    });

    let mut conn = connect(port);
    let tag = conn
        .exec_params(
            "insert into t values ($1, $2)",
            &[Value::from(42), Value::from("it's")],
        )
        .unwrap();
    assert_eq!(tag.rows_affected(), 1);
    drop(conn);

    server.join().unwrap();
}

#[test]
fn query_simple_collects_text_rows() {
    let (port, server) = spawn_server(|server| {
        server.handshake();

        server.expect(b'Q');
        server.row_description(&[("n", 23, 0), ("s", 25, 0)]);
        server.data_row(&[Some(b"1"), Some(b"one")]);
        server.data_row(&[Some(b"2"), None]);
        server.command_complete("SELECT 2");
        server.ready_for_query(b'I');
    });

    let mut conn = connect(port);
    let result = conn.query_simple("select n, s from t", &[]).unwrap();
    assert_eq!(result.columns, vec!["n", "s"]);
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0][0].as_deref(), Some(&b"1"[..]));
    assert_eq!(result.rows[1][1], None);
    assert_eq!(result.tag.rows_affected(), 2);
    drop(conn);

    server.join().unwrap();
}

#[test]
fn cleartext_password_handshake() {
    let (port, server) = spawn_server(|server| {
        server.handshake_cleartext("sekret");
        server.serve_simple_queries();
    });

    let mut conn = connect(port);
    conn.exec("select 1").unwrap();
    assert_eq!(conn.backend_pid(), Some(4242));
    assert_eq!(conn.parameter("server_version"), Some("16.3"));
    drop(conn);

    server.join().unwrap();
}

#[test]
fn notices_and_parameter_updates_are_absorbed() {
    let (port, server) = spawn_server(|server| {
        server.handshake();

        server.expect(b'Q');
        server.notice_response("something mildly interesting");
        server.parameter_status("application_name", "renamed");
        server.command_complete("SELECT 0");
        server.ready_for_query(b'I');
    });

    let mut conn = connect(port);
    conn.exec("select 1").unwrap();
    assert_eq!(conn.parameter("application_name"), Some("renamed"));
    drop(conn);

    server.join().unwrap();
}

#[test]
fn sanitizer_refused_without_conforming_strings() {
    let (port, server) = spawn_server(|server| {
        server.read_startup();
        server.auth_ok();
        server.parameter_status("standard_conforming_strings", "off");
        server.backend_key_data(1, 2);
        server.ready_for_query(b'I');
    });

    let mut conn = Conn::connect(test_opts(port)).unwrap();
    let err = conn
        .exec_params("select $1", &[Value::from("x")])
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
    drop(conn);

    server.join().unwrap();
}

#[test]
fn ping_uses_empty_query() {
    let (port, server) = spawn_server(|server| {
        server.handshake();
        let payload = server.expect(b'Q');
        assert_eq!(ServerConn::query_text(&payload), "");
        server.empty_query_response();
        server.ready_for_query(b'I');
    });

    let mut conn = connect(port);
    conn.ping().unwrap();
    drop(conn);

    server.join().unwrap();
}
