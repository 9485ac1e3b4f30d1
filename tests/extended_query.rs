//! Extended-protocol integration tests against the scripted server.

mod common;

use common::{ServerConn, connect, spawn_server};
use pglink::{Error, Value};

/// Answer the prepare phase (Parse + Describe-statement + Sync) for a
/// single int4 parameter / single int4 column statement.
fn answer_prepare(server: &mut ServerConn, param_oids: &[u32], columns: &[(&str, u32, u16)]) {
    let messages = server.read_until_sync();
    let tags: Vec<u8> = messages.iter().map(|(t, _)| *t).collect();
    assert_eq!(tags, vec![b'P', b'D', b'S'], "prepare phase shape");

    server.parse_complete();
    server.parameter_description(param_oids);
    if columns.is_empty() {
        server.no_data();
    } else {
        server.row_description(columns);
    }
    server.ready_for_query(b'I');
}

/// Read the execute phase (Bind + Describe-portal + Execute + Sync) and
/// return the Bind payload.
fn read_execute_phase(server: &mut ServerConn) -> Vec<u8> {
    let messages = server.read_until_sync();
    let tags: Vec<u8> = messages.iter().map(|(t, _)| *t).collect();
    assert_eq!(tags, vec![b'B', b'D', b'E', b'S'], "execute phase shape");
    messages.into_iter().next().map(|(_, p)| p).unwrap()
}

#[test]
fn int4_round_trip() {
    let (port, server) = spawn_server(|server| {
        server.handshake();

        answer_prepare(server, &[23], &[("v", 23, 0)]);

        let bind = read_execute_phase(server);
        // portal "" + statement name
        assert_eq!(bind[0], 0);
        let name_end = 1 + bind[1..].iter().position(|&b| b == 0).unwrap();
        let statement = std::str::from_utf8(&bind[1..name_end]).unwrap();
        assert!(statement.starts_with("pglink_s"), "statement {statement}");
        // one binary-format parameter, 4 bytes, value 42
        let rest = &bind[name_end + 1..];
        let nformats = i16::from_be_bytes([rest[0], rest[1]]);
        assert_eq!(nformats, 1);
        let format = i16::from_be_bytes([rest[2], rest[3]]);
        assert_eq!(format, 1);
        let nparams = i16::from_be_bytes([rest[4], rest[5]]);
        assert_eq!(nparams, 1);
        let len = i32::from_be_bytes([rest[6], rest[7], rest[8], rest[9]]);
        assert_eq!(len, 4);
        let value = i32::from_be_bytes([rest[10], rest[11], rest[12], rest[13]]);
        assert_eq!(value, 42);

        server.bind_complete();
        server.row_description(&[("v", 23, 1)]);
        server.data_row(&[Some(&42_i32.to_be_bytes())]);
        server.command_complete("SELECT 1");
        server.ready_for_query(b'I');
    });

    let mut conn = connect(port);
    let mut rows = conn.query("select $1::int4", &[Value::from(42)]).unwrap();
    assert!(rows.next());
    let (v,): (i32,) = rows.scan().unwrap();
    assert_eq!(v, 42);
    assert_eq!(rows.values().unwrap(), vec![Value::Int4(42)]);
    assert!(!rows.next());
    assert!(rows.err().is_none());
    assert_eq!(rows.command_tag().unwrap().rows_affected(), 1);
    let tag = rows.close().unwrap();
    assert_eq!(tag.as_str(), "SELECT 1");
    drop(conn);

    server.join().unwrap();
}

#[test]
fn null_parameter_and_null_scan() {
    let (port, server) = spawn_server(|server| {
        server.handshake();

        answer_prepare(server, &[23], &[("v", 23, 0)]);

        let bind = read_execute_phase(server);
        // NULL parameter travels as a -1 length
        let name_end = 1 + bind[1..].iter().position(|&b| b == 0).unwrap();
        let rest = &bind[name_end + 1..];
        let len = i32::from_be_bytes([rest[6], rest[7], rest[8], rest[9]]);
        assert_eq!(len, -1);

        server.bind_complete();
        server.row_description(&[("v", 23, 1)]);
        server.data_row(&[None]);
        server.command_complete("SELECT 1");
        server.ready_for_query(b'I');

        // Connection must remain usable after the failed scan
        server.expect(b'Q');
        server.command_complete("SELECT 1");
        server.ready_for_query(b'I');
    });

    let mut conn = connect(port);
    let mut rows = conn.query("select $1::int4", &[Value::Null]).unwrap();
    assert!(rows.next());

    // Nullable target sees no value
    let (v,): (Option<i32>,) = rows.scan().unwrap();
    assert_eq!(v, None);

    // Non-nullable target is a decode error, not a connection error
    let err = rows.scan::<(i32,)>().unwrap_err();
    assert!(matches!(err, Error::Decode(_)));

    rows.close().unwrap();
    assert!(conn.is_alive());
    conn.exec("select 1").unwrap();
    drop(conn);

    server.join().unwrap();
}

#[test]
fn auto_prepare_skips_parse_on_second_run() {
    let (port, server) = spawn_server(|server| {
        server.handshake();

        answer_prepare(server, &[], &[("v", 23, 0)]);

        for _ in 0..2 {
            read_execute_phase(server);
            server.bind_complete();
            server.row_description(&[("v", 23, 1)]);
            server.data_row(&[Some(&7_i32.to_be_bytes())]);
            server.command_complete("SELECT 1");
            server.ready_for_query(b'I');
        }
    });

    let mut conn = connect(port);
    for _ in 0..2 {
        let row = conn.query_row("select 7", &[]).unwrap();
        let (v,): (i32,) = row.scan().unwrap();
        assert_eq!(v, 7);
    }
    drop(conn);

    server.join().unwrap();
}

#[test]
fn prepare_is_idempotent_and_name_conflicts_fail() {
    let (port, server) = spawn_server(|server| {
        server.handshake();

        // First prepare reaches the wire
        answer_prepare(server, &[], &[("v", 23, 0)]);

        // Deallocate travels as a simple query
        let payload = server.expect(b'Q');
        assert_eq!(ServerConn::query_text(&payload), "deallocate \"ps\"");
        server.command_complete("DEALLOCATE");
        server.ready_for_query(b'I');

        // Preparing under the freed name reaches the wire again
        answer_prepare(server, &[], &[("v", 25, 0)]);
    });

    let mut conn = connect(port);
    conn.prepare("ps", "select 42::integer").unwrap();
    // Same name, same SQL: served from the cache, no wire traffic
    conn.prepare("ps", "select 42::integer").unwrap();

    // Same name, different SQL: duplicate-name error
    let err = conn.prepare("ps", "select 'x'::text").unwrap_err();
    assert!(matches!(err, Error::InvalidUsage(_)));

    conn.deallocate("ps").unwrap();
    conn.prepare("ps", "select 'x'::text").unwrap();
    drop(conn);

    server.join().unwrap();
}

#[test]
fn named_statement_execution_skips_parse() {
    let (port, server) = spawn_server(|server| {
        server.handshake();

        answer_prepare(server, &[23], &[("v", 23, 0)]);

        let bind = read_execute_phase(server);
        let name_end = 1 + bind[1..].iter().position(|&b| b == 0).unwrap();
        assert_eq!(std::str::from_utf8(&bind[1..name_end]).unwrap(), "ps");

        server.bind_complete();
        server.row_description(&[("v", 23, 1)]);
        server.data_row(&[Some(&5_i32.to_be_bytes())]);
        server.command_complete("SELECT 1");
        server.ready_for_query(b'I');
    });

    let mut conn = connect(port);
    conn.prepare("ps", "select $1::int4").unwrap();
    let row = conn.query_row("ps", &[Value::from(5)]).unwrap();
    let (v,): (i32,) = row.scan().unwrap();
    assert_eq!(v, 5);
    drop(conn);

    server.join().unwrap();
}

#[test]
fn schema_change_error_invalidates_auto_prepare() {
    let (port, server) = spawn_server(|server| {
        server.handshake();

        // First use: prepare + execute succeed
        answer_prepare(server, &[], &[("v", 23, 0)]);
        read_execute_phase(server);
        server.bind_complete();
        server.row_description(&[("v", 23, 1)]);
        server.data_row(&[Some(&1_i32.to_be_bytes())]);
        server.command_complete("SELECT 1");
        server.ready_for_query(b'I');

        // Second use: cached, bind fails with a stale-statement error
        read_execute_phase(server);
        server.error_response("ERROR", "42704", "cached plan must not change result type");
        server.ready_for_query(b'I');

        // Third use re-prepares from scratch
        answer_prepare(server, &[], &[("v", 23, 0)]);
        read_execute_phase(server);
        server.bind_complete();
        server.row_description(&[("v", 23, 1)]);
        server.data_row(&[Some(&3_i32.to_be_bytes())]);
        server.command_complete("SELECT 1");
        server.ready_for_query(b'I');
    });

    let mut conn = connect(port);

    let row = conn.query_row("select v from t", &[]).unwrap();
    assert_eq!(row.scan::<(i32,)>().unwrap().0, 1);

    let err = conn.query_row("select v from t", &[]).unwrap_err();
    assert_eq!(err.sqlstate(), Some("42704"));

    let row = conn.query_row("select v from t", &[]).unwrap();
    assert_eq!(row.scan::<(i32,)>().unwrap().0, 3);
    drop(conn);

    server.join().unwrap();
}

#[test]
fn abandoned_rows_are_drained_before_next_operation() {
    let (port, server) = spawn_server(|server| {
        server.handshake();

        answer_prepare(server, &[], &[("v", 23, 0)]);
        read_execute_phase(server);
        server.bind_complete();
        server.row_description(&[("v", 23, 1)]);
        for i in 0..5_i32 {
            server.data_row(&[Some(&i.to_be_bytes())]);
        }
        server.command_complete("SELECT 5");
        server.ready_for_query(b'I');

        server.expect(b'Q');
        server.command_complete("SELECT 1");
        server.ready_for_query(b'I');
    });

    let mut conn = connect(port);
    let mut rows = conn.query("select v from t", &[]).unwrap();
    assert!(rows.next()); // read one of five, then abandon
    drop(rows);

    // The implicit drain leaves the connection at ReadyForQuery
    conn.exec("select 1").unwrap();
    drop(conn);

    server.join().unwrap();
}

#[test]
fn query_row_requires_a_row() {
    let (port, server) = spawn_server(|server| {
        server.handshake();

        answer_prepare(server, &[], &[("v", 23, 0)]);
        read_execute_phase(server);
        server.bind_complete();
        server.row_description(&[("v", 23, 1)]);
        server.command_complete("SELECT 0");
        server.ready_for_query(b'I');
    });

    let mut conn = connect(port);
    let err = conn.query_row("select v from empty_t", &[]).unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
    drop(conn);

    server.join().unwrap();
}

#[test]
fn parameter_count_mismatch_fails_before_the_wire() {
    let (port, server) = spawn_server(|server| {
        server.handshake();
        answer_prepare(server, &[23], &[("v", 23, 0)]);
        // No execute phase follows: the mismatch is caught client-side
    });

    let mut conn = connect(port);
    let err = conn.query("select $1::int4", &[]).unwrap_err();
    assert!(matches!(err, Error::Encode(_)));
    drop(conn);

    server.join().unwrap();
}
