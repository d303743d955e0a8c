mod common;

use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};

use sqlwire_core::error::ConnectionErrorKind;
use sqlwire_core::{Error, Value};
use sqlwire_mysql::{EngineState, ExecuteResult, MySqlAsyncConnection, MySqlConnection};

use common::MockServer;

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn single_value(result: &ExecuteResult) -> Value {
    let rs = result.rows().expect("result set");
    assert_eq!(rs.len(), 1);
    assert_eq!(rs.column_names(), vec!["x".to_string()]);
    rs.rows[0][0].clone()
}

#[test]
fn blocking_select_parameter() {
    let server = MockServer::start();
    let mut conn = MySqlConnection::connect(server.config()).unwrap();
    assert_eq!(conn.server_version(), Some("8.0.36-mock"));
    assert_eq!(conn.connection_id(), 99);
    assert_eq!(conn.state(), EngineState::Idle);

    let stmt = conn.prepare("SELECT ? AS x").unwrap();
    assert_eq!(stmt.param_count(), 1);
    assert_eq!(stmt.column_count(), 1);

    let result = conn.execute(&stmt, &[Value::BigInt(42)]).unwrap();
    assert_eq!(single_value(&result), Value::BigInt(42));
    let maps = result.rows().unwrap().to_maps();
    assert_eq!(maps[0].get("x"), Some(&Value::BigInt(42)));

    drop(conn);
    assert_eq!(server.finish(), vec![0x16, 0x17]);
}

#[test]
fn blocking_pipelined_executes() {
    let server = MockServer::start();
    let mut conn = MySqlConnection::connect(server.config()).unwrap();
    let stmt = conn.prepare("SELECT ? AS x").unwrap();

    let first = conn.send_execute(&stmt, &[Value::Int(70_000)]).unwrap();
    let second = conn.send_execute(&stmt, &[Value::BigInt(-1)]).unwrap();

    // Waiting on the later ticket buffers the earlier completion
    let later = conn.wait(second).unwrap().into_executed().unwrap();
    let earlier = conn.wait(first).unwrap().into_executed().unwrap();
    assert_eq!(single_value(&later), Value::BigInt(-1));
    assert_eq!(single_value(&earlier), Value::BigInt(70_000));

    // Already collected
    assert!(conn.wait(first).is_err());

    drop(conn);
    server.finish();
}

#[test]
fn blocking_wrong_password() {
    let server = MockServer::start();
    let config = server.config().password("wrong");
    match MySqlConnection::connect(config) {
        Err(Error::Connection(e)) => assert_eq!(e.kind, ConnectionErrorKind::Authentication),
        other => panic!("expected auth failure, got {:?}", other.map(|_| ())),
    }
    server.finish();
}

#[test]
fn blocking_param_count_mismatch_sends_nothing() {
    let server = MockServer::start();
    let mut conn = MySqlConnection::connect(server.config()).unwrap();
    let stmt = conn.prepare("SELECT ? AS x").unwrap();
    assert!(conn.execute(&stmt, &[]).is_err());
    assert_eq!(conn.state(), EngineState::Idle);

    drop(conn);
    assert_eq!(server.finish(), vec![0x16]);
}

#[cfg(feature = "teardown")]
#[test]
fn blocking_close_sends_quit() {
    let server = MockServer::start();
    let mut conn = MySqlConnection::connect(server.config()).unwrap();
    let stmt = conn.prepare("SELECT ? AS x").unwrap();
    conn.close_statement(&stmt).unwrap();
    conn.close().unwrap();
    assert_eq!(server.finish(), vec![0x16, 0x19, 0x01]);
}

#[test]
fn async_select_parameter() {
    let server = MockServer::start();
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let mut conn = unwrap_outcome(MySqlAsyncConnection::connect(&cx, server.config()).await);
        assert_eq!(conn.connection_id(), 99);

        let stmt = unwrap_outcome(conn.prepare(&cx, "SELECT ? AS x").await);
        let result = unwrap_outcome(conn.execute(&cx, &stmt, &[Value::BigInt(42)]).await);
        assert_eq!(single_value(&result), Value::BigInt(42));

        let rows = result.rows().unwrap().named_rows();
        assert_eq!(rows[0].get_named::<i64>("x").unwrap(), 42);
    });

    assert_eq!(server.finish(), vec![0x16, 0x17]);
}
