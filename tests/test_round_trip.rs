//! Round trips of bind values through identity queries, and decoding of
//! every column type the driver defines.
//!
//! Run with: cargo test --test test_round_trip

use chrono::{FixedOffset, NaiveDate, TimeDelta};
use futures::stream::TryStreamExt;
use oci8_rs::native::{
    ColumnSpec, DateTimeParts, DateTimeValue, DayToSecond, MemoryEngine, NativeApi, NativeCell,
    QueryScript, Script, StmtAttr, YearToMonth, ZoneOffset,
};
use oci8_rs::{
    positional, Connection, ConnectionConfig, Cursor, CursorStreamExt, Error, Integer,
    NamedValue, OracleType, Row, Value, ZonedDateTime,
};
use std::sync::Arc;

fn connect() -> (Arc<MemoryEngine>, Arc<Connection>) {
    let engine = Arc::new(MemoryEngine::new());
    let conn = Connection::in_memory(&engine, ConnectionConfig::default());
    (engine, conn)
}

/// Run an identity query over `values` and return the single row.
async fn echo(conn: &Arc<Connection>, values: Vec<Value>) -> Row {
    let placeholders: Vec<String> = (1..=values.len()).map(|i| format!(":{}", i)).collect();
    let sql = format!("SELECT {} FROM dual", placeholders.join(", "));
    let mut rows = conn.query(&sql, &positional(values)).await.unwrap();
    let row = rows.next().await.unwrap().expect("Expected one row");
    assert!(rows.next().await.unwrap().is_none());
    row
}

#[tokio::test]
async fn test_echo_scalars() {
    let (engine, conn) = connect();
    let row = echo(
        &conn,
        vec![
            Value::from("hello"),
            Value::from(-7i8),
            Value::from(1_000_000i32),
            Value::from(i64::MAX),
            Value::from(42u16),
            Value::from(2.75f64),
            Value::from(1.5f32),
            Value::from(true),
            Value::from(false),
            Value::from(vec![0xDEu8, 0xAD, 0xBE, 0xEF]),
        ],
    )
    .await;

    assert_eq!(row.len(), 10);
    assert_eq!(row.get(0), Some(&Value::Text("hello".into())));
    assert_eq!(row.get(1), Some(&Value::Int(Integer::I64(-7))));
    assert_eq!(row.get(2), Some(&Value::Int(Integer::I64(1_000_000))));
    assert_eq!(row.get(3), Some(&Value::Int(Integer::I64(i64::MAX))));
    assert_eq!(row.get(4), Some(&Value::Int(Integer::I64(42))));
    assert_eq!(row.get(5), Some(&Value::Float(2.75)));
    assert_eq!(row.get(6), Some(&Value::Float(1.5)));
    assert_eq!(row.get(7), Some(&Value::Int(Integer::I64(1))));
    assert_eq!(row.get(8), Some(&Value::Int(Integer::I64(0))));
    assert_eq!(row.get(9), Some(&Value::Bytes(vec![0xDE, 0xAD, 0xBE, 0xEF])));

    assert_eq!(engine.live_allocations(), 0);
    assert_eq!(engine.live_statements(), 0);
}

#[tokio::test]
async fn test_echo_unsigned_high_bit() {
    let (engine, conn) = connect();
    let row = echo(
        &conn,
        vec![
            Value::from(200u8),
            Value::from(u8::MAX),
            Value::from(40000u16),
            Value::from(3_000_000_000u32),
            Value::from(u32::MAX),
            Value::from(i64::MAX as u64),
            Value::from(i64::MAX as usize),
        ],
    )
    .await;

    let ints: Vec<Option<i64>> = row
        .values()
        .iter()
        .map(|v| match v {
            Value::Int(int) => int.to_i64(),
            _ => None,
        })
        .collect();
    assert_eq!(
        ints,
        vec![
            Some(200),
            Some(255),
            Some(40000),
            Some(3_000_000_000),
            Some(u32::MAX as i64),
            Some(i64::MAX),
            Some(i64::MAX),
        ]
    );

    let err = conn
        .query("SELECT :1, :2 FROM dual", &positional([Value::from(1u8), Value::from(1u64 << 63)]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TypeConversion { .. }), "got {:?}", err);
    assert_eq!(engine.live_allocations(), 0);
    assert_eq!(engine.live_statements(), 0);
}

#[tokio::test]
async fn test_echo_multibyte_text() {
    let (_engine, conn) = connect();
    let row = echo(&conn, vec![Value::from("日本語テキスト"), Value::from("ñandú")]).await;
    assert_eq!(row.get(0).and_then(Value::as_str), Some("日本語テキスト"));
    assert_eq!(row.get(1).and_then(Value::as_str), Some("ñandú"));
}

#[tokio::test]
async fn test_null_and_empty_string() {
    let (_engine, conn) = connect();
    let row = echo(
        &conn,
        vec![Value::Null, Value::from(""), Value::from(None::<i64>), Value::from("x")],
    )
    .await;
    assert!(row.get(0).unwrap().is_null());
    // Empty text binds as NULL.
    assert!(row.get(1).unwrap().is_null());
    assert!(row.get(2).unwrap().is_null());
    assert_eq!(row.get(3), Some(&Value::from("x")));
}

#[tokio::test]
async fn test_other_values_bind_as_text() {
    let (_engine, conn) = connect();
    let addr: std::net::IpAddr = "10.0.0.1".parse().unwrap();
    let row = echo(&conn, vec![Value::other(addr)]).await;
    assert_eq!(row.get(0), Some(&Value::from("10.0.0.1")));
}

#[tokio::test]
async fn test_named_binds_become_column_names() {
    let (_engine, conn) = connect();
    let args = vec![
        NamedValue::named(1, "first_name", "Grace"),
        NamedValue::named(2, "age", 85i64),
    ];
    let mut rows = conn
        .query("SELECT :first_name, :age FROM dual", &args)
        .await
        .unwrap();
    let row = rows.next().await.unwrap().unwrap();
    assert_eq!(row.get_by_name("FIRST_NAME"), Some(&Value::from("Grace")));
    assert_eq!(row.get_by_name("age"), Some(&Value::from(85i64)));
}

#[tokio::test]
async fn test_timestamp_round_trip_with_region() {
    let (_engine, conn) = connect();
    let local = NaiveDate::from_ymd_opt(2024, 3, 15)
        .unwrap()
        .and_hms_nano_opt(10, 30, 15, 123_456_789)
        .unwrap();
    let ts = ZonedDateTime::new(local, FixedOffset::east_opt(19800).unwrap(), "Asia/Kolkata");

    let row = echo(&conn, vec![Value::from(ts.clone())]).await;
    let Some(Value::Timestamp(fetched)) = row.get(0) else {
        panic!("Expected Timestamp value, got {:?}", row.get(0));
    };
    assert_eq!(fetched.to_datetime(), ts.to_datetime());
    assert_eq!(fetched.zone(), "+05:30");
    assert_eq!(row.columns()[0].data_type, OracleType::TimestampTz);
}

#[tokio::test]
async fn test_timestamp_unknown_region_uses_offset() {
    let (_engine, conn) = connect();
    let local = NaiveDate::from_ymd_opt(2030, 7, 4)
        .unwrap()
        .and_hms_opt(18, 0, 0)
        .unwrap();
    let ts = ZonedDateTime::new(local, FixedOffset::west_opt(3 * 3600 + 1800).unwrap(), "Mars/Base");

    let row = echo(&conn, vec![Value::from(ts.clone())]).await;
    let fetched = row.get(0).and_then(Value::as_timestamp).unwrap();
    assert_eq!(fetched.offset_seconds(), -(3 * 3600 + 1800));
    assert_eq!(fetched.to_utc(), ts.to_utc());
}

#[tokio::test]
async fn test_timestamp_from_chrono() {
    let (_engine, conn) = connect();
    let utc = NaiveDate::from_ymd_opt(2000, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc();
    let row = echo(&conn, vec![Value::from(utc)]).await;
    assert_eq!(row.get(0).and_then(Value::as_timestamp).map(|t| t.to_utc()), Some(utc));
}

#[tokio::test]
async fn test_timestamp_unresolvable_zone_fails_without_leaks() {
    let (engine, conn) = connect();
    let local = NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    // Neither the region nor +15:00 is accepted.
    let ts = ZonedDateTime::new(local, FixedOffset::east_opt(15 * 3600).unwrap(), "Nowhere/Land");

    let result = conn
        .query("SELECT :1 FROM dual", &positional([ts]))
        .await;
    match result {
        Err(Error::Oracle { code, .. }) => assert_eq!(code, 1882),
        other => panic!("Expected ORA-01882, got {:?}", other.map(|_| ())),
    }
    assert_eq!(engine.live_allocations(), 0);
    assert_eq!(engine.live_statements(), 0);
}

#[tokio::test]
async fn test_numeric_classification() {
    let sql = "SELECT amount, qty, plain, ratio, rounded, bd FROM measures";
    let engine = Arc::new(MemoryEngine::new().with_script(
        sql,
        Script::query(
            QueryScript::new(vec![
                ColumnSpec::number("AMOUNT", 10, 2),
                ColumnSpec::number("QTY", 10, 0),
                ColumnSpec::number("PLAIN", 0, 0),
                ColumnSpec::number("RATIO", 126, -127),
                ColumnSpec::number("ROUNDED", 38, -2),
                ColumnSpec::binary_double("BD"),
            ])
            .row(vec![
                NativeCell::Double(3.25),
                NativeCell::Int(7),
                NativeCell::Double(1.5),
                NativeCell::Double(0.125),
                NativeCell::Int(1200),
                NativeCell::Double(-2.5),
            ]),
        ),
    ));
    let conn = Connection::in_memory(&engine, ConnectionConfig::default());
    let mut rows = conn.query(sql, &[]).await.unwrap();

    let kinds: Vec<String> = rows.columns().iter().map(|c| c.data_type.to_string()).collect();
    assert_eq!(
        kinds,
        vec!["NUMBER(10,2)", "NUMBER(10)", "NUMBER", "FLOAT(126)", "NUMBER(38,-2)", "BINARY_DOUBLE"]
    );

    let row = rows.next().await.unwrap().unwrap();
    assert_eq!(
        row.values(),
        &[
            Value::Float(3.25),
            Value::Int(Integer::I64(7)),
            Value::Float(1.5),
            Value::Float(0.125),
            Value::Int(Integer::I64(1200)),
            Value::Float(-2.5),
        ]
    );
}

#[tokio::test]
async fn test_lob_interval_and_misc_columns() {
    let sql = "SELECT * FROM everything";
    let clob = "lorem ipsum ".repeat(1000);
    let blob: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    let date = DateTimeValue {
        parts: DateTimeParts {
            year: 1999,
            month: 12,
            day: 31,
            hour: 23,
            minute: 59,
            second: 59,
            nanosecond: 0,
        },
        offset: ZoneOffset::default(),
    };
    let engine = Arc::new(MemoryEngine::new().with_script(
        sql,
        Script::query(
            QueryScript::new(vec![
                ColumnSpec::clob("DOC"),
                ColumnSpec::blob("IMAGE"),
                ColumnSpec::interval_day_second("ELAPSED"),
                ColumnSpec::interval_year_month("TENURE"),
                ColumnSpec::date("BORN"),
                ColumnSpec::raw("HASH", 4),
                ColumnSpec::long("NOTES"),
                ColumnSpec::rowid("RID"),
                ColumnSpec::char("CODE", 3),
            ])
            .row(vec![
                NativeCell::Clob(clob.clone()),
                NativeCell::Blob(blob.clone()),
                NativeCell::IntervalDaySecond(DayToSecond {
                    days: 2,
                    hours: 3,
                    minutes: 4,
                    seconds: 5,
                    nanoseconds: 600,
                }),
                NativeCell::IntervalYearMonth(YearToMonth { years: 1, months: 2 }),
                NativeCell::Timestamp(date),
                NativeCell::Bytes(vec![1, 2, 3, 4]),
                NativeCell::Text("long text".into()),
                NativeCell::Text("AAAR3sAAEAAAACXAAA".into()),
                NativeCell::Text("ABC".into()),
            ]),
        ),
    ));
    let conn = Connection::in_memory(
        &engine,
        ConnectionConfig::default().with_lob_buffer_size(1024),
    );
    let rows = conn.query(sql, &[]).await.unwrap();
    let all: Vec<Row> = rows.into_stream().try_collect().await.unwrap();
    assert_eq!(all.len(), 1);
    let row = &all[0];

    assert_eq!(row.get_by_name("DOC"), Some(&Value::Text(clob)));
    assert_eq!(row.get_by_name("IMAGE"), Some(&Value::Bytes(blob)));
    assert_eq!(
        row.get_by_name("ELAPSED").and_then(Value::as_interval),
        Some(TimeDelta::seconds(2 * 86400 + 3 * 3600 + 4 * 60 + 5) + TimeDelta::nanoseconds(600))
    );
    assert_eq!(row.get_by_name("TENURE"), Some(&Value::IntervalYearMonth(14)));
    let born = row.get_by_name("BORN").and_then(Value::as_timestamp).unwrap();
    assert_eq!(born.local().to_string(), "1999-12-31 23:59:59");
    assert_eq!(row.get_by_name("HASH"), Some(&Value::Bytes(vec![1, 2, 3, 4])));
    assert_eq!(row.get_by_name("NOTES"), Some(&Value::Bytes(b"long text".to_vec())));
    assert_eq!(row.get_by_name("RID"), Some(&Value::from("AAAR3sAAEAAAACXAAA")));
    assert_eq!(row.get_by_name("CODE"), Some(&Value::from("ABC")));

    assert_eq!(engine.live_allocations(), 0);
}

#[tokio::test]
async fn test_prefetch_applied_to_queries() {
    let engine = Arc::new(MemoryEngine::new());
    let config = ConnectionConfig::parse("prefetch_rows=250&prefetch_memory=65536").unwrap();
    let conn = Connection::in_memory(&engine, config);
    let h = conn.handles();

    let mut stmt = conn.prepare("SELECT :1 FROM dual").unwrap();
    let handle = stmt.handle();
    let rows = stmt.query(&positional([1i64])).await.unwrap();
    assert_eq!(engine.stmt_attr_get(handle, StmtAttr::PrefetchRows, h.err), Ok(250));
    assert_eq!(engine.stmt_attr_get(handle, StmtAttr::PrefetchMemory, h.err), Ok(65536));
    drop(rows);

    // Zero leaves the engine defaults alone.
    let default_conn = Connection::in_memory(&engine, ConnectionConfig::default());
    let mut stmt = default_conn.prepare("SELECT :1 FROM dual").unwrap();
    let handle = stmt.handle();
    let _rows = stmt.query(&positional([1i64])).await.unwrap();
    assert_eq!(engine.stmt_attr_get(handle, StmtAttr::PrefetchRows, h.err), Ok(1));
    assert_eq!(engine.stmt_attr_get(handle, StmtAttr::PrefetchMemory, h.err), Ok(0));
}

#[tokio::test]
async fn test_statement_reuse_rebinds() {
    let (engine, conn) = connect();
    let mut stmt = conn.prepare("SELECT :1 FROM dual").unwrap();
    assert_eq!(stmt.num_input(), 1);
    for i in 0..3i64 {
        let mut rows = stmt.query(&positional([i])).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get(0), Some(&Value::from(i)));
    }
    stmt.close().unwrap();
    assert_eq!(engine.live_allocations(), 0);
    assert_eq!(engine.live_statements(), 0);
}
