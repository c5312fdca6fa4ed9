//! Parameter binding.
//!
//! Every argument is marshaled into native memory owned by the bind list's
//! arena and registered with the statement, by `:name` when the argument
//! has a name and by position otherwise. The list is built atomically:
//! when any argument fails, dropping the partial list frees every buffer
//! and descriptor allocated so far, including the failing one.

use crate::arena::Arena;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::native::constants::*;
use crate::native::{
    BindHandle, BindTarget, DateTimeParts, DescriptorHandle, DescriptorKind, NativeStorage,
    StmtHandle,
};
use crate::types::{offset_text, Arg, NamedValue, Output, Value, ZonedDateTime};
use chrono::{Datelike, Timelike};
use tracing::{debug, trace};

/// A registered bind and the memory behind it.
#[derive(Debug)]
pub(crate) struct BoundParam {
    pub data_type: u16,
    pub size: u32,
    pub storage: NativeStorage,
    pub indicator: i16,
    pub handle: BindHandle,
    /// Destination to copy the value back into after execution.
    pub out: Option<Output>,
}

#[derive(Debug)]
pub(crate) struct BindList {
    params: Vec<BoundParam>,
    // Declared last so the handles above never outlive their memory.
    _arena: Arena,
}

impl BindList {
    pub(crate) fn params(&self) -> &[BoundParam] {
        &self.params
    }

    pub(crate) fn len(&self) -> usize {
        self.params.len()
    }
}

/// Native representation chosen for one argument.
struct Marshaled {
    data_type: u16,
    size: u32,
    storage: NativeStorage,
    indicator: i16,
}

impl Marshaled {
    fn null() -> Self {
        Self {
            data_type: SQLT_STR,
            size: 0,
            storage: NativeStorage::None,
            indicator: OCI_IND_NULL,
        }
    }

    fn buffer(arena: &mut Arena, data_type: u16, data: &[u8]) -> Result<Self> {
        let buf = arena.buffer_from(data)?;
        Ok(Self {
            data_type,
            size: data.len() as u32,
            storage: NativeStorage::Buffer(buf),
            indicator: OCI_IND_NOTNULL,
        })
    }
}

/// Bind `args` to `stmt`.
pub(crate) fn bind(conn: &Connection, stmt: StmtHandle, args: &[NamedValue]) -> Result<BindList> {
    let mut arena = Arena::new(conn.api().clone(), conn.handles().env);
    let mut params = Vec::with_capacity(args.len());

    for arg in args {
        let (value, out) = match &arg.arg {
            Arg::In(value) => (value.clone(), None),
            Arg::Out(output) => (conn.converter().convert(output)?, Some(output.clone())),
        };
        let marshaled = marshal(conn, &mut arena, &value, out.as_ref())?;
        let target = BindTarget {
            storage: marshaled.storage,
            max_size: marshaled.size,
            data_type: marshaled.data_type,
            indicator: marshaled.indicator,
        };

        let h = conn.handles();
        let registered = match &arg.name {
            Some(name) => conn
                .api()
                .bind_by_name(stmt, h.err, &format!(":{}", name), &target),
            None => conn
                .api()
                .bind_by_pos(stmt, h.err, arg.ordinal as u32, &target),
        };
        let handle = registered.map_err(|rc| conn.error(rc))?;
        trace!(
            ordinal = arg.ordinal,
            name = arg.name.as_deref(),
            data_type = target.data_type,
            size = target.max_size,
            null = target.indicator == OCI_IND_NULL,
            out = out.is_some(),
            "bound parameter"
        );

        params.push(BoundParam {
            data_type: marshaled.data_type,
            size: marshaled.size,
            storage: marshaled.storage,
            indicator: marshaled.indicator,
            handle,
            out,
        });
    }

    debug!(count = params.len(), allocations = arena.len(), "bound parameters");
    Ok(BindList {
        params,
        _arena: arena,
    })
}

fn marshal(
    conn: &Connection,
    arena: &mut Arena,
    value: &Value,
    out: Option<&Output>,
) -> Result<Marshaled> {
    if let Some(Output::Other(_)) = out {
        return Ok(Marshaled::null());
    }
    let is_out = out.is_some();

    match value {
        Value::Null => Ok(Marshaled::null()),
        Value::Bytes(bytes) => Marshaled::buffer(arena, SQLT_BIN, bytes),
        Value::Timestamp(ts) => {
            let desc = bind_timestamp(conn, arena, ts)?;
            Ok(Marshaled {
                data_type: SQLT_TIMESTAMP_TZ,
                size: std::mem::size_of::<usize>() as u32,
                storage: NativeStorage::Descriptor(desc),
                indicator: OCI_IND_NOTNULL,
            })
        }
        Value::Text(text) => {
            let mut m = if is_out {
                let capacity = match out {
                    Some(Output::Str { capacity, .. }) => *capacity,
                    _ => 0,
                };
                let mut data = vec![0u8; text.len().max(capacity) + 1];
                data[..text.len()].copy_from_slice(text.as_bytes());
                Marshaled::buffer(arena, SQLT_STR, &data)?
            } else {
                Marshaled::buffer(arena, SQLT_AFC, text.as_bytes())?
            };
            if text.is_empty() {
                m.indicator = OCI_IND_NULL;
            }
            Ok(m)
        }
        Value::Int(int) => {
            let bytes = int.to_le_bytes().ok_or_else(|| {
                Error::type_conversion(format!(
                    "uint64 values with high bit set are not supported: {}",
                    int
                ))
            })?;
            Marshaled::buffer(arena, SQLT_INT, &bytes)
        }
        Value::Bool(b) => Marshaled::buffer(arena, SQLT_INT, &[*b as u8]),
        Value::Float(f) => Marshaled::buffer(arena, SQLT_BDOUBLE, &f.to_le_bytes()),
        Value::Float32(f) => Marshaled::buffer(arena, SQLT_BDOUBLE, &(*f as f64).to_le_bytes()),
        Value::IntervalDaySecond(_) | Value::IntervalYearMonth(_) | Value::Other(_) => {
            if is_out {
                Ok(Marshaled::null())
            } else {
                Marshaled::buffer(arena, SQLT_CHR, value.to_string().as_bytes())
            }
        }
    }
}

/// Build a TIMESTAMP WITH TIME ZONE descriptor.
///
/// The zone name is tried first. If the engine rejects it, or resolves it
/// to a different offset than the value carries, the numeric offset is
/// used instead.
fn bind_timestamp(
    conn: &Connection,
    arena: &mut Arena,
    ts: &ZonedDateTime,
) -> Result<DescriptorHandle> {
    let desc = arena.descriptor(DescriptorKind::TimestampTz)?;
    let local = ts.local();
    let parts = DateTimeParts {
        year: local.year() as i16,
        month: local.month() as u8,
        day: local.day() as u8,
        hour: local.hour() as u8,
        minute: local.minute() as u8,
        second: local.second() as u8,
        nanosecond: local.nanosecond(),
    };
    let api = conn.api();
    let h = conn.handles();

    let retry = if api
        .datetime_construct(h.env, h.err, desc, &parts, ts.zone())
        .is_success()
    {
        let offset = api
            .datetime_zone_offset(h.env, h.err, desc)
            .map_err(|rc| conn.error(rc))?;
        offset.seconds() != ts.offset_seconds()
    } else {
        true
    };

    if retry {
        let zone = offset_text(ts.offset_seconds());
        debug!(zone = ts.zone(), fallback = %zone, "retrying timestamp bind with numeric offset");
        let rc = api.datetime_construct(h.env, h.err, desc, &parts, &zone);
        if !rc.is_success() {
            return Err(conn.error(rc));
        }
    }
    Ok(desc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionConfig;
    use crate::native::{BindKey, MemoryEngine, NativeApi};
    use crate::types::{positional, Slot};
    use chrono::{FixedOffset, NaiveDate};
    use std::sync::Arc;

    fn setup(engine: MemoryEngine) -> (Arc<MemoryEngine>, Arc<Connection>, StmtHandle) {
        let engine = Arc::new(engine);
        let conn = Connection::in_memory(&engine, ConnectionConfig::default());
        let h = conn.handles();
        let stmt = engine
            .stmt_prepare(h.svc, h.err, "BEGIN proc(:1, :2, :3); END;")
            .unwrap();
        (engine, conn, stmt)
    }

    #[test]
    fn test_dispatch_table() {
        let (engine, conn, stmt) = setup(MemoryEngine::new());
        let args = positional(vec![
            Value::Null,
            Value::from(vec![1u8, 2, 3]),
            Value::from("abc"),
            Value::from(""),
            Value::from(7i16),
            Value::from(true),
            Value::from(1.5f32),
            Value::other(std::net::Ipv4Addr::LOCALHOST),
        ]);
        let list = bind(&conn, stmt, &args).unwrap();
        let kinds: Vec<(u16, u32, i16)> = list
            .params()
            .iter()
            .map(|p| (p.data_type, p.size, p.indicator))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (SQLT_STR, 0, OCI_IND_NULL),
                (SQLT_BIN, 3, OCI_IND_NOTNULL),
                (SQLT_AFC, 3, OCI_IND_NOTNULL),
                (SQLT_AFC, 0, OCI_IND_NULL),
                (SQLT_INT, 2, OCI_IND_NOTNULL),
                (SQLT_INT, 1, OCI_IND_NOTNULL),
                (SQLT_BDOUBLE, 8, OCI_IND_NOTNULL),
                (SQLT_CHR, 9, OCI_IND_NOTNULL),
            ]
        );
        assert!(matches!(list.params()[0].storage, NativeStorage::None));
        drop(list);
        assert_eq!(engine.live_allocations(), 0);
    }

    #[test]
    fn test_unsigned_binds_widen() {
        let (engine, conn, stmt) = setup(MemoryEngine::new());
        let args = positional([Value::from(200u8), Value::from(40000u16), Value::from(3_000_000_000u32)]);
        let list = bind(&conn, stmt, &args).unwrap();
        let sizes: Vec<(u16, u32)> = list.params().iter().map(|p| (p.data_type, p.size)).collect();
        assert_eq!(sizes, vec![(SQLT_INT, 2), (SQLT_INT, 4), (SQLT_INT, 8)]);
        drop(list);

        let args = positional([Value::from(1i32), Value::from(u64::MAX)]);
        let err = bind(&conn, stmt, &args).unwrap_err();
        assert!(matches!(err, Error::TypeConversion { .. }));
        assert_eq!(engine.live_allocations(), 0);
    }

    #[test]
    fn test_output_string_capacity() {
        let (_engine, conn, stmt) = setup(MemoryEngine::new());
        let short = Slot::new("ab".to_string());
        let long = Slot::new("abcdef".to_string());
        let other = Slot::new(Value::Null);
        let args = vec![
            NamedValue::out(1, Output::text(&short, 32)),
            NamedValue::out(2, Output::text(&long, 2)),
            NamedValue::out(3, &other),
        ];
        let list = bind(&conn, stmt, &args).unwrap();
        let p = list.params();
        assert_eq!((p[0].data_type, p[0].size), (SQLT_STR, 33));
        assert_eq!((p[1].data_type, p[1].size), (SQLT_STR, 7));
        assert_eq!((p[2].data_type, p[2].indicator), (SQLT_STR, OCI_IND_NULL));
        assert!(matches!(p[2].storage, NativeStorage::None));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_failed_bind_frees_everything() {
        let (engine, conn, stmt) = setup(MemoryEngine::new().with_failing_bind(BindKey::Position(3)));
        let args = positional(vec![Value::from("a"), Value::from(1i64), Value::from(2.0f64)]);
        let err = bind(&conn, stmt, &args).unwrap_err();
        assert_eq!(err.code(), Some(ORA_ILLEGAL_VARIABLE));
        assert_eq!(engine.live_allocations(), 0);
    }

    #[test]
    fn test_failed_allocation_frees_everything() {
        let (engine, conn, stmt) = setup(MemoryEngine::new().with_allocation_limit(2));
        let args = positional(vec![Value::from("a"), Value::from("b"), Value::from("c")]);
        let err = bind(&conn, stmt, &args).unwrap_err();
        assert_eq!(err.code(), Some(ORA_OUT_OF_MEMORY));
        assert_eq!(engine.live_allocations(), 0);
    }

    #[test]
    fn test_named_bind_failure() {
        let (engine, conn, stmt) = setup(MemoryEngine::new().with_failing_bind(BindKey::name("b")));
        let args = vec![NamedValue::named(1, "a", 1i32), NamedValue::named(2, "b", 2i32)];
        assert!(bind(&conn, stmt, &args).is_err());
        assert_eq!(engine.live_allocations(), 0);
    }

    #[test]
    fn test_timestamp_unknown_region_falls_back_to_offset() {
        let (engine, conn, stmt) = setup(MemoryEngine::new());
        let local = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let ts = ZonedDateTime::new(local, FixedOffset::east_opt(9 * 3600).unwrap(), "JST");
        let list = bind(&conn, stmt, &positional([ts])).unwrap();
        let NativeStorage::Descriptor(desc) = list.params()[0].storage else {
            panic!("Expected descriptor storage");
        };
        let h = conn.handles();
        let offset = engine.datetime_zone_offset(h.env, h.err, desc).unwrap();
        assert_eq!(offset.seconds(), 9 * 3600);
    }

    #[test]
    fn test_timestamp_mismatched_region_falls_back_to_offset() {
        let (engine, conn, stmt) = setup(MemoryEngine::new());
        let local = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        // Region resolves to +09:00 but the value says +10:00.
        let ts = ZonedDateTime::new(local, FixedOffset::east_opt(10 * 3600).unwrap(), "Asia/Tokyo");
        let list = bind(&conn, stmt, &positional([ts])).unwrap();
        let NativeStorage::Descriptor(desc) = list.params()[0].storage else {
            panic!("Expected descriptor storage");
        };
        let h = conn.handles();
        let value = engine.datetime_get(h.env, h.err, desc).unwrap();
        assert_eq!(value.offset.seconds(), 10 * 3600);
        assert_eq!(value.parts.hour, 12);
    }
}
