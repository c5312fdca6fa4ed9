//! Result column describe and define.
//!
//! After a query executes, each select-list column is described and given
//! native storage sized for its type: an inline buffer for character,
//! binary and numeric data, or a descriptor for datetimes, intervals and
//! LOB locators. All storage and the shared indicator array live in one
//! arena, so a failure on column `n` frees what columns `1..n` allocated.

use crate::arena::Arena;
use crate::connection::Connection;
use crate::decode::{
    decode_datetime, decode_day_second, decode_f64, decode_i64, decode_text, decode_year_month,
};
use crate::error::{Error, Result};
use crate::native::constants::*;
use crate::native::{
    BufferHandle, DefineTarget, DescriptorHandle, DescriptorKind, IndicatorHandle,
    IndicatorSlot, NativeStorage, ParamAttr, StmtAttr, StmtHandle,
};
use crate::types::{Column, ColumnInfo, Integer, OracleType, Value};
use std::sync::Arc;
use tracing::{debug, trace};

/// How a fetched column is turned into a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchKind {
    Text,
    Bytes,
    Int,
    Double,
    Timestamp,
    IntervalDaySecond,
    IntervalYearMonth,
    Clob,
    Blob,
}

/// Storage requested for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StorageKind {
    /// Inline buffer of the given byte length.
    Buffer(usize),
    Descriptor(DescriptorKind),
    /// LOB locator plus a stream buffer used to read the content.
    Lob { stream: usize },
}

/// Fetch layout chosen from describe metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FetchLayout {
    pub kind: FetchKind,
    pub define_type: u16,
    pub size: u32,
    pub storage: StorageKind,
}

const LOCATOR_SIZE: u32 = std::mem::size_of::<usize>() as u32;

impl FetchLayout {
    fn buffer(kind: FetchKind, define_type: u16, size: u32, capacity: usize) -> Self {
        Self {
            kind,
            define_type,
            size,
            storage: StorageKind::Buffer(capacity),
        }
    }

    fn descriptor(kind: FetchKind, define_type: u16, descriptor: DescriptorKind) -> Self {
        Self {
            kind,
            define_type,
            size: LOCATOR_SIZE,
            storage: StorageKind::Descriptor(descriptor),
        }
    }
}

/// Pick the define type and storage for a described column.
///
/// `precision` and `scale` only matter for `SQLT_NUM`.
pub(crate) fn classify(
    data_type: u16,
    data_size: u32,
    precision: i16,
    scale: i16,
    lob_buffer_size: usize,
) -> FetchLayout {
    match data_type {
        SQLT_CHR | SQLT_AFC | SQLT_VCS | SQLT_AVC => {
            let size = data_size.saturating_mul(CHARSET_EXPANSION as u32);
            FetchLayout::buffer(FetchKind::Text, SQLT_CHR, size, size as usize + 1)
        }
        SQLT_BIN => {
            FetchLayout::buffer(FetchKind::Bytes, SQLT_BIN, data_size, data_size as usize)
        }
        SQLT_NUM => {
            if (OracleType::Number { precision, scale }).is_fractional_number() {
                FetchLayout::buffer(FetchKind::Double, SQLT_BDOUBLE, 8, NUMBER_BUFFER_SIZE)
            } else {
                FetchLayout::buffer(FetchKind::Int, SQLT_INT, 8, NUMBER_BUFFER_SIZE)
            }
        }
        SQLT_INT => FetchLayout::buffer(FetchKind::Int, SQLT_INT, 8, NUMBER_BUFFER_SIZE),
        SQLT_BFLOAT | SQLT_IBFLOAT | SQLT_BDOUBLE | SQLT_IBDOUBLE => {
            FetchLayout::buffer(FetchKind::Double, SQLT_BDOUBLE, 8, NUMBER_BUFFER_SIZE)
        }
        SQLT_LNG => FetchLayout::buffer(
            FetchKind::Bytes,
            SQLT_BIN,
            LONG_BUFFER_SIZE as u32,
            LONG_BUFFER_SIZE,
        ),
        SQLT_CLOB | SQLT_BLOB => FetchLayout {
            kind: if data_type == SQLT_CLOB {
                FetchKind::Clob
            } else {
                FetchKind::Blob
            },
            define_type: data_type,
            size: LOCATOR_SIZE,
            storage: StorageKind::Lob {
                stream: lob_buffer_size.max(data_size as usize),
            },
        },
        SQLT_TIMESTAMP | SQLT_DAT => {
            FetchLayout::descriptor(FetchKind::Timestamp, SQLT_TIMESTAMP, DescriptorKind::Timestamp)
        }
        SQLT_TIMESTAMP_TZ | SQLT_TIMESTAMP_LTZ => FetchLayout::descriptor(
            FetchKind::Timestamp,
            SQLT_TIMESTAMP_TZ,
            DescriptorKind::TimestampTz,
        ),
        SQLT_INTERVAL_DS => FetchLayout::descriptor(
            FetchKind::IntervalDaySecond,
            SQLT_INTERVAL_DS,
            DescriptorKind::IntervalDaySecond,
        ),
        SQLT_INTERVAL_YM => FetchLayout::descriptor(
            FetchKind::IntervalYearMonth,
            SQLT_INTERVAL_YM,
            DescriptorKind::IntervalYearMonth,
        ),
        SQLT_RDD => FetchLayout::buffer(
            FetchKind::Text,
            SQLT_CHR,
            ROWID_BUFFER_SIZE as u32,
            ROWID_BUFFER_SIZE,
        ),
        _ => {
            let size = data_size.saturating_add(1);
            FetchLayout::buffer(FetchKind::Text, SQLT_CHR, size, size as usize)
        }
    }
}

/// A defined column and the native storage behind it.
#[derive(Debug)]
pub(crate) struct DefinedColumn {
    kind: FetchKind,
    storage: NativeStorage,
    size: u32,
    stream: Option<(BufferHandle, usize)>,
    slot: IndicatorSlot,
}

/// Every defined column of a result set.
#[derive(Debug)]
pub(crate) struct ColumnSet {
    columns: Vec<DefinedColumn>,
    info: Arc<ColumnInfo>,
    indicators: IndicatorHandle,
    // Declared last: defines must be gone before their memory is.
    arena: Arena,
}

impl ColumnSet {
    pub(crate) fn info(&self) -> &Arc<ColumnInfo> {
        &self.info
    }

    pub(crate) fn len(&self) -> usize {
        self.columns.len()
    }

    /// Decode the row currently held in the define buffers.
    pub(crate) fn read_row(&self, conn: &Connection) -> Result<Vec<Value>> {
        self.columns
            .iter()
            .enumerate()
            .map(|(index, column)| column.read(conn, index))
            .collect()
    }

    /// Hand the native memory to the caller; it is freed when the returned
    /// arena drops. The set must not be read afterwards.
    pub(crate) fn detach(&mut self) -> Arena {
        trace!(
            indicators = self.indicators.0,
            allocations = self.arena.len(),
            "detaching column buffers"
        );
        self.arena.take()
    }
}

/// Describe and define the select list of an executed statement.
pub(crate) fn describe(conn: &Connection, stmt: StmtHandle) -> Result<ColumnSet> {
    let api = conn.api();
    let h = conn.handles();
    let count = api
        .stmt_attr_get(stmt, StmtAttr::ParamCount, h.err)
        .map_err(|rc| conn.error(rc))? as usize;

    let mut arena = Arena::new(Arc::clone(api), h.env);
    let indicators = arena.indicators(count)?;
    let mut columns = Vec::with_capacity(count);
    let mut info = Vec::with_capacity(count);

    for index in 0..count {
        let position = index as u32 + 1;
        // Parameter descriptors are only needed while describing.
        let mut scratch = Arena::new(Arc::clone(api), h.env);
        let param = api
            .param_get(stmt, h.err, position)
            .map_err(|rc| conn.error(rc))?;
        let param = scratch.adopt_param(param);

        let attr = |attr: ParamAttr| {
            api.param_attr_get(param, attr, h.err)
                .map_err(|rc| conn.error(rc))
        };
        let data_type = attr(ParamAttr::DataType)? as u16;
        let name = api.param_name(param, h.err).map_err(|rc| conn.error(rc))?;
        let data_size = attr(ParamAttr::DataSize)?.max(0) as u32;
        let (precision, scale) = if data_type == SQLT_NUM {
            (attr(ParamAttr::Precision)? as i16, attr(ParamAttr::Scale)? as i16)
        } else {
            (0, 0)
        };

        let layout = classify(
            data_type,
            data_size,
            precision,
            scale,
            conn.config().lob_buffer_size,
        );
        let (storage, stream) = match layout.storage {
            StorageKind::Buffer(capacity) => (NativeStorage::Buffer(arena.buffer(capacity)?), None),
            StorageKind::Descriptor(kind) => (NativeStorage::Descriptor(arena.descriptor(kind)?), None),
            StorageKind::Lob { stream } => {
                let locator = arena.descriptor(DescriptorKind::Lob)?;
                let buffer = arena.buffer(stream)?;
                (NativeStorage::Descriptor(locator), Some((buffer, stream)))
            }
        };
        let slot = IndicatorSlot {
            array: indicators,
            index,
        };

        api.define_by_pos(
            stmt,
            h.err,
            position,
            &DefineTarget {
                storage,
                size: layout.size,
                data_type: layout.define_type,
                indicator: slot,
            },
        )
        .map_err(|rc| conn.error(rc))?;

        trace!(
            position,
            name = %name,
            data_type,
            data_size,
            define_type = layout.define_type,
            size = layout.size,
            "defined column"
        );
        columns.push(DefinedColumn {
            kind: layout.kind,
            storage,
            size: layout.size,
            stream,
            slot,
        });
        info.push(Column::new(
            name,
            data_type,
            OracleType::from_raw(data_type, precision, scale, data_size),
            data_size,
        ));
    }

    debug!(columns = count, allocations = arena.len(), "defined result columns");
    Ok(ColumnSet {
        columns,
        info: Arc::new(ColumnInfo::new(info)),
        indicators,
        arena,
    })
}

impl DefinedColumn {
    fn read(&self, conn: &Connection, index: usize) -> Result<Value> {
        let api = conn.api();
        let h = conn.handles();
        let ind = api
            .indicator_read(self.slot.array, self.slot.index)
            .map_err(|rc| conn.error(rc))?;
        if ind.is_null() {
            return Ok(Value::Null);
        }
        if ind.is_truncated() {
            debug!(column = index, returned = ind.rlen, "column value truncated");
        }

        match (self.kind, self.storage) {
            (FetchKind::Text, NativeStorage::Buffer(buf)) => {
                let data = self.read_buffer(conn, buf, ind.rlen as usize)?;
                Ok(Value::Text(decode_text(&data)))
            }
            (FetchKind::Bytes, NativeStorage::Buffer(buf)) => {
                Ok(Value::Bytes(self.read_buffer(conn, buf, ind.rlen as usize)?))
            }
            (FetchKind::Int, NativeStorage::Buffer(buf)) => {
                let data = self.read_buffer(conn, buf, self.size as usize)?;
                Ok(Value::Int(Integer::I64(decode_i64(&data, index)?)))
            }
            (FetchKind::Double, NativeStorage::Buffer(buf)) => {
                let data = self.read_buffer(conn, buf, self.size as usize)?;
                Ok(Value::Float(decode_f64(&data, index)?))
            }
            (FetchKind::Timestamp, NativeStorage::Descriptor(desc)) => {
                let value = api
                    .datetime_get(h.env, h.err, desc)
                    .map_err(|rc| conn.error(rc))?;
                Ok(Value::Timestamp(decode_datetime(&value, index)?))
            }
            (FetchKind::IntervalDaySecond, NativeStorage::Descriptor(desc)) => {
                let value = api
                    .interval_get_day_second(h.env, h.err, desc)
                    .map_err(|rc| conn.error(rc))?;
                Ok(Value::IntervalDaySecond(decode_day_second(&value)))
            }
            (FetchKind::IntervalYearMonth, NativeStorage::Descriptor(desc)) => {
                let value = api
                    .interval_get_year_month(h.env, h.err, desc)
                    .map_err(|rc| conn.error(rc))?;
                Ok(Value::IntervalYearMonth(decode_year_month(&value)))
            }
            (FetchKind::Clob, NativeStorage::Descriptor(desc)) => {
                Ok(Value::Text(decode_text(&self.read_lob(conn, desc, index)?)))
            }
            (FetchKind::Blob, NativeStorage::Descriptor(desc)) => {
                Ok(Value::Bytes(self.read_lob(conn, desc, index)?))
            }
            (kind, storage) => Err(Error::marshal(
                index,
                format!("{:?} column has unexpected storage {:?}", kind, storage),
            )),
        }
    }

    fn read_buffer(&self, conn: &Connection, buf: BufferHandle, len: usize) -> Result<Vec<u8>> {
        conn.api()
            .buffer_read(buf, len)
            .map_err(|rc| conn.error(rc))
    }

    /// Read a LOB through its locator, one stream buffer at a time.
    fn read_lob(
        &self,
        conn: &Connection,
        locator: DescriptorHandle,
        index: usize,
    ) -> Result<Vec<u8>> {
        let Some((stream, capacity)) = self.stream else {
            return Err(Error::marshal(index, "LOB column has no stream buffer"));
        };
        let api = conn.api();
        let h = conn.handles();
        let mut content = Vec::new();
        let mut offset = 0u64;
        loop {
            let n = api
                .lob_read(h.svc, h.err, locator, offset, stream, capacity)
                .map_err(|rc| conn.error(rc))?;
            if n == 0 {
                break;
            }
            let chunk = api.buffer_read(stream, n).map_err(|rc| conn.error(rc))?;
            if chunk.len() < n {
                return Err(Error::buffer_too_small(n, chunk.len()));
            }
            content.extend_from_slice(&chunk);
            offset += n as u64;
        }
        trace!(bytes = content.len(), "read LOB");
        Ok(content)
    }
}
