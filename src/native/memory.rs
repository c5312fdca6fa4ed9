//! In-process native engine.
//!
//! `MemoryEngine` emulates the subset of the Oracle client the driver uses.
//! Statements are answered from scripts registered per SQL text; an
//! unscripted `SELECT` echoes its bind values back as one row, which makes
//! every bind type round-trippable without a server.
//!
//! Every buffer, indicator array, descriptor and parameter handle is
//! tracked so tests can assert that nothing leaks.

use super::constants::*;
use super::{
    BindHandle, BindTarget, DateTimeParts, DateTimeValue, DayToSecond, DefineHandle,
    DefineTarget, DescriptorHandle, DescriptorKind, EnvHandle, ErrorHandle, ErrorRecord,
    Indicator, IndicatorHandle, NativeApi, NativeResult, NativeStorage, ParamAttr, ParamHandle,
    ReturnCode, SessionHandles, StmtAttr, StmtHandle, SvcHandle, YearToMonth, ZoneOffset,
    BufferHandle,
};
use bytes::BytesMut;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const ORA_INCONSISTENT_TYPES: u32 = 932;
const ORA_INVALID_NUMBER: u32 = 1722;
const ORA_INVALID_ROWID: u32 = 1410;
const ORA_FETCH_OUT_OF_SEQUENCE: u32 = 1002;
const ORA_INVALID_DATETIME: u32 = 1878;

/// Fixed-offset time zone regions known to the engine.
const ZONE_REGIONS: &[(&str, i32)] = &[
    ("UTC", 0),
    ("GMT", 0),
    ("Etc/UTC", 0),
    ("Asia/Tokyo", 9 * 3600),
    ("Asia/Kolkata", 5 * 3600 + 30 * 60),
    ("Asia/Shanghai", 8 * 3600),
    ("Europe/Moscow", 3 * 3600),
    ("Australia/Brisbane", 10 * 3600),
    ("America/Phoenix", -7 * 3600),
];

/// A value stored in or produced by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeCell {
    Null,
    Text(String),
    Bytes(Vec<u8>),
    Int(i64),
    Double(f64),
    Timestamp(DateTimeValue),
    IntervalDaySecond(DayToSecond),
    IntervalYearMonth(YearToMonth),
    Clob(String),
    Blob(Vec<u8>),
}

impl NativeCell {
    fn to_text(&self) -> String {
        match self {
            NativeCell::Null => String::new(),
            NativeCell::Text(s) | NativeCell::Clob(s) => s.clone(),
            NativeCell::Int(i) => i.to_string(),
            NativeCell::Double(d) => d.to_string(),
            NativeCell::Bytes(b) | NativeCell::Blob(b) => {
                b.iter().map(|byte| format!("{:02X}", byte)).collect()
            }
            NativeCell::Timestamp(v) => {
                let p = v.parts;
                let sign = if v.offset.seconds() < 0 { '-' } else { '+' };
                format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:09} {}{:02}:{:02}",
                    p.year,
                    p.month,
                    p.day,
                    p.hour,
                    p.minute,
                    p.second,
                    p.nanosecond,
                    sign,
                    v.offset.hours.unsigned_abs(),
                    v.offset.minutes.unsigned_abs()
                )
            }
            NativeCell::IntervalDaySecond(d) => format!(
                "{:+} {:02}:{:02}:{:02}.{:09}",
                d.days, d.hours, d.minutes, d.seconds, d.nanoseconds
            ),
            NativeCell::IntervalYearMonth(y) => format!("{:+}-{:02}", y.years, y.months),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        match self {
            NativeCell::Bytes(b) | NativeCell::Blob(b) => b.clone(),
            other => other.to_text().into_bytes(),
        }
    }

    fn to_i64(&self) -> Option<i64> {
        match self {
            NativeCell::Int(i) => Some(*i),
            NativeCell::Double(d) if d.is_finite() => Some(d.trunc() as i64),
            NativeCell::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn to_f64(&self) -> Option<f64> {
        match self {
            NativeCell::Int(i) => Some(*i as f64),
            NativeCell::Double(d) => Some(*d),
            NativeCell::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Describe metadata of a scripted result column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: u16,
    pub data_size: u32,
    pub precision: i32,
    pub scale: i32,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, data_type: u16, data_size: u32) -> Self {
        Self {
            name: name.into(),
            data_type,
            data_size,
            precision: 0,
            scale: 0,
        }
    }

    pub fn varchar2(name: impl Into<String>, size: u32) -> Self {
        Self::new(name, SQLT_CHR, size)
    }

    pub fn char(name: impl Into<String>, size: u32) -> Self {
        Self::new(name, SQLT_AFC, size)
    }

    /// NUMBER(precision, scale). FLOAT columns use scale -127.
    pub fn number(name: impl Into<String>, precision: i32, scale: i32) -> Self {
        Self {
            precision,
            scale,
            ..Self::new(name, SQLT_NUM, 22)
        }
    }

    pub fn binary_double(name: impl Into<String>) -> Self {
        Self::new(name, SQLT_IBDOUBLE, 8)
    }

    pub fn raw(name: impl Into<String>, size: u32) -> Self {
        Self::new(name, SQLT_BIN, size)
    }

    pub fn long(name: impl Into<String>) -> Self {
        Self::new(name, SQLT_LNG, 0)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, SQLT_DAT, 7)
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, SQLT_TIMESTAMP, 11)
    }

    pub fn timestamp_tz(name: impl Into<String>) -> Self {
        Self::new(name, SQLT_TIMESTAMP_TZ, 13)
    }

    pub fn interval_day_second(name: impl Into<String>) -> Self {
        Self::new(name, SQLT_INTERVAL_DS, 11)
    }

    pub fn interval_year_month(name: impl Into<String>) -> Self {
        Self::new(name, SQLT_INTERVAL_YM, 5)
    }

    pub fn clob(name: impl Into<String>) -> Self {
        Self::new(name, SQLT_CLOB, 4000)
    }

    pub fn blob(name: impl Into<String>) -> Self {
        Self::new(name, SQLT_BLOB, 4000)
    }

    pub fn rowid(name: impl Into<String>) -> Self {
        Self::new(name, SQLT_RDD, 10)
    }

    fn for_cell(name: String, cell: &NativeCell) -> Self {
        match cell {
            NativeCell::Null => Self::new(name, SQLT_CHR, 0),
            NativeCell::Text(s) => Self::new(name, SQLT_CHR, s.len() as u32),
            NativeCell::Bytes(b) => Self::new(name, SQLT_BIN, b.len() as u32),
            NativeCell::Int(_) => Self::new(name, SQLT_INT, 8),
            NativeCell::Double(_) => Self::new(name, SQLT_BDOUBLE, 8),
            NativeCell::Timestamp(_) => Self::timestamp_tz(name),
            NativeCell::IntervalDaySecond(_) => Self::interval_day_second(name),
            NativeCell::IntervalYearMonth(_) => Self::interval_year_month(name),
            NativeCell::Clob(_) => Self::clob(name),
            NativeCell::Blob(_) => Self::blob(name),
        }
    }
}

/// Scripted answer to a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryScript {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Vec<NativeCell>>,
}

impl QueryScript {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn row(mut self, cells: Vec<NativeCell>) -> Self {
        self.rows.push(cells);
        self
    }
}

/// Placeholder addressed by an OUT value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindKey {
    Position(u32),
    Name(String),
}

impl BindKey {
    pub fn name(name: &str) -> Self {
        BindKey::Name(normalize_bind_name(name))
    }
}

/// Scripted answer to a DML, DDL or PL/SQL call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecScript {
    pub rows_affected: u32,
    pub rowid: Option<String>,
    pub outputs: Vec<(BindKey, NativeCell)>,
    pub with_info: bool,
}

impl ExecScript {
    pub fn new(rows_affected: u32) -> Self {
        Self {
            rows_affected,
            ..Default::default()
        }
    }

    pub fn rowid(mut self, rowid: impl Into<String>) -> Self {
        self.rowid = Some(rowid.into());
        self
    }

    /// Value written to the OUT bind at 1-based `position` after execution.
    pub fn output_at(mut self, position: u32, cell: NativeCell) -> Self {
        self.outputs.push((BindKey::Position(position), cell));
        self
    }

    /// Value written to the OUT bind `:name` after execution.
    pub fn output_named(mut self, name: &str, cell: NativeCell) -> Self {
        self.outputs.push((BindKey::name(name), cell));
        self
    }

    /// Complete with `OCI_SUCCESS_WITH_INFO` instead of `OCI_SUCCESS`.
    pub fn with_info(mut self) -> Self {
        self.with_info = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Action {
    Query(QueryScript),
    Exec(ExecScript),
}

/// Engine behavior for one SQL text.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    action: Action,
    latency: Duration,
    fetch_latency: Duration,
    failure: Option<ErrorRecord>,
}

impl Script {
    pub fn query(script: QueryScript) -> Self {
        Self {
            action: Action::Query(script),
            latency: Duration::ZERO,
            fetch_latency: Duration::ZERO,
            failure: None,
        }
    }

    pub fn exec(script: ExecScript) -> Self {
        Self {
            action: Action::Exec(script),
            latency: Duration::ZERO,
            fetch_latency: Duration::ZERO,
            failure: None,
        }
    }

    /// Block execute for `latency`, or until a break arrives.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Block every fetch for `latency`, or until a break arrives.
    pub fn with_fetch_latency(mut self, latency: Duration) -> Self {
        self.fetch_latency = latency;
        self
    }

    /// Fail execute with `ORA-code`.
    pub fn with_error(mut self, code: u32, message: impl Into<String>) -> Self {
        self.failure = Some(ErrorRecord {
            code,
            message: message.into(),
        });
        self
    }
}

/// One call to `stmt_execute`, as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub sql: String,
    pub iters: u32,
    pub mode: u32,
}

#[derive(Debug)]
struct BindState {
    stmt: u64,
    key: BindKey,
    target: BindTarget,
    indicator: i16,
}

#[derive(Debug)]
struct ResultSet {
    columns: Vec<ColumnSpec>,
    rows: Vec<Vec<NativeCell>>,
    cursor: usize,
    fetch_latency: Duration,
}

#[derive(Debug)]
struct StmtState {
    svc: u64,
    sql: String,
    stmt_type: u32,
    binds: Vec<u64>,
    binds_consumed: bool,
    defines: BTreeMap<u32, DefineTarget>,
    result: Option<ResultSet>,
    row_count: u32,
    rowid: Option<String>,
    prefetch_rows: u32,
    prefetch_memory: u32,
}

#[derive(Debug)]
struct Descriptor {
    kind: DescriptorKind,
    content: Option<NativeCell>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    scripts: HashMap<String, Script>,
    statements: HashMap<u64, StmtState>,
    buffers: HashMap<u64, BytesMut>,
    indicators: HashMap<u64, Vec<Indicator>>,
    descriptors: HashMap<u64, Descriptor>,
    params: HashMap<u64, ColumnSpec>,
    binds: HashMap<u64, BindState>,
    errors: HashMap<u64, ErrorRecord>,
    in_flight: HashSet<u64>,
    breaks: HashSet<u64>,
    break_count: usize,
    executions: Vec<ExecutionRecord>,
    failing_binds: HashSet<BindKey>,
    failing_defines: HashSet<u32>,
    allocation_budget: Option<usize>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn fail(&mut self, err: ErrorHandle, code: u32, message: impl Into<String>) -> ReturnCode {
        self.errors.insert(
            err.0,
            ErrorRecord {
                code,
                message: message.into(),
            },
        );
        ReturnCode::ERROR
    }

    fn take_allocation(&mut self) -> bool {
        match self.allocation_budget.as_mut() {
            Some(0) => false,
            Some(budget) => {
                *budget -= 1;
                true
            }
            None => true,
        }
    }

    fn read_bind_cell(&self, target: &BindTarget) -> NativeCell {
        if target.indicator == OCI_IND_NULL {
            return NativeCell::Null;
        }
        match target.storage {
            NativeStorage::None => NativeCell::Null,
            NativeStorage::Descriptor(desc) => self
                .descriptors
                .get(&desc.0)
                .and_then(|d| d.content.clone())
                .unwrap_or(NativeCell::Null),
            NativeStorage::Buffer(buf) => {
                let Some(data) = self.buffers.get(&buf.0) else {
                    return NativeCell::Null;
                };
                let len = (target.max_size as usize).min(data.len());
                let data = &data[..len];
                match target.data_type {
                    SQLT_STR => {
                        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                        NativeCell::Text(String::from_utf8_lossy(&data[..end]).into_owned())
                    }
                    SQLT_CHR | SQLT_AFC | SQLT_VCS | SQLT_AVC => {
                        NativeCell::Text(String::from_utf8_lossy(data).into_owned())
                    }
                    SQLT_INT => NativeCell::Int(sign_extend_le(data)),
                    SQLT_BDOUBLE if data.len() >= 8 => {
                        let mut raw = [0u8; 8];
                        raw.copy_from_slice(&data[..8]);
                        NativeCell::Double(f64::from_le_bytes(raw))
                    }
                    _ => NativeCell::Bytes(data.to_vec()),
                }
            }
        }
    }

    /// Write an OUT value into a bind's memory.
    fn write_bind_cell(&mut self, bind_id: u64, cell: &NativeCell) {
        let Some(bind) = self.binds.get(&bind_id) else {
            return;
        };
        let target = bind.target;
        if matches!(cell, NativeCell::Null) {
            if let Some(bind) = self.binds.get_mut(&bind_id) {
                bind.indicator = OCI_IND_NULL;
            }
            return;
        }
        let bytes = match target.data_type {
            SQLT_STR => {
                let mut text = cell.to_text().into_bytes();
                text.truncate((target.max_size as usize).saturating_sub(1));
                text.push(0);
                text
            }
            SQLT_INT => {
                let value = cell.to_i64().unwrap_or_default().to_le_bytes();
                value[..(target.max_size as usize).min(8)].to_vec()
            }
            SQLT_BDOUBLE => cell.to_f64().unwrap_or_default().to_le_bytes().to_vec(),
            _ => cell.to_bytes(),
        };
        match target.storage {
            NativeStorage::Buffer(buf) => {
                if let Some(data) = self.buffers.get_mut(&buf.0) {
                    let n = bytes.len().min(data.len());
                    data[..n].copy_from_slice(&bytes[..n]);
                }
            }
            NativeStorage::Descriptor(desc) => {
                if let Some(d) = self.descriptors.get_mut(&desc.0) {
                    d.content = Some(cell.clone());
                }
            }
            NativeStorage::None => {}
        }
        if let Some(bind) = self.binds.get_mut(&bind_id) {
            bind.indicator = OCI_IND_NOTNULL;
        }
    }

    /// Write a fetched value into a define, returning an error record on
    /// conversion failure.
    fn store_cell(
        &mut self,
        target: &DefineTarget,
        cell: &NativeCell,
    ) -> std::result::Result<(), ErrorRecord> {
        let slot = target.indicator;
        if matches!(cell, NativeCell::Null) {
            return self.set_indicator(slot.array, slot.index, OCI_IND_NULL, 0);
        }
        match target.storage {
            NativeStorage::Buffer(buf) => {
                let bytes = match target.data_type {
                    SQLT_CHR | SQLT_STR | SQLT_AFC | SQLT_VCS | SQLT_AVC => {
                        cell.to_text().into_bytes()
                    }
                    SQLT_BIN | SQLT_LBI => cell.to_bytes(),
                    SQLT_INT => cell
                        .to_i64()
                        .ok_or_else(|| record(ORA_INVALID_NUMBER, "invalid number"))?
                        .to_le_bytes()
                        .to_vec(),
                    SQLT_BDOUBLE => cell
                        .to_f64()
                        .ok_or_else(|| record(ORA_INVALID_NUMBER, "invalid number"))?
                        .to_le_bytes()
                        .to_vec(),
                    _ => return Err(inconsistent_types()),
                };
                let data = self
                    .buffers
                    .get_mut(&buf.0)
                    .ok_or_else(|| record(ORA_INVALID_HANDLE, "invalid define buffer"))?;
                let capacity = (target.size as usize).min(data.len());
                let (written, ind) = if bytes.len() > capacity {
                    (capacity, bytes.len().min(i16::MAX as usize) as i16)
                } else {
                    (bytes.len(), OCI_IND_NOTNULL)
                };
                data[..written].copy_from_slice(&bytes[..written]);
                self.set_indicator(slot.array, slot.index, ind, written as u32)
            }
            NativeStorage::Descriptor(desc) => {
                let content = match (target.data_type, cell) {
                    (SQLT_TIMESTAMP, NativeCell::Timestamp(v)) => NativeCell::Timestamp(
                        DateTimeValue {
                            parts: v.parts,
                            offset: ZoneOffset::default(),
                        },
                    ),
                    (SQLT_TIMESTAMP_TZ, NativeCell::Timestamp(_))
                    | (SQLT_INTERVAL_DS, NativeCell::IntervalDaySecond(_))
                    | (SQLT_INTERVAL_YM, NativeCell::IntervalYearMonth(_)) => cell.clone(),
                    (SQLT_CLOB, NativeCell::Clob(s) | NativeCell::Text(s)) => {
                        NativeCell::Blob(s.clone().into_bytes())
                    }
                    (SQLT_BLOB, NativeCell::Blob(b) | NativeCell::Bytes(b)) => {
                        NativeCell::Blob(b.clone())
                    }
                    _ => return Err(inconsistent_types()),
                };
                let d = self
                    .descriptors
                    .get_mut(&desc.0)
                    .ok_or_else(|| record(ORA_INVALID_HANDLE, "invalid define descriptor"))?;
                d.content = Some(content);
                self.set_indicator(slot.array, slot.index, OCI_IND_NOTNULL, 0)
            }
            NativeStorage::None => Err(inconsistent_types()),
        }
    }

    fn set_indicator(
        &mut self,
        array: IndicatorHandle,
        index: usize,
        ind: i16,
        rlen: u32,
    ) -> std::result::Result<(), ErrorRecord> {
        let slot = self
            .indicators
            .get_mut(&array.0)
            .and_then(|slots| slots.get_mut(index))
            .ok_or_else(|| record(ORA_INVALID_HANDLE, "invalid indicator slot"))?;
        *slot = Indicator { ind, rlen };
        Ok(())
    }

    /// Result set of an unscripted SELECT: one row with one column per bind.
    fn echo_binds(&self, stmt: &StmtState) -> ResultSet {
        let mut columns = Vec::with_capacity(stmt.binds.len());
        let mut row = Vec::with_capacity(stmt.binds.len());
        for (i, bind_id) in stmt.binds.iter().enumerate() {
            let Some(bind) = self.binds.get(bind_id) else {
                continue;
            };
            let cell = self.read_bind_cell(&bind.target);
            let name = match &bind.key {
                BindKey::Name(name) => name.clone(),
                BindKey::Position(_) => format!(":{}", i + 1),
            };
            columns.push(ColumnSpec::for_cell(name, &cell));
            row.push(cell);
        }
        ResultSet {
            columns,
            rows: vec![row],
            cursor: 0,
            fetch_latency: Duration::ZERO,
        }
    }

    fn register_bind(
        &mut self,
        stmt: StmtHandle,
        err: ErrorHandle,
        key: BindKey,
        target: &BindTarget,
    ) -> NativeResult<BindHandle> {
        if !self.statements.contains_key(&stmt.0) {
            return Err(ReturnCode::INVALID_HANDLE);
        }
        if self.failing_binds.contains(&key) {
            return Err(self.fail(err, ORA_ILLEGAL_VARIABLE, "illegal variable name/number"));
        }
        match target.storage {
            NativeStorage::Buffer(buf) => match self.buffers.get(&buf.0) {
                Some(data) if data.len() >= target.max_size as usize => {}
                Some(_) => {
                    return Err(self.fail(err, ORA_ILLEGAL_VARIABLE, "bind length exceeds buffer"))
                }
                None => return Err(ReturnCode::INVALID_HANDLE),
            },
            NativeStorage::Descriptor(desc) => {
                if !self.descriptors.contains_key(&desc.0) {
                    return Err(ReturnCode::INVALID_HANDLE);
                }
            }
            NativeStorage::None => {}
        }

        let id = self.next_id();
        let state = self
            .statements
            .get_mut(&stmt.0)
            .ok_or(ReturnCode::INVALID_HANDLE)?;
        if state.binds_consumed {
            let stale = std::mem::take(&mut state.binds);
            state.binds_consumed = false;
            for bind_id in stale {
                self.binds.remove(&bind_id);
            }
        }
        let state = self
            .statements
            .get_mut(&stmt.0)
            .ok_or(ReturnCode::INVALID_HANDLE)?;
        let replaced: Vec<u64> = state
            .binds
            .iter()
            .copied()
            .filter(|bind_id| self.binds.get(bind_id).is_some_and(|b| b.key == key))
            .collect();
        state.binds.retain(|bind_id| !replaced.contains(bind_id));
        state.binds.push(id);
        for bind_id in replaced {
            self.binds.remove(&bind_id);
        }
        self.binds.insert(
            id,
            BindState {
                stmt: stmt.0,
                key,
                target: *target,
                indicator: target.indicator,
            },
        );
        Ok(BindHandle(id))
    }
}

fn record(code: u32, message: &str) -> ErrorRecord {
    ErrorRecord {
        code,
        message: message.to_string(),
    }
}

fn inconsistent_types() -> ErrorRecord {
    record(ORA_INCONSISTENT_TYPES, "inconsistent datatypes")
}

fn sign_extend_le(data: &[u8]) -> i64 {
    let n = data.len().min(8);
    if n == 0 {
        return 0;
    }
    let fill = if data[n - 1] & 0x80 != 0 { 0xFF } else { 0x00 };
    let mut raw = [fill; 8];
    raw[..n].copy_from_slice(&data[..n]);
    i64::from_le_bytes(raw)
}

fn normalize_bind_name(name: &str) -> String {
    name.trim_start_matches(':').to_ascii_uppercase()
}

fn statement_type(sql: &str) -> u32 {
    let keyword = sql
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    match keyword.as_str() {
        "SELECT" | "WITH" => OCI_STMT_SELECT,
        "UPDATE" => OCI_STMT_UPDATE,
        "DELETE" => OCI_STMT_DELETE,
        "INSERT" => OCI_STMT_INSERT,
        "CREATE" => OCI_STMT_CREATE,
        "DROP" => OCI_STMT_DROP,
        "ALTER" => OCI_STMT_ALTER,
        "BEGIN" => OCI_STMT_BEGIN,
        "DECLARE" => OCI_STMT_DECLARE,
        "CALL" => OCI_STMT_CALL,
        "MERGE" => OCI_STMT_MERGE,
        _ => OCI_STMT_UNKNOWN,
    }
}

/// Number of distinct placeholders, ignoring quoted text.
fn count_placeholders(sql: &str) -> u32 {
    let mut names = HashSet::new();
    let mut chars = sql.chars().peekable();
    let mut in_quote = false;
    while let Some(c) = chars.next() {
        match c {
            '\'' => in_quote = !in_quote,
            ':' if !in_quote => {
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        name.push(next.to_ascii_uppercase());
                        chars.next();
                    } else {
                        break;
                    }
                }
                if !name.is_empty() {
                    names.insert(name);
                }
            }
            _ => {}
        }
    }
    names.len() as u32
}

/// Offset in seconds for a region name or `[+-]HH:MM` literal.
fn resolve_zone(zone: &str) -> Option<i32> {
    if let Some(&(_, offset)) = ZONE_REGIONS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(zone))
    {
        return Some(offset);
    }
    let (sign, rest) = match zone.as_bytes().first()? {
        b'+' => (1, &zone[1..]),
        b'-' => (-1, &zone[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    if hours.len() != 2 || minutes.len() != 2 {
        return None;
    }
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    Some(sign * (hours * 3600 + minutes * 60))
}

/// In-process implementation of [`NativeApi`].
///
/// # Example
///
/// ```
/// use oci8_rs::native::{ColumnSpec, MemoryEngine, NativeCell, QueryScript, Script};
///
/// let engine = MemoryEngine::new().with_script(
///     "SELECT name FROM users",
///     Script::query(
///         QueryScript::new(vec![ColumnSpec::varchar2("NAME", 20)])
///             .row(vec![NativeCell::Text("Alice".into())]),
///     ),
/// );
/// assert_eq!(engine.live_allocations(), 0);
/// ```
#[derive(Debug, Default)]
pub struct MemoryEngine {
    state: Mutex<State>,
    wake: Condvar,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `sql` with `script`. The SQL text is matched after trimming.
    pub fn with_script(self, sql: &str, script: Script) -> Self {
        self.set_script(sql, script);
        self
    }

    /// Make binds of the given placeholder fail with `ORA-01036`.
    pub fn with_failing_bind(self, key: BindKey) -> Self {
        self.lock().failing_binds.insert(key);
        self
    }

    /// Make the define of a 1-based column position fail.
    pub fn with_failing_define(self, position: u32) -> Self {
        self.lock().failing_defines.insert(position);
        self
    }

    /// Allow only `count` more buffer/descriptor/indicator allocations.
    pub fn with_allocation_limit(self, count: usize) -> Self {
        self.lock().allocation_budget = Some(count);
        self
    }

    pub fn set_script(&self, sql: &str, script: Script) {
        self.lock().scripts.insert(sql.trim().to_string(), script);
    }

    /// Allocate environment, error and service handles for a session.
    pub fn open_session(&self) -> SessionHandles {
        let mut state = self.lock();
        SessionHandles {
            env: EnvHandle(state.next_id()),
            err: ErrorHandle(state.next_id()),
            svc: SvcHandle(state.next_id()),
        }
    }

    /// Buffers, indicator arrays, descriptors and parameter handles not
    /// yet freed.
    pub fn live_allocations(&self) -> usize {
        let state = self.lock();
        state.buffers.len() + state.indicators.len() + state.descriptors.len() + state.params.len()
    }

    /// Prepared statements not yet released.
    pub fn live_statements(&self) -> usize {
        self.lock().statements.len()
    }

    /// Break requests received, whether or not a call was in flight.
    pub fn break_count(&self) -> usize {
        self.lock().break_count
    }

    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.lock().executions.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block for `latency` on behalf of `svc`. Returns true if a break
    /// interrupted the wait.
    fn wait_interruptible<'a>(
        &'a self,
        mut state: MutexGuard<'a, State>,
        svc: SvcHandle,
        latency: Duration,
    ) -> (MutexGuard<'a, State>, bool) {
        let deadline = Instant::now() + latency;
        state.in_flight.insert(svc.0);
        let interrupted = loop {
            if state.breaks.remove(&svc.0) {
                break true;
            }
            let now = Instant::now();
            if now >= deadline {
                break false;
            }
            let (guard, _) = self
                .wake
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        };
        state.in_flight.remove(&svc.0);
        state.breaks.remove(&svc.0);
        (state, interrupted)
    }
}

impl NativeApi for MemoryEngine {
    fn stmt_prepare(
        &self,
        svc: SvcHandle,
        err: ErrorHandle,
        sql: &str,
    ) -> NativeResult<StmtHandle> {
        let mut state = self.lock();
        if sql.trim().is_empty() {
            return Err(state.fail(err, 900, "invalid SQL statement"));
        }
        let id = state.next_id();
        state.statements.insert(
            id,
            StmtState {
                svc: svc.0,
                sql: sql.trim().to_string(),
                stmt_type: statement_type(sql),
                binds: Vec::new(),
                binds_consumed: false,
                defines: BTreeMap::new(),
                result: None,
                row_count: 0,
                rowid: None,
                prefetch_rows: 1,
                prefetch_memory: 0,
            },
        );
        Ok(StmtHandle(id))
    }

    fn stmt_release(&self, stmt: StmtHandle) -> ReturnCode {
        let mut state = self.lock();
        match state.statements.remove(&stmt.0) {
            Some(_) => {
                state.binds.retain(|_, bind| bind.stmt != stmt.0);
                ReturnCode::SUCCESS
            }
            None => ReturnCode::INVALID_HANDLE,
        }
    }

    fn stmt_attr_get(
        &self,
        stmt: StmtHandle,
        attr: StmtAttr,
        _err: ErrorHandle,
    ) -> NativeResult<u32> {
        let state = self.lock();
        let s = state
            .statements
            .get(&stmt.0)
            .ok_or(ReturnCode::INVALID_HANDLE)?;
        Ok(match attr {
            StmtAttr::BindCount => count_placeholders(&s.sql),
            StmtAttr::StmtType => s.stmt_type,
            StmtAttr::ParamCount => s.result.as_ref().map_or(0, |r| r.columns.len() as u32),
            StmtAttr::RowCount => s.row_count,
            StmtAttr::PrefetchRows => s.prefetch_rows,
            StmtAttr::PrefetchMemory => s.prefetch_memory,
        })
    }

    fn stmt_attr_set(
        &self,
        stmt: StmtHandle,
        attr: StmtAttr,
        value: u32,
        err: ErrorHandle,
    ) -> ReturnCode {
        let mut state = self.lock();
        let Some(s) = state.statements.get_mut(&stmt.0) else {
            return ReturnCode::INVALID_HANDLE;
        };
        match attr {
            StmtAttr::PrefetchRows => s.prefetch_rows = value,
            StmtAttr::PrefetchMemory => s.prefetch_memory = value,
            _ => return state.fail(err, 24315, "illegal attribute type"),
        }
        ReturnCode::SUCCESS
    }

    fn stmt_rowid(
        &self,
        _env: EnvHandle,
        stmt: StmtHandle,
        err: ErrorHandle,
    ) -> NativeResult<String> {
        let mut state = self.lock();
        let rowid = state
            .statements
            .get(&stmt.0)
            .ok_or(ReturnCode::INVALID_HANDLE)?
            .rowid
            .clone();
        rowid.ok_or_else(|| state.fail(err, ORA_INVALID_ROWID, "invalid ROWID"))
    }

    fn stmt_execute(
        &self,
        svc: SvcHandle,
        stmt: StmtHandle,
        err: ErrorHandle,
        iters: u32,
        mode: u32,
    ) -> ReturnCode {
        let mut state = self.lock();
        let Some(s) = state.statements.get(&stmt.0) else {
            return ReturnCode::INVALID_HANDLE;
        };
        let sql = s.sql.clone();
        let stmt_type = s.stmt_type;
        state.executions.push(ExecutionRecord {
            sql: sql.clone(),
            iters,
            mode,
        });
        if stmt_type != OCI_STMT_SELECT && iters == 0 {
            return state.fail(err, 24333, "zero iteration count");
        }
        let script = state.scripts.get(&sql).cloned();
        let fetch_latency = script.as_ref().map_or(Duration::ZERO, |s| s.fetch_latency);

        if let Some(latency) = script.as_ref().map(|s| s.latency).filter(|l| !l.is_zero()) {
            let (guard, interrupted) = self.wait_interruptible(state, svc, latency);
            state = guard;
            if interrupted {
                return state.fail(
                    err,
                    ORA_USER_CANCEL,
                    "user requested cancel of current operation",
                );
            }
        }
        if let Some(failure) = script.as_ref().and_then(|s| s.failure.clone()) {
            return state.fail(err, failure.code, failure.message);
        }

        let Some(s) = state.statements.get(&stmt.0) else {
            return ReturnCode::INVALID_HANDLE;
        };
        let mut rc = ReturnCode::SUCCESS;
        let mut outputs = Vec::new();
        let (result, row_count, rowid) = match script.map(|s| s.action) {
            Some(Action::Query(q)) => (
                Some(ResultSet {
                    columns: q.columns,
                    rows: q.rows,
                    cursor: 0,
                    fetch_latency,
                }),
                0,
                None,
            ),
            Some(Action::Exec(e)) => {
                if e.with_info {
                    rc = ReturnCode::SUCCESS_WITH_INFO;
                }
                for (key, cell) in e.outputs {
                    let bind = s.binds.iter().copied().find(|id| {
                        state.binds.get(id).is_some_and(|b| match (&b.key, &key) {
                            (BindKey::Name(a), BindKey::Name(b)) => a == b,
                            (BindKey::Position(a), BindKey::Position(b)) => a == b,
                            _ => false,
                        })
                    });
                    if let Some(bind) = bind {
                        outputs.push((bind, cell));
                    }
                }
                (None, e.rows_affected, e.rowid)
            }
            None if stmt_type == OCI_STMT_SELECT => (Some(state.echo_binds(s)), 0, None),
            None => (None, 0, None),
        };
        for (bind, cell) in &outputs {
            state.write_bind_cell(*bind, cell);
        }
        if let Some(s) = state.statements.get_mut(&stmt.0) {
            s.result = result;
            s.row_count = row_count;
            s.rowid = rowid;
            s.binds_consumed = true;
        }
        rc
    }

    fn stmt_fetch(&self, stmt: StmtHandle, err: ErrorHandle, rows: u32) -> ReturnCode {
        let mut state = self.lock();
        let Some(s) = state.statements.get_mut(&stmt.0) else {
            return ReturnCode::INVALID_HANDLE;
        };
        let Some(result) = s.result.as_mut() else {
            return state.fail(err, ORA_FETCH_OUT_OF_SEQUENCE, "fetch out of sequence");
        };
        if rows == 0 || result.cursor >= result.rows.len() {
            return ReturnCode::NO_DATA;
        }
        let latency = result.fetch_latency;
        let svc = SvcHandle(s.svc);
        if !latency.is_zero() {
            let (guard, interrupted) = self.wait_interruptible(state, svc, latency);
            state = guard;
            if interrupted {
                return state.fail(
                    err,
                    ORA_USER_CANCEL,
                    "user requested cancel of current operation",
                );
            }
        }
        let Some(s) = state.statements.get_mut(&stmt.0) else {
            return ReturnCode::INVALID_HANDLE;
        };
        let Some(result) = s.result.as_mut() else {
            return ReturnCode::NO_DATA;
        };
        let row = result.rows[result.cursor].clone();
        result.cursor += 1;
        let defines: Vec<(u32, DefineTarget)> =
            s.defines.iter().map(|(pos, target)| (*pos, *target)).collect();
        for (position, target) in defines {
            let cell = (position as usize)
                .checked_sub(1)
                .and_then(|i| row.get(i))
                .cloned()
                .unwrap_or(NativeCell::Null);
            if let Err(e) = state.store_cell(&target, &cell) {
                return state.fail(err, e.code, e.message);
            }
        }
        ReturnCode::SUCCESS
    }

    fn break_call(&self, svc: SvcHandle, _err: ErrorHandle) -> ReturnCode {
        let mut state = self.lock();
        state.break_count += 1;
        if state.in_flight.contains(&svc.0) {
            state.breaks.insert(svc.0);
            self.wake.notify_all();
        }
        ReturnCode::SUCCESS
    }

    fn param_get(
        &self,
        stmt: StmtHandle,
        err: ErrorHandle,
        position: u32,
    ) -> NativeResult<ParamHandle> {
        let mut state = self.lock();
        let spec = state
            .statements
            .get(&stmt.0)
            .ok_or(ReturnCode::INVALID_HANDLE)?
            .result
            .as_ref()
            .and_then(|r| r.columns.get((position as usize).wrapping_sub(1)))
            .cloned();
        let Some(spec) = spec else {
            return Err(state.fail(err, 24334, "no descriptor for this position"));
        };
        let id = state.next_id();
        state.params.insert(id, spec);
        Ok(ParamHandle(id))
    }

    fn param_attr_get(
        &self,
        param: ParamHandle,
        attr: ParamAttr,
        _err: ErrorHandle,
    ) -> NativeResult<i32> {
        let state = self.lock();
        let spec = state.params.get(&param.0).ok_or(ReturnCode::INVALID_HANDLE)?;
        Ok(match attr {
            ParamAttr::DataType => spec.data_type as i32,
            ParamAttr::DataSize => spec.data_size as i32,
            ParamAttr::Precision => spec.precision,
            ParamAttr::Scale => spec.scale,
        })
    }

    fn param_name(&self, param: ParamHandle, _err: ErrorHandle) -> NativeResult<String> {
        let state = self.lock();
        state
            .params
            .get(&param.0)
            .map(|spec| spec.name.clone())
            .ok_or(ReturnCode::INVALID_HANDLE)
    }

    fn param_free(&self, param: ParamHandle) -> ReturnCode {
        match self.lock().params.remove(&param.0) {
            Some(_) => ReturnCode::SUCCESS,
            None => ReturnCode::INVALID_HANDLE,
        }
    }

    fn buffer_alloc(&self, _env: EnvHandle, size: usize) -> NativeResult<BufferHandle> {
        let mut state = self.lock();
        if !state.take_allocation() {
            return Err(ReturnCode::ERROR);
        }
        let id = state.next_id();
        state.buffers.insert(id, BytesMut::zeroed(size));
        Ok(BufferHandle(id))
    }

    fn buffer_write(&self, buf: BufferHandle, data: &[u8]) -> ReturnCode {
        let mut state = self.lock();
        match state.buffers.get_mut(&buf.0) {
            Some(buffer) if buffer.len() >= data.len() => {
                buffer[..data.len()].copy_from_slice(data);
                ReturnCode::SUCCESS
            }
            Some(_) => ReturnCode::ERROR,
            None => ReturnCode::INVALID_HANDLE,
        }
    }

    fn buffer_read(&self, buf: BufferHandle, len: usize) -> NativeResult<Vec<u8>> {
        let state = self.lock();
        let buffer = state.buffers.get(&buf.0).ok_or(ReturnCode::INVALID_HANDLE)?;
        Ok(buffer[..len.min(buffer.len())].to_vec())
    }

    fn buffer_free(&self, buf: BufferHandle) -> ReturnCode {
        match self.lock().buffers.remove(&buf.0) {
            Some(_) => ReturnCode::SUCCESS,
            None => ReturnCode::INVALID_HANDLE,
        }
    }

    fn indicators_alloc(&self, _env: EnvHandle, count: usize) -> NativeResult<IndicatorHandle> {
        let mut state = self.lock();
        if !state.take_allocation() {
            return Err(ReturnCode::ERROR);
        }
        let id = state.next_id();
        state.indicators.insert(id, vec![Indicator::default(); count]);
        Ok(IndicatorHandle(id))
    }

    fn indicator_read(&self, array: IndicatorHandle, index: usize) -> NativeResult<Indicator> {
        let state = self.lock();
        state
            .indicators
            .get(&array.0)
            .and_then(|slots| slots.get(index))
            .copied()
            .ok_or(ReturnCode::INVALID_HANDLE)
    }

    fn indicators_free(&self, array: IndicatorHandle) -> ReturnCode {
        match self.lock().indicators.remove(&array.0) {
            Some(_) => ReturnCode::SUCCESS,
            None => ReturnCode::INVALID_HANDLE,
        }
    }

    fn descriptor_alloc(
        &self,
        _env: EnvHandle,
        kind: DescriptorKind,
    ) -> NativeResult<DescriptorHandle> {
        let mut state = self.lock();
        if !state.take_allocation() {
            return Err(ReturnCode::ERROR);
        }
        let id = state.next_id();
        state.descriptors.insert(
            id,
            Descriptor {
                kind,
                content: None,
            },
        );
        Ok(DescriptorHandle(id))
    }

    fn descriptor_free(&self, desc: DescriptorHandle, kind: DescriptorKind) -> ReturnCode {
        let mut state = self.lock();
        if !state.descriptors.get(&desc.0).is_some_and(|d| d.kind == kind) {
            return ReturnCode::INVALID_HANDLE;
        }
        state.descriptors.remove(&desc.0);
        ReturnCode::SUCCESS
    }

    fn datetime_construct(
        &self,
        _env: EnvHandle,
        err: ErrorHandle,
        desc: DescriptorHandle,
        parts: &DateTimeParts,
        zone: &str,
    ) -> ReturnCode {
        let mut state = self.lock();
        let Some(offset) = resolve_zone(zone) else {
            return state.fail(err, ORA_TIMEZONE_REGION_NOT_FOUND, "timezone region not found");
        };
        let valid_date =
            NaiveDate::from_ymd_opt(parts.year as i32, parts.month as u32, parts.day as u32)
                .is_some();
        if !valid_date || parts.hour > 23 || parts.minute > 59 || parts.second > 59 {
            return state.fail(err, ORA_INVALID_DATETIME, "invalid datetime fields");
        }
        match state.descriptors.get_mut(&desc.0) {
            Some(d) if matches!(d.kind, DescriptorKind::Timestamp | DescriptorKind::TimestampTz) => {
                d.content = Some(NativeCell::Timestamp(DateTimeValue {
                    parts: *parts,
                    offset: ZoneOffset::from_seconds(offset),
                }));
                ReturnCode::SUCCESS
            }
            _ => ReturnCode::INVALID_HANDLE,
        }
    }

    fn datetime_zone_offset(
        &self,
        env: EnvHandle,
        err: ErrorHandle,
        desc: DescriptorHandle,
    ) -> NativeResult<ZoneOffset> {
        self.datetime_get(env, err, desc).map(|v| v.offset)
    }

    fn datetime_get(
        &self,
        _env: EnvHandle,
        err: ErrorHandle,
        desc: DescriptorHandle,
    ) -> NativeResult<DateTimeValue> {
        let mut state = self.lock();
        let content = state
            .descriptors
            .get(&desc.0)
            .ok_or(ReturnCode::INVALID_HANDLE)?
            .content
            .clone();
        match content {
            Some(NativeCell::Timestamp(v)) => Ok(v),
            _ => Err(state.fail(err, ORA_INVALID_DATETIME, "descriptor holds no datetime")),
        }
    }

    fn interval_get_day_second(
        &self,
        _env: EnvHandle,
        err: ErrorHandle,
        desc: DescriptorHandle,
    ) -> NativeResult<DayToSecond> {
        let mut state = self.lock();
        let content = state
            .descriptors
            .get(&desc.0)
            .ok_or(ReturnCode::INVALID_HANDLE)?
            .content
            .clone();
        match content {
            Some(NativeCell::IntervalDaySecond(v)) => Ok(v),
            _ => Err(state.fail(err, ORA_INCONSISTENT_TYPES, "descriptor holds no interval")),
        }
    }

    fn interval_get_year_month(
        &self,
        _env: EnvHandle,
        err: ErrorHandle,
        desc: DescriptorHandle,
    ) -> NativeResult<YearToMonth> {
        let mut state = self.lock();
        let content = state
            .descriptors
            .get(&desc.0)
            .ok_or(ReturnCode::INVALID_HANDLE)?
            .content
            .clone();
        match content {
            Some(NativeCell::IntervalYearMonth(v)) => Ok(v),
            _ => Err(state.fail(err, ORA_INCONSISTENT_TYPES, "descriptor holds no interval")),
        }
    }

    fn lob_read(
        &self,
        _svc: SvcHandle,
        err: ErrorHandle,
        desc: DescriptorHandle,
        offset: u64,
        buffer: BufferHandle,
        amount: usize,
    ) -> NativeResult<usize> {
        let mut state = self.lock();
        let content = match state.descriptors.get(&desc.0) {
            Some(Descriptor {
                kind: DescriptorKind::Lob,
                content,
            }) => content.clone(),
            _ => return Err(ReturnCode::INVALID_HANDLE),
        };
        let Some(NativeCell::Blob(data)) = content else {
            return Err(state.fail(err, 22275, "invalid LOB locator specified"));
        };
        let start = (offset as usize).min(data.len());
        let target = state
            .buffers
            .get_mut(&buffer.0)
            .ok_or(ReturnCode::INVALID_HANDLE)?;
        let n = amount.min(target.len()).min(data.len() - start);
        target[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn bind_by_name(
        &self,
        stmt: StmtHandle,
        err: ErrorHandle,
        name: &str,
        target: &BindTarget,
    ) -> NativeResult<BindHandle> {
        self.lock()
            .register_bind(stmt, err, BindKey::name(name), target)
    }

    fn bind_by_pos(
        &self,
        stmt: StmtHandle,
        err: ErrorHandle,
        position: u32,
        target: &BindTarget,
    ) -> NativeResult<BindHandle> {
        self.lock()
            .register_bind(stmt, err, BindKey::Position(position), target)
    }

    fn bind_indicator(&self, bind: BindHandle) -> NativeResult<i16> {
        self.lock()
            .binds
            .get(&bind.0)
            .map(|b| b.indicator)
            .ok_or(ReturnCode::INVALID_HANDLE)
    }

    fn define_by_pos(
        &self,
        stmt: StmtHandle,
        err: ErrorHandle,
        position: u32,
        target: &DefineTarget,
    ) -> NativeResult<DefineHandle> {
        let mut state = self.lock();
        if !state.statements.contains_key(&stmt.0) {
            return Err(ReturnCode::INVALID_HANDLE);
        }
        if state.failing_defines.contains(&position) {
            return Err(state.fail(err, ORA_INVALID_DEFINE, "define by position failed"));
        }
        let storage_ok = match target.storage {
            NativeStorage::Buffer(buf) => state
                .buffers
                .get(&buf.0)
                .is_some_and(|b| b.len() >= target.size as usize),
            NativeStorage::Descriptor(desc) => state.descriptors.contains_key(&desc.0),
            NativeStorage::None => false,
        };
        let slot_ok = state
            .indicators
            .get(&target.indicator.array.0)
            .is_some_and(|slots| target.indicator.index < slots.len());
        if !storage_ok || !slot_ok {
            return Err(ReturnCode::INVALID_HANDLE);
        }
        let id = state.next_id();
        if let Some(s) = state.statements.get_mut(&stmt.0) {
            s.defines.insert(position, *target);
        }
        Ok(DefineHandle(id))
    }

    fn error_get(&self, err: ErrorHandle) -> Option<ErrorRecord> {
        self.lock().errors.get(&err.0).cloned()
    }
}
