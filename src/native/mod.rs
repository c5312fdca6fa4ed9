//! Native client interface.
//!
//! The driver never talks to the engine directly. Every native primitive it
//! needs (statement handles, bind/define registration, buffers, descriptors,
//! execute, fetch, break, error records) goes through the [`NativeApi`]
//! trait. Handles are opaque ids owned by the implementation.
//!
//! [`MemoryEngine`] is an in-process implementation used by the test suite
//! and by applications that want to exercise the driver without a server.

pub mod constants;
mod memory;

pub use memory::{
    BindKey, ColumnSpec, ExecScript, ExecutionRecord, MemoryEngine, NativeCell, QueryScript,
    Script,
};

use constants::*;
use std::fmt;

macro_rules! native_handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(pub u64);
        )*
    };
}

native_handle!(
    /// Environment handle.
    EnvHandle,
    /// Error handle carrying the diagnostics of the last failed call.
    ErrorHandle,
    /// Service context handle; the target of break requests.
    SvcHandle,
    /// Prepared statement handle.
    StmtHandle,
    /// Parameter descriptor returned by describe.
    ParamHandle,
    /// Native memory buffer.
    BufferHandle,
    /// Typed native descriptor (timestamps, intervals, LOB locators).
    DescriptorHandle,
    /// Indicator/length array.
    IndicatorHandle,
    /// Bind handle. Released together with its statement.
    BindHandle,
    /// Define handle. Released together with its statement.
    DefineHandle,
);

/// Handles that make up one logged-on session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandles {
    pub env: EnvHandle,
    pub err: ErrorHandle,
    pub svc: SvcHandle,
}

/// Status code returned by a native call.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnCode(pub i32);

impl ReturnCode {
    pub const SUCCESS: Self = Self(OCI_SUCCESS);
    pub const SUCCESS_WITH_INFO: Self = Self(OCI_SUCCESS_WITH_INFO);
    pub const NO_DATA: Self = Self(OCI_NO_DATA);
    pub const ERROR: Self = Self(OCI_ERROR);
    pub const INVALID_HANDLE: Self = Self(OCI_INVALID_HANDLE);
    pub const STILL_EXECUTING: Self = Self(OCI_STILL_EXECUTING);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Success, or success with additional diagnostics.
    pub fn is_success_with_info(self) -> bool {
        self == Self::SUCCESS || self == Self::SUCCESS_WITH_INFO
    }

    /// Convert into a `Result`, treating anything but `SUCCESS` as failure.
    pub fn into_result(self) -> NativeResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            OCI_SUCCESS => "OCI_SUCCESS",
            OCI_SUCCESS_WITH_INFO => "OCI_SUCCESS_WITH_INFO",
            OCI_NO_DATA => "OCI_NO_DATA",
            OCI_ERROR => "OCI_ERROR",
            OCI_INVALID_HANDLE => "OCI_INVALID_HANDLE",
            OCI_NEED_DATA => "OCI_NEED_DATA",
            OCI_STILL_EXECUTING => "OCI_STILL_EXECUTING",
            _ => return write!(f, "{}", self.0),
        };
        f.write_str(name)
    }
}

/// Result of a native call that produces a value.
pub type NativeResult<T> = std::result::Result<T, ReturnCode>;

/// Statement handle attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmtAttr {
    /// Number of bind placeholders.
    BindCount,
    /// Statement type (`OCI_STMT_*`).
    StmtType,
    /// Number of select-list columns after execute.
    ParamCount,
    /// Rows processed by the last execute.
    RowCount,
    /// Rows prefetched per round trip.
    PrefetchRows,
    /// Memory threshold for prefetching.
    PrefetchMemory,
}

/// Parameter descriptor attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamAttr {
    DataType,
    DataSize,
    Precision,
    Scale,
}

/// Kinds of typed native descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    Timestamp,
    TimestampTz,
    IntervalDaySecond,
    IntervalYearMonth,
    Lob,
}

/// Calendar fields of a native datetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTimeParts {
    pub year: i16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub nanosecond: u32,
}

/// Time zone displacement as reported by the engine.
///
/// Both fields carry the sign: `-05:30` is `{ hours: -5, minutes: -30 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZoneOffset {
    pub hours: i8,
    pub minutes: i8,
}

impl ZoneOffset {
    pub fn from_seconds(seconds: i32) -> Self {
        Self {
            hours: (seconds / 3600) as i8,
            minutes: ((seconds % 3600) / 60) as i8,
        }
    }

    pub fn seconds(self) -> i32 {
        self.hours as i32 * 3600 + self.minutes as i32 * 60
    }
}

/// A datetime read back from a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTimeValue {
    pub parts: DateTimeParts,
    pub offset: ZoneOffset,
}

/// INTERVAL DAY TO SECOND fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DayToSecond {
    pub days: i32,
    pub hours: i32,
    pub minutes: i32,
    pub seconds: i32,
    pub nanoseconds: i32,
}

/// INTERVAL YEAR TO MONTH fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct YearToMonth {
    pub years: i32,
    pub months: i32,
}

/// Memory behind a bind or define.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeStorage {
    /// No memory; used for NULL binds.
    None,
    /// Inline value buffer.
    Buffer(BufferHandle),
    /// Value addressed indirectly through a descriptor.
    Descriptor(DescriptorHandle),
}

/// Everything `OCIBindByName`/`OCIBindByPos` needs to register a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindTarget {
    pub storage: NativeStorage,
    pub max_size: u32,
    pub data_type: u16,
    pub indicator: i16,
}

/// Slot of a column in an indicator/length array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorSlot {
    pub array: IndicatorHandle,
    pub index: usize,
}

/// Everything `OCIDefineByPos` needs to register a fetch buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefineTarget {
    pub storage: NativeStorage,
    pub size: u32,
    pub data_type: u16,
    pub indicator: IndicatorSlot,
}

/// Null/truncation indicator and returned length of a fetched value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Indicator {
    pub ind: i16,
    pub rlen: u32,
}

impl Indicator {
    pub fn is_null(&self) -> bool {
        self.ind == OCI_IND_NULL
    }

    pub fn is_truncated(&self) -> bool {
        self.ind > 0
    }
}

/// Diagnostic record read from an error handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub code: u32,
    pub message: String,
}

/// Native client primitives consumed by the driver.
///
/// Calls that only report status return [`ReturnCode`]; calls that produce
/// a value return [`NativeResult`]. On failure the implementation leaves a
/// diagnostic on the error handle passed in, readable with
/// [`error_get`](NativeApi::error_get).
///
/// Mutating calls on one service context (execute, fetch, break) must be
/// serialized by the caller; `break_call` is the only call expected to run
/// concurrently with an in-flight `stmt_execute` or `stmt_fetch`.
pub trait NativeApi: Send + Sync {
    // Statements

    fn stmt_prepare(&self, svc: SvcHandle, err: ErrorHandle, sql: &str)
        -> NativeResult<StmtHandle>;

    fn stmt_release(&self, stmt: StmtHandle) -> ReturnCode;

    fn stmt_attr_get(&self, stmt: StmtHandle, attr: StmtAttr, err: ErrorHandle)
        -> NativeResult<u32>;

    fn stmt_attr_set(
        &self,
        stmt: StmtHandle,
        attr: StmtAttr,
        value: u32,
        err: ErrorHandle,
    ) -> ReturnCode;

    /// Textual ROWID of the last row touched by the statement.
    fn stmt_rowid(&self, env: EnvHandle, stmt: StmtHandle, err: ErrorHandle)
        -> NativeResult<String>;

    fn stmt_execute(
        &self,
        svc: SvcHandle,
        stmt: StmtHandle,
        err: ErrorHandle,
        iters: u32,
        mode: u32,
    ) -> ReturnCode;

    /// Fetch the next `rows` rows into the defined buffers.
    fn stmt_fetch(&self, stmt: StmtHandle, err: ErrorHandle, rows: u32) -> ReturnCode;

    /// Interrupt the call currently running on `svc`.
    fn break_call(&self, svc: SvcHandle, err: ErrorHandle) -> ReturnCode;

    // Describe

    fn param_get(&self, stmt: StmtHandle, err: ErrorHandle, position: u32)
        -> NativeResult<ParamHandle>;

    fn param_attr_get(&self, param: ParamHandle, attr: ParamAttr, err: ErrorHandle)
        -> NativeResult<i32>;

    fn param_name(&self, param: ParamHandle, err: ErrorHandle) -> NativeResult<String>;

    fn param_free(&self, param: ParamHandle) -> ReturnCode;

    // Memory

    fn buffer_alloc(&self, env: EnvHandle, size: usize) -> NativeResult<BufferHandle>;

    /// Copy `data` to the start of the buffer.
    fn buffer_write(&self, buf: BufferHandle, data: &[u8]) -> ReturnCode;

    /// Read the first `len` bytes of the buffer.
    fn buffer_read(&self, buf: BufferHandle, len: usize) -> NativeResult<Vec<u8>>;

    fn buffer_free(&self, buf: BufferHandle) -> ReturnCode;

    fn indicators_alloc(&self, env: EnvHandle, count: usize) -> NativeResult<IndicatorHandle>;

    fn indicator_read(&self, array: IndicatorHandle, index: usize) -> NativeResult<Indicator>;

    fn indicators_free(&self, array: IndicatorHandle) -> ReturnCode;

    // Descriptors

    fn descriptor_alloc(&self, env: EnvHandle, kind: DescriptorKind)
        -> NativeResult<DescriptorHandle>;

    fn descriptor_free(&self, desc: DescriptorHandle, kind: DescriptorKind) -> ReturnCode;

    /// Fill a timestamp descriptor from calendar fields and a zone text
    /// (region name or `[+-]HH:MM`).
    fn datetime_construct(
        &self,
        env: EnvHandle,
        err: ErrorHandle,
        desc: DescriptorHandle,
        parts: &DateTimeParts,
        zone: &str,
    ) -> ReturnCode;

    /// Zone displacement the engine computed for a timestamp descriptor.
    fn datetime_zone_offset(
        &self,
        env: EnvHandle,
        err: ErrorHandle,
        desc: DescriptorHandle,
    ) -> NativeResult<ZoneOffset>;

    fn datetime_get(
        &self,
        env: EnvHandle,
        err: ErrorHandle,
        desc: DescriptorHandle,
    ) -> NativeResult<DateTimeValue>;

    fn interval_get_day_second(
        &self,
        env: EnvHandle,
        err: ErrorHandle,
        desc: DescriptorHandle,
    ) -> NativeResult<DayToSecond>;

    fn interval_get_year_month(
        &self,
        env: EnvHandle,
        err: ErrorHandle,
        desc: DescriptorHandle,
    ) -> NativeResult<YearToMonth>;

    /// Read up to `amount` bytes of a LOB starting at byte `offset` into
    /// `buffer`. Returns the number of bytes read; 0 at end of LOB.
    fn lob_read(
        &self,
        svc: SvcHandle,
        err: ErrorHandle,
        desc: DescriptorHandle,
        offset: u64,
        buffer: BufferHandle,
        amount: usize,
    ) -> NativeResult<usize>;

    // Bind / define

    fn bind_by_name(
        &self,
        stmt: StmtHandle,
        err: ErrorHandle,
        name: &str,
        target: &BindTarget,
    ) -> NativeResult<BindHandle>;

    fn bind_by_pos(
        &self,
        stmt: StmtHandle,
        err: ErrorHandle,
        position: u32,
        target: &BindTarget,
    ) -> NativeResult<BindHandle>;

    /// Indicator of a bind after execution (OUT parameters may become NULL).
    fn bind_indicator(&self, bind: BindHandle) -> NativeResult<i16>;

    fn define_by_pos(
        &self,
        stmt: StmtHandle,
        err: ErrorHandle,
        position: u32,
        target: &DefineTarget,
    ) -> NativeResult<DefineHandle>;

    // Errors

    /// Most recent diagnostic recorded on `err`, if any.
    fn error_get(&self, err: ErrorHandle) -> Option<ErrorRecord>;
}
