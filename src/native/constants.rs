//! OCI constants.
//!
//! Values match the Oracle Call Interface headers (`oci.h`, `ocidfn.h`).

// Return codes
pub const OCI_SUCCESS: i32 = 0;
pub const OCI_SUCCESS_WITH_INFO: i32 = 1;
pub const OCI_NO_DATA: i32 = 100;
pub const OCI_ERROR: i32 = -1;
pub const OCI_INVALID_HANDLE: i32 = -2;
pub const OCI_NEED_DATA: i32 = 99;
pub const OCI_STILL_EXECUTING: i32 = -3123;

// External data types
pub const SQLT_CHR: u16 = 1;
pub const SQLT_NUM: u16 = 2;
pub const SQLT_INT: u16 = 3;
pub const SQLT_FLT: u16 = 4;
pub const SQLT_STR: u16 = 5;
pub const SQLT_VNU: u16 = 6;
pub const SQLT_LNG: u16 = 8;
pub const SQLT_VCS: u16 = 9;
pub const SQLT_DAT: u16 = 12;
pub const SQLT_BFLOAT: u16 = 21;
pub const SQLT_BDOUBLE: u16 = 22;
pub const SQLT_BIN: u16 = 23;
pub const SQLT_LBI: u16 = 24;
pub const SQLT_AFC: u16 = 96;
pub const SQLT_AVC: u16 = 97;
pub const SQLT_IBFLOAT: u16 = 100;
pub const SQLT_IBDOUBLE: u16 = 101;
pub const SQLT_RDD: u16 = 104;
pub const SQLT_CLOB: u16 = 112;
pub const SQLT_BLOB: u16 = 113;
pub const SQLT_TIMESTAMP: u16 = 187;
pub const SQLT_TIMESTAMP_TZ: u16 = 188;
pub const SQLT_INTERVAL_YM: u16 = 189;
pub const SQLT_INTERVAL_DS: u16 = 190;
pub const SQLT_TIMESTAMP_LTZ: u16 = 232;

// Statement types (OCI_ATTR_STMT_TYPE)
pub const OCI_STMT_UNKNOWN: u32 = 0;
pub const OCI_STMT_SELECT: u32 = 1;
pub const OCI_STMT_UPDATE: u32 = 2;
pub const OCI_STMT_DELETE: u32 = 3;
pub const OCI_STMT_INSERT: u32 = 4;
pub const OCI_STMT_CREATE: u32 = 5;
pub const OCI_STMT_DROP: u32 = 6;
pub const OCI_STMT_ALTER: u32 = 7;
pub const OCI_STMT_BEGIN: u32 = 8;
pub const OCI_STMT_DECLARE: u32 = 9;
pub const OCI_STMT_CALL: u32 = 10;
pub const OCI_STMT_MERGE: u32 = 16;

// Execution modes
pub const OCI_DEFAULT: u32 = 0x0000_0000;
pub const OCI_DESCRIBE_ONLY: u32 = 0x0000_0010;
pub const OCI_COMMIT_ON_SUCCESS: u32 = 0x0000_0020;

// Null indicators
pub const OCI_IND_NULL: i16 = -1;
pub const OCI_IND_NOTNULL: i16 = 0;

// Error codes raised by the driver or emulated engine
pub const ORA_NO_DATA_FOUND: u32 = 1403;
pub const ORA_USER_CANCEL: u32 = 1013;
pub const ORA_NOT_ALL_VARIABLES_BOUND: u32 = 1008;
pub const ORA_ILLEGAL_VARIABLE: u32 = 1036;
pub const ORA_INVALID_HANDLE: u32 = 21301;
pub const ORA_TIMEZONE_REGION_NOT_FOUND: u32 = 1882;
pub const ORA_OUT_OF_MEMORY: u32 = 4030;
pub const ORA_INVALID_DEFINE: u32 = 24345;

// Fetch buffer sizing
/// Worst-case bytes per character for UTF-8 character columns.
pub const CHARSET_EXPANSION: usize = 4;
/// Fixed define size for legacy LONG / LONG RAW columns.
pub const LONG_BUFFER_SIZE: usize = 2000;
/// Characters in the textual form of a ROWID, plus terminator.
pub const ROWID_BUFFER_SIZE: usize = 41;
/// Default LOB stream buffer size.
pub const DEFAULT_LOB_BUFFER_SIZE: usize = 4000;
/// Width of INT and BDOUBLE fetch buffers.
pub const NUMBER_BUFFER_SIZE: usize = 8;
/// Scale reported for FLOAT columns.
pub const FLOAT_SCALE_MARKER: i16 = -127;
