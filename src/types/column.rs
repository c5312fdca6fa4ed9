//! Described result columns.

use super::oracle_type::OracleType;

/// One result column as reported by describe.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Name as described; unquoted identifiers come back upper case.
    pub name: String,
    /// Type derived from the describe attributes.
    pub data_type: OracleType,
    /// External type code read from the parameter descriptor.
    pub native_type: u16,
    /// Described size in bytes. Zero for types without a byte length.
    pub data_size: u32,
}

impl Column {
    pub fn new(
        name: impl Into<String>,
        native_type: u16,
        data_type: OracleType,
        data_size: u32,
    ) -> Self {
        Self {
            name: name.into(),
            data_type,
            native_type,
            data_size,
        }
    }

    /// Values of this column are read through a LOB locator.
    pub fn is_lob(&self) -> bool {
        matches!(self.data_type, OracleType::Clob | OracleType::Blob)
    }
}

/// The column list of a result set, shared by every row fetched from it.
#[derive(Debug, Clone, Default)]
pub struct ColumnInfo {
    pub columns: Vec<Column>,
}

impl ColumnInfo {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Column> {
        self.columns.iter()
    }

    /// Index of the first column named `name`, ignoring ASCII case.
    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::constants::{SQLT_BLOB, SQLT_CHR, SQLT_NUM};

    fn info() -> ColumnInfo {
        ColumnInfo::new(vec![
            Column::new("ID", SQLT_NUM, OracleType::from_raw(SQLT_NUM, 10, 0, 22), 22),
            Column::new("NAME", SQLT_CHR, OracleType::from_raw(SQLT_CHR, 0, 0, 100), 100),
            Column::new("PHOTO", SQLT_BLOB, OracleType::from_raw(SQLT_BLOB, 0, 0, 4000), 4000),
        ])
    }

    #[test]
    fn test_lookup_ignores_case() {
        let info = info();
        assert_eq!(info.len(), 3);
        assert_eq!(info.column_names(), vec!["ID", "NAME", "PHOTO"]);
        assert_eq!(info.find_by_name("name"), Some(1));
        assert_eq!(info.find_by_name("Photo"), Some(2));
        assert_eq!(info.find_by_name("UNKNOWN"), None);
    }

    #[test]
    fn test_described_types() {
        let info = info();
        assert_eq!(info.get(0).map(|c| c.data_type.to_string()), Some("NUMBER(10)".into()));
        assert_eq!(info.get(1).map(|c| c.data_size), Some(100));
        let lobs: Vec<&str> = info.iter().filter(|c| c.is_lob()).map(|c| c.name.as_str()).collect();
        assert_eq!(lobs, vec!["PHOTO"]);
    }
}
