//! Fetched rows.

use std::ops::Index;
use std::sync::Arc;

use super::column::{Column, ColumnInfo};
use super::value::Value;
use crate::error::{Error, Result};

/// One fetched row, values in column order.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    info: Arc<ColumnInfo>,
}

impl Row {
    pub fn new(values: Vec<Value>, info: Arc<ColumnInfo>) -> Self {
        Self { values, info }
    }

    /// Value at a 0-based column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Like [`get`](Self::get), but an out-of-range index is an error.
    pub fn try_get(&self, index: usize) -> Result<&Value> {
        self.values.get(index).ok_or(Error::ColumnIndexOutOfBounds {
            index,
            count: self.values.len(),
        })
    }

    /// Value of the column named `name`, ignoring ASCII case.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let index = self.info.find_by_name(name)?;
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn columns(&self) -> &[Column] {
        &self.info.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.info.column_names()
    }

    /// Each column paired with its value.
    pub fn iter(&self) -> impl Iterator<Item = (&Column, &Value)> {
        self.info.iter().zip(self.values.iter())
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

impl IntoIterator for Row {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::constants::{SQLT_CHR, SQLT_INT};
    use crate::types::{Integer, OracleType};

    fn row() -> Row {
        let info = Arc::new(ColumnInfo::new(vec![
            Column::new("NAME", SQLT_CHR, OracleType::Varchar2 { max_size: 100 }, 100),
            Column::new("VALUE", SQLT_INT, OracleType::BinaryInteger, 8),
        ]));
        Row::new(vec![Value::from("test"), Value::Int(Integer::I64(42))], info)
    }

    #[test]
    fn test_access_by_index_and_name() {
        let row = row();
        assert_eq!(row.len(), 2);
        assert_eq!(row[0], Value::from("test"));
        assert_eq!(row.get_by_name("value"), Some(&Value::Int(Integer::I64(42))));
        assert_eq!(row.get_by_name("missing"), None);

        let pairs: Vec<(&str, String)> =
            row.iter().map(|(c, v)| (c.name.as_str(), v.to_string())).collect();
        assert_eq!(pairs, vec![("NAME", "test".to_string()), ("VALUE", "42".to_string())]);
        assert_eq!(row.into_values().len(), 2);
    }

    #[test]
    fn test_try_get_out_of_bounds() {
        match row().try_get(5) {
            Err(Error::ColumnIndexOutOfBounds { index, count }) => {
                assert_eq!((index, count), (5, 2));
            }
            other => panic!("Expected ColumnIndexOutOfBounds, got {:?}", other),
        }
    }
}
