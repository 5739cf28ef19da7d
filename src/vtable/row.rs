//! Typed rows produced by the system relations
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::schema::{DataType, Schema};
use crate::error::{MeridianError, Result};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum QlValue {
    Null,
    Text(String),
    Inet(IpAddr),
    Uuid(Uuid),
    Int32(i32),
    Blob(Vec<u8>),
    Set(Vec<QlValue>),
    Map(Vec<(QlValue, QlValue)>),
}

impl QlValue {
    pub fn text(value: impl Into<String>) -> Self {
        QlValue::Text(value.into())
    }

    pub fn text_set<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        QlValue::Set(values.into_iter().map(|v| QlValue::Text(v.into())).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, QlValue::Null)
    }

    /// Null matches every type; collections check their elements.
    pub fn matches(&self, data_type: &DataType) -> bool {
        match (self, data_type) {
            (QlValue::Null, _) => true,
            (QlValue::Text(_), DataType::Text)
            | (QlValue::Inet(_), DataType::Inet)
            | (QlValue::Uuid(_), DataType::Uuid)
            | (QlValue::Int32(_), DataType::Int32)
            | (QlValue::Blob(_), DataType::Blob) => true,
            (QlValue::Set(elements), DataType::Set(element_type)) => {
                elements.iter().all(|e| !e.is_null() && e.matches(element_type))
            }
            (QlValue::Map(entries), DataType::Map(key_type, value_type)) => entries
                .iter()
                .all(|(k, v)| !k.is_null() && k.matches(key_type) && v.matches(value_type)),
            _ => false,
        }
    }
}

impl std::fmt::Display for QlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QlValue::Null => write!(f, "null"),
            QlValue::Text(s) => write!(f, "{}", s),
            QlValue::Inet(ip) => write!(f, "{}", ip),
            QlValue::Uuid(id) => write!(f, "{}", id),
            QlValue::Int32(n) => write!(f, "{}", n),
            QlValue::Blob(bytes) => {
                write!(f, "0x")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            QlValue::Set(elements) => {
                write!(f, "{{")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, "}}")
            }
            QlValue::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Row {
    values: Vec<QlValue>,
}

impl Row {
    pub fn values(&self) -> &[QlValue] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&QlValue> {
        self.values.get(index)
    }
}

/// Rows of one relation, all shaped by the same schema
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct RowBlock {
    schema: Schema,
    rows: Vec<Row>,
}

impl RowBlock {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row with every column null
    pub fn extend(&mut self) -> RowWriter<'_> {
        let width = self.schema.num_columns();
        self.rows.push(Row {
            values: vec![QlValue::Null; width],
        });
        let index = self.rows.len() - 1;
        RowWriter { block: self, index }
    }

    /// Value of `column` in row `row`
    pub fn value(&self, row: usize, column: &str) -> Option<&QlValue> {
        let index = self.schema.column_index(column)?;
        self.rows.get(row)?.get(index)
    }

    pub fn column_values<'a>(&'a self, column: &str) -> impl Iterator<Item = &'a QlValue> + 'a {
        let index = self.schema.column_index(column);
        self.rows
            .iter()
            .filter_map(move |row| index.and_then(|i| row.get(i)))
    }
}

pub struct RowWriter<'a> {
    block: &'a mut RowBlock,
    index: usize,
}

impl RowWriter<'_> {
    /// Set a column, checking the value against the column type
    pub fn set(&mut self, column: &str, value: QlValue) -> Result<&mut Self> {
        let schema = &self.block.schema;
        let position = schema.column_index(column).ok_or_else(|| {
            MeridianError::SchemaMismatch(format!("no column named {}", column))
        })?;
        let data_type = &schema.columns()[position].data_type;
        if !value.matches(data_type) {
            return Err(MeridianError::SchemaMismatch(format!(
                "column {} is {}, got {:?}",
                column, data_type, value
            )));
        }
        self.block.rows[self.index].values[position] = value;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vtable::schema::SchemaBuilder;

    fn schema() -> Schema {
        let mut builder = SchemaBuilder::new();
        builder.add_hash_key_column("peer", DataType::Inet).unwrap();
        builder
            .add_column("tokens", DataType::set_of(DataType::Text))
            .unwrap();
        builder.build()
    }

    #[test]
    fn test_rows_start_null() {
        let mut block = RowBlock::new(schema());
        block.extend();
        assert_eq!(block.len(), 1);
        assert!(block.value(0, "peer").unwrap().is_null());
        assert!(block.value(0, "tokens").unwrap().is_null());
    }

    #[test]
    fn test_set_checks_types() {
        let mut block = RowBlock::new(schema());
        let mut row = block.extend();
        row.set("peer", QlValue::Inet("10.0.0.1".parse().unwrap()))
            .unwrap()
            .set("tokens", QlValue::text_set(["0"]))
            .unwrap();
        assert!(row.set("peer", QlValue::text("10.0.0.1")).is_err());
        assert!(row.set("tokens", QlValue::Set(vec![QlValue::Int32(1)])).is_err());
        assert!(row.set("missing", QlValue::Null).is_err());

        assert_eq!(
            block.value(0, "peer"),
            Some(&QlValue::Inet("10.0.0.1".parse().unwrap()))
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(QlValue::text_set(["a", "b"]).to_string(), "{a, b}");
        assert_eq!(QlValue::Blob(vec![0xde, 0xad]).to_string(), "0xdead");
    }
}
