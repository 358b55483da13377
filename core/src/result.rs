use std::fmt;

use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde_json::{Map, Value};

/// One result row: column name to value, in the order the store returned them.
pub type Record = Map<String, Value>;

/// Query result threaded between execution and answer composition.
///
/// The shape is discovered per invocation, so rows are generic key-value
/// maps rather than typed structs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultDocument {
    rows: Vec<Record>,
}

#[derive(Debug, thiserror::Error)]
pub enum ResultDocumentError {
    #[error("result document is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("result document must be an array, got {0}")]
    NotAnArray(&'static str),
    #[error("result row {index} is not an object")]
    RowNotObject { index: usize },
}

impl ResultDocument {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<Record>) -> Self {
        Self { rows }
    }

    /// Parse the array-of-records text produced by the store. A JSON `null`
    /// (aggregate over zero rows) is treated as the empty document.
    ///
    /// Columns sharing a name (`count(*), count(DISTINCT ..)` both come back
    /// as `count`) are all kept: the second becomes `count_2`, and so on.
    pub fn from_json(text: &str) -> Result<Self, ResultDocumentError> {
        let value: Value = serde_json::from_str(text)?;
        match value {
            Value::Null => return Ok(Self::empty()),
            Value::Array(items) => {
                if let Some(index) = items.iter().position(|item| !item.is_object()) {
                    return Err(ResultDocumentError::RowNotObject { index });
                }
            }
            Value::Bool(_) => return Err(ResultDocumentError::NotAnArray("boolean")),
            Value::Number(_) => return Err(ResultDocumentError::NotAnArray("number")),
            Value::String(_) => return Err(ResultDocumentError::NotAnArray("string")),
            Value::Object(_) => return Err(ResultDocumentError::NotAnArray("object")),
        }

        // Second pass: a `Value` keeps only the last of any repeated key.
        let rows: Vec<DistinctColumns> = serde_json::from_str(text)?;
        Ok(Self {
            rows: rows.into_iter().map(|row| row.0).collect(),
        })
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names of the first row, in store order.
    pub fn columns(&self) -> Vec<&str> {
        self.rows
            .first()
            .map(|row| row.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Single-value textual encoding: `[]` when empty.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.rows).unwrap_or_else(|_| "[]".to_string())
    }
}

/// A row whose repeated column names are suffixed instead of overwritten.
struct DistinctColumns(Record);

impl<'de> Deserialize<'de> for DistinctColumns {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(DistinctColumnsVisitor)
    }
}

struct DistinctColumnsVisitor;

impl<'de> Visitor<'de> for DistinctColumnsVisitor {
    type Value = DistinctColumns;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a result row object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut record = Record::new();
        while let Some((column, value)) = access.next_entry::<String, Value>()? {
            let column = if record.contains_key(&column) {
                next_free_column(&record, &column)
            } else {
                column
            };
            record.insert(column, value);
        }
        Ok(DistinctColumns(record))
    }
}

fn next_free_column(record: &Record, column: &str) -> String {
    let mut n = 2;
    loop {
        let candidate = format!("{column}_{n}");
        if !record.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_encodes_as_empty_array() {
        assert_eq!(ResultDocument::empty().to_json(), "[]");
    }

    #[test]
    fn null_aggregate_is_empty_document() {
        let doc = ResultDocument::from_json("null").expect("null is accepted");
        assert!(doc.is_empty());
        assert_eq!(doc.to_json(), "[]");
    }

    #[test]
    fn heterogeneous_rows_keep_column_order() {
        let text = r#"[{"week":"2025-06-02","revenue":1250000.5,"users":42},{"week":"2025-06-09","revenue":null,"users":40}]"#;
        let doc = ResultDocument::from_json(text).expect("rows parse");
        assert_eq!(doc.row_count(), 2);
        assert_eq!(doc.columns(), vec!["week", "revenue", "users"]);
        assert_eq!(doc.to_json(), text);
    }

    #[test]
    fn repeated_column_names_keep_every_value() {
        let doc = ResultDocument::from_json(r#"[{"count":1520,"count":311}]"#)
            .expect("duplicate columns parse");
        assert_eq!(doc.columns(), vec!["count", "count_2"]);
        assert_eq!(doc.to_json(), r#"[{"count":1520,"count_2":311}]"#);
    }

    #[test]
    fn repeated_column_suffix_skips_names_already_taken() {
        let doc = ResultDocument::from_json(r#"[{"sum":1,"sum_2":2,"sum":3,"sum":4}]"#)
            .expect("duplicate columns parse");
        assert_eq!(doc.columns(), vec!["sum", "sum_2", "sum_3", "sum_4"]);
        assert_eq!(doc.rows()[0]["sum_3"], 3);
    }

    #[test]
    fn nested_values_survive() {
        let text = r#"[{"item":{"id":"p-1","tags":["a","b"]}}]"#;
        let doc = ResultDocument::from_json(text).expect("nested rows parse");
        assert_eq!(doc.rows()[0]["item"]["tags"][1], "b");
    }

    #[test]
    fn scalar_document_is_rejected() {
        let err = ResultDocument::from_json("42").expect_err("scalar must be rejected");
        assert!(matches!(err, ResultDocumentError::NotAnArray("number")));
    }

    #[test]
    fn non_object_row_is_rejected() {
        let err = ResultDocument::from_json(r#"[{"a":1},2]"#).expect_err("row 1 is not an object");
        assert!(matches!(err, ResultDocumentError::RowNotObject { index: 1 }));
    }
}
