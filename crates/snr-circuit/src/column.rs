// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Typed attribute columns and scalar attribute values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One attribute value of one row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttributeValue {
    /// Parse a type-table cell: integer, then float, then text
    pub fn parse_cell(cell: &str) -> Self {
        if let Ok(v) = cell.parse::<i64>() {
            AttributeValue::Int(v)
        } else if let Ok(v) = cell.parse::<f64>() {
            AttributeValue::Float(v)
        } else {
            AttributeValue::Text(cell.to_string())
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            AttributeValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(v) => Some(*v as f64),
            AttributeValue::Float(v) => Some(*v),
            AttributeValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn dtype(&self) -> &'static str {
        match self {
            AttributeValue::Int(_) => "int",
            AttributeValue::Float(_) => "float",
            AttributeValue::Text(_) => "text",
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Int(v) => write!(f, "{}", v),
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Text(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::Text(v)
    }
}

/// A dataset: one value per group member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "values", rename_all = "lowercase")]
pub enum Column {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Text(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Int(v) => v.len(),
            Column::Float(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> &'static str {
        match self {
            Column::Int(_) => "int",
            Column::Float(_) => "float",
            Column::Text(_) => "text",
        }
    }

    pub fn get(&self, index: usize) -> Option<AttributeValue> {
        match self {
            Column::Int(v) => v.get(index).map(|x| AttributeValue::Int(*x)),
            Column::Float(v) => v.get(index).map(|x| AttributeValue::Float(*x)),
            Column::Text(v) => v.get(index).map(|x| AttributeValue::Text(x.clone())),
        }
    }

    /// Overwrite one cell. Integers widen into float columns; anything else
    /// must match the column's dtype.
    pub fn set(&mut self, index: usize, value: AttributeValue) -> Result<(), String> {
        let len = self.len();
        if index >= len {
            return Err(format!("index {} out of range ({} values)", index, len));
        }
        match (self, value) {
            (Column::Int(v), AttributeValue::Int(x)) => v[index] = x,
            (Column::Float(v), AttributeValue::Float(x)) => v[index] = x,
            (Column::Float(v), AttributeValue::Int(x)) => v[index] = x as f64,
            (Column::Text(v), AttributeValue::Text(x)) => v[index] = x,
            (column, value) => {
                return Err(format!(
                    "cannot store {} value in {} column",
                    value.dtype(),
                    column.dtype()
                ))
            }
        }
        Ok(())
    }

    /// Build a column from values that must share one dtype
    ///
    /// Mixed integer and float values produce a float column.
    pub fn from_values(values: Vec<AttributeValue>) -> Result<Self, String> {
        let all_int = values.iter().all(|v| matches!(v, AttributeValue::Int(_)));
        let all_text = values.iter().all(|v| matches!(v, AttributeValue::Text(_)));
        if all_int {
            Ok(Column::Int(values.iter().filter_map(AttributeValue::as_i64).collect()))
        } else if all_text {
            Ok(Column::Text(values.into_iter().map(|v| v.to_string()).collect()))
        } else if values.iter().all(|v| v.as_f64().is_some()) {
            Ok(Column::Float(values.iter().filter_map(AttributeValue::as_f64).collect()))
        } else {
            Err("values mix text and numbers".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_json_carries_dtype() {
        let column = Column::Float(vec![0.5, 1.0]);
        let json = serde_json::to_string(&column).unwrap();
        assert_eq!(json, r#"{"dtype":"float","values":[0.5,1.0]}"#);
        let back: Column = serde_json::from_str(&json).unwrap();
        assert_eq!(back, column);
    }

    #[test]
    fn test_set_checks_dtype() {
        let mut column = Column::Float(vec![0.0; 3]);
        column.set(1, AttributeValue::Int(2)).unwrap();
        assert_eq!(column.get(1), Some(AttributeValue::Float(2.0)));
        assert!(column.set(0, "x".into()).is_err());
        assert!(column.set(3, 1.0.into()).is_err());

        let mut ints = Column::Int(vec![0]);
        assert!(ints.set(0, AttributeValue::Float(0.5)).is_err());
    }

    #[test]
    fn test_cell_parsing() {
        assert_eq!(AttributeValue::parse_cell("7"), AttributeValue::Int(7));
        assert_eq!(AttributeValue::parse_cell("0.25"), AttributeValue::Float(0.25));
        assert_eq!(
            AttributeValue::parse_cell("nml:Cell.json"),
            AttributeValue::Text("nml:Cell.json".to_string())
        );
    }

    #[test]
    fn test_from_values() {
        let column = Column::from_values(vec![1i64.into(), 2.5.into()]).unwrap();
        assert_eq!(column, Column::Float(vec![1.0, 2.5]));
        assert!(Column::from_values(vec![1i64.into(), "a".into()]).is_err());
    }
}
