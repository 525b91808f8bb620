use std::collections::HashMap;
use serde_json::{Map, Value};
use crate::analysis::analyzer::Analyzer;
use crate::core::error::{Error, Result};
use crate::core::types::Document;
use crate::schema::schema::{
    char_length_field, list_length_field, parse_date_millis, FieldCatalog, FieldType,
};
use crate::search::results::SortValue;

/// Indexed numeric value. Integers and dates keep full 64-bit precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericValue {
    Int(i64),
    Float(f64),
}

impl NumericValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            NumericValue::Int(v) => *v as f64,
            NumericValue::Float(v) => *v,
        }
    }
}

/// Engine-ready form of a document
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub unique_id: String,
    pub document: Document,
    pub tokens: HashMap<String, Vec<Vec<String>>>,   // Token stream per value
    pub numbers: HashMap<String, Vec<NumericValue>>,
    pub fields_present: Vec<String>,
    pub facets: HashMap<String, Vec<String>>,
    pub sort_values: HashMap<String, SortValue>,
}

impl IndexedDocument {
    pub fn has_field(&self, field: &str) -> bool {
        self.fields_present.iter().any(|f| f == field)
    }
}

/// Turns stored JSON documents into indexed documents using the field catalog.
/// Nested objects are flattened with `.` separated paths.
pub struct DocumentIndexer<'a> {
    catalog: &'a FieldCatalog,
    analyzer: &'a Analyzer,
}

impl<'a> DocumentIndexer<'a> {
    pub fn new(catalog: &'a FieldCatalog, analyzer: &'a Analyzer) -> Self {
        DocumentIndexer { catalog, analyzer }
    }

    pub fn index(&self, document: &Document) -> Result<IndexedDocument> {
        if document.unique_id.is_empty() {
            return Err(Error::malformed(format!(
                "document for index <{}> has no unique id",
                document.index_name
            )));
        }

        let empty = Map::new();
        let body = match &document.body {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(Error::malformed(format!(
                    "document <{}> body must be a JSON object, found <{}>",
                    document.unique_id, other
                )));
            }
        };

        let mut indexed = IndexedDocument {
            unique_id: document.unique_id.clone(),
            document: document.clone(),
            tokens: HashMap::new(),
            numbers: HashMap::new(),
            fields_present: Vec::new(),
            facets: HashMap::new(),
            sort_values: HashMap::new(),
        };

        self.index_object("", body, &mut indexed)?;
        indexed.fields_present.sort();
        indexed.fields_present.dedup();
        Ok(indexed)
    }

    fn index_object(&self, prefix: &str, map: &Map<String, Value>, indexed: &mut IndexedDocument) -> Result<()> {
        for (key, value) in map {
            let path = if prefix.is_empty() { key.clone() } else { format!("{}.{}", prefix, key) };
            match value {
                Value::Null => {}
                Value::Object(inner) => self.index_object(&path, inner, indexed)?,
                Value::Array(items) => {
                    let scalars: Vec<&Value> = items.iter().filter(|v| !v.is_null()).collect();
                    push_number(indexed, list_length_field(&path), NumericValue::Int(scalars.len() as i64));
                    for item in scalars {
                        match item {
                            Value::Object(inner) => self.index_object(&path, inner, indexed)?,
                            _ => self.index_value(&path, item, indexed)?,
                        }
                    }
                }
                _ => {
                    push_number(indexed, list_length_field(&path), NumericValue::Int(1));
                    self.index_value(&path, value, indexed)?;
                }
            }
        }
        Ok(())
    }

    fn index_value(&self, field: &str, value: &Value, indexed: &mut IndexedDocument) -> Result<()> {
        let config = self.catalog.get(field);
        let field_type = config.map(|c| c.field_type).unwrap_or(FieldType::Text);

        let sort_value = match field_type {
            FieldType::Text => {
                let text = scalar_text(value);
                push_number(indexed, char_length_field(field), NumericValue::Int(text.chars().count() as i64));
                indexed
                    .tokens
                    .entry(field.to_string())
                    .or_default()
                    .push(self.analyzer.terms(&text));
                SortValue::Text(text.to_lowercase())
            }
            _ => {
                let number = typed_number(field_type, value).ok_or_else(|| {
                    let expected = if field_type.is_date() { "date" } else { "numeric" };
                    Error::malformed(format!(
                        "field <{}> expects {} but document <{}> has <{}>",
                        field, expected, indexed.unique_id, value
                    ))
                })?;
                push_number(indexed, field.to_string(), number);
                SortValue::Number(number.as_f64())
            }
        };

        indexed.fields_present.push(field.to_string());

        if let Some(config) = config {
            if config.facet {
                indexed
                    .facets
                    .entry(field.to_string())
                    .or_default()
                    .push(scalar_text(value));
            }
            if config.sortable {
                // First value wins for multi-valued fields
                indexed.sort_values.entry(field.to_string()).or_insert(sort_value);
            }
        }
        Ok(())
    }
}

fn push_number(indexed: &mut IndexedDocument, field: String, value: NumericValue) {
    indexed.numbers.entry(field).or_default().push(value);
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn typed_number(field_type: FieldType, value: &Value) -> Option<NumericValue> {
    match field_type {
        FieldType::Int32 => as_i64(value)
            .and_then(|v| i32::try_from(v).ok())
            .map(|v| NumericValue::Int(v as i64)),
        FieldType::Int64 => as_i64(value).map(NumericValue::Int),
        FieldType::Float32 | FieldType::Float64 => as_f64(value).map(NumericValue::Float),
        FieldType::Date => match value {
            Value::String(s) => parse_date_millis(s).map(NumericValue::Int),
            Value::Number(n) => n.as_i64().map(NumericValue::Int),
            _ => None,
        },
        FieldType::Text => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
