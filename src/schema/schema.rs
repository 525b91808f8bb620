use std::collections::HashMap;
use chrono::{DateTime, NaiveDate};
use serde::{Serialize, Deserialize};

/// Internal field holding the derived character length of a field
pub const CHAR_LENGTH_PREFIX: &str = "_cl_";
/// Internal field holding the derived element count of a field
pub const LIST_LENGTH_PREFIX: &str = "_ll_";
/// Internal per-document field-presence index
pub const FIELDS_LIST_FIELD: &str = "_fields";
pub const ID_FIELD: &str = "_id";
pub const SCORE_FIELD: &str = "_score";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Int32,
    Int64,
    Float32,
    Float64,
    Date,
}

impl FieldType {
    pub fn is_numeric_or_date(&self) -> bool {
        !matches!(self, FieldType::Text)
    }

    pub fn is_date(&self) -> bool {
        matches!(self, FieldType::Date)
    }
}

/// Field definition from the index configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    pub field_type: FieldType,
    pub multi_valued: bool,
    pub facet: bool,
    pub sortable: bool,
}

impl FieldConfig {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        FieldConfig {
            name: name.to_string(),
            field_type,
            multi_valued: false,
            facet: false,
            sortable: false,
        }
    }

    pub fn multi_valued(mut self) -> Self {
        self.multi_valued = true;
        self
    }

    pub fn facet(mut self) -> Self {
        self.facet = true;
        self
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }
}

/// Field name -> declared type lookup consumed by the compiler and indexer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldCatalog {
    fields: HashMap<String, FieldConfig>,
}

impl FieldCatalog {
    pub fn new() -> Self {
        FieldCatalog { fields: HashMap::new() }
    }

    pub fn with_field(mut self, field: FieldConfig) -> Self {
        self.add_field(field);
        self
    }

    pub fn add_field(&mut self, field: FieldConfig) {
        self.fields.insert(field.name.clone(), field);
    }

    pub fn get(&self, name: &str) -> Option<&FieldConfig> {
        self.fields.get(name)
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields.get(name).map(|f| f.field_type)
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldConfig> {
        self.fields.values()
    }

    pub fn facet_fields(&self) -> impl Iterator<Item = &FieldConfig> {
        self.fields.values().filter(|f| f.facet)
    }
}

/// Maps `|f|` to the char-length field of `f` and `|||f|||` to its
/// list-length field. `||f||` is reserved and passed through untouched, as
/// is any wrapping whose inner name is empty or starts or ends with `|`.
pub fn rewrite_length_field(field: &str) -> String {
    let inner = |pipes: &str| {
        field
            .strip_prefix(pipes)
            .and_then(|f| f.strip_suffix(pipes))
            .filter(|name| !name.is_empty() && !name.starts_with('|') && !name.ends_with('|'))
    };

    if let Some(name) = inner("|||") {
        list_length_field(name)
    } else if inner("||").is_some() {
        field.to_string()
    } else if let Some(name) = inner("|") {
        char_length_field(name)
    } else {
        field.to_string()
    }
}

/// ISO-8601 instant when the literal carries a time (`:`), otherwise a
/// `YYYY-MM-DD` date taken at UTC midnight.
pub fn parse_date_millis(value: &str) -> Option<i64> {
    if value.contains(':') {
        DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|d| d.timestamp_millis())
    } else {
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp_millis())
    }
}

pub fn is_length_field(field: &str) -> bool {
    field.starts_with(CHAR_LENGTH_PREFIX) || field.starts_with(LIST_LENGTH_PREFIX)
}

pub fn char_length_field(field: &str) -> String {
    format!("{}{}", CHAR_LENGTH_PREFIX, field)
}

pub fn list_length_field(field: &str) -> String {
    format!("{}{}", LIST_LENGTH_PREFIX, field)
}
