use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use crate::analysis::analyzer::Analyzer;
use crate::core::config::IndexSettings;
use crate::core::error::{Error, ErrorKind, Result};
use crate::query::ast::Query;
use crate::query::compiler::{CompileOptions, QueryCompiler, QueryField};
use crate::schema::schema::{FieldCatalog, FieldConfig};

/// Serializable index definition, as submitted when an index is created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub index_name: String,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub settings: IndexSettings,
}

/// Live configuration of one index on this node. Settings may change while
/// shards are open; readers of settings always take a fresh copy.
pub struct IndexConfig {
    index_name: String,
    catalog: FieldCatalog,
    analyzer: Analyzer,
    settings: RwLock<IndexSettings>,
}

impl IndexConfig {
    pub fn new(index_name: &str, catalog: FieldCatalog, settings: IndexSettings) -> Self {
        IndexConfig {
            index_name: index_name.to_string(),
            catalog,
            analyzer: Analyzer::standard(),
            settings: RwLock::new(settings),
        }
    }

    pub fn from_definition(definition: IndexDefinition) -> Result<Self> {
        if definition.index_name.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument, "index name must not be empty".to_string()));
        }
        if definition.settings.number_of_shards == 0 {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("index <{}> needs at least one shard", definition.index_name),
            ));
        }

        search_fields(&definition.settings)?;

        let mut catalog = FieldCatalog::new();
        for field in definition.fields {
            catalog.add_field(field);
        }
        Ok(IndexConfig::new(&definition.index_name, catalog, definition.settings))
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    pub fn settings(&self) -> IndexSettings {
        self.settings.read().clone()
    }

    pub fn number_of_shards(&self) -> u32 {
        self.settings.read().number_of_shards
    }

    /// Shard count is fixed at creation; everything else may change.
    pub fn update_settings(&self, settings: IndexSettings) -> Result<()> {
        let mut current = self.settings.write();
        if settings.number_of_shards != current.number_of_shards {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!(
                    "cannot change number of shards of index <{}> from {} to {}",
                    self.index_name, current.number_of_shards, settings.number_of_shards
                ),
            ));
        }
        search_fields(&settings)?;
        *current = settings;
        Ok(())
    }

    /// Options for queries that do not name their own search fields
    pub fn default_compile_options(&self) -> Result<CompileOptions> {
        Ok(CompileOptions {
            default_fields: search_fields(&self.settings.read())?,
            ..CompileOptions::default()
        })
    }

    pub fn compile(&self, text: &str, options: &CompileOptions) -> Result<Query> {
        QueryCompiler::new(&self.catalog, &self.analyzer).compile(text, options)
    }
}

fn search_fields(settings: &IndexSettings) -> Result<Vec<QueryField>> {
    settings.default_search_fields.iter().map(|f| QueryField::parse(f)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::schema::FieldType;

    #[test]
    fn definition_from_json() {
        let definition: IndexDefinition = serde_json::from_str(r#"{
            "index_name": "books",
            "fields": [{"name": "year", "field_type": "Int32", "multi_valued": false, "facet": true, "sortable": true}],
            "settings": {"number_of_shards": 3, "default_search_fields": ["title^2", "abstract"]}
        }"#).unwrap();

        let config = IndexConfig::from_definition(definition).unwrap();
        assert_eq!(config.number_of_shards(), 3);
        assert_eq!(config.catalog().field_type("year"), Some(FieldType::Int32));

        let options = config.default_compile_options().unwrap();
        assert_eq!(options.default_fields.len(), 2);
        assert_eq!(options.default_fields[0].boost, 2.0);
    }

    #[test]
    fn shard_count_is_immutable() {
        let config = IndexConfig::new("books", FieldCatalog::new(), IndexSettings::default());

        let mut settings = config.settings();
        settings.shard_commit_interval = 10;
        config.update_settings(settings.clone()).unwrap();
        assert_eq!(config.settings().shard_commit_interval, 10);

        settings.number_of_shards = 5;
        let err = config.update_settings(settings).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn invalid_search_field_boost_is_rejected() {
        let mut definition = IndexDefinition {
            index_name: "books".to_string(),
            fields: Vec::new(),
            settings: IndexSettings { default_search_fields: vec!["title^NaN".to_string()], ..IndexSettings::default() },
        };
        let err = IndexConfig::from_definition(definition.clone()).err().unwrap();
        assert_eq!(err.kind, ErrorKind::MalformedRequest);

        definition.settings.default_search_fields = vec!["title^2".to_string()];
        let config = IndexConfig::from_definition(definition).unwrap();
        let mut settings = config.settings();
        settings.default_search_fields = vec!["title^-1".to_string()];
        assert!(config.update_settings(settings).is_err());
        assert_eq!(config.default_compile_options().unwrap().default_fields[0].boost, 2.0);
    }
}
