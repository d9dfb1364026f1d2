use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataShapeError {
    #[error("Invalid configuration for schema \"{schema}\": {message}")]
    InvalidConfiguration { schema: String, message: String },

    #[error("Property \"{property}\": {message}")]
    InvalidConfigurationProperty { property: String, message: String },

    #[error("Maximum nesting depth exceeded")]
    NestingDepthExceeded,

    #[error("Property \"{property}\": maximum source referencing depth exceeded")]
    MaxSourceDepthExceeded { property: String },

    #[error("Data transformer \"{0}\" doesn't exist")]
    DataTransformerNotExists(String),

    #[error("Missing discriminator: {0}")]
    MissingDiscriminator(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Schema source not found: {0}")]
    SchemaNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl DataShapeError {
    /// Rewrap a property-scoped error into a schema-wide one carrying the
    /// schema/type identity, so the final message reads as a chained path.
    pub fn into_configuration_error(self, schema_identity: &str) -> DataShapeError {
        match self {
            DataShapeError::InvalidConfiguration { .. } => self,
            other => DataShapeError::InvalidConfiguration {
                schema: schema_identity.to_string(),
                message: other.to_string(),
            },
        }
    }

    pub fn property(name: &str, message: impl Into<String>) -> DataShapeError {
        DataShapeError::InvalidConfigurationProperty {
            property: name.to_string(),
            message: message.into(),
        }
    }

    pub fn configuration(schema_identity: &str, message: impl Into<String>) -> DataShapeError {
        DataShapeError::InvalidConfiguration {
            schema: schema_identity.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DataShapeError>;
