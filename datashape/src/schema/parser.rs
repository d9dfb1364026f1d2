use crate::error::{DataShapeError, Result};
use crate::schema::types::RawSchema;
use std::path::{Path, PathBuf};

/// Parse a schema document file into a `RawSchema`
pub fn parse_schema(path: &Path) -> Result<RawSchema> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse a schema YAML string into a `RawSchema`
pub fn parse_schema_str(content: &str) -> Result<RawSchema> {
    let raw: RawSchema = serde_yaml::from_str(content)?;
    Ok(raw)
}

/// Resolves schema names (`article.yml`) to raw schema documents.
///
/// The compiler splices `schema:` references through this, and the validator
/// checks reference existence against it.
pub trait SchemaSource {
    fn load(&self, name: &str) -> Result<RawSchema>;
    fn exists(&self, name: &str) -> bool;
    /// Names of every schema document this source knows about.
    fn list(&self) -> Result<Vec<String>>;
}

/// Directory-backed schema source: names are file paths relative to a base
/// directory.
pub struct YamlSchemaDir {
    dir: PathBuf,
}

impl YamlSchemaDir {
    pub fn new(dir: impl Into<PathBuf>) -> YamlSchemaDir {
        YamlSchemaDir { dir: dir.into() }
    }

    fn resolve(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl SchemaSource for YamlSchemaDir {
    fn load(&self, name: &str) -> Result<RawSchema> {
        let path = self.resolve(name);
        if !path.is_file() {
            return Err(DataShapeError::SchemaNotFound(name.to_string()));
        }
        parse_schema(&path)
    }

    fn exists(&self, name: &str) -> bool {
        self.resolve(name).is_file()
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();

        for extension in ["yml", "yaml"] {
            let pattern = self.dir.join(format!("**/*.{extension}"));
            let pattern = pattern.to_string_lossy().into_owned();
            let paths = glob::glob(&pattern)
                .map_err(|e| DataShapeError::configuration("<schema dir>", e.to_string()))?;

            for entry in paths {
                let path = entry
                    .map_err(|e| DataShapeError::configuration("<schema dir>", e.to_string()))?;
                if let Ok(relative) = path.strip_prefix(&self.dir) {
                    names.push(relative.to_string_lossy().into_owned());
                }
            }
        }

        names.sort();
        Ok(names)
    }
}

/// In-memory schema source for tests and embedded configuration.
#[derive(Default)]
pub struct MemorySchemaSource {
    documents: std::collections::HashMap<String, String>,
}

impl MemorySchemaSource {
    pub fn new() -> MemorySchemaSource {
        MemorySchemaSource::default()
    }

    pub fn add(&mut self, name: &str, yaml: &str) {
        self.documents.insert(name.to_string(), yaml.to_string());
    }
}

impl SchemaSource for MemorySchemaSource {
    fn load(&self, name: &str) -> Result<RawSchema> {
        match self.documents.get(name) {
            Some(content) => parse_schema_str(content),
            None => Err(DataShapeError::SchemaNotFound(name.to_string())),
        }
    }

    fn exists(&self, name: &str) -> bool {
        self.documents.contains_key(name)
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.documents.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
