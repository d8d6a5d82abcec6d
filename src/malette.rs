//! Where new records get their malette id from.
//!
//! A malette is the field kit that produced a record. Its id is looked up
//! again for every record written without an explicit one, so a kit can be
//! renumbered while the process runs (for instance by rewriting the id file).

use std::path::PathBuf;

use crate::config::MaletteConfig;
use crate::db::DbError;

/// Environment variable consulted when nothing else is configured.
pub const DEFAULT_ENV_VAR: &str = "PANODB_MALETTE_ID";

pub trait MaletteIdSource: Send + Sync {
    fn current_malette_id(&self) -> Result<i64, DbError>;
}

impl<F> MaletteIdSource for F
where
    F: Fn() -> Result<i64, DbError> + Send + Sync,
{
    fn current_malette_id(&self) -> Result<i64, DbError> {
        self()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedMaletteId(pub i64);

impl MaletteIdSource for FixedMaletteId {
    fn current_malette_id(&self) -> Result<i64, DbError> {
        Ok(self.0)
    }
}

/// Reads a file holding the id as decimal text.
#[derive(Debug, Clone)]
pub struct FileMaletteId {
    path: PathBuf,
}

impl FileMaletteId {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MaletteIdSource for FileMaletteId {
    fn current_malette_id(&self) -> Result<i64, DbError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            DbError::Malette(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        parse_malette_id(content.trim())
            .map_err(|why| DbError::Malette(format!("{}: {}", self.path.display(), why)))
    }
}

#[derive(Debug, Clone)]
pub struct EnvMaletteId {
    var: String,
}

impl EnvMaletteId {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl MaletteIdSource for EnvMaletteId {
    fn current_malette_id(&self) -> Result<i64, DbError> {
        let value = std::env::var(&self.var)
            .map_err(|_| DbError::Malette(format!("${} is not set", self.var)))?;
        parse_malette_id(value.trim())
            .map_err(|why| DbError::Malette(format!("${}: {}", self.var, why)))
    }
}

fn parse_malette_id(text: &str) -> Result<i64, String> {
    match text.parse::<i64>() {
        Ok(id) if id >= 0 => Ok(id),
        Ok(id) => Err(format!("negative malette id {}", id)),
        Err(_) => Err(format!("'{}' is not a malette id", text)),
    }
}

/// Pick the source named by the configuration: a fixed id, then an id file,
/// then an environment variable.
pub fn from_config(config: &MaletteConfig) -> Box<dyn MaletteIdSource> {
    if let Some(id) = config.id {
        tracing::debug!(malette_id = id, "Using fixed malette id");
        return Box::new(FixedMaletteId(id));
    }
    if let Some(path) = &config.id_file {
        tracing::debug!(path = %path.display(), "Reading malette id from file");
        return Box::new(FileMaletteId::new(path.clone()));
    }
    let var = config.env_var.as_deref().unwrap_or(DEFAULT_ENV_VAR);
    tracing::debug!(var, "Reading malette id from environment");
    Box::new(EnvMaletteId::new(var))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_source_rereads_on_each_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("malette_id");
        std::fs::write(&path, "3\n").unwrap();

        let source = FileMaletteId::new(&path);
        assert_eq!(source.current_malette_id().unwrap(), 3);

        std::fs::write(&path, "4").unwrap();
        assert_eq!(source.current_malette_id().unwrap(), 4);
    }

    #[test]
    fn test_file_source_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("malette_id");
        let source = FileMaletteId::new(&path);
        assert!(matches!(source.current_malette_id(), Err(DbError::Malette(_))));

        std::fs::write(&path, "kit-7").unwrap();
        assert!(matches!(source.current_malette_id(), Err(DbError::Malette(_))));

        std::fs::write(&path, "-1").unwrap();
        assert!(matches!(source.current_malette_id(), Err(DbError::Malette(_))));
    }

    #[test]
    fn test_env_source() {
        let var = "PANODB_TEST_MALETTE_ID_ENV_SOURCE";
        let source = EnvMaletteId::new(var);
        std::env::remove_var(var);
        assert!(matches!(source.current_malette_id(), Err(DbError::Malette(_))));

        std::env::set_var(var, " 12 ");
        assert_eq!(source.current_malette_id().unwrap(), 12);
        std::env::remove_var(var);
    }

    #[test]
    fn test_closure_source() {
        let source = || -> Result<i64, DbError> { Ok(5) };
        assert_eq!(source.current_malette_id().unwrap(), 5);
    }

    #[test]
    fn test_config_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("malette_id");
        std::fs::write(&path, "8").unwrap();

        let config = MaletteConfig {
            id: Some(2),
            id_file: Some(path.clone()),
            env_var: None,
        };
        assert_eq!(from_config(&config).current_malette_id().unwrap(), 2);

        let config = MaletteConfig {
            id: None,
            id_file: Some(path),
            env_var: None,
        };
        assert_eq!(from_config(&config).current_malette_id().unwrap(), 8);
    }
}
