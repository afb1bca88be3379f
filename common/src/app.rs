//! Funciones de usuario (map / reduce) y el registro de apps compiladas.
//!
//! El núcleo de coordinación sólo ve `MapReduceApp`; cómo se obtiene la
//! implementación (built-in, closures) no le importa.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::{indexer::Indexer, wordcount::WordCount};

/// Unidad de salida del map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct AppError(pub String);

pub trait MapReduceApp: Send + Sync {
    fn name(&self) -> &str;

    fn map(&self, source: &str, contents: &str) -> Result<Vec<KeyValue>, AppError>;

    fn reduce(&self, key: &str, values: &[String]) -> Result<String, AppError>;
}

/// App armada con dos closures; útil para tests y para embeber el worker.
pub struct FnApp<M, R> {
    name: String,
    map: M,
    reduce: R,
}

impl<M, R> FnApp<M, R>
where
    M: Fn(&str, &str) -> Result<Vec<KeyValue>, AppError> + Send + Sync,
    R: Fn(&str, &[String]) -> Result<String, AppError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, map: M, reduce: R) -> Self {
        Self {
            name: name.into(),
            map,
            reduce,
        }
    }
}

impl<M, R> MapReduceApp for FnApp<M, R>
where
    M: Fn(&str, &str) -> Result<Vec<KeyValue>, AppError> + Send + Sync,
    R: Fn(&str, &[String]) -> Result<String, AppError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn map(&self, source: &str, contents: &str) -> Result<Vec<KeyValue>, AppError> {
        (self.map)(source, contents)
    }

    fn reduce(&self, key: &str, values: &[String]) -> Result<String, AppError> {
        (self.reduce)(key, values)
    }
}

pub const AVAILABLE_APPS: &[&str] = &["wc", "indexer"];

/// Busca una app compilada por nombre (MR_APP).
pub fn lookup(name: &str) -> Option<Arc<dyn MapReduceApp>> {
    match name {
        "wc" | "wordcount" => Some(Arc::new(WordCount)),
        "indexer" => Some(Arc::new(Indexer)),
        _ => None,
    }
}
