use std::collections::BTreeSet;

use crate::app::{AppError, KeyValue, MapReduceApp};
use crate::wordcount::words;

/// Índice invertido: palabra -> "<n> doc1,doc2,...".
pub struct Indexer;

impl MapReduceApp for Indexer {
    fn name(&self) -> &str {
        "indexer"
    }

    fn map(&self, source: &str, contents: &str) -> Result<Vec<KeyValue>, AppError> {
        let distinct: BTreeSet<&str> = words(contents).collect();
        Ok(distinct
            .into_iter()
            .map(|w| KeyValue::new(w, source))
            .collect())
    }

    fn reduce(&self, _key: &str, values: &[String]) -> Result<String, AppError> {
        let docs: BTreeSet<&str> = values.iter().map(String::as_str).collect();
        let list: Vec<&str> = docs.into_iter().collect();
        Ok(format!("{} {}", list.len(), list.join(",")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_emits_each_word_once_per_document() {
        let kvs = Indexer.map("a.txt", "gato perro gato").unwrap();
        assert_eq!(
            kvs,
            vec![KeyValue::new("gato", "a.txt"), KeyValue::new("perro", "a.txt")]
        );
    }

    #[test]
    fn reduce_lists_sorted_distinct_documents() {
        let values = vec!["b.txt".to_string(), "a.txt".to_string(), "b.txt".to_string()];
        assert_eq!(Indexer.reduce("gato", &values).unwrap(), "2 a.txt,b.txt");
    }
}
