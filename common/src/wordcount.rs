use crate::app::{AppError, KeyValue, MapReduceApp};

/// WordCount: una palabra es una secuencia máxima de letras.
pub struct WordCount;

/// Separa el texto en palabras (cualquier caracter que no sea letra corta).
pub fn words(contents: &str) -> impl Iterator<Item = &str> {
    contents
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
}

impl MapReduceApp for WordCount {
    fn name(&self) -> &str {
        "wc"
    }

    fn map(&self, _source: &str, contents: &str) -> Result<Vec<KeyValue>, AppError> {
        Ok(words(contents).map(|w| KeyValue::new(w, "1")).collect())
    }

    fn reduce(&self, _key: &str, values: &[String]) -> Result<String, AppError> {
        let mut total: u64 = 0;
        for v in values {
            let n = v
                .parse::<u64>()
                .map_err(|_| AppError(format!("conteo inválido {:?}", v)))?;
            total += n;
        }
        Ok(total.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_emits_one_per_word() {
        let kvs = WordCount.map("in.txt", "Hola hola, mundo!!\nmundo_prueba").unwrap();
        let keys: Vec<&str> = kvs.iter().map(|kv| kv.key.as_str()).collect();

        // sin normalizar mayúsculas; '_' separa
        assert_eq!(keys, vec!["Hola", "hola", "mundo", "mundo", "prueba"]);
        assert!(kvs.iter().all(|kv| kv.value == "1"));
    }

    #[test]
    fn map_on_empty_input_is_empty() {
        assert!(WordCount.map("x", "").unwrap().is_empty());
        assert!(WordCount.map("x", " 123 ,,, ").unwrap().is_empty());
    }

    #[test]
    fn reduce_sums_counts() {
        let values = vec!["1".to_string(), "1".to_string(), "3".to_string()];
        assert_eq!(WordCount.reduce("the", &values).unwrap(), "5");
    }

    #[test]
    fn reduce_rejects_garbage() {
        let values = vec!["uno".to_string()];
        assert!(WordCount.reduce("the", &values).is_err());
    }
}
