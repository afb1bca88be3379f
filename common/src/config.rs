use std::{env, str::FromStr, time::Duration};
use tracing::warn;

/// Lee una variable de entorno y la parsea; si falta o es inválida usa `default`.
pub fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr,
{
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!("valor inválido en {}={:?}, usando el default", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}

/// Duración expresada en milisegundos, ej: MR_LEASE_TIMEOUT_MS=10000.
pub fn env_millis(name: &str, default: Duration) -> Duration {
    Duration::from_millis(env_or(name, default.as_millis() as u64))
}

/// Variable opcional: ausente o vacía -> None.
pub fn env_opt(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_parses_and_falls_back() {
        env::set_var("MAPRED_TEST_ENV_OR_OK", " 42 ");
        env::set_var("MAPRED_TEST_ENV_OR_BAD", "cuarenta");

        assert_eq!(env_or("MAPRED_TEST_ENV_OR_OK", 7u32), 42);
        assert_eq!(env_or("MAPRED_TEST_ENV_OR_BAD", 7u32), 7);
        assert_eq!(env_or("MAPRED_TEST_ENV_OR_MISSING", 7u32), 7);
    }

    #[test]
    fn env_millis_reads_milliseconds() {
        env::set_var("MAPRED_TEST_ENV_MILLIS", "1500");
        assert_eq!(
            env_millis("MAPRED_TEST_ENV_MILLIS", Duration::from_secs(1)),
            Duration::from_millis(1500)
        );
        assert_eq!(
            env_millis("MAPRED_TEST_ENV_MILLIS_MISSING", Duration::from_secs(3)),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn env_opt_treats_blank_as_missing() {
        env::set_var("MAPRED_TEST_ENV_OPT_BLANK", "   ");
        env::set_var("MAPRED_TEST_ENV_OPT_SET", "0.0.0.0:9000");
        assert_eq!(env_opt("MAPRED_TEST_ENV_OPT_BLANK"), None);
        assert_eq!(env_opt("MAPRED_TEST_ENV_OPT_SET").as_deref(), Some("0.0.0.0:9000"));
    }
}
