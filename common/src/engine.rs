use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::app::{AppError, KeyValue, MapReduceApp};
use crate::worker::WorkerId;

/// Grupo intermedio: clave -> valores en el orden en que los emitió el map.
pub type Groups = Vec<(String, Vec<String>)>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no se pudo leer {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("map falló sobre {input}: {error}")]
    Map { input: String, error: AppError },

    #[error("reduce falló en la clave {key:?}: {error}")]
    Reduce { key: String, error: AppError },

    #[error("no se pudo escribir {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("merge en {path} falló: {source}")]
    Merge {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Resultado de correr map -> reduce -> merge sobre una entrada.
#[derive(Debug, Clone)]
pub struct TaskOutput {
    pub partials: Vec<PathBuf>,
    /// None si el merge falló (las parciales siguen en disco)
    pub merged: Option<PathBuf>,
    pub keys: usize,
}

pub fn read_input(path: &str) -> Result<String, EngineError> {
    fs::read_to_string(path).map_err(|e| EngineError::Read {
        path: path.to_string(),
        source: e,
    })
}

/// Ordena por clave (estable) y agrupa las claves contiguas iguales.
pub fn group_by_key(mut kvs: Vec<KeyValue>) -> Groups {
    kvs.sort_by(|a, b| a.key.cmp(&b.key));

    let mut groups: Groups = Vec::new();
    for kv in kvs {
        match groups.last_mut() {
            Some((key, values)) if *key == kv.key => values.push(kv.value),
            _ => groups.push((kv.key, vec![kv.value])),
        }
    }
    groups
}

/// Map completo sobre el contenido y agrupado.
pub fn map_step(
    app: &dyn MapReduceApp,
    source_name: &str,
    contents: &str,
) -> Result<Groups, EngineError> {
    let kvs = app
        .map(source_name, contents)
        .map_err(|error| EngineError::Map {
            input: source_name.to_string(),
            error,
        })?;
    debug!("map de {} emitió {} pares", source_name, kvs.len());
    Ok(group_by_key(kvs))
}

/// FNV-1a de 32 bits; estable entre procesos y versiones de Rust.
fn fnv1a_32(key: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in key.as_bytes() {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

pub fn partition_for(key: &str, n_reduce: u32) -> usize {
    ((fnv1a_32(key) & 0x7fff_ffff) % n_reduce.max(1)) as usize
}

/// Parciales y finales usan prefijos distintos: con un único prefijo
/// "a" + parte 1 y "a-1" + merge darían el mismo nombre.
pub fn reduce_output_name(stem: &str, worker_id: WorkerId, partition: usize) -> String {
    format!("mr-part-{}-{}-{}", stem, worker_id, partition)
}

pub fn merged_output_name(stem: &str, worker_id: WorkerId) -> String {
    format!("mr-out-{}-{}", stem, worker_id)
}

/// Reduce por clave y escritura de `n_reduce` archivos parciales
/// ("clave valor" por línea). Si algo falla se borran las parciales creadas.
pub fn reduce_step(
    app: &dyn MapReduceApp,
    groups: &Groups,
    n_reduce: u32,
    output_dir: &Path,
    stem: &str,
    worker_id: WorkerId,
) -> Result<Vec<PathBuf>, EngineError> {
    let n = n_reduce.max(1) as usize;
    let paths: Vec<PathBuf> = (0..n)
        .map(|p| output_dir.join(reduce_output_name(stem, worker_id, p)))
        .collect();

    let res = write_partitions(app, groups, n_reduce, output_dir, &paths);
    if res.is_err() {
        for p in &paths {
            let _ = fs::remove_file(p);
        }
    }
    res.map(|_| paths)
}

fn write_partitions(
    app: &dyn MapReduceApp,
    groups: &Groups,
    n_reduce: u32,
    output_dir: &Path,
    paths: &[PathBuf],
) -> Result<(), EngineError> {
    let write_err = |path: &Path, source: io::Error| EngineError::Write {
        path: path.display().to_string(),
        source,
    };

    fs::create_dir_all(output_dir).map_err(|e| write_err(output_dir, e))?;

    let mut writers = Vec::with_capacity(paths.len());
    for path in paths {
        let file = File::create(path).map_err(|e| write_err(path, e))?;
        writers.push(BufWriter::new(file));
    }

    for (key, values) in groups {
        let reduced = app.reduce(key, values).map_err(|error| EngineError::Reduce {
            key: key.clone(),
            error,
        })?;
        let pid = partition_for(key, n_reduce);
        writeln!(writers[pid], "{} {}", key, reduced).map_err(|e| write_err(&paths[pid], e))?;
    }

    for (w, path) in writers.iter_mut().zip(paths) {
        w.flush().map_err(|e| write_err(path, e))?;
    }
    Ok(())
}

/// Concatena las parciales en `dest`, en orden.
pub fn merge_outputs(partials: &[PathBuf], dest: &Path) -> Result<(), EngineError> {
    let merge_err = |source: io::Error| EngineError::Merge {
        path: dest.display().to_string(),
        source,
    };

    let mut out = BufWriter::new(File::create(dest).map_err(merge_err)?);
    for part in partials {
        let mut f = File::open(part).map_err(merge_err)?;
        io::copy(&mut f, &mut out).map_err(merge_err)?;
    }
    out.flush().map_err(merge_err)
}

/// map -> group -> reduce -> merge sobre un contenido ya leído.
/// Un merge fallido se loguea y no se propaga: el trabajo caro ya está hecho.
pub fn run_pipeline(
    app: &dyn MapReduceApp,
    source_name: &str,
    contents: &str,
    n_reduce: u32,
    output_dir: &Path,
    stem: &str,
    worker_id: WorkerId,
) -> Result<TaskOutput, EngineError> {
    let groups = map_step(app, source_name, contents)?;
    let partials = reduce_step(app, &groups, n_reduce, output_dir, stem, worker_id)?;

    let dest = output_dir.join(merged_output_name(stem, worker_id));
    let merged = match merge_outputs(&partials, &dest) {
        Ok(()) => Some(dest),
        Err(e) => {
            warn!("no se pudo hacer merge de {}: {}", stem, e);
            None
        }
    };

    Ok(TaskOutput {
        partials,
        merged,
        keys: groups.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::FnApp;
    use crate::wordcount::WordCount;
    use std::collections::HashSet;
    use std::env;

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("engine_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn lines_of(path: &Path) -> HashSet<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn group_by_key_agrupa_claves_contiguas() {
        let kvs = vec![
            KeyValue::new("b", "1"),
            KeyValue::new("a", "x"),
            KeyValue::new("b", "2"),
            KeyValue::new("a", "y"),
        ];

        let groups = group_by_key(kvs);

        assert_eq!(
            groups,
            vec![
                ("a".to_string(), vec!["x".to_string(), "y".to_string()]),
                ("b".to_string(), vec!["1".to_string(), "2".to_string()]),
            ]
        );
    }

    #[test]
    fn map_step_the_cat_sat() {
        let groups = map_step(&WordCount, "in.txt", "the cat sat").unwrap();

        let as_set: HashSet<(String, Vec<String>)> = groups.into_iter().collect();
        let expected: HashSet<(String, Vec<String>)> = ["the", "cat", "sat"]
            .iter()
            .map(|w| (w.to_string(), vec!["1".to_string()]))
            .collect();
        assert_eq!(as_set, expected);
    }

    #[test]
    fn map_step_propaga_error_del_usuario() {
        let app = FnApp::new(
            "roto",
            |_s: &str, _c: &str| Err(AppError("boom".into())),
            |_k: &str, _v: &[String]| Ok(String::new()),
        );

        let err = map_step(&app, "a.txt", "x").unwrap_err();
        assert!(matches!(err, EngineError::Map { ref input, .. } if input == "a.txt"));
    }

    #[test]
    fn partition_for_es_determinista_y_en_rango() {
        for key in ["the", "cat", "sat", "", "ñandú"] {
            let p = partition_for(key, 10);
            assert!(p < 10);
            assert_eq!(p, partition_for(key, 10));
        }
        assert_eq!(partition_for("cualquiera", 1), 0);
        assert_eq!(partition_for("cualquiera", 0), 0);
    }

    #[test]
    fn fnv1a_coincide_con_vectores_conocidos() {
        assert_eq!(fnv1a_32(""), 0x811c_9dc5);
        assert_eq!(fnv1a_32("a"), 0xe40c_292c);
    }

    #[test]
    fn reduce_step_escribe_n_reduce_archivos() {
        let dir = temp_dir("reduce_n");
        let groups = map_step(&WordCount, "in.txt", "the cat sat the").unwrap();

        let parts = reduce_step(&WordCount, &groups, 3, &dir, "in", 7).unwrap();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], dir.join("mr-part-in-7-0"));

        let mut all = HashSet::new();
        for (pid, p) in parts.iter().enumerate() {
            for line in lines_of(p) {
                let key = line.split(' ').next().unwrap().to_string();
                assert_eq!(partition_for(&key, 3), pid);
                all.insert(line);
            }
        }
        let expected: HashSet<String> = ["the 2", "cat 1", "sat 1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn reduce_step_borra_parciales_si_falla() {
        let dir = temp_dir("reduce_fail");
        let app = FnApp::new(
            "reduce-roto",
            |_s: &str, c: &str| Ok(vec![KeyValue::new(c, "1")]),
            |_k: &str, _v: &[String]| Err(AppError("no".into())),
        );
        let groups = map_step(&app, "x", "k").unwrap();

        let err = reduce_step(&app, &groups, 2, &dir, "x", 1).unwrap_err();

        assert!(matches!(err, EngineError::Reduce { .. }));
        assert!(!dir.join("mr-part-x-1-0").exists());
        assert!(!dir.join("mr-part-x-1-1").exists());
    }

    #[test]
    fn run_pipeline_deja_un_archivo_final() {
        let dir = temp_dir("pipeline");

        let out = run_pipeline(&WordCount, "a.txt", "the cat sat", 2, &dir, "a", 1).unwrap();

        let merged = out.merged.expect("merge ok");
        assert_eq!(merged, dir.join("mr-out-a-1"));
        assert_eq!(out.keys, 3);
        let expected: HashSet<String> = ["the 1", "cat 1", "sat 1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(lines_of(&merged), expected);
    }

    #[test]
    fn run_pipeline_sobrevive_a_merge_fallido() {
        let dir = temp_dir("pipeline_merge_fail");
        // un directorio con el nombre del archivo final hace fallar el merge
        fs::create_dir_all(dir.join("mr-out-a-1")).unwrap();

        let out = run_pipeline(&WordCount, "a.txt", "uno dos", 1, &dir, "a", 1).unwrap();

        assert!(out.merged.is_none());
        assert_eq!(out.partials.len(), 1);
        assert!(out.partials[0].exists());
    }

    #[test]
    fn parciales_no_pisan_finales_de_otro_stem() {
        let dir = temp_dir("pipeline_stems");

        // "a-1" termina primero; luego "a" escribe su parte 1 con el mismo worker
        let first = run_pipeline(&WordCount, "a-1.txt", "uno", 2, &dir, "a-1", 1).unwrap();
        let second = run_pipeline(&WordCount, "a.txt", "dos tres", 2, &dir, "a", 1).unwrap();

        let merged_first = first.merged.expect("merge ok");
        assert_eq!(merged_first, dir.join("mr-out-a-1-1"));
        assert!(!second.partials.contains(&merged_first));
        assert_eq!(lines_of(&merged_first), HashSet::from(["uno 1".to_string()]));
    }

    #[test]
    fn read_input_devuelve_error_si_falta() {
        let dir = temp_dir("missing");
        let res = read_input(dir.join("no_existe.txt").to_str().unwrap());
        assert!(matches!(res, Err(EngineError::Read { .. })));
    }
}
