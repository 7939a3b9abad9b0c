use super::{DirEngine, Full, KvStore, MemoryEngine, SqliteStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

type Predicate = Box<dyn Fn(&str) -> bool + Send + Sync>;
type Factory = Box<dyn Fn(&str) -> Box<dyn Full> + Send + Sync>;

struct Backend {
    name: &'static str,
    matches: Predicate,
    open: Factory,
}

/// Ordered list of storage backends, selected by connection string.
pub struct Registry {
    backends: Vec<Backend>,
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// A plain `*.db` path opens SQLite, `mem://name` a shared in-memory
    /// namespace and `kv://dir` a directory-backed one. Scheme URLs never
    /// open SQLite, whatever their suffix.
    pub fn standard() -> Self {
        let mut reg = Self::empty();
        reg.register(
            "sqlite",
            |conn| conn.ends_with(".db") && !conn.contains("://"),
            |conn| Box::new(SqliteStore::open(conn)),
        );

        let namespaces: Arc<Mutex<HashMap<String, MemoryEngine>>> = Arc::default();
        reg.register(
            "memory",
            |conn| conn.starts_with("mem://"),
            move |conn| {
                let name = conn.trim_start_matches("mem://").to_string();
                let engine = match namespaces.lock() {
                    Ok(mut map) => map
                        .entry(name.clone())
                        .or_insert_with(|| MemoryEngine::new(name))
                        .clone(),
                    // A poisoned map still holds valid engines.
                    Err(poisoned) => poisoned
                        .into_inner()
                        .entry(name.clone())
                        .or_insert_with(|| MemoryEngine::new(name))
                        .clone(),
                };
                Box::new(KvStore::new(engine))
            },
        );

        reg.register(
            "directory",
            |conn| conn.starts_with("kv://"),
            |conn| Box::new(KvStore::new(DirEngine::new(conn.trim_start_matches("kv://")))),
        );
        reg
    }

    pub fn register(
        &mut self,
        name: &'static str,
        matches: impl Fn(&str) -> bool + Send + Sync + 'static,
        open: impl Fn(&str) -> Box<dyn Full> + Send + Sync + 'static,
    ) {
        self.backends.push(Backend {
            name,
            matches: Box::new(matches),
            open: Box::new(open),
        });
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name).collect()
    }

    /// First backend whose predicate accepts `conn`, or `None`.
    pub fn open(&self, conn: &str) -> Option<Box<dyn Full>> {
        let Some(backend) = self.backends.iter().find(|b| (b.matches)(conn)) else {
            warn!(conn, "no storage backend matches connection string");
            return None;
        };
        info!(conn, backend = backend.name, "opening storage backend");
        Some((backend.open)(conn))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Student;
    use crate::store::{Read, Write};

    #[test]
    fn standard_order() {
        assert_eq!(Registry::standard().names(), vec!["sqlite", "memory", "directory"]);
    }

    #[test]
    fn unknown_connection_string_has_no_backend() {
        let reg = Registry::standard();
        assert!(reg.open("postgres://localhost/progress").is_none());
        assert!(reg.open("").is_none());
        assert!(Registry::empty().open("x.db").is_none());
    }

    #[test]
    fn memory_namespaces_are_shared_by_name() {
        let reg = Registry::standard();
        let mut a = reg.open("mem://grades").expect("backend");
        let mut b = reg.open("mem://grades").expect("backend");
        let mut other = reg.open("mem://other").expect("backend");
        assert_eq!(a.kind(), "kv");

        a.save_students(&[Student::new(4, "Dee")]).expect("save");
        assert_eq!(b.students().expect("read").len(), 1);
        assert!(other.students().expect("read").is_empty());
    }

    #[test]
    fn scheme_urls_with_db_suffix_stay_key_value() {
        let dir = tempfile::tempdir().expect("tempdir");
        let reg = Registry::standard();

        let mem = reg.open("mem://cache.db").expect("memory backend");
        assert_eq!(mem.kind(), "kv");

        let conn = format!("kv://{}", dir.path().join("nested/x.db").display());
        let kv = reg.open(&conn).expect("directory backend");
        assert_eq!(kv.kind(), "kv");
        assert!(!dir.path().join("nested").exists(), "opening writes nothing");

        let db = dir.path().join("plain.db");
        let sqlite = reg.open(&db.to_string_lossy()).expect("sqlite backend");
        assert_eq!(sqlite.kind(), "sqlite");
    }

    #[test]
    fn first_match_wins() {
        let first = MemoryEngine::new("first");
        KvStore::new(first.clone())
            .save_students(&[Student::new(1, "Al")])
            .expect("seed first");

        let mut reg = Registry::empty();
        reg.register("first", |c| c.starts_with("mem://"), move |_| {
            Box::new(KvStore::new(first.clone()))
        });
        reg.register("second", |_| true, |_| Box::new(KvStore::new(MemoryEngine::new("second"))));
        assert_eq!(reg.names(), vec!["first", "second"]);

        let mut opened = reg.open("mem://x").expect("backend");
        assert_eq!(opened.students().expect("read").len(), 1, "first factory chosen");
        let mut fallback = reg.open("other").expect("backend");
        assert!(fallback.students().expect("read").is_empty());
    }
}
