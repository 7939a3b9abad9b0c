use super::{read_tree, Full, Read, Write};
use crate::error::{Error, Result};
use crate::model::{sort_by_due, Assignment, Course, Student};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::debug;

pub const STUDENTS_BUCKET: &str = "students";
pub const COURSES_BUCKET: &str = "courses";
pub const ASSIGNMENTS_BUCKET: &str = "assignments";

const NAMESPACE_FILE: &str = "namespace.json";

/// Buckets of JSON values keyed by string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    #[serde(default)]
    buckets: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Namespace {
    pub fn get(&self, bucket: &str, key: &str) -> Option<&Value> {
        self.buckets.get(bucket)?.get(key)
    }

    /// Entries of `bucket` whose key starts with `prefix`, in key order.
    pub fn scan<'a>(
        &'a self,
        bucket: &str,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a Value)> + 'a {
        self.buckets
            .get(bucket)
            .into_iter()
            .flat_map(move |b| b.range(prefix.to_string()..))
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self, bucket: &str) -> usize {
        self.buckets.get(bucket).map_or(0, BTreeMap::len)
    }

    pub fn apply(&mut self, batch: Batch) {
        for (bucket, key, value) in batch.puts {
            self.buckets.entry(bucket).or_default().insert(key, value);
        }
    }
}

/// Puts staged for one atomic apply.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    puts: Vec<(String, String, Value)>,
}

impl Batch {
    pub fn put<T: Serialize>(&mut self, bucket: &str, key: String, value: &T) -> Result<()> {
        let value =
            serde_json::to_value(value).map_err(|e| Error::Marshal(format!("{bucket}/{key}: {e}")))?;
        self.puts.push((bucket.to_string(), key, value));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.puts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.puts.is_empty()
    }
}

/// Storage under a `KvStore`. `apply` must be all-or-nothing.
pub trait KvEngine {
    fn snapshot(&self) -> Result<Namespace>;
    fn apply(&self, batch: Batch) -> Result<()>;
    fn describe(&self) -> String;
}

/// Process-local namespace. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    name: String,
    inner: Arc<RwLock<Namespace>>,
}

impl MemoryEngine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::default(),
        }
    }
}

impl KvEngine for MemoryEngine {
    fn snapshot(&self) -> Result<Namespace> {
        let ns = self
            .inner
            .read()
            .map_err(|_| Error::Persistence(format!("namespace {} is poisoned", self.name)))?;
        Ok(ns.clone())
    }

    fn apply(&self, batch: Batch) -> Result<()> {
        let mut ns = self
            .inner
            .write()
            .map_err(|_| Error::Persistence(format!("namespace {} is poisoned", self.name)))?;
        ns.apply(batch);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("mem://{}", self.name)
    }
}

/// Namespace persisted as one JSON file inside a directory.
#[derive(Debug, Clone)]
pub struct DirEngine {
    dir: PathBuf,
}

impl DirEngine {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file(&self) -> PathBuf {
        self.dir.join(NAMESPACE_FILE)
    }

    fn load(&self) -> Result<Namespace> {
        let path = self.file();
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Namespace::default()),
            Err(e) => return Err(io_error(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Persistence(format!("{}: {e}", path.display())))
    }
}

impl KvEngine for DirEngine {
    fn snapshot(&self) -> Result<Namespace> {
        self.load()
    }

    fn apply(&self, batch: Batch) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        let mut ns = self.load()?;
        ns.apply(batch);
        let bytes = serde_json::to_vec(&ns).map_err(|e| Error::Marshal(e.to_string()))?;

        let path = self.file();
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).map_err(|e| io_error(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("kv://{}", self.dir.display())
    }
}

fn io_error(path: &Path, e: std::io::Error) -> Error {
    Error::Persistence(format!("{}: {e}", path.display()))
}

fn student_key(student_id: i64) -> String {
    student_id.to_string()
}

fn course_key(student_id: i64, course_id: i64) -> String {
    format!("{student_id}.{course_id}")
}

fn assignment_key(student_id: i64, course_id: i64, assignment_id: i64) -> String {
    format!("{student_id}.{course_id}.{assignment_id}")
}

/// Key-value backend: buckets `students`, `courses`, `assignments` keyed by
/// `sid`, `sid.cid` and `sid.cid.aid`.
pub struct KvStore {
    engine: Box<dyn KvEngine>,
    // Snapshot taken by `students()`; nested reads of the same walk reuse it.
    cache: Option<Namespace>,
    last_error: Option<Error>,
}

impl KvStore {
    pub fn new(engine: impl KvEngine + 'static) -> Self {
        Self {
            engine: Box::new(engine),
            cache: None,
            last_error: None,
        }
    }

    pub fn describe(&self) -> String {
        self.engine.describe()
    }

    fn check(&self) -> Result<()> {
        match &self.last_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn record(&mut self, e: Error) -> Error {
        self.last_error = Some(e.clone());
        e
    }

    fn refresh(&mut self) -> Result<&Namespace> {
        self.check()?;
        let ns = self.engine.snapshot().map_err(|e| self.record(e))?;
        Ok(self.cache.insert(ns))
    }

    fn namespace(&mut self) -> Result<&Namespace> {
        self.check()?;
        if self.cache.is_none() {
            return self.refresh();
        }
        match self.cache.as_ref() {
            Some(ns) => Ok(ns),
            None => Err(Error::Persistence("namespace cache missing".into())),
        }
    }

    fn commit(&mut self, batch: Batch) -> Result<()> {
        self.check()?;
        let puts = batch.len();
        self.cache = None;
        self.engine.apply(batch).map_err(|e| self.record(e))?;
        debug!(store = %self.engine.describe(), puts, "kv batch applied");
        Ok(())
    }
}

fn decode_all<T: DeserializeOwned>(ns: &Namespace, bucket: &str, prefix: &str) -> Result<Vec<T>> {
    // Only direct children: "1." must not pick up "1.2.3" from a deeper level.
    let depth = prefix.matches('.').count();
    ns.scan(bucket, prefix)
        .filter(|(k, _)| k.matches('.').count() == depth)
        .map(|(k, v)| {
            T::deserialize(v).map_err(|e| Error::Marshal(format!("{bucket}/{k}: {e}")))
        })
        .collect()
}

fn stage_students(batch: &mut Batch, students: &[Student]) -> Result<()> {
    for s in students {
        batch.put(STUDENTS_BUCKET, student_key(s.id), &s.shallow())?;
    }
    Ok(())
}

fn stage_courses(batch: &mut Batch, student: &Student, courses: &[Course]) -> Result<()> {
    for c in courses {
        let mut c = c.shallow();
        c.student_id = student.id;
        batch.put(COURSES_BUCKET, course_key(student.id, c.id), &c)?;
    }
    Ok(())
}

fn stage_assignments(
    batch: &mut Batch,
    student: &Student,
    course: &Course,
    assignments: &[Assignment],
) -> Result<()> {
    for a in assignments {
        let mut a = a.clone();
        a.student_id = student.id;
        a.course_id = course.id;
        batch.put(ASSIGNMENTS_BUCKET, assignment_key(student.id, course.id, a.id), &a)?;
    }
    Ok(())
}

impl Read for KvStore {
    fn students(&mut self) -> Result<Vec<Student>> {
        let ns = self.refresh()?;
        let decoded = decode_all(ns, STUDENTS_BUCKET, "");
        let mut out: Vec<Student> = decoded.map_err(|e| self.record(e))?;
        out.sort_by_key(|s| s.id);
        Ok(out)
    }

    fn courses(&mut self, student: &Student) -> Result<Vec<Course>> {
        let prefix = format!("{}.", student_key(student.id));
        let ns = self.namespace()?;
        let decoded = decode_all(ns, COURSES_BUCKET, &prefix);
        let mut out: Vec<Course> = decoded.map_err(|e| self.record(e))?;
        out.sort_by_key(|c| c.id);
        Ok(out)
    }

    fn assignments(&mut self, student: &Student, course: &Course) -> Result<Vec<Assignment>> {
        let prefix = format!("{}.", course_key(student.id, course.id));
        let ns = self.namespace()?;
        let decoded = decode_all(ns, ASSIGNMENTS_BUCKET, &prefix);
        let mut out: Vec<Assignment> = decoded.map_err(|e| self.record(e))?;
        out.sort_by_key(|a| a.id);
        sort_by_due(&mut out);
        Ok(out)
    }
}

impl Write for KvStore {
    fn save(&mut self, reader: &mut dyn Read) -> Result<()> {
        self.check()?;
        let data = read_tree(reader)?;
        let mut batch = Batch::default();
        let students: Vec<Student> = data.students.iter().map(Student::shallow).collect();
        stage_students(&mut batch, &students)?;
        for student in &data.students {
            stage_courses(&mut batch, student, &student.courses)?;
            for course in &student.courses {
                stage_assignments(&mut batch, student, course, &course.assignments)?;
            }
        }
        self.commit(batch)
    }

    fn save_students(&mut self, students: &[Student]) -> Result<()> {
        let mut batch = Batch::default();
        stage_students(&mut batch, students)?;
        self.commit(batch)
    }

    fn save_courses(&mut self, student: &Student, courses: &[Course]) -> Result<()> {
        let mut batch = Batch::default();
        stage_courses(&mut batch, student, courses)?;
        self.commit(batch)
    }

    fn save_assignments(
        &mut self,
        student: &Student,
        course: &Course,
        assignments: &[Assignment],
    ) -> Result<()> {
        let mut batch = Batch::default();
        stage_assignments(&mut batch, student, course, assignments)?;
        self.commit(batch)
    }
}

impl Full for KvStore {
    fn reset(&mut self) -> Result<()> {
        self.last_error = None;
        self.cache = None;
        self.engine.snapshot().map(|_| ()).map_err(|e| self.record(e))
    }

    fn error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    fn kind(&self) -> &'static str {
        "kv"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scan_respects_key_boundaries() {
        let mut ns = Namespace::default();
        let mut batch = Batch::default();
        for key in ["1.2", "1.3", "11.2", "2.1"] {
            batch.put(COURSES_BUCKET, key.to_string(), &json!(key)).expect("put");
        }
        ns.apply(batch);
        let keys: Vec<&str> = ns.scan(COURSES_BUCKET, "1.").map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["1.2", "1.3"]);
        assert_eq!(ns.scan("missing", "").count(), 0);
    }

    #[test]
    fn later_puts_overwrite() {
        let mut ns = Namespace::default();
        let mut batch = Batch::default();
        batch.put(STUDENTS_BUCKET, "1".into(), &json!({"v": 1})).expect("put");
        batch.put(STUDENTS_BUCKET, "1".into(), &json!({"v": 2})).expect("put");
        ns.apply(batch);
        assert_eq!(ns.len(STUDENTS_BUCKET), 1);
        assert_eq!(ns.get(STUDENTS_BUCKET, "1"), Some(&json!({"v": 2})));
    }

    #[test]
    fn memory_engine_clones_share_data() {
        let a = MemoryEngine::new("shared");
        let b = a.clone();
        let mut batch = Batch::default();
        batch.put(STUDENTS_BUCKET, "7".into(), &json!(7)).expect("put");
        a.apply(batch).expect("apply");
        assert_eq!(b.snapshot().expect("snapshot").len(STUDENTS_BUCKET), 1);
        assert_eq!(b.describe(), "mem://shared");
    }

    #[test]
    fn dir_engine_persists_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = DirEngine::new(dir.path().join("ns"));
        assert_eq!(engine.snapshot().expect("empty"), Namespace::default());

        let mut batch = Batch::default();
        batch.put(COURSES_BUCKET, "1.2".into(), &json!({"id": 2})).expect("put");
        engine.apply(batch).expect("apply");

        let reopened = DirEngine::new(dir.path().join("ns"));
        assert_eq!(reopened.snapshot().expect("load").len(COURSES_BUCKET), 1);
        assert!(!engine.file().with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_namespace_file_is_sticky_until_reset() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(NAMESPACE_FILE), b"{not json").expect("write");
        let mut store = KvStore::new(DirEngine::new(dir.path()));

        let err = store.students().expect_err("corrupt file");
        assert_eq!(err.code(), "persistence_error");
        assert_eq!(store.error(), Some(&err));
        assert!(store.save_students(&[Student::new(1, "A")]).is_err());

        std::fs::remove_file(dir.path().join(NAMESPACE_FILE)).expect("remove");
        store.reset().expect("reset");
        assert_eq!(store.error(), None);
        assert!(store.students().expect("students").is_empty());
    }

    #[test]
    fn undecodable_value_is_recorded() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join(NAMESPACE_FILE),
            br#"{"buckets":{"students":{"1":{"id":"one","displayName":"A"}}}}"#,
        )
        .expect("write");
        let mut store = KvStore::new(DirEngine::new(dir.path()));

        let err = store.students().expect_err("bad student value");
        assert_eq!(err.code(), "marshal_error");
        assert_eq!(store.error(), Some(&err));
        assert_eq!(store.courses(&Student::new(1, "A")).expect_err("sticky"), err);
    }

    #[test]
    fn course_reads_do_not_leak_across_students() {
        let mut store = KvStore::new(MemoryEngine::new("t"));
        let one = Student::new(1, "One");
        let eleven = Student::new(11, "Eleven");
        store.save_students(&[one.clone(), eleven.clone()]).expect("students");
        store
            .save_courses(&one, &[Course::new(2, 1, "Math")])
            .expect("courses one");
        store
            .save_courses(&eleven, &[Course::new(2, 11, "Art"), Course::new(3, 11, "Music")])
            .expect("courses eleven");

        let students = store.students().expect("students");
        assert_eq!(students.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 11]);
        let courses = store.courses(&one).expect("courses");
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].title, "Math");
        assert_eq!(store.courses(&eleven).expect("courses").len(), 2);
    }
}
