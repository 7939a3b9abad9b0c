use super::{read_tree, Full, Read, Write};
use crate::dates::parse_date;
use crate::error::{Error, Result};
use crate::model::{sort_by_due, Assignment, Course, Data, Student};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One observation of an assignment's progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub as_of: String,
    pub progress: i64,
    pub due: String,
    pub completed: String,
    pub score: i64,
    pub status: String,
}

/// Relational backend over a single SQLite file.
pub struct SqliteStore {
    path: PathBuf,
    conn: Option<Connection>,
    last_error: Option<Error>,
}

impl SqliteStore {
    /// Never fails; an open error is recorded and reported by `error()`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let mut store = Self {
            path: path.into(),
            conn: None,
            last_error: None,
        };
        if let Err(e) = store.reset() {
            warn!(path = %store.path.display(), error = %e, "sqlite store unavailable");
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every recorded observation of one assignment, oldest first.
    pub fn history(
        &mut self,
        student_id: i64,
        course_id: i64,
        assignment_id: i64,
    ) -> Result<Vec<HistoryEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT as_of, progress, due, completed, score, status
                 FROM assignment_history
                 WHERE student_id = ? AND course_id = ? AND assignment_id = ?
                 ORDER BY as_of",
            )?;
            let rows = stmt
                .query_map((student_id, course_id, assignment_id), |row| {
                    Ok(HistoryEntry {
                        as_of: row.get(0)?,
                        progress: row.get(1)?,
                        due: row.get(2)?,
                        completed: row.get(3)?,
                        score: row.get(4)?,
                        status: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Row counts per table, for status reporting.
    pub fn table_counts(&mut self) -> Result<Vec<(&'static str, i64)>> {
        self.with_conn(|conn| {
            let mut out = Vec::new();
            for table in [
                "student",
                "course",
                "student_courses",
                "assignment",
                "assignment_history",
            ] {
                out.push((table, row_count(conn, table)?));
            }
            Ok(out)
        })
    }

    /// Close the connection, e.g. before copying the database file.
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = conn.close() {
                warn!(error = %e, "closing sqlite connection");
            }
        }
    }

    fn with_conn<T>(&mut self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        if let Some(e) = &self.last_error {
            return Err(e.clone());
        }
        if self.conn.is_none() {
            match open_db(&self.path) {
                Ok(conn) => self.conn = Some(conn),
                Err(e) => return Err(self.record(e)),
            }
        }
        let r = match self.conn.as_mut() {
            Some(conn) => f(conn),
            None => Err(Error::Persistence("sqlite connection missing".into())),
        };
        r.map_err(|e| self.record(e))
    }

    fn record(&mut self, e: Error) -> Error {
        self.last_error = Some(e.clone());
        e
    }

    fn save_tree(&mut self, data: &Data) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let students: Vec<Student> = data.students.iter().map(Student::shallow).collect();
            write_students(&tx, &students)?;
            tx.commit()?;

            let tx = conn.transaction()?;
            for student in &data.students {
                write_courses(&tx, student, &student.courses)?;
            }
            tx.commit()?;

            let tx = conn.transaction()?;
            for student in &data.students {
                for course in &student.courses {
                    write_assignments(&tx, student, course, &course.assignments)?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }
}

impl Read for SqliteStore {
    fn students(&mut self) -> Result<Vec<Student>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name FROM student ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| Ok(Student::new(row.get(0)?, row.get::<_, String>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn courses(&mut self, student: &Student) -> Result<Vec<Course>> {
        let student_id = student.id;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, COALESCE(sc.title, c.title)
                 FROM student_courses sc
                 JOIN course c ON c.id = sc.course_id
                 WHERE sc.student_id = ?
                 ORDER BY c.id",
            )?;
            let rows = stmt
                .query_map([student_id], |row| {
                    Ok(Course::new(row.get(0)?, student_id, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn assignments(&mut self, student: &Student, course: &Course) -> Result<Vec<Assignment>> {
        let (student_id, course_id) = (student.id, course.id);
        self.with_conn(|conn| {
            // Latest observation per assignment.
            let mut stmt = conn.prepare(
                "SELECT a.id, a.unit, a.title, a.assignment_type,
                        h.progress, h.due, h.completed, h.score, h.status, h.as_of
                 FROM assignment a
                 JOIN assignment_history h
                   ON h.course_id = a.course_id AND h.assignment_id = a.id
                 WHERE h.student_id = ?1 AND a.course_id = ?2
                   AND h.as_of = (
                     SELECT MAX(h2.as_of) FROM assignment_history h2
                     WHERE h2.student_id = h.student_id
                       AND h2.course_id = h.course_id
                       AND h2.assignment_id = h.assignment_id
                   )
                 ORDER BY a.id",
            )?;
            let mut rows = stmt
                .query_map((student_id, course_id), |row| {
                    let as_of: String = row.get(9)?;
                    Ok(Assignment {
                        id: row.get(0)?,
                        student_id,
                        course_id,
                        unit: row.get(1)?,
                        title: row.get(2)?,
                        kind: row.get(3)?,
                        progress: row.get(4)?,
                        due: row.get(5)?,
                        completed: row.get(6)?,
                        score: row.get(7)?,
                        status: row.get(8)?,
                        as_of: parse_as_of(&as_of),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            sort_by_due(&mut rows);
            Ok(rows)
        })
    }
}

impl Write for SqliteStore {
    fn save(&mut self, reader: &mut dyn Read) -> Result<()> {
        let data = read_tree(reader)?;
        self.save_tree(&data)?;
        debug!(
            students = data.students.len(),
            courses = data.course_count(),
            assignments = data.assignment_count(),
            "sqlite snapshot saved"
        );
        Ok(())
    }

    fn save_students(&mut self, students: &[Student]) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            write_students(&tx, students)?;
            tx.commit()?;
            Ok(())
        })
    }

    fn save_courses(&mut self, student: &Student, courses: &[Course]) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            write_courses(&tx, student, courses)?;
            tx.commit()?;
            Ok(())
        })
    }

    fn save_assignments(
        &mut self,
        student: &Student,
        course: &Course,
        assignments: &[Assignment],
    ) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            write_assignments(&tx, student, course, assignments)?;
            tx.commit()?;
            Ok(())
        })
    }
}

impl Full for SqliteStore {
    fn reset(&mut self) -> Result<()> {
        if self.conn.is_some() && self.last_error.is_none() {
            return Ok(());
        }
        self.close();
        self.last_error = None;
        match open_db(&self.path) {
            Ok(conn) => {
                self.conn = Some(conn);
                Ok(())
            }
            Err(e) => Err(self.record(e)),
        }
    }

    fn error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    fn kind(&self) -> &'static str {
        "sqlite"
    }
}

fn write_students(conn: &Connection, students: &[Student]) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO student(id, name, updated_at) VALUES(?, ?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, updated_at = excluded.updated_at",
    )?;
    for s in students {
        stmt.execute((s.id, &s.display_name))?;
    }
    Ok(())
}

fn write_courses(conn: &Connection, student: &Student, courses: &[Course]) -> Result<()> {
    let mut course_stmt = conn.prepare_cached(
        "INSERT INTO course(id, title) VALUES(?, ?)
         ON CONFLICT(id) DO UPDATE SET title = excluded.title",
    )?;
    let mut link_stmt = conn.prepare_cached(
        "INSERT INTO student_courses(student_id, course_id, title) VALUES(?, ?, ?)
         ON CONFLICT(student_id, course_id) DO UPDATE SET title = excluded.title",
    )?;
    for c in courses {
        course_stmt.execute((c.id, &c.title))?;
        link_stmt.execute((student.id, c.id, &c.title))?;
    }
    Ok(())
}

fn write_assignments(
    conn: &Connection,
    student: &Student,
    course: &Course,
    assignments: &[Assignment],
) -> Result<()> {
    let mut assignment_stmt = conn.prepare_cached(
        "INSERT INTO assignment(course_id, id, unit, title, assignment_type)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(course_id, id) DO UPDATE SET
           unit = excluded.unit,
           title = excluded.title,
           assignment_type = excluded.assignment_type",
    )?;
    let mut history_stmt = conn.prepare_cached(
        "INSERT INTO assignment_history(
           student_id, course_id, assignment_id, as_of,
           progress, due, completed, score, status
         ) VALUES(?1, ?2, ?3, COALESCE(?4, strftime('%Y-%m-%dT%H:%M:%fZ', 'now')), ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(student_id, course_id, assignment_id, as_of) DO UPDATE SET
           progress = excluded.progress,
           due = excluded.due,
           completed = excluded.completed,
           score = excluded.score,
           status = excluded.status",
    )?;
    for a in assignments {
        assignment_stmt.execute((course.id, a.id, a.unit, &a.title, &a.kind))?;
        let as_of = a
            .as_of
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true));
        history_stmt.execute((
            student.id,
            course.id,
            a.id,
            as_of,
            a.progress,
            normalize_date(&a.due),
            normalize_date(&a.completed),
            a.score,
            &a.status,
        ))?;
    }
    Ok(())
}

/// Store recognised dates as `YYYY-MM-DD`; keep anything else verbatim.
fn normalize_date(s: &str) -> String {
    match parse_date(s) {
        Some(d) => d.format("%Y-%m-%d").to_string(),
        None => s.to_string(),
    }
}

fn parse_as_of(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

pub(crate) fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("creating {}: {e}", parent.display()))
            })?;
        }
    }
    let conn = Connection::open(path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    ensure_student_updated_at(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course(
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_courses(
            student_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            title TEXT,
            PRIMARY KEY(student_id, course_id),
            FOREIGN KEY(student_id) REFERENCES student(id),
            FOREIGN KEY(course_id) REFERENCES course(id)
        )",
        [],
    )?;
    ensure_student_courses_title(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_courses_course ON student_courses(course_id)",
        [],
    )?;

    // Assignment ids are only unique within a course.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignment(
            course_id INTEGER NOT NULL,
            id INTEGER NOT NULL,
            unit INTEGER NOT NULL,
            title TEXT NOT NULL,
            assignment_type TEXT NOT NULL,
            PRIMARY KEY(course_id, id),
            FOREIGN KEY(course_id) REFERENCES course(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignment_history(
            student_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            assignment_id INTEGER NOT NULL,
            as_of TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            progress INTEGER NOT NULL,
            due TEXT NOT NULL,
            completed TEXT NOT NULL,
            score INTEGER NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY(student_id, course_id, assignment_id, as_of),
            FOREIGN KEY(student_id) REFERENCES student(id),
            FOREIGN KEY(course_id, assignment_id) REFERENCES assignment(course_id, id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignment_history_course
         ON assignment_history(student_id, course_id)",
        [],
    )?;

    Ok(conn)
}

// Databases written before student rows were timestamped lack updated_at.
fn ensure_student_updated_at(conn: &Connection) -> Result<()> {
    if table_has_column(conn, "student", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE student ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

// The same course id can carry a different title per enrollment.
fn ensure_student_courses_title(conn: &Connection) -> Result<()> {
    if table_has_column(conn, "student_courses", "title")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE student_courses ADD COLUMN title TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let found = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .any(|name| name == column);
    Ok(found)
}

fn row_count(conn: &Connection, table: &str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", table);
    let n: i64 = conn.query_row(&sql, [], |r| r.get(0))?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_recognised_dates_only() {
        assert_eq!(normalize_date("05/01/2024"), "2024-05-01");
        assert_eq!(normalize_date("2024-05-01"), "2024-05-01");
        assert_eq!(normalize_date(""), "");
        assert_eq!(normalize_date("tbd"), "tbd");
    }

    #[test]
    fn schema_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("progress.db");
        drop(open_db(&path).expect("first open"));
        let conn = open_db(&path).expect("second open");
        assert!(table_has_column(&conn, "student", "updated_at").expect("pragma"));
        assert!(table_has_column(&conn, "assignment_history", "as_of").expect("pragma"));
    }

    #[test]
    fn adds_missing_updated_at_column() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("old.db");
        {
            let conn = Connection::open(&path).expect("open");
            conn.execute("CREATE TABLE student(id INTEGER PRIMARY KEY, name TEXT NOT NULL)", [])
                .expect("old schema");
            conn.execute("INSERT INTO student(id, name) VALUES(1, 'Ann')", [])
                .expect("old row");
        }
        let conn = open_db(&path).expect("migrate");
        assert!(table_has_column(&conn, "student", "updated_at").expect("pragma"));
        assert!(table_has_column(&conn, "student_courses", "title").expect("pragma"));
        assert_eq!(row_count(&conn, "student").expect("count"), 1);
    }
}
