//! Storage-agnostic Read/Write contract and its backends.

mod kv;
mod registry;
mod sqlite;

pub use kv::{Batch, DirEngine, KvEngine, KvStore, MemoryEngine, Namespace};
pub use registry::Registry;
pub use sqlite::{HistoryEntry, SqliteStore};

use crate::error::{Error, Result};
use crate::model::{sort_by_due, Assignment, Course, Data, Student};
use chrono::Utc;

/// Produces a Student → Course → Assignment tree one level at a time.
pub trait Read {
    fn students(&mut self) -> Result<Vec<Student>>;
    fn courses(&mut self, student: &Student) -> Result<Vec<Course>>;
    fn assignments(&mut self, student: &Student, course: &Course) -> Result<Vec<Assignment>>;
}

pub trait Write {
    /// Snapshot everything `reader` yields.
    fn save(&mut self, reader: &mut dyn Read) -> Result<()>;
    fn save_students(&mut self, students: &[Student]) -> Result<()>;
    fn save_courses(&mut self, student: &Student, courses: &[Course]) -> Result<()>;
    fn save_assignments(
        &mut self,
        student: &Student,
        course: &Course,
        assignments: &[Assignment],
    ) -> Result<()>;
}

/// A complete backend. Storage failures are kept until `reset` succeeds.
pub trait Full: Read + Write {
    /// Re-establish the storage connection and clear the recorded error.
    fn reset(&mut self) -> Result<()>;
    fn error(&self) -> Option<&Error>;
    fn kind(&self) -> &'static str;
}

/// Walk `reader` into one in-memory tree.
pub fn read_tree<R: Read + ?Sized>(reader: &mut R) -> Result<Data> {
    let mut data = Data::new(Utc::now());
    let mut students = reader.students()?;
    students.sort_by_key(|s| s.id);
    for mut student in students {
        let mut courses = reader.courses(&student)?;
        courses.sort_by_key(|c| c.id);
        for mut course in courses {
            let mut assignments = reader.assignments(&student, &course)?;
            sort_by_due(&mut assignments);
            course.assignments = assignments;
            student.courses.push(course);
        }
        data.students.push(student);
    }
    Ok(data)
}

/// A collected tree can be saved again, e.g. to a second backend.
impl Read for Data {
    fn students(&mut self) -> Result<Vec<Student>> {
        Ok(self.students.iter().map(Student::shallow).collect())
    }

    fn courses(&mut self, student: &Student) -> Result<Vec<Course>> {
        Ok(self
            .student(student.id)
            .map(|s| s.courses.iter().map(Course::shallow).collect())
            .unwrap_or_default())
    }

    fn assignments(&mut self, student: &Student, course: &Course) -> Result<Vec<Assignment>> {
        Ok(self
            .student(student.id)
            .and_then(|s| s.courses.iter().find(|c| c.id == course.id))
            .map(|c| c.assignments.clone())
            .unwrap_or_default())
    }
}
