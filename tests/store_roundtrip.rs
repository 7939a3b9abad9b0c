use chrono::{DateTime, TimeZone, Utc};
use progressd::model::{Assignment, Course, Data, Student};
use progressd::store::{read_tree, DirEngine, Full, KvStore, Read, Registry, SqliteStore, Write};

fn at(h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, h, 0, 0).single().expect("valid time")
}

fn assignment(student: i64, course: i64, id: i64, due: &str, progress: i64) -> Assignment {
    Assignment {
        id,
        student_id: student,
        course_id: course,
        unit: 1,
        title: format!("Lesson {id}"),
        kind: "Quiz".into(),
        progress,
        due: due.into(),
        completed: String::new(),
        score: 0,
        status: "In Progress".into(),
        as_of: Some(at(8)),
    }
}

/// Students 1 and 11 both take course 5, so keys "1.5" and "11.5" coexist.
fn tree() -> Data {
    let mut data = Data::new(at(8));
    for (sid, name) in [(1, "Al"), (11, "Bea")] {
        let mut s = Student::new(sid, name);
        let mut c = Course::new(5, sid, "Math");
        c.assignments.push(assignment(sid, 5, 2, "2024-05-01", 10 * sid));
        c.assignments.push(assignment(sid, 5, 3, "2024-05-09", 0));
        s.courses.push(c);
        if sid == 1 {
            let mut art = Course::new(7, sid, "Art");
            art.assignments.push(assignment(sid, 7, 1, "2024-04-20", 100));
            s.courses.push(art);
        }
        data.students.push(s);
    }
    data
}

#[test]
fn sqlite_snapshot_reads_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = SqliteStore::open(dir.path().join("progress.db"));
    assert!(store.error().is_none());
    assert_eq!(store.kind(), "sqlite");

    let mut data = tree();
    store.save(&mut data).expect("save");

    let loaded = read_tree(&mut store).expect("load");
    assert_eq!(loaded.students, data.students);

    let counts = store.table_counts().expect("counts");
    assert!(counts.contains(&("student", 2)));
    assert!(counts.contains(&("course", 2)));
    assert!(counts.contains(&("student_courses", 3)));
    assert!(counts.contains(&("assignment", 3)));
    assert!(counts.contains(&("assignment_history", 5)));
}

#[test]
fn sqlite_keeps_course_titles_per_enrollment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = dir.path().join("progress.db");
    let al = Student::new(1, "Al");
    let bea = Student::new(2, "Bea");
    {
        let mut store = SqliteStore::open(&db);
        store.save_students(&[al.clone(), bea.clone()]).expect("students");
        store.save_courses(&al, &[Course::new(5, 1, "Math")]).expect("al courses");
        store.save_courses(&bea, &[Course::new(5, 2, "Art")]).expect("bea courses");
    }

    let mut store = SqliteStore::open(&db);
    assert_eq!(store.courses(&al).expect("al")[0].title, "Math");
    assert_eq!(store.courses(&bea).expect("bea")[0].title, "Art");
}

#[test]
fn sqlite_history_accumulates_and_reads_latest() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = SqliteStore::open(dir.path().join("progress.db"));

    let mut data = tree();
    store.save(&mut data).expect("first save");

    for s in &mut data.students {
        for c in &mut s.courses {
            for a in &mut c.assignments {
                a.progress = 60;
                a.status = "Completed".into();
                a.due = "05/10/2024".into();
                a.as_of = Some(at(9));
            }
        }
    }
    store.save(&mut data).expect("second save");

    // Same as_of again replaces that observation instead of adding one.
    store.save(&mut data).expect("repeat save");

    let history = store.history(11, 5, 2).expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].progress, 110);
    assert_eq!(history[1].progress, 60);
    assert_eq!(history[1].due, "2024-05-10");
    assert_eq!(history[1].as_of, "2024-05-01T09:00:00.000Z");

    let al = Student::new(1, "Al");
    let math = Course::new(5, 1, "Math");
    let latest = store.assignments(&al, &math).expect("assignments");
    assert_eq!(latest.len(), 2);
    assert!(latest.iter().all(|a| a.progress == 60 && a.status == "Completed"));
    assert_eq!(latest[0].as_of, Some(at(9)));
}

#[test]
fn sqlite_fills_missing_as_of_from_the_clock() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = SqliteStore::open(dir.path().join("progress.db"));

    let s = Student::new(3, "Cy");
    let c = Course::new(4, 3, "Music");
    let mut a = assignment(3, 4, 1, "", 0);
    a.as_of = None;
    store.save_students(&[s.clone()]).expect("students");
    store.save_courses(&s, &[c.clone()]).expect("courses");
    store.save_assignments(&s, &c, &[a]).expect("assignments");

    let history = store.history(3, 4, 1).expect("history");
    assert_eq!(history.len(), 1);
    assert!(history[0].as_of.ends_with('Z'));
    let read = store.assignments(&s, &c).expect("read");
    assert!(read[0].as_of.is_some());
    assert_eq!(read[0].due, "");
}

#[test]
fn sqlite_errors_stick_until_reset() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").expect("write blocker");

    let mut store = SqliteStore::open(blocker.join("progress.db"));
    let first = store.error().cloned().expect("open fails");
    assert_eq!(first.code(), "persistence_error");
    assert_eq!(store.students().expect_err("sticky"), first);
    assert!(store.save_students(&[Student::new(1, "Al")]).is_err());
    assert!(store.reset().is_err());

    std::fs::remove_file(&blocker).expect("remove blocker");
    store.reset().expect("reset");
    assert!(store.error().is_none());
    assert!(store.students().expect("students").is_empty());
}

#[test]
fn kv_directory_snapshot_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut data = tree();
    {
        let mut store = KvStore::new(DirEngine::new(dir.path()));
        store.save(&mut data).expect("save");
    }
    let mut store = KvStore::new(DirEngine::new(dir.path()));
    let loaded = read_tree(&mut store).expect("load");
    assert_eq!(loaded.students, data.students);

    let bea = Student::new(11, "Bea");
    let courses = store.courses(&bea).expect("courses");
    assert_eq!(courses.len(), 1, "student 1's courses must not leak into 11");
    let al = Student::new(1, "Al");
    let math = Course::new(5, 1, "Math");
    let assignments = store.assignments(&al, &math).expect("assignments");
    assert!(assignments.iter().all(|a| a.student_id == 1));
}

#[test]
fn registry_copies_between_backends() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = Registry::standard();
    let db = dir.path().join("progress.db");

    let mut opened = registry
        .open(&db.to_string_lossy())
        .expect("sqlite backend");
    assert_eq!(opened.kind(), "sqlite");
    let mut data = tree();
    opened.save(&mut data).expect("save sqlite");
    drop(opened);

    let mut sqlite = SqliteStore::open(&db);
    let mut mem = registry.open("mem://copy").expect("memory backend");
    mem.save(&mut sqlite).expect("copy");

    let mut again = registry.open("mem://copy").expect("same namespace");
    let loaded = read_tree(again.as_mut()).expect("load");
    assert_eq!(loaded.students, data.students);

    let kv_dir = format!("kv://{}", dir.path().join("kv").display());
    let mut kv = registry.open(&kv_dir).expect("directory backend");
    assert!(kv.students().expect("empty").is_empty());

    assert!(registry.open("redis://localhost").is_none());
}
