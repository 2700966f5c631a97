//! Unit tests for the exclusive file table.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::thread;
use std::time::Duration;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

#[fixture]
fn dir() -> TempDir {
    TempDir::new().expect("tempdir")
}

#[rstest]
fn appends_and_reuses_open_file(dir: TempDir) {
    let table = ExFile::new(4, Duration::from_secs(30), false);
    let path = dir.path().join("detail.log");

    let mut first = table.open(&path, 0o600, true).expect("open");
    writeln!(first, "one").expect("write");
    table.close(first);

    let mut second = table.open(&path, 0o600, true).expect("reopen");
    writeln!(second, "two").expect("write");
    table.close(second);

    assert_eq!(fs::read_to_string(&path).expect("read"), "one\ntwo\n");
    assert_eq!(table.open_files(), 1);
}

#[rstest]
fn new_files_get_requested_permissions(dir: TempDir) {
    let table = ExFile::new(4, Duration::from_secs(30), true);
    let path = dir.path().join("perm.log");
    table.close(table.open(&path, 0o600, true).expect("open"));

    let mode = fs::metadata(&path).expect("metadata").permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[rstest]
fn missing_file_without_create_fails(dir: TempDir) {
    let table = ExFile::new(4, Duration::from_secs(30), false);
    let path = dir.path().join("absent.log");
    let err = table.open(&path, 0o600, false).expect_err("no create");
    assert!(matches!(err, ExFileError::Open { .. }));
    assert_eq!(table.open_files(), 0);
}

#[rstest]
fn full_table_of_busy_entries_is_refused(dir: TempDir) {
    let table = ExFile::new(1, Duration::from_secs(30), false);
    let held = table.open(&dir.path().join("a.log"), 0o600, true).expect("open a");
    let err = table
        .open(&dir.path().join("b.log"), 0o600, true)
        .expect_err("table full");
    assert!(matches!(err, ExFileError::Full { max: 1 }));
    table.close(held);

    table.close(table.open(&dir.path().join("b.log"), 0o600, true).expect("evicts idle a"));
    assert_eq!(table.open_files(), 1);
}

#[rstest]
fn idle_entries_are_reaped(dir: TempDir) {
    let table = ExFile::new(8, Duration::ZERO, false);
    table.close(table.open(&dir.path().join("a.log"), 0o600, true).expect("open a"));
    thread::sleep(Duration::from_millis(5));
    table.close(table.open(&dir.path().join("b.log"), 0o600, true).expect("open b"));
    assert_eq!(table.open_files(), 1);
}

#[rstest]
fn rotated_file_is_reopened(dir: TempDir) {
    let table = ExFile::new(4, Duration::from_secs(30), false);
    let path = dir.path().join("rotate.log");
    let mut handle = table.open(&path, 0o600, true).expect("open");
    writeln!(handle, "old").expect("write");
    table.close(handle);

    fs::rename(&path, dir.path().join("rotate.log.1")).expect("rotate");

    let mut fresh = table.open(&path, 0o600, true).expect("reopen");
    writeln!(fresh, "new").expect("write");
    table.close(fresh);
    assert_eq!(fs::read_to_string(&path).expect("read"), "new\n");
}

#[rstest]
fn concurrent_writers_do_not_interleave(dir: TempDir) {
    let table = ExFile::new(4, Duration::from_secs(30), true);
    let path = dir.path().join("shared.log");

    thread::scope(|scope| {
        for worker in 0..4 {
            let table_ref = &table;
            let target = path.clone();
            scope.spawn(move || {
                for line in 0..25 {
                    let mut handle = table_ref.open(&target, 0o600, true).expect("open");
                    write!(handle, "worker-{worker} ").expect("write");
                    writeln!(handle, "line-{line}").expect("write");
                    table_ref.close(handle);
                }
            });
        }
    });

    let contents = fs::read_to_string(&path).expect("read");
    assert_eq!(contents.lines().count(), 100);
    assert!(
        contents
            .lines()
            .all(|line| line.starts_with("worker-") && line.contains(" line-"))
    );
}
