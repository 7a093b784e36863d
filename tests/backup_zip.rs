#[path = "../src/backup.rs"]
mod backup;

use rusqlite::Connection;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::ZipWriter;

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn seed_workspace_db(workspace: &Path) -> Connection {
    let conn = Connection::open(workspace.join("retiros.sqlite3")).expect("open source db");
    let _mode: String = conn
        .query_row("PRAGMA journal_mode = WAL", [], |r| r.get(0))
        .expect("wal");
    conn.execute_batch(
        "CREATE TABLE students(id INTEGER PRIMARY KEY, name TEXT NOT NULL);
         INSERT INTO students(name) VALUES('Ana');",
    )
    .expect("seed source db");
    conn
}

fn student_names(db: &Path) -> Vec<String> {
    let conn = Connection::open(db).expect("open restored db");
    let check: String = conn
        .query_row("PRAGMA integrity_check", [], |r| r.get(0))
        .expect("integrity check");
    assert_eq!(check, "ok");
    let mut stmt = conn
        .prepare("SELECT name FROM students ORDER BY id")
        .expect("prepare");
    let names = stmt
        .query_map([], |r| r.get(0))
        .expect("query")
        .collect::<rusqlite::Result<Vec<String>>>()
        .expect("names");
    names
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("retiros-backup-src");
    let workspace2 = temp_dir("retiros-backup-dst");
    let out_dir = temp_dir("retiros-backup-out");

    let live = seed_workspace_db(&workspace);

    let bundle_path = out_dir.join("workspace.retiros.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 2);
    assert_eq!(export.db_sha256.len(), 64);
    assert_eq!(std::fs::read_dir(&out_dir).expect("out dir").count(), 1);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest).expect("manifest json");
    assert_eq!(manifest["format"], backup::BUNDLE_FORMAT_V1);
    assert_eq!(manifest["dbSha256"], export.db_sha256.as_str());
    archive
        .by_name("db/retiros.sqlite3")
        .expect("database entry in bundle");

    // Leftover WAL files of the replaced database must not survive.
    std::fs::write(workspace2.join("retiros.sqlite3-wal"), b"stale").expect("write wal");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);
    assert_eq!(import.db_sha256, export.db_sha256);
    assert!(!workspace2.join("retiros.sqlite3-wal").exists());
    assert_eq!(student_names(&workspace2.join("retiros.sqlite3")), vec!["Ana"]);

    drop(live);
    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn export_is_consistent_while_a_reader_holds_an_old_snapshot() {
    let workspace = temp_dir("retiros-backup-reader");
    let workspace2 = temp_dir("retiros-backup-reader-dst");
    let out_dir = temp_dir("retiros-backup-reader-out");

    let writer = seed_workspace_db(&workspace);

    // A reader pinned before Beto is written keeps the WAL from being
    // folded back into the main file.
    let reader = Connection::open(workspace.join("retiros.sqlite3")).expect("open reader");
    reader.execute_batch("BEGIN").expect("begin read");
    let seen: i64 = reader
        .query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))
        .expect("read");
    assert_eq!(seen, 1);

    writer
        .execute("INSERT INTO students(name) VALUES('Beto')", [])
        .expect("insert beto");

    let bundle_path = out_dir.join("busy.retiros.zip");
    backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    reader.execute_batch("COMMIT").expect("end read");

    backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(
        student_names(&workspace2.join("retiros.sqlite3")),
        vec!["Ana", "Beto"]
    );

    drop(reader);
    drop(writer);
    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn checksum_mismatch_leaves_the_workspace_alone() {
    let workspace = temp_dir("retiros-backup-tampered");
    let out_dir = temp_dir("retiros-backup-tampered-out");
    std::fs::write(workspace.join("retiros.sqlite3"), b"current").expect("write current db");

    let bundle_path = out_dir.join("tampered.zip");
    let f = File::create(&bundle_path).expect("create bundle");
    let mut zip = ZipWriter::new(f);
    let opts = FileOptions::default();
    let manifest = serde_json::json!({
        "format": backup::BUNDLE_FORMAT_V1,
        "version": 1,
        "dbSha256": "0000000000000000000000000000000000000000000000000000000000000000",
    });
    zip.start_file("manifest.json", opts).expect("manifest entry");
    zip.write_all(manifest.to_string().as_bytes())
        .expect("write manifest");
    zip.start_file("db/retiros.sqlite3", opts).expect("db entry");
    zip.write_all(b"replacement").expect("write db");
    zip.finish().expect("finish zip");

    let err = backup::import_workspace_bundle(&bundle_path, &workspace)
        .expect_err("tampered bundle must be rejected");
    assert!(err.to_string().contains("checksum"), "{err}");
    let current = std::fs::read(workspace.join("retiros.sqlite3")).expect("read db");
    assert_eq!(current, b"current");

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn unknown_bundle_format_is_rejected() {
    let workspace = temp_dir("retiros-backup-format");
    let out_dir = temp_dir("retiros-backup-format-out");

    let bundle_path = out_dir.join("other.zip");
    let f = File::create(&bundle_path).expect("create bundle");
    let mut zip = ZipWriter::new(f);
    zip.start_file("manifest.json", FileOptions::default())
        .expect("manifest entry");
    zip.write_all(br#"{"format":"something-else"}"#)
        .expect("write manifest");
    zip.finish().expect("finish zip");

    let err = backup::import_workspace_bundle(&bundle_path, &workspace)
        .expect_err("foreign bundle must be rejected");
    assert!(err.to_string().contains("unsupported bundle format"), "{err}");

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(out_dir);
}
