use anyhow::{anyhow, Context};
use rusqlite::{Connection, OpenFlags};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/retiros.sqlite3";
const DB_FILE: &str = "retiros.sqlite3";
pub const BUNDLE_FORMAT_V1: &str = "retiros-workspace-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub db_sha256: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Consistent copy of the live database, taken through SQLite so that
/// committed pages still sitting in the WAL are included.
fn snapshot_database(db_path: &Path, snapshot_path: &Path) -> anyhow::Result<Vec<u8>> {
    if snapshot_path.exists() {
        std::fs::remove_file(snapshot_path).with_context(|| {
            format!(
                "failed to remove stale snapshot {}",
                snapshot_path.to_string_lossy()
            )
        })?;
    }
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    conn.busy_timeout(Duration::from_secs(5))
        .context("failed to set busy timeout")?;
    let target = snapshot_path.to_string_lossy().into_owned();
    conn.execute("VACUUM INTO ?1", [&target])
        .context("failed to snapshot database")?;
    drop(conn);

    std::fs::read(snapshot_path).with_context(|| {
        format!(
            "failed to read database snapshot {}",
            snapshot_path.to_string_lossy()
        )
    })
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let snapshot_path = out_path.with_extension("snapshot.sqlite3");
    let db_bytes = snapshot_database(&db_path, &snapshot_path);
    let _ = std::fs::remove_file(&snapshot_path);
    let db_bytes = db_bytes?;
    let db_sha256 = sha256_hex(&db_bytes);

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let exported_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": exported_at,
        "dbSha256": db_sha256,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    zip.write_all(&db_bytes)
        .context("failed to write database entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 2,
        db_sha256,
    })
}

/// Replaces the workspace database with the one inside `in_path`.
///
/// The checksum recorded in the manifest must match the extracted database;
/// the current database is only replaced after it does.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;
    let dst = workspace_path.join(DB_FILE);

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }
    let expected = manifest
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("manifest.json missing dbSha256"))?
        .to_string();

    let mut db_bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .context("bundle missing db/retiros.sqlite3")?
        .read_to_end(&mut db_bytes)
        .context("failed to extract database entry")?;
    let actual = sha256_hex(&db_bytes);
    if actual != expected {
        return Err(anyhow!(
            "database checksum mismatch: manifest {}, bundle {}",
            expected,
            actual
        ));
    }

    let tmp_dst = workspace_path.join("retiros.sqlite3.importing");
    if tmp_dst.exists() {
        let _ = std::fs::remove_file(&tmp_dst);
    }
    let mut db_out = File::create(&tmp_dst).with_context(|| {
        format!(
            "failed to create temp database {}",
            tmp_dst.to_string_lossy()
        )
    })?;
    db_out
        .write_all(&db_bytes)
        .context("failed to write extracted database")?;
    db_out
        .flush()
        .context("failed to flush extracted database")?;
    drop(db_out);

    // Stale WAL files belong to the database being replaced.
    for suffix in ["-wal", "-shm"] {
        let side = workspace_path.join(format!("{DB_FILE}{suffix}"));
        if side.exists() {
            std::fs::remove_file(&side)
                .with_context(|| format!("failed to remove {}", side.to_string_lossy()))?;
        }
    }
    std::fs::rename(&tmp_dst, &dst).with_context(|| {
        format!(
            "failed to move extracted database to {}",
            dst.to_string_lossy()
        )
    })?;

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
        db_sha256: actual,
    })
}
