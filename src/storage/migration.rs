//! WAL format migration. Two independent concerns,
//! chained in order when both apply: upgrading individual entries to a
//! newer format version, and restructuring the legacy single-file layout
//! into the catalog/per-table split. Both are opt-in — the engine refuses
//! to open a legacy or stale-version data directory otherwise.

use crate::core::{DbError, Result};
use crate::storage::wal::{self, WalEntry, WalFile, FORMAT_VERSION};
use crate::storage::{encode_table_name, StorageConfig};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A single `v_n -> v_{n+1}` entry transform. Registered in order; applying
/// the whole chain upgrades an entry from any older version to current.
type EntryTransform = fn(WalEntry) -> WalEntry;

/// No format versions older than [`FORMAT_VERSION`] exist yet, so the chain
/// is empty; a future bump registers its transform here rather than
/// replacing this mechanism.
const FORMAT_CHAIN: &[EntryTransform] = &[];

fn backup_path(path: &Path) -> PathBuf {
    let base = PathBuf::from(format!("{}.bak", path.display()));
    if !base.exists() {
        return base;
    }
    let mut n = 1;
    loop {
        let candidate = PathBuf::from(format!("{}.bak.{n}", path.display()));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// No portable stdlib statvfs is available, so free space is checked by
/// actually reserving it: a probe file is written with `needed` real
/// (non-sparse) zero bytes and removed immediately. A short write on an
/// almost-full volume surfaces as an `io::Error` here rather than mid-`.mig`.
fn has_double_free_space(path: &Path) -> Result<bool> {
    let needed = fs::metadata(path)?.len().saturating_mul(2);
    let probe_path = PathBuf::from(format!("{}.spacecheck", path.display()));

    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&probe_path)?;
        let chunk = [0u8; 64 * 1024];
        let mut remaining = needed;
        while remaining > 0 {
            let take = (chunk.len() as u64).min(remaining) as usize;
            file.write_all(&chunk[..take])?;
            remaining -= take as u64;
        }
        file.sync_all()
    })();

    let _ = fs::remove_file(&probe_path);
    Ok(result.is_ok())
}

/// Upgrade `path` in place to [`FORMAT_VERSION`] if its header claims an
/// older one. A no-op today since [`FORMAT_CHAIN`] is empty, but the
/// pre-check/rename/fsync choreography is real so a future version bump
/// only needs to add transform functions.
pub fn migrate_format_version(path: &Path, fsync: bool) -> Result<()> {
    let version = WalFile::read_header(path)?;
    if version == FORMAT_VERSION {
        return Ok(());
    }
    if !has_double_free_space(path)? {
        return Err(DbError::Internal(format!(
            "insufficient free space to migrate {}",
            path.display()
        )));
    }

    let replayed = wal::replay(path)?;
    let upgraded: Vec<WalEntry> = replayed
        .entries
        .into_iter()
        .map(|mut e| {
            for step in FORMAT_CHAIN {
                e = step(e);
            }
            e
        })
        .collect();

    let mig_path = PathBuf::from(format!("{}.mig", path.display()));
    let mut mig = WalFile::open(&mig_path, fsync)?;
    for entry in &upgraded {
        mig.append(entry)?;
    }
    drop(mig);

    let bak_path = backup_path(path);
    fs::rename(path, &bak_path)?;
    fs::rename(&mig_path, path)?;
    Ok(())
}

/// Restructure a legacy single-file `wal.dat` into `catalog.wal` plus one
/// `tables/<name>.wal` per surviving table.
pub fn migrate_legacy_layout(config: &StorageConfig) -> Result<()> {
    let legacy_path = config.data_dir.join("wal.dat");
    migrate_format_version(&legacy_path, config.fsync)?;

    if !has_double_free_space(&legacy_path)? {
        return Err(DbError::Internal("insufficient free space to migrate legacy WAL".into()));
    }

    let replayed = wal::replay(&legacy_path)?;

    let mut alive: HashSet<String> = HashSet::new();
    for entry in &replayed.entries {
        match entry {
            WalEntry::CreateTable { table, .. } => {
                alive.insert(table.clone());
            }
            WalEntry::DropTable { table } => {
                alive.remove(table);
            }
            _ => {}
        }
    }

    let catalog_path = config.data_dir.join("catalog.wal");
    let mut catalog_wal = WalFile::open(&catalog_path, config.fsync)?;
    let mut per_table: HashMap<String, WalFile> = HashMap::new();

    fs::create_dir_all(config.data_dir.join("tables"))?;

    for entry in replayed.entries {
        if entry.op_code().is_ddl() {
            catalog_wal.append(&entry)?;
        } else {
            let table = entry.table_name().to_string();
            if !alive.contains(&table) {
                continue; // DML for a table that doesn't survive is discarded
            }
            let wal = match per_table.entry(table.clone()) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => {
                    let path = config
                        .data_dir
                        .join("tables")
                        .join(format!("{}.wal", encode_table_name(&table)));
                    e.insert(WalFile::open(&path, config.fsync)?)
                }
            };
            wal.append(&entry)?;
        }
    }

    let bak_path = backup_path(&legacy_path);
    fs::rename(&legacy_path, &bak_path)?;
    Ok(())
}
