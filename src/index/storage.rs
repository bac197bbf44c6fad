use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{OffTargetError, Result};

pub const META_FILE: &str = "meta.bin";
pub const SKETCH_FILE: &str = "sketch.bin";
pub const LINEAR_DIR: &str = "linear";
pub const TREE_DIR: &str = "tree";

const BUCKET_EXT: &str = "bin";

pub fn save<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut w, value)?;
    w.flush()?;
    Ok(())
}

pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let f = File::open(path)?;
    let value: T = bincode::deserialize_from(BufReader::new(f))?;
    Ok(value)
}

/// `<dir>/<KEY>.bin`
pub fn bucket_file(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.{}", key, BUCKET_EXT))
}

/// 列出目录下的桶文件，按 key 排序返回 `(key, path)`。
/// 长度不等于 `key_len` 的 key 视为数据库损坏。
pub fn list_buckets(dir: &Path, key_len: usize) -> Result<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(BUCKET_EXT) {
            continue;
        }
        let key = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| OffTargetError::CorruptDatabase(format!("bad bucket file name {}", path.display())))?
            .to_string();
        if key.len() != key_len || !key.bytes().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T')) {
            return Err(OffTargetError::CorruptDatabase(format!(
                "bad bucket key '{}' in {} (expected {} ACGT bases)",
                key,
                dir.display(),
                key_len
            )));
        }
        out.push((key, path));
    }
    out.sort_unstable_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

/// Creates a fresh database directory. An existing metadata file means the
/// directory already holds a database, which is never overwritten in place;
/// index files without metadata are left over from an interrupted build.
pub fn prepare_dir(dir: &Path) -> Result<()> {
    if dir.join(META_FILE).exists() {
        return Err(OffTargetError::config(format!(
            "'{}' already contains a database; choose a new directory",
            dir.display()
        )));
    }
    let leftover = dir.join(SKETCH_FILE).exists()
        || !is_empty_dir(&dir.join(LINEAR_DIR))?
        || !is_empty_dir(&dir.join(TREE_DIR))?;
    if leftover {
        return Err(OffTargetError::config(format!(
            "'{}' holds index files from an unfinished build; remove them or choose a new directory",
            dir.display()
        )));
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// Missing directories count as empty.
fn is_empty_dir(dir: &Path) -> Result<bool> {
    if !dir.exists() {
        return Ok(true);
    }
    Ok(std::fs::read_dir(dir)?.next().is_none())
}
