use anyhow::{Context, Result};
use rsv_schemas::ReallocationAudit;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Tamper-evident export of the reallocation audit trail.
///
/// The store's `reallocation_audit` table is the source of truth; this
/// module writes records to a JSON Lines file (one record per line,
/// canonical key order) with an optional SHA-256 hash chain so an exported
/// trail can be verified offline: each line carries the hash of the
/// previous line (`hash_prev`) and of itself (`hash_self`).
pub struct AuditExporter {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
}

impl AuditExporter {
    /// Creates the exporter and ensures parent dirs exist.
    pub fn new(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;
        }

        Ok(Self {
            path,
            hash_chain,
            last_hash: None,
        })
    }

    /// Set last hash explicitly (e.g., after reading the last line of an
    /// existing export before appending to it).
    pub fn set_last_hash(&mut self, last_hash: Option<String>) {
        self.last_hash = last_hash;
    }

    pub fn last_hash(&self) -> Option<String> {
        self.last_hash.clone()
    }

    /// Append one audit record.
    pub fn append(&mut self, record: &ReallocationAudit) -> Result<ExportLine> {
        let mut line = ExportLine {
            record: record.clone(),
            hash_prev: None,
            hash_self: None,
        };

        if self.hash_chain {
            line.hash_prev = self.last_hash.clone();
            let self_hash = compute_line_hash(&line)?;
            line.hash_self = Some(self_hash.clone());
            self.last_hash = Some(self_hash);
        }

        let text = canonical_json_line(&line)?;
        append_line(&self.path, &text)?;

        Ok(line)
    }
}

/// One exported line: the audit record plus chain linkage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportLine {
    #[serde(flatten)]
    pub record: ReallocationAudit,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Write a single line to file (with trailing newline).
fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit export {:?}", path))?;
    f.write_all(line.as_bytes())
        .context("write audit line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    Ok(())
}

/// Canonicalize by sorting keys recursively and emitting compact JSON.
/// One record == one JSON line.
pub fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit record failed")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Chain hash is computed from canonical JSON of the line WITHOUT
/// hash_self (to avoid self-reference).
pub fn compute_line_hash(line: &ExportLine) -> Result<String> {
    let mut clone = line.clone();
    clone.hash_self = None;

    let canonical = canonical_json_line(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Verify the hash chain integrity of an exported audit file.
pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read audit export {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

/// Verify the hash chain integrity of JSONL content in memory.
pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut line_count = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let parsed: ExportLine = serde_json::from_str(trimmed)
            .with_context(|| format!("parse audit line {}", i + 1))?;

        line_count += 1;

        // 1. hash_prev must match the previous line's hash_self.
        if parsed.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, parsed.hash_prev
                ),
            });
        }

        // 2. hash_self must be correct for this line's content.
        if let Some(ref claimed) = parsed.hash_self {
            let recomputed = compute_line_hash(&parsed)?;
            if *claimed != recomputed {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!(
                        "hash_self mismatch: claimed {}, recomputed {}",
                        claimed, recomputed
                    ),
                });
            }
        }

        prev_hash = parsed.hash_self.clone();
    }

    Ok(VerifyResult::Valid { lines: line_count })
}

/// Result of hash chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    /// The entire chain is valid.
    Valid { lines: usize },
    /// The chain is broken at the given line.
    Broken { line: usize, reason: String },
}
