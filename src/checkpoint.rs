//! Checkpoint protocol: an atomic snapshot of the coordinator's frontier,
//! pending queue, in-flight set and results. Written as `<path>.tmp`, synced,
//! then renamed over `<path>`, so a crash never leaves a torn file. Loading
//! verifies the schema version and the filter digest; assignments are
//! discarded (in-flight units return to pending on resume).

use std::fs::File;
use std::path::Path;

use crate::engine::SearchResult;
use crate::error::{Error, Result};
use crate::range::KeyRange;
use crate::types::{Hash160, Hash256, PrivateKey};
use crate::uint256::UInt256;

const MAGIC: &[u8; 4] = b"KSCP";
pub const SNAPSHOT_VERSION: u32 = 1;

/// Run-length encode a sorted id list into (start, len) runs.
pub(crate) fn rle_encode(sorted_ids: &[u64]) -> Vec<(u64, u64)> {
    let mut runs = Vec::new();
    let mut iter = sorted_ids.iter().copied();
    let Some(first) = iter.next() else {
        return runs;
    };
    let (mut start, mut len) = (first, 1u64);
    for id in iter {
        if id == start + len {
            len += 1;
        } else if id >= start + len {
            runs.push((start, len));
            start = id;
            len = 1;
        }
        // Duplicates fold into the current run.
    }
    runs.push((start, len));
    runs
}

pub(crate) fn rle_decode(runs: &[(u64, u64)]) -> Vec<u64> {
    let mut ids = Vec::new();
    for &(start, len) in runs {
        ids.extend(start..start.saturating_add(len));
    }
    ids
}

#[derive(Clone, Debug)]
pub struct Snapshot {
    pub version: u32,
    pub range: KeyRange,
    pub unit_width: u64,
    pub next_id: u64,
    pub pending: Vec<(u64, KeyRange)>,
    pub in_progress: Vec<(u64, KeyRange)>,
    pub completed_runs: Vec<(u64, u64)>,
    pub results: Vec<SearchResult>,
    pub filter_digest: Hash256,
}

impl Snapshot {
    /// Fail with `Error::Validation` when the snapshot was taken against a
    /// different filter than the one now loaded.
    pub fn verify_filter(&self, digest: &Hash256) -> Result<()> {
        if self.filter_digest != *digest {
            return Err(Error::Validation(
                "checkpoint filter digest mismatch: targets changed since the snapshot".into(),
            ));
        }
        Ok(())
    }

    /// Pending plus in-flight, assignment state dropped.
    pub fn resumable_units(&self) -> Vec<(u64, KeyRange)> {
        let mut units = self.pending.clone();
        units.extend(self.in_progress.iter().cloned());
        units
    }

    pub fn completed_ids(&self) -> Vec<u64> {
        rle_decode(&self.completed_runs)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.range.start.to_be_bytes());
        buf.extend_from_slice(&self.range.end.to_be_bytes());
        buf.extend_from_slice(&self.unit_width.to_le_bytes());
        buf.extend_from_slice(&self.next_id.to_le_bytes());

        write_units(&mut buf, &self.pending);
        write_units(&mut buf, &self.in_progress);

        buf.extend_from_slice(&(self.completed_runs.len() as u64).to_le_bytes());
        for &(start, len) in &self.completed_runs {
            buf.extend_from_slice(&start.to_le_bytes());
            buf.extend_from_slice(&len.to_le_bytes());
        }

        buf.extend_from_slice(&(self.results.len() as u64).to_le_bytes());
        for result in &self.results {
            buf.push(result.found as u8);
            buf.extend_from_slice(result.private_key.as_bytes());
            buf.extend_from_slice(result.target_hash.as_bytes());
            let addr = result.address.as_bytes();
            buf.extend_from_slice(&(addr.len() as u32).to_le_bytes());
            buf.extend_from_slice(addr);
            buf.extend_from_slice(&result.found_at_ms.to_le_bytes());
        }

        buf.extend_from_slice(self.filter_digest.as_bytes());

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &buf)?;
        File::open(&tmp)?.sync_all()?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// `Error::Parse` for anything structurally wrong, `Error::Io` only for
    /// real I/O failures.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let mut r = Reader { buf: &raw, pos: 0 };

        if r.take(4)? != MAGIC {
            return Err(Error::Parse("not a checkpoint file".into()));
        }
        let version = u32::from_le_bytes(r.take(4)?.try_into().unwrap());
        if version != SNAPSHOT_VERSION {
            return Err(Error::Parse(format!("unsupported checkpoint version {version}")));
        }
        let start = UInt256::from_be_bytes(&r.take(32)?.try_into().unwrap());
        let end = UInt256::from_be_bytes(&r.take(32)?.try_into().unwrap());
        let unit_width = r.u64()?;
        let next_id = r.u64()?;

        let pending = read_units(&mut r)?;
        let in_progress = read_units(&mut r)?;

        let run_count = r.u64()? as usize;
        let mut completed_runs = Vec::with_capacity(run_count.min(1 << 20));
        for _ in 0..run_count {
            completed_runs.push((r.u64()?, r.u64()?));
        }

        let result_count = r.u64()? as usize;
        let mut results = Vec::with_capacity(result_count.min(1 << 16));
        for _ in 0..result_count {
            let found = r.take(1)?[0] != 0;
            let private_key = PrivateKey::from_slice(r.take(32)?);
            let target_hash = Hash160::from_slice(r.take(20)?);
            let addr_len = u32::from_le_bytes(r.take(4)?.try_into().unwrap()) as usize;
            let address = String::from_utf8(r.take(addr_len)?.to_vec())
                .map_err(|_| Error::Parse("checkpoint address is not UTF-8".into()))?;
            let found_at_ms = r.u64()?;
            results.push(SearchResult { found, private_key, target_hash, address, found_at_ms });
        }

        let filter_digest = Hash256::from_slice(r.take(32)?);

        Ok(Self {
            version,
            range: KeyRange::new(start, end),
            unit_width,
            next_id,
            pending,
            in_progress,
            completed_runs,
            results,
            filter_digest,
        })
    }
}

fn write_units(buf: &mut Vec<u8>, units: &[(u64, KeyRange)]) {
    buf.extend_from_slice(&(units.len() as u64).to_le_bytes());
    for (id, range) in units {
        buf.extend_from_slice(&id.to_le_bytes());
        buf.extend_from_slice(&range.start.to_be_bytes());
        buf.extend_from_slice(&range.end.to_be_bytes());
    }
}

fn read_units(r: &mut Reader<'_>) -> Result<Vec<(u64, KeyRange)>> {
    let count = r.u64()? as usize;
    let mut units = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        let id = r.u64()?;
        let start = UInt256::from_be_bytes(&r.take(32)?.try_into().unwrap());
        let end = UInt256::from_be_bytes(&r.take(32)?.try_into().unwrap());
        units.push((id, KeyRange::new(start, end)));
    }
    Ok(units)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::Parse("checkpoint truncated".into()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}
