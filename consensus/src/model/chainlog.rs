//! Append-only chain log.
//!
//! Canonically-encoded blocks, each prefixed by a `u32` big-endian byte
//! length, plus in-memory sidecar indexes (`block_hash → offset`,
//! `height → offset`) rebuilt by scanning the log at open. A torn tail write
//! is truncated away; corruption before the tail is fatal.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use doin_consensus_core::block::Block;
use doin_consensus_core::encoding::{CanonicalDecode, CanonicalEncode};
use doin_consensus_core::errors::store::{StoreError, StoreResult};
use doin_hashes::Hash;

use doin_core::warn;

pub struct ChainLog {
    file: File,
    end_offset: u64,
    by_hash: HashMap<Hash, u64>,
    by_height: HashMap<u64, u64>,
}

impl ChainLog {
    /// Opens (or creates) the log at `path` and rebuilds the sidecar indexes.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let mut file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;
        let len = file.seek(SeekFrom::End(0))?;
        let mut log = Self { file, end_offset: 0, by_hash: HashMap::new(), by_height: HashMap::new() };
        log.rebuild(len)?;
        Ok(log)
    }

    fn rebuild(&mut self, file_len: u64) -> StoreResult<()> {
        let mut buf = Vec::with_capacity(file_len as usize);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut buf)?;

        let mut offset = 0u64;
        while (offset as usize) < buf.len() {
            let pos = offset as usize;
            if pos + 4 > buf.len() {
                break; // torn length prefix
            }
            let len = u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
            if pos + 4 + len > buf.len() {
                break; // torn record
            }
            match Block::from_canonical_bytes(&buf[pos + 4..pos + 4 + len]) {
                Ok(block) => {
                    self.by_hash.insert(block.hash(), offset);
                    self.by_height.insert(block.index(), offset);
                }
                Err(err) => {
                    // a record that carries a valid length but undecodable
                    // content is real corruption, not a torn tail
                    return Err(StoreError::Corruption(offset, err));
                }
            }
            offset += 4 + len as u64;
        }

        if offset < file_len {
            warn!("chain log has a torn tail, truncating {} -> {} bytes", file_len, offset);
            self.file.set_len(offset)?;
        }
        self.end_offset = offset;
        Ok(())
    }

    /// Appends a block and fsyncs the record.
    pub fn append(&mut self, block: &Block) -> StoreResult<()> {
        let bytes = block.canonical_bytes();
        self.file.seek(SeekFrom::Start(self.end_offset))?;
        self.file.write_all(&(bytes.len() as u32).to_be_bytes())?;
        self.file.write_all(&bytes)?;
        self.file.sync_data()?;

        self.by_hash.insert(block.hash(), self.end_offset);
        self.by_height.insert(block.index(), self.end_offset);
        self.end_offset += 4 + bytes.len() as u64;
        Ok(())
    }

    pub fn contains(&self, hash: Hash) -> bool {
        self.by_hash.contains_key(&hash)
    }

    pub fn get(&mut self, hash: Hash) -> StoreResult<Block> {
        let offset = *self.by_hash.get(&hash).ok_or(StoreError::BlockNotFound(hash))?;
        self.read_at(offset)
    }

    /// Latest record written for `height` (a reorg re-appends the height).
    pub fn get_by_height(&mut self, height: u64) -> StoreResult<Block> {
        let offset = *self.by_height.get(&height).ok_or(StoreError::HeightNotFound(height))?;
        self.read_at(offset)
    }

    pub fn max_height(&self) -> Option<u64> {
        self.by_height.keys().max().copied()
    }

    fn read_at(&mut self, offset: u64) -> StoreResult<Block> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut len_bytes = [0u8; 4];
        self.file.read_exact(&mut len_bytes)?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        let mut record = vec![0u8; len];
        self.file.read_exact(&mut record)?;
        Block::from_canonical_bytes(&record).map_err(|err| StoreError::Corruption(offset, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doin_consensus_core::config::genesis::SIMNET_GENESIS;
    use doin_consensus_core::constants::BLOCK_VERSION;
    use doin_consensus_core::peer::PeerId;

    fn blocks(n: u64) -> Vec<Block> {
        let mut out = vec![SIMNET_GENESIS.build()];
        for i in 1..=n {
            let parent = &out[(i - 1) as usize];
            out.push(Block::new(
                BLOCK_VERSION,
                i,
                parent.hash(),
                parent.header.timestamp + 1000,
                1.0,
                PeerId::from_bytes([7; 32]),
                vec![],
            ));
        }
        out
    }

    #[test]
    fn test_append_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.log");
        let chain = blocks(3);

        {
            let mut log = ChainLog::open(&path).unwrap();
            for block in &chain {
                log.append(block).unwrap();
            }
        }

        // indexes rebuild from the log alone
        let mut log = ChainLog::open(&path).unwrap();
        assert_eq!(log.max_height(), Some(3));
        for block in &chain {
            assert!(log.contains(block.hash()));
            assert_eq!(&log.get(block.hash()).unwrap(), block);
            assert_eq!(&log.get_by_height(block.index()).unwrap(), block);
        }
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.log");
        let chain = blocks(2);

        {
            let mut log = ChainLog::open(&path).unwrap();
            for block in &chain {
                log.append(block).unwrap();
            }
        }

        // chop a few bytes off the last record
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        let len = file.metadata().unwrap().len();
        file.set_len(len - 3).unwrap();

        let mut log = ChainLog::open(&path).unwrap();
        assert_eq!(log.max_height(), Some(1));
        assert!(log.get(chain[2].hash()).is_err());
        assert_eq!(&log.get_by_height(1).unwrap(), &chain[1]);
    }

    #[test]
    fn test_missing_block_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = ChainLog::open(&dir.path().join("chain.log")).unwrap();
        assert!(matches!(log.get(Hash::from(1u64)), Err(StoreError::BlockNotFound(_))));
        assert!(matches!(log.get_by_height(0), Err(StoreError::HeightNotFound(0))));
    }
}
