use std::num::NonZeroUsize;
use std::sync::Arc;

use ethtree_types::{
    block::{Block, BlockHeader},
    chain_level::ChainLevelInfo,
    primitives::{Decode, Encode, H256},
    receipt::Receipt,
    state::StateSnapshot,
};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::{
    StoreError,
    api::{StorageBackend, StorageWriteBatch, Table},
};

// ============ Reserved Keys ============

/// Key of the head hash in [`Table::BlockInfos`]. Its value is an SSZ-encoded [`H256`].
pub const HEAD_KEY: [u8; 32] = [0x00; 32];
/// Key of the delete pointer in [`Table::BlockInfos`]. Its value is an SSZ-encoded [`H256`].
///
/// An all-ones hash cannot be produced by a real block.
pub const DELETE_POINTER_KEY: [u8; 32] = [0xff; 32];
/// Key of the lowest inserted body number in [`Table::BlockBodies`]. Its value is an
/// SSZ-encoded [`u64`].
const LOWEST_INSERTED_BODY_KEY: [u8; 8] = 0u64.to_be_bytes();

// ============ Key Encoding Helpers ============

/// Chain levels are keyed by block number, big endian, so they sort by height.
fn level_key(number: u64) -> Vec<u8> {
    number.to_be_bytes().to_vec()
}

/// Layout: block hash (32 bytes) || index (4 bytes BE)
fn receipt_key(block_hash: &H256, index: u32) -> Vec<u8> {
    let mut key = block_hash.as_slice().to_vec();
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn decode<T: Decode>(table: Table, what: &'static str, bytes: &[u8]) -> Result<T, StoreError> {
    T::from_ssz_bytes(bytes).map_err(|err| {
        warn!(?table, what, len = bytes.len(), ?err, "Failed to decode stored value");
        StoreError::Decode {
            table,
            what,
            reason: format!("{err:?}"),
        }
    })
}

/// Typed access to headers, blocks, chain levels, receipts and state snapshots.
///
/// Headers and blocks are read through bounded LRU caches. Callers decide what gets
/// cached with [`ChainStore::cache_header`] / [`ChainStore::cache_block`]; deletions
/// committed through a [`ChainWriteBatch`] evict the affected entries.
pub struct ChainStore {
    backend: Arc<dyn StorageBackend>,
    headers: Mutex<LruCache<H256, BlockHeader>>,
    blocks: Mutex<LruCache<H256, Block>>,
}

impl ChainStore {
    pub fn new(backend: Arc<dyn StorageBackend>, cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            backend,
            headers: Mutex::new(LruCache::new(capacity)),
            blocks: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let view = self.backend.begin_read()?;
        Ok(view.get(table, key)?)
    }

    fn contains(&self, table: Table, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get(table, key)?.is_some())
    }

    // ============ Headers ============

    /// Returns the header with the given hash, from cache or storage.
    pub fn header(&self, hash: &H256) -> Result<Option<BlockHeader>, StoreError> {
        if let Some(header) = self.cached_header(hash) {
            return Ok(Some(header));
        }
        self.get(Table::BlockHeaders, hash.as_slice())?
            .map(|bytes| decode(Table::BlockHeaders, "header", &bytes))
            .transpose()
    }

    pub fn cached_header(&self, hash: &H256) -> Option<BlockHeader> {
        self.headers.lock().get(hash).cloned()
    }

    pub fn cache_header(&self, header: BlockHeader) {
        self.headers.lock().put(header.hash(), header);
    }

    pub fn has_header(&self, hash: &H256) -> Result<bool, StoreError> {
        if self.headers.lock().contains(hash) {
            return Ok(true);
        }
        self.contains(Table::BlockHeaders, hash.as_slice())
    }

    // ============ Blocks ============

    /// Returns the block with the given hash, from cache or storage.
    pub fn block(&self, hash: &H256) -> Result<Option<Block>, StoreError> {
        if let Some(block) = self.cached_block(hash) {
            return Ok(Some(block));
        }
        self.get(Table::BlockBodies, hash.as_slice())?
            .map(|bytes| decode(Table::BlockBodies, "block", &bytes))
            .transpose()
    }

    pub fn cached_block(&self, hash: &H256) -> Option<Block> {
        self.blocks.lock().get(hash).cloned()
    }

    pub fn cache_block(&self, block: Block) {
        self.blocks.lock().put(block.hash(), block);
    }

    pub fn has_block(&self, hash: &H256) -> Result<bool, StoreError> {
        if self.blocks.lock().contains(hash) {
            return Ok(true);
        }
        self.contains(Table::BlockBodies, hash.as_slice())
    }

    pub fn lowest_inserted_body_number(&self) -> Result<Option<u64>, StoreError> {
        self.get(Table::BlockBodies, &LOWEST_INSERTED_BODY_KEY)?
            .map(|bytes| decode(Table::BlockBodies, "lowest inserted body number", &bytes))
            .transpose()
    }

    // ============ Chain Levels ============

    pub fn level(&self, number: u64) -> Result<Option<ChainLevelInfo>, StoreError> {
        self.get(Table::BlockInfos, &level_key(number))?
            .map(|bytes| decode(Table::BlockInfos, "chain level", &bytes))
            .transpose()
    }

    pub fn has_level(&self, number: u64) -> Result<bool, StoreError> {
        self.contains(Table::BlockInfos, &level_key(number))
    }

    pub fn head_hash(&self) -> Result<Option<H256>, StoreError> {
        self.get(Table::BlockInfos, &HEAD_KEY)?
            .map(|bytes| decode(Table::BlockInfos, "head hash", &bytes))
            .transpose()
    }

    pub fn delete_pointer(&self) -> Result<Option<H256>, StoreError> {
        self.get(Table::BlockInfos, &DELETE_POINTER_KEY)?
            .map(|bytes| decode(Table::BlockInfos, "delete pointer", &bytes))
            .transpose()
    }

    // ============ Receipts ============

    /// Receipts of a block, ordered by transaction index.
    pub fn receipts(&self, block_hash: &H256) -> Result<Vec<Receipt>, StoreError> {
        let view = self.backend.begin_read()?;
        view.prefix_iterator(Table::Receipts, block_hash.as_slice())?
            .map(|entry| {
                let (_, value) = entry?;
                decode(Table::Receipts, "receipt", &value)
            })
            .collect()
    }

    // ============ States ============

    pub fn state(&self, root: &H256) -> Result<Option<StateSnapshot>, StoreError> {
        self.get(Table::States, root.as_slice())?
            .map(|bytes| decode(Table::States, "state snapshot", &bytes))
            .transpose()
    }

    pub fn has_state(&self, root: &H256) -> Result<bool, StoreError> {
        self.contains(Table::States, root.as_slice())
    }

    /// Starts an atomic batch of typed writes.
    pub fn write(&self) -> Result<ChainWriteBatch<'_>, StoreError> {
        Ok(ChainWriteBatch {
            store: self,
            batch: self.backend.begin_write()?,
            evicted_headers: Vec::new(),
            evicted_blocks: Vec::new(),
        })
    }
}

/// A set of typed writes applied atomically on [`ChainWriteBatch::commit`].
///
/// Dropping the batch without committing discards every write.
pub struct ChainWriteBatch<'a> {
    store: &'a ChainStore,
    batch: Box<dyn StorageWriteBatch>,
    evicted_headers: Vec<H256>,
    evicted_blocks: Vec<H256>,
}

impl ChainWriteBatch<'_> {
    fn put(&mut self, table: Table, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError> {
        Ok(self.batch.put_batch(table, vec![(key, value)])?)
    }

    fn delete(&mut self, table: Table, key: Vec<u8>) -> Result<(), StoreError> {
        Ok(self.batch.delete_batch(table, vec![key])?)
    }

    pub fn put_header(&mut self, header: &BlockHeader) -> Result<(), StoreError> {
        self.put(
            Table::BlockHeaders,
            header.hash().to_vec(),
            header.as_ssz_bytes(),
        )
    }

    pub fn delete_header(&mut self, hash: &H256) -> Result<(), StoreError> {
        self.evicted_headers.push(*hash);
        self.delete(Table::BlockHeaders, hash.to_vec())
    }

    pub fn put_block(&mut self, block: &Block) -> Result<(), StoreError> {
        self.put(Table::BlockBodies, block.hash().to_vec(), block.as_ssz_bytes())
    }

    pub fn delete_block(&mut self, hash: &H256) -> Result<(), StoreError> {
        self.evicted_blocks.push(*hash);
        self.delete(Table::BlockBodies, hash.to_vec())
    }

    pub fn set_lowest_inserted_body_number(&mut self, number: Option<u64>) -> Result<(), StoreError> {
        match number {
            Some(number) => self.put(
                Table::BlockBodies,
                LOWEST_INSERTED_BODY_KEY.to_vec(),
                number.as_ssz_bytes(),
            ),
            None => self.delete(Table::BlockBodies, LOWEST_INSERTED_BODY_KEY.to_vec()),
        }
    }

    pub fn put_level(&mut self, number: u64, level: &ChainLevelInfo) -> Result<(), StoreError> {
        self.put(Table::BlockInfos, level_key(number), level.as_ssz_bytes())
    }

    pub fn delete_level(&mut self, number: u64) -> Result<(), StoreError> {
        self.delete(Table::BlockInfos, level_key(number))
    }

    pub fn set_head(&mut self, hash: &H256) -> Result<(), StoreError> {
        self.put(Table::BlockInfos, HEAD_KEY.to_vec(), hash.as_ssz_bytes())
    }

    /// Records the next block a deletion cascade must remove, or clears the record.
    pub fn set_delete_pointer(&mut self, hash: Option<&H256>) -> Result<(), StoreError> {
        match hash {
            Some(hash) => self.put(
                Table::BlockInfos,
                DELETE_POINTER_KEY.to_vec(),
                hash.as_ssz_bytes(),
            ),
            None => self.delete(Table::BlockInfos, DELETE_POINTER_KEY.to_vec()),
        }
    }

    pub fn put_receipts(&mut self, block_hash: &H256, receipts: &[Receipt]) -> Result<(), StoreError> {
        let entries = receipts
            .iter()
            .enumerate()
            .map(|(index, receipt)| {
                let index = u32::try_from(index).map_err(|_| StoreError::TooLarge {
                    what: "receipt list",
                })?;
                Ok((receipt_key(block_hash, index), receipt.as_ssz_bytes()))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(self.batch.put_batch(Table::Receipts, entries)?)
    }

    pub fn put_state(&mut self, root: &H256, snapshot: &StateSnapshot) -> Result<(), StoreError> {
        self.put(Table::States, root.to_vec(), snapshot.as_ssz_bytes())
    }

    /// Applies every write atomically, then evicts deleted headers and blocks from the
    /// caches.
    pub fn commit(self) -> Result<(), StoreError> {
        self.batch.commit()?;
        trace!(
            evicted_headers = self.evicted_headers.len(),
            evicted_blocks = self.evicted_blocks.len(),
            "Committed chain write batch"
        );
        if !self.evicted_headers.is_empty() {
            let mut headers = self.store.headers.lock();
            for hash in &self.evicted_headers {
                headers.pop(hash);
            }
        }
        if !self.evicted_blocks.is_empty() {
            let mut blocks = self.store.blocks.lock();
            for hash in &self.evicted_blocks {
                blocks.pop(hash);
            }
        }
        Ok(())
    }
}
