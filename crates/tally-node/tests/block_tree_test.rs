//! End-to-end tests for the block tree database on RocksDB.

use tally_core::block_index::{BlockIndexMap, BlockIndexRecord, BlockStatus, BlockValidity};
use tally_core::codec::encode_to_vec;
use tally_core::constants::{ConsensusParams, NetworkType};
use tally_core::error::{CorruptionError, IndexError};
use tally_core::pow::check_proof_of_work;
use tally_core::types::{BlockFileInfo, BlockHeader, DiskTxPos, Hash256};
use tally_node_lib::schema;
use tally_node_lib::{BlockTreeDb, IndexCache, KeyValueStore, MemoryStore, RocksStore, StoreOptions};

fn regtest() -> ConsensusParams {
    NetworkType::Regtest.params()
}

fn temp_db() -> (tempfile::TempDir, BlockTreeDb<RocksStore>) {
    let dir = tempfile::tempdir().unwrap();
    let db = BlockTreeDb::open(dir.path().join("index"), &StoreOptions::default()).unwrap();
    (dir, db)
}

/// A regtest header on `prev` whose hash passes (or, with `valid = false`,
/// fails) proof of work.
fn header(prev: Hash256, salt: u32, valid: bool) -> BlockHeader {
    let params = regtest();
    let mut header = BlockHeader {
        version: 4,
        prev_hash: prev,
        merkle_root: Hash256::double_sha256(&salt.to_le_bytes()),
        time: 1_700_000_000 + salt,
        bits: params.pow_limit_bits,
        nonce: 0,
    };
    while check_proof_of_work(&header.hash(), header.bits, &params) != valid {
        header.nonce += 1;
    }
    header
}

fn record(prev: Hash256, height: i32, salt: u32) -> BlockIndexRecord {
    BlockIndexRecord {
        file: 0,
        data_pos: 8 + 300 * height as u32,
        status: BlockStatus::from_bits(BlockValidity::Scripts as u32)
            .with(BlockStatus::HAVE_DATA | BlockStatus::HAVE_UNDO),
        tx_count: 1 + height as u32,
        ..BlockIndexRecord::new(header(prev, salt, true), height)
    }
}

fn load(db: &BlockTreeDb<impl KeyValueStore>) -> BlockIndexMap {
    let mut map = BlockIndexMap::new();
    db.load_block_index_guts(&mut map, &regtest()).unwrap();
    map
}

// --- Codec through the store ---

#[test]
fn stored_records_read_back_identical() {
    let (_dir, db) = temp_db();
    let rec = record(Hash256::ZERO, 0, 1);
    let info = BlockFileInfo {
        blocks: 1,
        size: 285,
        undo_size: 0,
        height_first: 0,
        height_last: 0,
        time_first: 1_700_000_001,
        time_last: 1_700_000_001,
    };
    db.write_batch_sync(&[(0, info)], 0, &[&rec], true).unwrap();
    let pos = DiskTxPos { file: 0, block_pos: 8, tx_offset: 81 };
    db.write_tx_index(&[(Hash256([0x42; 32]), pos)]).unwrap();

    assert_eq!(db.read_block_index(&rec.hash).unwrap(), Some(rec));
    assert_eq!(db.read_block_file_info(0).unwrap(), Some(info));
    assert_eq!(db.read_last_block_file().unwrap(), Some(0));
    assert_eq!(db.read_tx_index(&Hash256([0x42; 32])).unwrap(), Some(pos));
}

// --- Loader ---

#[test]
fn genesis_and_child_are_linked() {
    let (_dir, db) = temp_db();
    let genesis = record(Hash256::ZERO, 0, 1);
    let child = record(genesis.hash, 1, 2);
    db.write_batch_sync(&[], 0, &[&child, &genesis], true).unwrap();

    let map = load(&db);
    assert_eq!(map.len(), 2);
    let g = map.lookup(&genesis.hash).unwrap();
    let c = map.lookup(&child.hash).unwrap();
    assert_eq!(map.parent(c), Some(g));
    assert_eq!(map.parent(g), None);
    assert_eq!(map[c].to_record(), child);
    assert_eq!(map[g].to_record(), genesis);
}

#[test]
fn load_is_independent_of_key_order() {
    // Find chains h3 <- h2 <- h1 where h1 sorts before h2 and where it sorts after.
    let mut seen_before = false;
    let mut seen_after = false;
    let mut salt: u32 = 10;
    while !(seen_before && seen_after) {
        let h3 = Hash256::double_sha256(&salt.to_be_bytes());
        let b = record(h3, 5, salt);
        let a = record(b.hash, 6, salt + 1);
        salt += 2;

        let child_first = schema::block_index_key(&a.hash) < schema::block_index_key(&b.hash);
        if (child_first && seen_before) || (!child_first && seen_after) {
            continue;
        }
        if child_first {
            seen_before = true;
        } else {
            seen_after = true;
        }

        let (_dir, db) = temp_db();
        db.write_batch_sync(&[], 0, &[&a, &b], true).unwrap();
        let mut map = BlockIndexMap::new();
        let stats = db.load_block_index_guts(&mut map, &regtest()).unwrap();

        assert_eq!(stats.loaded, 2);
        assert_eq!(stats.stubs, 1);
        assert_eq!(map.len(), 3);
        let node_a = map.lookup(&a.hash).unwrap();
        let node_b = map.lookup(&b.hash).unwrap();
        assert_eq!(map.parent(node_a), Some(node_b));
        assert_eq!(map[node_b].tx_count, b.tx_count);
        assert_eq!(map[node_b].height, 5);

        let stub = map.parent(node_b).unwrap();
        assert_eq!(map[stub].hash, h3);
        assert_eq!(map.parent(stub), None);
        assert_eq!(map.iter().filter(|(_, n)| n.hash == b.hash).count(), 1);
    }
}

#[test]
fn loading_twice_is_idempotent() {
    let (_dir, db) = temp_db();
    let genesis = record(Hash256::ZERO, 0, 1);
    let mut records = vec![genesis];
    for height in 1..12 {
        let prev = records[height as usize - 1].hash;
        records.push(record(prev, height, 100 + height as u32));
    }
    let fork = record(records[4].hash, 5, 900);
    records.push(fork);
    let refs: Vec<&BlockIndexRecord> = records.iter().collect();
    db.write_batch_sync(&[], 0, &refs, true).unwrap();

    let mut map = BlockIndexMap::new();
    let first = db.load_block_index_guts(&mut map, &regtest()).unwrap();
    let snapshot = map.clone();
    let second = db.load_block_index_guts(&mut map, &regtest()).unwrap();

    assert_eq!(first, second);
    assert_eq!(map, snapshot);
    assert_eq!(map.len(), records.len());

    // A fresh map built from the same keyspace has the same links and fields.
    let fresh = load(&db);
    assert_eq!(fresh.len(), map.len());
    for (_, node) in map.iter() {
        let other = fresh.by_hash(&node.hash).unwrap();
        assert_eq!(other.to_record(), node.to_record());
        assert_eq!(
            other.parent.map(|p| fresh[p].hash),
            node.parent.map(|p| map[p].hash)
        );
    }
}

#[test]
fn zero_tx_records_are_erased() {
    let (_dir, db) = temp_db();
    let genesis = record(Hash256::ZERO, 0, 1);
    let empty = BlockIndexRecord {
        tx_count: 0,
        ..record(genesis.hash, 1, 2)
    };
    db.write_batch_sync(&[], 0, &[&genesis, &empty], true).unwrap();

    let mut map = BlockIndexMap::new();
    let stats = db.load_block_index_guts(&mut map, &regtest()).unwrap();
    assert_eq!(stats.pruned, 1);
    assert_eq!(stats.loaded, 1);
    assert!(map.lookup(&empty.hash).is_none());
    assert_eq!(map.len(), 1);
    assert!(!db.store().exists(&schema::block_index_key(&empty.hash)).unwrap());

    let again = db.load_block_index_guts(&mut map, &regtest()).unwrap();
    assert_eq!(again.pruned, 0);
}

#[test]
fn proof_of_work_failure_is_corruption_and_leaves_map_untouched() {
    let (_dir, db) = temp_db();
    let genesis = record(Hash256::ZERO, 0, 1);
    let bad = BlockIndexRecord {
        tx_count: 1,
        ..BlockIndexRecord::new(header(genesis.hash, 2, false), 1)
    };
    db.write_batch_sync(&[], 0, &[&genesis, &bad], true).unwrap();

    let mut map = BlockIndexMap::new();
    let existing = record(Hash256::ZERO, 0, 77);
    map.upsert_record(&existing);
    let before = map.clone();

    let err = db.load_block_index_guts(&mut map, &regtest()).unwrap_err();
    assert!(err.is_corruption());
    match err {
        IndexError::Corruption(CorruptionError::ProofOfWork { hash, bits }) => {
            assert_eq!(hash, bad.hash.to_string());
            assert_eq!(bits, 0x207f_ffff);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(map, before);
}

#[test]
fn mainnet_genesis_loads_under_mainnet_rules_only() {
    let (_dir, db) = temp_db();
    let genesis = BlockIndexRecord {
        tx_count: 1,
        ..BlockIndexRecord::new(NetworkType::Mainnet.genesis_header(), 0)
    };
    db.write_batch_sync(&[], 0, &[&genesis], true).unwrap();

    let mut map = BlockIndexMap::new();
    db.load_block_index_guts(&mut map, &NetworkType::Mainnet.params())
        .unwrap();
    assert_eq!(
        map.by_hash(&genesis.hash).unwrap().hash.to_string(),
        "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
    );

    let regtest_genesis = BlockIndexRecord {
        tx_count: 1,
        ..BlockIndexRecord::new(NetworkType::Regtest.genesis_header(), 0)
    };
    db.write_batch_sync(&[], 0, &[&regtest_genesis], true).unwrap();
    let err = db
        .load_block_index_guts(&mut BlockIndexMap::new(), &NetworkType::Mainnet.params())
        .unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn corrupt_value_aborts_load() {
    let (_dir, db) = temp_db();
    let genesis = record(Hash256::ZERO, 0, 1);
    let mut bytes = encode_to_vec(&genesis);
    bytes.push(0xff);
    db.store()
        .put(&schema::block_index_key(&genesis.hash), &bytes, true)
        .unwrap();

    let err = db
        .load_block_index_guts(&mut BlockIndexMap::new(), &regtest())
        .unwrap_err();
    assert!(matches!(
        err,
        IndexError::Corruption(CorruptionError::Decode { .. })
    ));
}

// --- Batch atomicity ---

#[test]
fn failed_batch_leaves_no_keys() {
    let db = BlockTreeDb::new(MemoryStore::new());
    let genesis = record(Hash256::ZERO, 0, 1);
    let child = record(genesis.hash, 1, 2);
    let info = BlockFileInfo { blocks: 2, ..BlockFileInfo::default() };

    db.store().fail_next_commit();
    let err = db
        .write_batch_sync(&[(0, info), (1, info)], 1, &[&genesis, &child], true)
        .unwrap_err();
    assert!(!err.is_corruption());

    // "Restart": a fresh load and fresh reads see nothing from the batch.
    assert!(db.store().is_empty());
    assert!(load(&db).is_empty());
    assert_eq!(db.read_last_block_file().unwrap(), None);
    assert_eq!(db.read_block_file_info(1).unwrap(), None);

    db.write_batch_sync(&[(0, info), (1, info)], 1, &[&genesis, &child], true)
        .unwrap();
    assert_eq!(db.store().len(), 5);
    assert_eq!(load(&db).len(), 2);
}

// --- Auxiliary records ---

#[test]
fn named_flag_roundtrip_uses_ascii_sentinels() {
    let (_dir, db) = temp_db();
    db.write_flag("txindex", true).unwrap();
    assert_eq!(db.read_flag("txindex").unwrap(), Some(true));
    assert_eq!(db.store().get(b"Ftxindex").unwrap(), Some(b"1".to_vec()));

    db.write_flag("prunedblockfiles", false).unwrap();
    assert_eq!(db.read_flag("prunedblockfiles").unwrap(), Some(false));
    assert_eq!(db.store().get(b"Fprunedblockfiles").unwrap(), Some(b"0".to_vec()));
    assert_eq!(db.read_flag("never-written").unwrap(), None);
}

#[test]
fn reindex_marker_and_counters_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index");
    {
        let db = BlockTreeDb::open(&path, &StoreOptions::default()).unwrap();
        assert_eq!(db.read_max_block_file().unwrap(), schema::MAX_BLOCK_FILE_UNSET);
        db.write_reindexing(true).unwrap();
        db.write_max_block_file(7).unwrap();
        db.write_last_block_file(6).unwrap();
        db.store().flush().unwrap();
    }
    let db = BlockTreeDb::open(&path, &StoreOptions::default()).unwrap();
    assert!(db.read_reindexing().unwrap());
    assert_eq!(db.read_max_block_file().unwrap(), 7);
    assert_eq!(db.read_last_block_file().unwrap(), Some(6));

    db.write_reindexing(false).unwrap();
    assert!(!db.read_reindexing().unwrap());
}

// --- Index cache over RocksDB ---

#[test]
fn index_cache_flush_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index");
    let genesis = header(Hash256::ZERO, 1, true);
    let child = header(genesis.hash(), 2, true);
    {
        let db = BlockTreeDb::open(&path, &StoreOptions::default()).unwrap();
        let mut cache = IndexCache::open(db, regtest()).unwrap();
        for h in [genesis, child] {
            let id = cache.add_header(h).unwrap();
            cache.update(id, |state| {
                *state.tx_count = 1;
                *state.status = state.status.with(BlockStatus::HAVE_DATA);
            });
        }
        cache.record_block_file(0, 1, u64::from(child.time), 300);
        assert_eq!(cache.flush(true).unwrap(), 2);
    }

    let db = BlockTreeDb::open(&path, &StoreOptions::default()).unwrap();
    let cache = IndexCache::open(db, regtest()).unwrap().shared();
    let guard = cache.lock();
    let map = guard.index();
    let c = map.lookup(&child.hash()).unwrap();
    assert_eq!(map[c].height, 1);
    assert_eq!(map.parent(c), map.lookup(&genesis.hash()));
    assert_eq!(map.best_header(), Some(c));
    assert_eq!(guard.file_info(0).unwrap().blocks, 1);
}
