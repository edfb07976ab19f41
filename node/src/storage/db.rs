// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::{B256, Bytes};
use alloy_sol_types::SolValue;
use app_core::Tx;
use app_core::application::{ResultCode, TxResult};
use app_core::genesis::Genesis;
use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, Result, Transaction, TransactionBehavior};
use rusqlite_migration::{M, Migrations};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::sql::{
    SequencerMsgRow, TxRow, sql_insert_genesis, sql_insert_open_block, sql_insert_txs_batch,
    sql_seal_block, sql_select_genesis, sql_select_latest_sealed_height, sql_select_next_seq,
    sql_select_open_block_with_tx_count, sql_select_sealed_block,
    sql_select_sealed_sequencer_msgs_for_block,
    sql_select_sealed_sequencer_msgs_for_destination, sql_select_sealed_tx_by_hash,
    sql_select_sealed_txs_for_block, sql_select_txs_from_seq,
};
use super::{
    Block, SequencedMsg, SequencerPage, StorageError, StorageOpenError, StoredTx, WriteHead,
};
use crate::inclusion_lane::IncludedTx;

const MIGRATION_0001_SCHEMA: &str = include_str!("migrations/0001_schema.sql");
const TX_HASH_LEN: usize = 32;

pub struct Storage {
    conn: Connection,
}

impl Storage {
    pub fn open(path: &str, synchronous: &str) -> std::result::Result<Self, StorageOpenError> {
        let conn = Self::open_connection_with_migrations(path, synchronous)?;
        Ok(Self { conn })
    }

    /// Opens a reader that never migrates or writes. API handlers use one per request.
    pub fn open_read_only(path: &str) -> std::result::Result<Self, StorageOpenError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Ok(Self { conn })
    }

    pub fn open_connection(
        path: &str,
        synchronous: &str,
    ) -> std::result::Result<Connection, StorageOpenError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", synchronous)?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Ok(conn)
    }

    pub fn open_connection_with_migrations(
        path: &str,
        synchronous: &str,
    ) -> std::result::Result<Connection, StorageOpenError> {
        let mut conn = Self::open_connection(path, synchronous)?;
        Self::run_migrations(&mut conn)?;
        Ok(conn)
    }

    pub fn run_migrations(conn: &mut Connection) -> std::result::Result<(), StorageOpenError> {
        Migrations::new(vec![M::up(MIGRATION_0001_SCHEMA)]).to_latest(conn)?;
        Ok(())
    }

    /// Stores `genesis` and opens block 1 on an empty database. On an initialized database
    /// the stored genesis wins and must equal the configured one.
    pub fn ensure_genesis(
        &mut self,
        genesis: &Genesis,
    ) -> std::result::Result<Genesis, StorageError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Some((_, stored_json)) = sql_select_genesis(&tx)? {
            let stored = Genesis::from_json(stored_json.as_bytes())?;
            if &stored != genesis {
                return Err(StorageError::GenesisMismatch {
                    stored: stored.chain_id,
                    configured: genesis.chain_id.clone(),
                });
            }
            return Ok(stored);
        }

        let genesis_json = genesis.to_json()?;
        sql_insert_genesis(&tx, genesis.chain_id.as_str(), &genesis_json)?;
        sql_insert_open_block(&tx, 1, now_unix_ms())?;
        tx.commit()?;
        Ok(genesis.clone())
    }

    pub fn load_genesis(&mut self) -> std::result::Result<Option<Genesis>, StorageError> {
        match sql_select_genesis(&self.conn)? {
            Some((_, genesis_json)) => Ok(Some(Genesis::from_json(genesis_json.as_bytes())?)),
            None => Ok(None),
        }
    }

    pub fn load_open_block(&mut self) -> Result<WriteHead> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Deferred)?;
        let head = load_current_write_head(&tx)?;
        tx.commit()?;
        Ok(head)
    }

    pub fn append_txs_chunk(&mut self, head: &mut WriteHead, txs: &[IncludedTx]) -> Result<()> {
        if txs.is_empty() {
            return Ok(());
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        assert_write_head_matches_open_state(&tx, head)?;

        sql_insert_txs_batch(
            &tx,
            u64_to_i64(head.height),
            u64_to_i64(head.block_tx_count),
            u64_to_i64(head.next_seq),
            txs,
        )?;

        tx.commit()?;
        head.increment_block_tx_count(txs.len());
        Ok(())
    }

    /// Seals the open block and opens the next one in the same write transaction.
    pub fn seal_block(&mut self, head: &mut WriteHead) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        assert_write_head_matches_open_state(&tx, head)?;
        let now_ms = now_unix_ms();
        let changed_rows = sql_seal_block(&tx, u64_to_i64(head.height), now_ms)?;
        if changed_rows != 1 {
            return Err(rusqlite::Error::StatementChangedRows(changed_rows));
        }
        let next_height = head.height.saturating_add(1);
        sql_insert_open_block(&tx, u64_to_i64(next_height), now_ms)?;
        tx.commit()?;
        head.move_to_next_block(from_unix_ms(now_ms));
        Ok(())
    }

    /// Every included transaction from global sequence `seq` on, open block included.
    pub fn load_ordered_txs_from(&mut self, seq: u64) -> Result<Vec<StoredTx>> {
        let rows = sql_select_txs_from_seq(&self.conn, u64_to_i64(seq))?;
        rows.into_iter().map(stored_tx_from_row).collect()
    }

    /// Zero until the first block is sealed.
    pub fn latest_sealed_height(&mut self) -> Result<u64> {
        let value = sql_select_latest_sealed_height(&self.conn)?;
        Ok(i64_to_u64(value))
    }

    pub fn load_block(&mut self, height: u64) -> Result<Option<Block>> {
        let Some((created_at_ms, sealed_at_ms)) =
            sql_select_sealed_block(&self.conn, u64_to_i64(height))?
        else {
            return Ok(None);
        };
        let rows = sql_select_sealed_txs_for_block(&self.conn, u64_to_i64(height))?;
        let txs = rows
            .into_iter()
            .map(stored_tx_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(Block {
            height,
            created_at_ms,
            sealed_at_ms,
            txs,
        }))
    }

    pub fn load_tx(&mut self, hash: &B256) -> Result<Option<StoredTx>> {
        sql_select_sealed_tx_by_hash(&self.conn, hash.as_slice())?
            .map(stored_tx_from_row)
            .transpose()
    }

    /// Sequencer messages addressed to `destination` in sealed blocks within
    /// `[from_height, to_height_exclusive)`, in inclusion order.
    pub fn load_sequencer_msgs(
        &mut self,
        destination: &[u8],
        from_height: u64,
        to_height_exclusive: u64,
        limit: usize,
    ) -> Result<Vec<SequencedMsg>> {
        if from_height >= to_height_exclusive || limit == 0 {
            return Ok(Vec::new());
        }
        let rows = sql_select_sealed_sequencer_msgs_for_destination(
            &self.conn,
            destination,
            u64_to_i64(from_height),
            u64_to_i64(to_height_exclusive),
            u64_to_i64(limit as u64),
        )?;
        rows.into_iter().map(sequenced_msg_from_row).collect()
    }

    pub fn load_block_sequencer_msgs(&mut self, height: u64) -> Result<Vec<SequencedMsg>> {
        let rows = sql_select_sealed_sequencer_msgs_for_block(&self.conn, u64_to_i64(height))?;
        rows.into_iter().map(sequenced_msg_from_row).collect()
    }

    /// Like `load_sequencer_msgs`, but a page never splits a block: when `limit` falls
    /// inside a block the page stops before it, unless that block alone overflows
    /// `limit`, in which case the whole block is returned.
    pub fn load_sequencer_page(
        &mut self,
        destination: &[u8],
        from_height: u64,
        to_height_exclusive: u64,
        limit: usize,
    ) -> Result<SequencerPage> {
        let tx = self.conn.transaction()?;
        let sealed_end = i64_to_u64(sql_select_latest_sealed_height(&tx)?).saturating_add(1);
        let end = to_height_exclusive.min(sealed_end).max(from_height);
        if limit == 0 || from_height >= end {
            return Ok(SequencerPage {
                msgs: Vec::new(),
                next_height: end,
                has_more: false,
            });
        }

        let mut msgs = sql_select_sealed_sequencer_msgs_for_destination(
            &tx,
            destination,
            u64_to_i64(from_height),
            u64_to_i64(end),
            u64_to_i64(limit as u64).saturating_add(1),
        )?
        .into_iter()
        .map(sequenced_msg_from_row)
        .collect::<Result<Vec<_>>>()?;
        if msgs.len() <= limit {
            return Ok(SequencerPage {
                msgs,
                next_height: end,
                has_more: false,
            });
        }

        // One row past the limit: drop the partial trailing block.
        let cut_height = msgs[limit].height;
        msgs.retain(|msg| msg.height < cut_height);
        if msgs.is_empty() {
            msgs = sql_select_sealed_sequencer_msgs_for_destination(
                &tx,
                destination,
                u64_to_i64(cut_height),
                u64_to_i64(cut_height.saturating_add(1)),
                i64::MAX,
            )?
            .into_iter()
            .map(sequenced_msg_from_row)
            .collect::<Result<Vec<_>>>()?;
            let next_height = cut_height.saturating_add(1);
            return Ok(SequencerPage {
                msgs,
                next_height,
                has_more: next_height < end,
            });
        }
        Ok(SequencerPage {
            msgs,
            next_height: cut_height,
            has_more: true,
        })
    }
}

fn load_current_write_head(tx: &Transaction<'_>) -> Result<WriteHead> {
    let (height, created_at_ms, tx_count) =
        sql_select_open_block_with_tx_count(tx)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
    let next_seq = sql_select_next_seq(tx)?;
    Ok(WriteHead {
        height: i64_to_u64(height),
        block_created_at: from_unix_ms(created_at_ms),
        block_tx_count: i64_to_u64(tx_count),
        next_seq: i64_to_u64(next_seq),
    })
}

fn assert_write_head_matches_open_state(tx: &Transaction<'_>, expected: &WriteHead) -> Result<()> {
    let actual = load_current_write_head(tx)?;
    assert_eq!(
        expected.height, actual.height,
        "stale WriteHead: height mismatch"
    );
    assert_eq!(
        expected.block_tx_count, actual.block_tx_count,
        "stale WriteHead: block_tx_count mismatch"
    );
    assert_eq!(
        expected.next_seq, actual.next_seq,
        "stale WriteHead: next_seq mismatch"
    );
    assert_eq!(
        to_unix_ms(expected.block_created_at),
        to_unix_ms(actual.block_created_at),
        "stale WriteHead: block_created_at mismatch"
    );
    Ok(())
}

fn stored_tx_from_row(row: TxRow) -> Result<StoredTx> {
    let hash = hash_from_blob(3, &row.tx_hash)?;
    let tx = <Tx as SolValue>::abi_decode(&row.tx_abi)
        .map_err(|err| conversion_failure(4, Type::Blob, err.to_string()))?;
    let code = u32::try_from(row.code)
        .map_err(|err| err.to_string())
        .and_then(ResultCode::try_from)
        .map_err(|reason| conversion_failure(7, Type::Integer, reason))?;
    Ok(StoredTx {
        seq: i64_to_u64(row.seq),
        height: i64_to_u64(row.height),
        pos_in_block: i64_to_u64(row.pos_in_block),
        hash,
        tx,
        declared_chain_id: row.declared_chain_id,
        routed_to: row.routed_to,
        result: TxResult {
            code,
            log: row.log,
            gas_wanted: i64_to_u64(row.gas_wanted),
            gas_used: i64_to_u64(row.gas_used),
        },
    })
}

fn sequenced_msg_from_row(row: SequencerMsgRow) -> Result<SequencedMsg> {
    Ok(SequencedMsg {
        height: i64_to_u64(row.height),
        tx_seq: i64_to_u64(row.tx_seq),
        tx_hash: hash_from_blob(2, &row.tx_hash)?,
        msg_index: i64_to_u64(row.msg_index),
        chain_id: Bytes::from(row.destination),
        data: Bytes::from(row.data),
        from_address: row.from_address,
    })
}

fn hash_from_blob(column: usize, bytes: &[u8]) -> Result<B256> {
    if bytes.len() != TX_HASH_LEN {
        return Err(conversion_failure(
            column,
            Type::Blob,
            format!("tx hash must be 32 bytes, got {}", bytes.len()),
        ));
    }
    Ok(B256::from_slice(bytes))
}

fn conversion_failure(column: usize, ty: Type, reason: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, ty, reason.into())
}

fn to_unix_ms(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(i64::MAX)
}

fn from_unix_ms(ms: i64) -> SystemTime {
    let clamped_ms = ms.max(0) as u64;
    UNIX_EPOCH + Duration::from_millis(clamped_ms)
}

fn now_unix_ms() -> i64 {
    to_unix_ms(SystemTime::now())
}

fn u64_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn i64_to_u64(value: i64) -> u64 {
    value.max(0) as u64
}
