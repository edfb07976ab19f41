// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_sol_types::SolValue;
use app_core::msg::Msg;
use rusqlite::{Connection, OptionalExtension, Result, Row, Transaction, params};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::inclusion_lane::IncludedTx;

const SQL_SELECT_OPEN_BLOCK_WITH_TX_COUNT: &str =
    include_str!("queries/select_open_block_with_tx_count.sql");
const SQL_SELECT_TXS_FROM_SEQ: &str = include_str!("queries/select_txs_from_seq.sql");
const SQL_SELECT_SEALED_TXS_FOR_BLOCK: &str =
    include_str!("queries/select_sealed_txs_for_block.sql");
const SQL_SELECT_SEALED_TX_BY_HASH: &str = include_str!("queries/select_sealed_tx_by_hash.sql");
const SQL_SELECT_SEALED_SEQUENCER_MSGS_FOR_DESTINATION: &str =
    include_str!("queries/select_sealed_sequencer_msgs_for_destination.sql");
const SQL_SELECT_SEALED_SEQUENCER_MSGS_FOR_BLOCK: &str =
    include_str!("queries/select_sealed_sequencer_msgs_for_block.sql");
const SQL_INSERT_TX: &str = include_str!("queries/insert_tx.sql");
const SQL_INSERT_SEQUENCER_MSG: &str = "INSERT INTO sequencer_msgs (tx_seq, msg_index, destination, data, from_address) VALUES (?1, ?2, ?3, ?4, ?5)";
const SQL_SELECT_GENESIS: &str =
    "SELECT chain_id, genesis_json FROM genesis WHERE singleton_id = 0 LIMIT 1";
const SQL_INSERT_GENESIS: &str =
    "INSERT INTO genesis (singleton_id, chain_id, genesis_json) VALUES (0, ?1, ?2)";
const SQL_INSERT_OPEN_BLOCK: &str =
    "INSERT INTO blocks (height, created_at_ms, sealed_at_ms) VALUES (?1, ?2, NULL)";
const SQL_SEAL_BLOCK: &str =
    "UPDATE blocks SET sealed_at_ms = ?2 WHERE height = ?1 AND sealed_at_ms IS NULL";
const SQL_SELECT_NEXT_SEQ: &str = "SELECT COALESCE(MAX(seq) + 1, 0) FROM txs";
const SQL_SELECT_LATEST_SEALED_HEIGHT: &str =
    "SELECT COALESCE(MAX(height), 0) FROM blocks WHERE sealed_at_ms IS NOT NULL";
const SQL_SELECT_SEALED_BLOCK: &str =
    "SELECT created_at_ms, sealed_at_ms FROM blocks WHERE height = ?1 AND sealed_at_ms IS NOT NULL";

#[derive(Debug, Clone)]
pub(super) struct TxRow {
    pub seq: i64,
    pub height: i64,
    pub pos_in_block: i64,
    pub tx_hash: Vec<u8>,
    pub tx_abi: Vec<u8>,
    pub declared_chain_id: String,
    pub routed_to: Option<String>,
    pub code: i64,
    pub log: String,
    pub gas_wanted: i64,
    pub gas_used: i64,
}

#[derive(Debug, Clone)]
pub(super) struct SequencerMsgRow {
    pub height: i64,
    pub tx_seq: i64,
    pub tx_hash: Vec<u8>,
    pub msg_index: i64,
    pub destination: Vec<u8>,
    pub data: Vec<u8>,
    pub from_address: String,
}

pub(super) fn sql_select_genesis(conn: &Connection) -> Result<Option<(String, String)>> {
    conn.query_row(SQL_SELECT_GENESIS, [], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()
}

pub(super) fn sql_insert_genesis(
    tx: &Transaction<'_>,
    chain_id: &str,
    genesis_json: &str,
) -> Result<usize> {
    tx.execute(SQL_INSERT_GENESIS, params![chain_id, genesis_json])
}

pub(super) fn sql_insert_open_block(
    tx: &Transaction<'_>,
    height: i64,
    created_at_ms: i64,
) -> Result<usize> {
    tx.execute(SQL_INSERT_OPEN_BLOCK, params![height, created_at_ms])
}

pub(super) fn sql_seal_block(tx: &Transaction<'_>, height: i64, sealed_at_ms: i64) -> Result<usize> {
    tx.execute(SQL_SEAL_BLOCK, params![height, sealed_at_ms])
}

pub(super) fn sql_select_open_block_with_tx_count(
    conn: &Connection,
) -> Result<Option<(i64, i64, i64)>> {
    conn.query_row(
        SQL_SELECT_OPEN_BLOCK_WITH_TX_COUNT,
        [],
        convert_row_to_open_block,
    )
    .optional()
}

pub(super) fn sql_select_next_seq(conn: &Connection) -> Result<i64> {
    conn.query_row(SQL_SELECT_NEXT_SEQ, [], |row| row.get(0))
}

pub(super) fn sql_select_latest_sealed_height(conn: &Connection) -> Result<i64> {
    conn.query_row(SQL_SELECT_LATEST_SEALED_HEIGHT, [], |row| row.get(0))
}

pub(super) fn sql_select_sealed_block(conn: &Connection, height: i64) -> Result<Option<(i64, i64)>> {
    conn.query_row(SQL_SELECT_SEALED_BLOCK, params![height], |row| {
        Ok((row.get(0)?, row.get(1)?))
    })
    .optional()
}

/// Inserts `txs` at consecutive positions of block `height`, indexing the sequencer
/// messages of successful transactions for destination-chain readers.
pub(super) fn sql_insert_txs_batch(
    tx: &Transaction<'_>,
    height: i64,
    pos_start: i64,
    seq_start: i64,
    txs: &[IncludedTx],
) -> Result<()> {
    if txs.is_empty() {
        return Ok(());
    }

    let mut insert_tx = tx.prepare_cached(SQL_INSERT_TX)?;
    let mut insert_msg = tx.prepare_cached(SQL_INSERT_SEQUENCER_MSG)?;
    for (offset, item) in txs.iter().enumerate() {
        let offset = offset as i64;
        let seq = seq_start.saturating_add(offset);
        let delivered = &item.delivered;
        insert_tx.execute(params![
            seq,
            height,
            pos_start.saturating_add(offset),
            delivered.hash.as_slice(),
            SolValue::abi_encode(&delivered.tx),
            delivered.declared_chain_id.as_str(),
            delivered.route.destination(),
            i64::from(delivered.result.code.as_u32()),
            delivered.result.log.as_str(),
            u64_to_i64(delivered.result.gas_wanted),
            u64_to_i64(delivered.result.gas_used),
            to_unix_ms(item.received_at),
        ])?;

        if !delivered.result.code.is_ok() {
            continue;
        }
        for (msg_index, msg) in delivered.msgs.iter().enumerate() {
            if let Msg::Sequencer(seq_msg) = msg {
                insert_msg.execute(params![
                    seq,
                    msg_index as i64,
                    &seq_msg.chain_id[..],
                    &seq_msg.data[..],
                    seq_msg.from_address.as_str(),
                ])?;
            }
        }
    }
    Ok(())
}

pub(super) fn sql_select_txs_from_seq(conn: &Connection, seq: i64) -> Result<Vec<TxRow>> {
    let mut stmt = conn.prepare_cached(SQL_SELECT_TXS_FROM_SEQ)?;
    let mapped = stmt.query_map(params![seq], convert_row_to_tx_row)?;
    mapped.collect()
}

pub(super) fn sql_select_sealed_txs_for_block(conn: &Connection, height: i64) -> Result<Vec<TxRow>> {
    let mut stmt = conn.prepare_cached(SQL_SELECT_SEALED_TXS_FOR_BLOCK)?;
    let mapped = stmt.query_map(params![height], convert_row_to_tx_row)?;
    mapped.collect()
}

pub(super) fn sql_select_sealed_tx_by_hash(conn: &Connection, hash: &[u8]) -> Result<Option<TxRow>> {
    conn.query_row(SQL_SELECT_SEALED_TX_BY_HASH, params![hash], convert_row_to_tx_row)
        .optional()
}

pub(super) fn sql_select_sealed_sequencer_msgs_for_destination(
    conn: &Connection,
    destination: &[u8],
    from_height: i64,
    to_height_exclusive: i64,
    limit: i64,
) -> Result<Vec<SequencerMsgRow>> {
    let mut stmt = conn.prepare_cached(SQL_SELECT_SEALED_SEQUENCER_MSGS_FOR_DESTINATION)?;
    let mapped = stmt.query_map(
        params![destination, from_height, to_height_exclusive, limit],
        convert_row_to_sequencer_msg_row,
    )?;
    mapped.collect()
}

pub(super) fn sql_select_sealed_sequencer_msgs_for_block(
    conn: &Connection,
    height: i64,
) -> Result<Vec<SequencerMsgRow>> {
    let mut stmt = conn.prepare_cached(SQL_SELECT_SEALED_SEQUENCER_MSGS_FOR_BLOCK)?;
    let mapped = stmt.query_map(params![height], convert_row_to_sequencer_msg_row)?;
    mapped.collect()
}

fn convert_row_to_open_block(row: &Row<'_>) -> Result<(i64, i64, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn convert_row_to_tx_row(row: &Row<'_>) -> Result<TxRow> {
    Ok(TxRow {
        seq: row.get(0)?,
        height: row.get(1)?,
        pos_in_block: row.get(2)?,
        tx_hash: row.get(3)?,
        tx_abi: row.get(4)?,
        declared_chain_id: row.get(5)?,
        routed_to: row.get(6)?,
        code: row.get(7)?,
        log: row.get(8)?,
        gas_wanted: row.get(9)?,
        gas_used: row.get(10)?,
    })
}

fn convert_row_to_sequencer_msg_row(row: &Row<'_>) -> Result<SequencerMsgRow> {
    Ok(SequencerMsgRow {
        height: row.get(0)?,
        tx_seq: row.get(1)?,
        tx_hash: row.get(2)?,
        msg_index: row.get(3)?,
        destination: row.get(4)?,
        data: row.get(5)?,
        from_address: row.get(6)?,
    })
}

fn to_unix_ms(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(i64::MAX)
}

fn u64_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::{
        SQL_INSERT_SEQUENCER_MSG, sql_insert_genesis, sql_insert_open_block,
        sql_select_genesis, sql_select_latest_sealed_height, sql_select_next_seq,
        sql_select_open_block_with_tx_count, sql_select_sealed_sequencer_msgs_for_destination,
        sql_seal_block,
    };
    use crate::storage::db::Storage;
    use rusqlite::{Connection, params};

    fn setup_conn() -> Connection {
        let mut conn = Connection::open_in_memory().expect("open in-memory sqlite");
        Storage::run_migrations(&mut conn).expect("run migrations");
        conn
    }

    fn insert_raw_tx(conn: &Connection, seq: i64, height: i64, pos: i64) {
        conn.execute(
            super::SQL_INSERT_TX,
            params![
                seq,
                height,
                pos,
                vec![seq as u8; 32],
                vec![0_u8; 4],
                "metro|taco",
                "taco",
                0_i64,
                "",
                100_i64,
                50_i64,
                0_i64
            ],
        )
        .expect("insert tx");
    }

    #[test]
    fn empty_database_has_no_genesis_and_no_blocks() {
        let conn = setup_conn();
        assert_eq!(sql_select_genesis(&conn).expect("select genesis"), None);
        assert_eq!(
            sql_select_open_block_with_tx_count(&conn).expect("open block"),
            None
        );
        assert_eq!(sql_select_next_seq(&conn).expect("next seq"), 0);
        assert_eq!(
            sql_select_latest_sealed_height(&conn).expect("latest sealed"),
            0
        );
    }

    #[test]
    fn sealing_moves_the_open_block_and_latest_height() {
        let mut conn = setup_conn();
        let tx = conn.transaction().expect("start tx");
        sql_insert_genesis(&tx, "metro", "{}").expect("insert genesis");
        sql_insert_open_block(&tx, 1, 10).expect("insert block 1");
        tx.commit().expect("commit");

        insert_raw_tx(&conn, 0, 1, 0);
        assert_eq!(
            sql_select_open_block_with_tx_count(&conn).expect("open block"),
            Some((1, 10, 1))
        );

        let tx = conn.transaction().expect("start tx");
        assert_eq!(sql_seal_block(&tx, 1, 20).expect("seal"), 1);
        assert_eq!(sql_seal_block(&tx, 1, 30).expect("seal twice"), 0);
        sql_insert_open_block(&tx, 2, 20).expect("insert block 2");
        tx.commit().expect("commit");

        assert_eq!(
            sql_select_open_block_with_tx_count(&conn).expect("open block"),
            Some((2, 20, 0))
        );
        assert_eq!(
            sql_select_latest_sealed_height(&conn).expect("latest sealed"),
            1
        );
        assert_eq!(sql_select_next_seq(&conn).expect("next seq"), 1);
    }

    #[test]
    fn destination_query_skips_open_blocks_and_other_destinations() {
        let mut conn = setup_conn();
        let tx = conn.transaction().expect("start tx");
        sql_insert_open_block(&tx, 1, 0).expect("insert block 1");
        tx.commit().expect("commit");
        insert_raw_tx(&conn, 0, 1, 0);
        conn.execute(
            SQL_INSERT_SEQUENCER_MSG,
            params![0_i64, 0_i64, b"taco".to_vec(), vec![0x01_u8], "0xabc"],
        )
        .expect("insert taco msg");
        conn.execute(
            SQL_INSERT_SEQUENCER_MSG,
            params![0_i64, 1_i64, b"burrito".to_vec(), vec![0x02_u8], "0xabc"],
        )
        .expect("insert burrito msg");

        let open = sql_select_sealed_sequencer_msgs_for_destination(&conn, b"taco", 0, i64::MAX, 10)
            .expect("query open");
        assert!(open.is_empty());

        let tx = conn.transaction().expect("start tx");
        sql_seal_block(&tx, 1, 5).expect("seal");
        tx.commit().expect("commit");

        let rows = sql_select_sealed_sequencer_msgs_for_destination(&conn, b"taco", 0, i64::MAX, 10)
            .expect("query sealed");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data, vec![0x01]);
        assert_eq!(rows[0].height, 1);
    }
}
