//! Payload types for each gossip command (spec.md §4.7's table), encoded
//! with `bincode` — the same canonical encoding the store and wire framing
//! already use.

use demo_node_types::{Block, Hash32, Transaction};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionPayload {
    pub addr_from: String,
    pub best_height: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddrPayload {
    pub addresses: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvType {
    Block,
    Tx,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvPayload {
    pub item_type: InvType,
    pub items: Vec<Hash32>,
    pub addr_from: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetDataPayload {
    pub item_type: InvType,
    pub id: Hash32,
    pub addr_from: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetBlocksPayload {
    pub start_from: Hash32,
    pub addr_from: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockPayload {
    pub block: Block,
    pub addr_from: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxPayload {
    pub transaction: Transaction,
    pub addr_from: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetUnspentPayload {
    pub address: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnspentOutputPayload {
    pub tx_id: Hash32,
    pub out_index: u32,
    pub value: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnspentResponsePayload {
    pub outputs: Vec<UnspentOutputPayload>,
    pub balance: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetHistoryPayload {
    pub address: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryRecordPayload {
    pub tx_id: Hash32,
    pub amount: f64,
    pub incoming: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryResponsePayload {
    pub records: Vec<HistoryRecordPayload>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxRequestPayload {
    pub pubkey: Vec<u8>,
    pub to: String,
    pub amount: f64,
}

/// One input of the unsigned transaction the node hands back, paired with
/// the digest the wallet must sign over it (the referenced output's
/// `pubkey_hash` already resolved server-side — see `demo-node-types`'s
/// `Transaction::sign_hash`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignDataEntry {
    pub input_index: usize,
    pub digest: Hash32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxRequestResponsePayload {
    pub transaction: Transaction,
    pub sign_data: Vec<SignDataEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxFullPayload {
    pub transaction: Transaction,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxFullResponsePayload {
    pub tx_id: Hash32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetFirstBlocksResponsePayload {
    pub blocks: Vec<Block>,
    pub height: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeListResponsePayload {
    pub nodes: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeAddrPayload {
    pub address: String,
}
