//! Outbound gossip connections: one short-lived TCP connection per command,
//! exactly as the wire protocol is connection-per-request.
//!
//! Grounded on `original_source/lib/nodeclient/nodeclient.go`'s thin
//! per-command `Send*` wrappers (open a connection, write a frame, read a
//! status-prefixed response), generalized to `tokio::net::TcpStream`.

use crate::messages::*;
use crate::wire::{self, Command, Frame, ProtocolError};
use demo_node_types::{Block, Hash32, Transaction};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

const DIAL_TIMEOUT: Duration = Duration::from_secs(3);

async fn dial(addr: &str) -> Result<TcpStream, ProtocolError> {
    Ok(timeout(DIAL_TIMEOUT, TcpStream::connect(addr)).await.map_err(|_| {
        ProtocolError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))
    })??)
}

async fn roundtrip(addr: &str, frame: Frame) -> Result<Vec<u8>, ProtocolError> {
    let mut stream = dial(addr).await?;
    wire::write_frame(&mut stream, &frame).await?;
    wire::read_response(&mut stream).await
}

/// Fire-and-forget sends still do the one roundtrip the protocol requires,
/// but the caller discards the ack.
async fn fire(addr: &str, frame: Frame) -> Result<(), ProtocolError> {
    roundtrip(addr, frame).await.map(|_| ())
}

pub async fn send_version(addr: &str, self_addr: &str, best_height: u32) -> Result<(), ProtocolError> {
    let payload = VersionPayload { addr_from: self_addr.to_string(), best_height };
    fire(addr, Frame::new(Command::Version, bincode::serialize(&payload)?)).await
}

pub async fn send_addr(addr: &str, addresses: Vec<String>) -> Result<(), ProtocolError> {
    let payload = AddrPayload { addresses };
    fire(addr, Frame::new(Command::Addr, bincode::serialize(&payload)?)).await
}

pub async fn send_inv(
    addr: &str,
    item_type: InvType,
    items: Vec<Hash32>,
    self_addr: &str,
) -> Result<(), ProtocolError> {
    let payload = InvPayload { item_type, items, addr_from: self_addr.to_string() };
    fire(addr, Frame::new(Command::Inv, bincode::serialize(&payload)?)).await
}

pub async fn send_get_data(
    addr: &str,
    item_type: InvType,
    id: Hash32,
    self_addr: &str,
) -> Result<(), ProtocolError> {
    let payload = GetDataPayload { item_type, id, addr_from: self_addr.to_string() };
    fire(addr, Frame::new(Command::GetData, bincode::serialize(&payload)?)).await
}

pub async fn send_get_blocks(addr: &str, start_from: Hash32, self_addr: &str) -> Result<(), ProtocolError> {
    let payload = GetBlocksPayload { start_from, addr_from: self_addr.to_string() };
    fire(addr, Frame::new(Command::GetBlocks, bincode::serialize(&payload)?)).await
}

pub async fn send_get_blocks_up(addr: &str, start_from: Hash32, self_addr: &str) -> Result<(), ProtocolError> {
    let payload = GetBlocksPayload { start_from, addr_from: self_addr.to_string() };
    fire(addr, Frame::new(Command::GetBlocksUp, bincode::serialize(&payload)?)).await
}

pub async fn send_block(addr: &str, block: Block, self_addr: &str) -> Result<(), ProtocolError> {
    let payload = BlockPayload { block, addr_from: self_addr.to_string() };
    fire(addr, Frame::new(Command::Block, bincode::serialize(&payload)?)).await
}

pub async fn send_tx(addr: &str, transaction: Transaction, self_addr: &str) -> Result<(), ProtocolError> {
    let payload = TxPayload { transaction, addr_from: self_addr.to_string() };
    fire(addr, Frame::new(Command::Tx, bincode::serialize(&payload)?)).await
}

pub async fn request_first_blocks(addr: &str) -> Result<GetFirstBlocksResponsePayload, ProtocolError> {
    let raw = roundtrip(addr, Frame::new(Command::GetFirstBlocks, Vec::new())).await?;
    Ok(bincode::deserialize(&raw)?)
}

pub async fn request_unspent(addr: &str, address: String) -> Result<UnspentResponsePayload, ProtocolError> {
    let payload = GetUnspentPayload { address };
    let raw = roundtrip(addr, Frame::new(Command::GetUnspent, bincode::serialize(&payload)?)).await?;
    Ok(bincode::deserialize(&raw)?)
}

pub async fn request_history(addr: &str, address: String) -> Result<HistoryResponsePayload, ProtocolError> {
    let payload = GetHistoryPayload { address };
    let raw = roundtrip(addr, Frame::new(Command::GetHistory, bincode::serialize(&payload)?)).await?;
    Ok(bincode::deserialize(&raw)?)
}

pub async fn request_tx(
    addr: &str,
    pubkey: Vec<u8>,
    to: String,
    amount: f64,
) -> Result<TxRequestResponsePayload, ProtocolError> {
    let payload = TxRequestPayload { pubkey, to, amount };
    let raw = roundtrip(addr, Frame::new(Command::TxRequest, bincode::serialize(&payload)?)).await?;
    Ok(bincode::deserialize(&raw)?)
}

pub async fn submit_tx_full(addr: &str, transaction: Transaction) -> Result<Hash32, ProtocolError> {
    let payload = TxFullPayload { transaction };
    let raw = roundtrip(addr, Frame::new(Command::TxFull, bincode::serialize(&payload)?)).await?;
    let response: TxFullResponsePayload = bincode::deserialize(&raw)?;
    Ok(response.tx_id)
}

pub async fn request_nodes(addr: &str, auth_token: &str) -> Result<NodeListResponsePayload, ProtocolError> {
    let frame = Frame::new(Command::GetNodes, Vec::new()).with_auth(auth_token);
    let raw = roundtrip(addr, frame).await?;
    Ok(bincode::deserialize(&raw)?)
}

pub async fn add_node(addr: &str, auth_token: &str, new_node: String) -> Result<(), ProtocolError> {
    let payload = NodeAddrPayload { address: new_node };
    let frame = Frame::new(Command::AddNode, bincode::serialize(&payload)?).with_auth(auth_token);
    fire(addr, frame).await
}

pub async fn remove_node(addr: &str, auth_token: &str, node: String) -> Result<(), ProtocolError> {
    let payload = NodeAddrPayload { address: node };
    let frame = Frame::new(Command::RemoveNode, bincode::serialize(&payload)?).with_auth(auth_token);
    fire(addr, frame).await
}
