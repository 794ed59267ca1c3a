//! Wire framing: 12-byte zero-padded ASCII command, 4-byte LE payload
//! length, 4-byte LE auth-token length, payload, auth-token.
//!
//! Grounded on `original_source/node/nodeserver.go`'s `readRequest`
//! (fixed-width command prefix followed by a gob-encoded payload) and
//! `labs/22-chat-server`'s length-prefixed framing idea, generalized to the
//! extra auth-token field spec.md §4.7/§6 calls for.

use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const COMMAND_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("unrecognized command on the wire")]
    UnknownCommand,
    #[error("payload or auth-token length exceeds the allowed frame size")]
    FrameTooLarge,
    #[error("command requires an auth token and none (or a mismatched one) was supplied")]
    Unauthorized,
    #[error("peer returned an error: {0}")]
    Remote(String),
}

/// Frames larger than this are rejected outright; a misbehaving or
/// corrupt peer should not be able to make us allocate an unbounded buffer.
const MAX_FRAME_BYTES: u32 = 32 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Version,
    Addr,
    Inv,
    GetData,
    GetBlocks,
    GetBlocksUp,
    Block,
    Tx,
    GetFirstBlocks,
    GetUnspent,
    GetHistory,
    TxRequest,
    TxFull,
    GetNodes,
    AddNode,
    RemoveNode,
}

impl Command {
    fn as_str(self) -> &'static str {
        match self {
            Command::Version => "version",
            Command::Addr => "addr",
            Command::Inv => "inv",
            Command::GetData => "getdata",
            Command::GetBlocks => "getblocks",
            Command::GetBlocksUp => "getblocksup",
            Command::Block => "block",
            Command::Tx => "tx",
            Command::GetFirstBlocks => "getfblocks",
            Command::GetUnspent => "getunspent",
            Command::GetHistory => "gethistory",
            Command::TxRequest => "txrequest",
            Command::TxFull => "txfull",
            Command::GetNodes => "getnodes",
            Command::AddNode => "addnode",
            Command::RemoveNode => "removenode",
        }
    }

    /// Commands that must carry a matching auth token (§4.11, the resolved
    /// Open Question: only the peer-list-mutation handlers are privileged).
    pub fn requires_auth(self) -> bool {
        matches!(self, Command::GetNodes | Command::AddNode | Command::RemoveNode)
    }

    fn from_str(s: &str) -> Option<Command> {
        Some(match s {
            "version" => Command::Version,
            "addr" => Command::Addr,
            "inv" => Command::Inv,
            "getdata" => Command::GetData,
            "getblocks" => Command::GetBlocks,
            "getblocksup" => Command::GetBlocksUp,
            "block" => Command::Block,
            "tx" => Command::Tx,
            "getfblocks" => Command::GetFirstBlocks,
            "getunspent" => Command::GetUnspent,
            "gethistory" => Command::GetHistory,
            "txrequest" => Command::TxRequest,
            "txfull" => Command::TxFull,
            "getnodes" => Command::GetNodes,
            "addnode" => Command::AddNode,
            "removenode" => Command::RemoveNode,
            _ => return None,
        })
    }

    fn to_bytes(self) -> [u8; COMMAND_LEN] {
        let mut buf = [0u8; COMMAND_LEN];
        let s = self.as_str().as_bytes();
        buf[..s.len()].copy_from_slice(s);
        buf
    }

    fn from_bytes(buf: &[u8; COMMAND_LEN]) -> Option<Command> {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(COMMAND_LEN);
        std::str::from_utf8(&buf[..end]).ok().and_then(Command::from_str)
    }
}

/// One parsed request frame, command plus raw bincode-encoded payload.
pub struct Frame {
    pub command: Command,
    pub payload: Vec<u8>,
    pub auth_token: Vec<u8>,
}

impl Frame {
    pub fn new(command: Command, payload: Vec<u8>) -> Self {
        Frame { command, payload, auth_token: Vec::new() }
    }

    pub fn with_auth(mut self, token: &str) -> Self {
        self.auth_token = token.as_bytes().to_vec();
        self
    }
}

pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, frame: &Frame) -> Result<(), ProtocolError> {
    w.write_all(&frame.command.to_bytes()).await?;
    w.write_all(&(frame.payload.len() as u32).to_le_bytes()).await?;
    w.write_all(&(frame.auth_token.len() as u32).to_le_bytes()).await?;
    w.write_all(&frame.payload).await?;
    w.write_all(&frame.auth_token).await?;
    w.flush().await?;
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Frame, ProtocolError> {
    let mut cmd_buf = [0u8; COMMAND_LEN];
    r.read_exact(&mut cmd_buf).await?;
    let command = Command::from_bytes(&cmd_buf).ok_or(ProtocolError::UnknownCommand)?;

    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await?;
    let payload_len = u32::from_le_bytes(len_buf);

    let mut auth_len_buf = [0u8; 4];
    r.read_exact(&mut auth_len_buf).await?;
    let auth_len = u32::from_le_bytes(auth_len_buf);

    if payload_len > MAX_FRAME_BYTES || auth_len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge);
    }

    let mut payload = vec![0u8; payload_len as usize];
    r.read_exact(&mut payload).await?;

    let mut auth_token = vec![0u8; auth_len as usize];
    r.read_exact(&mut auth_token).await?;

    Ok(Frame { command, payload, auth_token })
}

/// Status-byte-prefixed response: `0x01` + payload, or `0x00` + the error
/// message encoded as a bincode `String` (spec.md §6).
pub async fn write_ok<W: AsyncWrite + Unpin>(w: &mut W, payload: &[u8]) -> Result<(), ProtocolError> {
    w.write_all(&[0x01]).await?;
    w.write_all(payload).await?;
    w.flush().await?;
    Ok(())
}

pub async fn write_err<W: AsyncWrite + Unpin>(w: &mut W, message: &str) -> Result<(), ProtocolError> {
    let encoded = bincode::serialize(&message.to_string())?;
    w.write_all(&[0x00]).await?;
    w.write_all(&(encoded.len() as u32).to_le_bytes()).await?;
    w.write_all(&encoded).await?;
    w.flush().await?;
    Ok(())
}

/// Reads one status-byte-prefixed response. On `0x00`, reads the 4-byte
/// length-prefixed encoded error message and returns `Err`.
pub async fn read_response<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut status = [0u8; 1];
    r.read_exact(&mut status).await?;
    if status[0] == 0x01 {
        let mut rest = Vec::new();
        r.read_to_end(&mut rest).await?;
        Ok(rest)
    } else {
        let mut len_buf = [0u8; 4];
        r.read_exact(&mut len_buf).await?;
        let len = u32::from_le_bytes(len_buf);
        if len > MAX_FRAME_BYTES {
            return Err(ProtocolError::FrameTooLarge);
        }
        let mut buf = vec![0u8; len as usize];
        r.read_exact(&mut buf).await?;
        let message: String = bincode::deserialize(&buf)?;
        Err(ProtocolError::Remote(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_round_trips_through_a_buffer() {
        let frame = Frame::new(Command::Version, vec![1, 2, 3]).with_auth("tok");
        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let parsed = read_frame(&mut cursor).await.unwrap();
        assert_eq!(parsed.command, Command::Version);
        assert_eq!(parsed.payload, vec![1, 2, 3]);
        assert_eq!(parsed.auth_token, b"tok".to_vec());
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let mut buf = vec![b'b', b'o', b'g', b'u', b's'];
        buf.extend_from_slice(&[0u8; COMMAND_LEN - 5]);
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());

        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownCommand));
    }

    #[tokio::test]
    async fn error_response_round_trips() {
        let mut buf = Vec::new();
        write_err(&mut buf, "boom").await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_response(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Remote(m) if m == "boom"));
    }

    #[test]
    fn only_nodes_list_commands_require_auth() {
        assert!(Command::AddNode.requires_auth());
        assert!(Command::RemoveNode.requires_auth());
        assert!(Command::GetNodes.requires_auth());
        assert!(!Command::Block.requires_auth());
        assert!(!Command::TxFull.requires_auth());
    }
}
