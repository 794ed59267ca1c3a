//! Wallet-facing commands that talk to a running node over the gossip wire:
//! `send`, `getbalance`, `addrhistory`, `showunspent`, `shownodes`,
//! `addnode`, `removenode`.
//!
//! Grounded on `original_source/lib/nodeclient/nodeclient.go`'s thin
//! CLI-to-node wrappers, which resolve a transaction request server-side
//! (`txrequest`) and submit the signed result (`txfull`) rather than having
//! the CLI reconstruct UTXO selection itself.

use crate::error::NodeResult;
use demo_node_crypto::KeyPair;

pub async fn send(
    nodehost: &str,
    nodeport: u16,
    from: &str,
    from_privkey_hex: &str,
    to: &str,
    amount: f64,
) -> NodeResult<()> {
    let addr = format!("{nodehost}:{nodeport}");
    let key_bytes = hex::decode(from_privkey_hex).map_err(|_| invalid_input("private key must be hex"))?;
    let keypair = KeyPair::from_bytes(&key_bytes)?;
    if keypair.address() != from {
        return Err(invalid_input("private key does not belong to -from address"));
    }

    let response = demo_node_net::client::request_tx(&addr, keypair.public_key_bytes(), to.to_string(), amount).await?;
    let mut transaction = response.transaction;
    for entry in response.sign_data {
        transaction.vin[entry.input_index].signature = keypair.sign_digest(&entry.digest);
    }
    transaction.id = transaction.compute_id();

    let tx_id = demo_node_net::client::submit_tx_full(&addr, transaction).await?;
    println!("submitted transaction {}", hex::encode(tx_id));
    Ok(())
}

pub async fn get_balance(nodehost: &str, nodeport: u16, address: &str) -> NodeResult<()> {
    let addr = format!("{nodehost}:{nodeport}");
    let response = demo_node_net::client::request_unspent(&addr, address.to_string()).await?;
    println!("balance: {}", response.balance);
    Ok(())
}

pub async fn show_unspent(nodehost: &str, nodeport: u16, address: &str) -> NodeResult<()> {
    let addr = format!("{nodehost}:{nodeport}");
    let response = demo_node_net::client::request_unspent(&addr, address.to_string()).await?;
    for out in response.outputs {
        println!("{} : output {} : {}", hex::encode(out.tx_id), out.out_index, out.value);
    }
    println!("balance: {}", response.balance);
    Ok(())
}

pub async fn addr_history(nodehost: &str, nodeport: u16, address: &str) -> NodeResult<()> {
    let addr = format!("{nodehost}:{nodeport}");
    let response = demo_node_net::client::request_history(&addr, address.to_string()).await?;
    for record in response.records {
        let direction = if record.incoming { "+" } else { "-" };
        println!("{} {}{}", hex::encode(record.tx_id), direction, record.amount);
    }
    Ok(())
}

pub async fn show_nodes(nodehost: &str, nodeport: u16, token: &str) -> NodeResult<()> {
    let addr = format!("{nodehost}:{nodeport}");
    let response = demo_node_net::client::request_nodes(&addr, token).await?;
    for node in response.nodes {
        println!("{node}");
    }
    Ok(())
}

pub async fn add_node(nodehost: &str, nodeport: u16, token: &str, node: &str) -> NodeResult<()> {
    let addr = format!("{nodehost}:{nodeport}");
    demo_node_net::client::add_node(&addr, token, node.to_string()).await?;
    println!("added {node}");
    Ok(())
}

pub async fn remove_node(nodehost: &str, nodeport: u16, token: &str, node: &str) -> NodeResult<()> {
    let addr = format!("{nodehost}:{nodeport}");
    demo_node_net::client::remove_node(&addr, token, node.to_string()).await?;
    println!("removed {node}");
    Ok(())
}

fn invalid_input(message: &'static str) -> crate::error::NodeError {
    crate::error::NodeError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, message))
}
