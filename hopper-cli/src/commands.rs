use anyhow::{Context, Result};
use ethers::types::{Address, U256};
use hopper_client::{
    DepositEvent, DepositRequest, MixerClient, MixerConfig, MixerLedger, Secret, WithdrawalEvent,
    WithdrawalRequest,
};
use rand::rngs::OsRng;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

fn parse_secret(raw: &str) -> Result<Secret> {
    Secret::parse(raw).context("invalid secret")
}

fn word_hex(value: U256) -> String {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    format!("0x{}", hex::encode(bytes))
}

/// Shutdown signal flipped by Ctrl-C.
fn ctrl_c_shutdown() -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, abandoning funding watch");
            let _ = shutdown_tx.send(true);
        }
    });
    shutdown_rx
}

pub fn new_secret() -> Result<()> {
    let secret = Secret::random(&mut OsRng);
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "secret": secret.to_decimal(),
            "secret_hex": word_hex(secret.expose()),
        }))?
    );
    Ok(())
}

pub async fn deposit(
    config: MixerConfig,
    secret: &str,
    recipient: Address,
    funder: Address,
    from_block: Option<u64>,
) -> Result<()> {
    let secret = parse_secret(secret)?;
    let from_block = from_block.unwrap_or(config.start_block);
    let client = MixerClient::connect(config)?;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let reporter = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                DepositEvent::Submitted(Ok(tx_hash)) => info!("Commit submitted: {:?}", tx_hash),
                DepositEvent::Submitted(Err(e)) => error!("Commit not submitted: {}", e),
                DepositEvent::Mined(Ok(receipt)) => {
                    info!("Commit mined in block {:?}", receipt.block_number)
                }
                DepositEvent::Mined(Err(e)) => error!("Commit failed on ledger: {}", e),
                DepositEvent::Funded(Ok(event)) => {
                    info!("Funded at block {} index {}", event.block_number, event.leaf_index)
                }
                DepositEvent::Funded(Err(e)) => error!("Funding not observed: {}", e),
            }
        }
    });

    let request = DepositRequest {
        secret,
        recipient,
        funder,
        from_block,
    };
    let mut coordinator = client.deposit(request).with_events(events_tx);
    let outcome = coordinator.run(ctrl_c_shutdown()).await;
    drop(coordinator);
    let _ = reporter.await;

    let funded = outcome.context("deposit failed")?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "block_number": funded.block_number,
            "leaf_index": funded.leaf_index,
        }))?
    );
    Ok(())
}

pub async fn watch(
    config: MixerConfig,
    secret: &str,
    recipient: Address,
    from_block: Option<u64>,
) -> Result<()> {
    let secret = parse_secret(secret)?;
    let from_block = from_block.unwrap_or(config.start_block);
    let poll_interval = config.poll_interval();
    let client = MixerClient::connect(config)?;

    let leaf = client.codec().leaf_hash(&secret, recipient).await?;
    let funded = client
        .watcher()
        .watch(leaf, from_block, poll_interval, ctrl_c_shutdown())
        .await
        .context("funding watch failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "leaf": word_hex(leaf.value()),
            "block_number": funded.block_number,
            "leaf_index": funded.leaf_index,
        }))?
    );
    Ok(())
}

pub async fn withdraw(
    config: MixerConfig,
    secret: &str,
    recipient: Address,
    leaf_index: u64,
) -> Result<()> {
    let secret = parse_secret(secret)?;
    let client = MixerClient::connect(config)?;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let reporter = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                WithdrawalEvent::ProofComputed(_) => info!("Proof computed"),
                WithdrawalEvent::Submitted(Ok(tx_hash)) => {
                    info!("Withdrawal submitted: {:?}", tx_hash)
                }
                WithdrawalEvent::Submitted(Err(e)) => error!("Withdrawal not submitted: {}", e),
                WithdrawalEvent::Mined(Ok(receipt)) => {
                    info!("Withdrawal mined in block {:?}", receipt.block_number)
                }
                WithdrawalEvent::Mined(Err(e)) => error!("Withdrawal failed on ledger: {}", e),
            }
        }
    });

    let request = WithdrawalRequest {
        secret,
        recipient,
        leaf_index,
    };
    let mut coordinator = client.withdrawal(request)?.with_events(events_tx);
    let outcome = coordinator.run().await;
    drop(coordinator);
    let _ = reporter.await;

    let receipt = outcome.context("withdrawal failed")?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "tx_hash": format!("{:?}", receipt.transaction_hash),
            "block_number": receipt.block_number.map(|block| block.as_u64()),
        }))?
    );
    Ok(())
}

pub async fn status(config: MixerConfig, secret: Option<&str>) -> Result<()> {
    let client = MixerClient::connect(config)?;
    let reader = client.reader();

    let block_number = client.ledger().block_number().await?;
    let depth = reader.tree_depth().await?;
    let root = reader.current_root().await?;

    let mut report = json!({
        "mixer": format!("{:?}", client.ledger().mixer_address()),
        "block_number": block_number,
        "tree_depth": depth,
        "root": word_hex(root.value()),
    });

    if let Some(raw) = secret {
        let secret = parse_secret(raw)?;
        let nullifier = client.codec().nullifier_hash(&secret).await?;
        report["nullifier"] = json!(word_hex(nullifier.value()));
        report["spent"] = json!(reader.is_nullifier_spent(&nullifier).await?);
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
