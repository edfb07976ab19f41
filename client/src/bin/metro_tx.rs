// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::error::Error;
use std::time::Duration;

use alloy_primitives::{U256, hex};
use app_core::address::parse_address;
use app_core::consts::native_coin;
use app_core::keys::Keyring;
use app_core::msg::{Msg, MsgSend, SequencerMsg};
use clap::{Args, Parser, Subcommand};
use metro_client::{
    NodeClient, Signer, TxBroadcaster, set_fee_amount, set_gas_adjustment, set_gas_limit,
    set_memo, set_timeout_height,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_NODE_URL: &str = "http://127.0.0.1:26657";

#[derive(Parser)]
#[command(name = "metro-tx", about = "Build, sign and submit metro transactions")]
struct Cli {
    #[arg(long, env = "METRO_NODE_URL", default_value = DEFAULT_NODE_URL)]
    node: String,

    /// Base-chain identifier the transaction authenticates against.
    #[arg(long, env = "METRO_CHAIN_ID", default_value = "metro")]
    chain_id: String,

    /// Key name; derived deterministically unless `--secret-hex` is given.
    #[arg(long, env = "METRO_KEY", default_value = "validator")]
    key: String,

    #[arg(long, env = "METRO_KEY_HEX", hide_env_values = true)]
    secret_hex: Option<String>,

    #[command(flatten)]
    envelope: EnvelopeArgs,

    /// Wait until the transaction's block is sealed.
    #[arg(long)]
    wait: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct EnvelopeArgs {
    #[arg(long)]
    fee: Option<u64>,
    #[arg(long)]
    gas_limit: Option<u64>,
    #[arg(long)]
    gas_adjustment: Option<f64>,
    #[arg(long)]
    memo: Option<String>,
    #[arg(long)]
    timeout_height: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Sequence an opaque payload for a destination chain.
    Post {
        #[arg(long)]
        destination: String,
        /// Payload; decoded as hex when `--hex` is set.
        #[arg(long)]
        data: String,
        #[arg(long)]
        hex: bool,
    },
    /// Transfer native coins; with `--destination` the transfer is only ordered.
    Send {
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u128,
        #[arg(long, default_value = "")]
        destination: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut keyring = Keyring::default();
    let from = match cli.secret_hex.as_deref() {
        Some(secret) => keyring.import_hex(&cli.key, secret)?,
        None => keyring.derive(&cli.key)?,
    };
    let client = NodeClient::new(cli.node.clone())?;

    let (destination, msg): (&str, Msg) = match &cli.command {
        Command::Post {
            destination,
            data,
            hex: is_hex,
        } => {
            let payload = if *is_hex {
                hex::decode(data)?
            } else {
                data.as_bytes().to_vec()
            };
            let msg = SequencerMsg::new(destination.as_bytes().to_vec(), payload, from);
            (destination.as_str(), msg.into())
        }
        Command::Send {
            to,
            amount,
            destination,
        } => {
            let to = parse_address(to)?;
            let msg = MsgSend::new(from, to, vec![native_coin(U256::from(*amount))]);
            (destination.as_str(), msg.into())
        }
    };

    let mut signer = Signer::new(keyring, &cli.key, &cli.chain_id, destination, client.clone())?;
    let mut options = Vec::new();
    if let Some(fee) = cli.envelope.fee {
        options.push(set_fee_amount(vec![native_coin(U256::from(fee))]));
    }
    if let Some(gas_limit) = cli.envelope.gas_limit {
        options.push(set_gas_limit(gas_limit));
    }
    if let Some(adjustment) = cli.envelope.gas_adjustment {
        options.push(set_gas_adjustment(adjustment));
    }
    if let Some(memo) = cli.envelope.memo.clone() {
        options.push(set_memo(memo));
    }
    if let Some(height) = cli.envelope.timeout_height {
        options.push(set_timeout_height(height));
    }
    let builder = signer.new_tx_builder(options);

    let routed = !destination.is_empty();
    let tx = signer.build_signed_tx(&builder, routed, vec![msg]).await?;
    let receipt = client.broadcast_tx(&tx).await?;
    tracing::info!(
        tx_hash = %receipt.hash,
        height = receipt.height,
        code = receipt.code.as_u32(),
        routed_to = receipt.routed_to.as_deref().unwrap_or_default(),
        "tx included"
    );

    if cli.wait {
        let committed = client
            .wait_for_tx(receipt.hash, Duration::from_secs(30))
            .await?;
        tracing::info!(height = committed.height, seq = committed.seq, "block sealed");
    }
    println!("{}", receipt.hash);
    Ok(())
}
