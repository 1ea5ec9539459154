//! Resolve a DID against a Bitcoin Core node.
//!
//! ```text
//! BTC1_RPC_URL=http://127.0.0.1:18443 cargo run --example read_did -- <did> [version-id]
//! ```

use anyhow::{Context as _, Result};
use did_btc1::blockchain::rpc::{RpcClient, RpcConfig};
use did_btc1::store::MemoryDocumentStore;
use did_btc1::{ResolutionOptions, resolve};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let did = args.next().unwrap_or_else(|| {
        "did:btc1:k1q20qwqdnuyt6wdvwncmnw6u3wndptwlp9dyq3syjc8y6k33ef98nx3ldyvk".to_string()
    });
    let version_id = args
        .next()
        .map(|version| version.parse())
        .transpose()
        .context("version id must be a positive integer")?;

    let client = RpcClient::new(RpcConfig::from_env());
    let options = ResolutionOptions {
        version_id,
        ..Default::default()
    };

    let result = resolve(&did, &client, &MemoryDocumentStore::new(), &options);
    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.is_error() {
        std::process::exit(1);
    }

    Ok(())
}
