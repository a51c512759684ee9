use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use siblink_client::{ClientConfig, SiblingClient};
use siblink_common::{
    memory::{BindOutcome, MemoryBinder, MemoryPackageRegistry, MemoryServiceHost},
    CertificateFingerprint, PeerTrustVerifier, ProcessIdentity, ServiceTarget,
    SigningCertificates, TrustRegistry,
};
use siblink_server::{AccountHolder, HolderConfig, StaticPayload};
use tracing_subscriber::EnvFilter;

const WALLET: ProcessIdentity = ProcessIdentity(10_100);
const READER: ProcessIdentity = ProcessIdentity(10_200);

/// Two sibling apps on an in-memory device: the wallet holds a large payload,
/// the reader binds to it and fetches it through the relay.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    println!("=== Siblink Loopback Example ===");

    let wallet_cert = b"wallet release certificate".to_vec();
    let reader_cert = b"reader release certificate".to_vec();

    println!("\n1. Installing sibling apps...");
    let packages = MemoryPackageRegistry::new();
    packages.install(
        WALLET,
        "com.example.wallet",
        SigningCertificates::Current(vec![wallet_cert.clone()]),
    );
    packages.install(
        READER,
        "com.example.reader",
        SigningCertificates::Current(vec![reader_cert.clone()]),
    );

    let wallet_fp = CertificateFingerprint::of_certificate(&wallet_cert);
    let reader_fp = CertificateFingerprint::of_certificate(&reader_cert);
    println!("  - com.example.wallet signed by {wallet_fp}");
    println!("  - com.example.reader signed by {reader_fp}");

    let registry = TrustRegistry::builder()
        .trust("com.example.wallet", [wallet_fp.source()])
        .trust("com.example.reader", [reader_fp.source()])
        .build();
    let verifier = Arc::new(PeerTrustVerifier::new(Arc::new(packages), Arc::new(registry)));

    println!("\n2. Starting the wallet's holder...");
    let payload: Vec<u8> = (0..4 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    let holder = Arc::new(AccountHolder::new(
        Arc::clone(&verifier),
        StaticPayload::new(payload.clone()),
        HolderConfig::from_env(),
    ));
    println!(
        "  - Holding {} bytes, transport limit {} bytes",
        payload.len(),
        holder.config().transport_limit
    );

    let host = Arc::new(MemoryServiceHost::new());
    host.script(BindOutcome::Connect(MemoryBinder::with_endpoint(WALLET, READER, holder)));

    println!("\n3. Fetching from the reader...");
    let client = SiblingClient::new(
        Arc::clone(&host),
        ServiceTarget::new("com.example.wallet", "TokenService"),
        verifier,
        ClientConfig::new().with_connect_timeout(Duration::from_secs(2)),
    );
    let fetched = client
        .fetch_payload()
        .await
        .context("Failed to fetch payload from sibling")?;

    anyhow::ensure!(fetched == payload, "payload corrupted in transit");
    println!("  - Received {} bytes", fetched.len());
    println!(
        "  - Host saw {} bind(s) and {} unbind(s)",
        host.bind_calls(),
        host.unbind_calls()
    );

    println!("\n✓ Loopback example completed successfully!");
    Ok(())
}
