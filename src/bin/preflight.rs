use certificate_portal::infra::{AppConfig, PinataClient, Pinning, SolanaLedger};

fn usage_and_exit() -> ! {
    eprintln!(
        "Usage: cargo run --bin preflight -- [--init-registry-if-missing]\n\
         \n\
         Requires env vars:\n\
           DATABASE_URL, SOLANA_RPC_URL, SOLANA_PROGRAM_ID, PINATA_API_KEY, PINATA_SECRET_KEY,\n\
           JWT_SECRET\n\
         And the custodial Solana key at SOLANA_KEYPAIR_PATH (default ~/.config/solana/id.json)\n"
    );
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        usage_and_exit();
    }
    let init_registry_if_missing = args.iter().any(|a| a == "--init-registry-if-missing");

    // Force-read config (nice error messages if missing)
    let config = AppConfig::from_env()?;

    println!("> Preflight:");
    println!("  SOLANA_RPC_URL={}", config.solana.rpc_url);
    println!("  SOLANA_PROGRAM_ID={}", config.solana.program_id);
    println!("  PINATA_API_URL={}", config.pinata.api_url);
    println!("  ADMIN_WALLETS={} configured", config.admin_wallets.len());

    let ledger = SolanaLedger::connect(&config.solana, config.retry)?;
    let client = ledger.rpc();

    // Basic RPC connectivity
    let version = client.get_version().await?;
    println!("  RPC version: {}", version.solana_core);

    // Payer balance
    let payer = ledger.payer();
    let balance_lamports = client.get_balance(&payer).await?;
    let sol = balance_lamports as f64 / 1_000_000_000_f64;
    println!("  Payer: {}", payer);
    println!("  Payer balance: {} lamports (~{:.6} SOL)", balance_lamports, sol);
    if balance_lamports < 10_000_000 {
        eprintln!("  Warning: payer balance looks low; issuance transactions may fail.");
    }

    // Program account existence
    let program_id = ledger.program_id();
    let program_acct = client
        .get_account(&program_id)
        .await
        .map_err(|e| anyhow::anyhow!("Program account not found on cluster: {} ({})", program_id, e))?;
    if !program_acct.executable {
        eprintln!("  Warning: program account exists but is not marked executable.");
    } else {
        println!("  Program account is deployed + executable.");
    }

    // Registry existence
    println!("  Registry PDA: {}", ledger.registry_address());
    let registry = match ledger.registry_state().await? {
        Some(registry) => {
            println!("  Registry account exists.");
            registry
        }
        None if init_registry_if_missing => {
            println!("  Registry missing -> initializing on-chain certificate registry...");
            ledger.initialize_registry().await?;
            ledger
                .registry_state()
                .await?
                .ok_or_else(|| anyhow::anyhow!("Registry still missing after initialize"))?
        }
        None => {
            return Err(anyhow::anyhow!(
                "Certificate registry does not exist. Re-run with --init-registry-if-missing"
            ));
        }
    };
    if registry.authority != payer {
        return Err(anyhow::anyhow!(
            "Registry authority {} is not the configured payer {}",
            registry.authority,
            payer
        ));
    }
    println!(
        "  Registry: next token id {}, issued {}, revoked {}",
        registry.next_token_id, registry.total_issued, registry.total_revoked
    );

    // Pinning credentials
    let pinning = PinataClient::new(config.pinata.clone());
    pinning
        .ping()
        .await
        .map_err(|e| anyhow::anyhow!("Pinata authentication failed: {}", e))?;
    println!("  Pinata credentials accepted.");

    println!("> Preflight OK.");
    Ok(())
}
