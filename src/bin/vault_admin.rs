//! Operational CLI for inspecting and force-expiring vault entries without
//! going through the Retrieval API (added — see SPEC_FULL.md §1, "Process
//! shape"). Connects to the same Redis backend as the server; takes no
//! `max_inline_*`/TTL limits since it never calls `put`.

use tracing_subscriber::EnvFilter;

use data_vault::vault_store::VaultStore;

fn print_usage() {
    eprintln!("usage: vault-admin <ttl|expire> <handle-id>");
    eprintln!("  ttl <handle-id>     print remaining TTL in seconds, or \"expired\"");
    eprintln!("  expire <handle-id>  force-expire a handle immediately");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let command = args.next();
    let handle_id = args.next();

    let (command, handle_id) = match (command, handle_id) {
        (Some(c), Some(h)) => (c, h),
        _ => {
            print_usage();
            std::process::exit(2);
        }
    };

    let redis_url =
        std::env::var("REDIS_URL").map_err(|_| anyhow::anyhow!("REDIS_URL is required"))?;

    // Offload limits are irrelevant here; any value keeps `VaultStore::connect`
    // happy since this binary never calls `put`.
    let store = VaultStore::connect(&redis_url, 0, 0, 0, 0, 0).await?;

    match command.as_str() {
        "ttl" => match store.ttl_remaining(&handle_id).await? {
            Some(seconds) => println!("{handle_id}: {seconds}s remaining"),
            None => println!("{handle_id}: expired or not found"),
        },
        "expire" => {
            let existed = store.expire_now(&handle_id).await?;
            if existed {
                println!("{handle_id}: expired");
            } else {
                println!("{handle_id}: not found");
            }
        }
        other => {
            eprintln!("unknown command: {other}");
            print_usage();
            std::process::exit(2);
        }
    }

    Ok(())
}
