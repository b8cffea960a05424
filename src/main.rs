use std::process;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use kubestack::cli::{
    self, format_cluster_info, format_command_error, format_network_plan,
    format_stack_validation, Cli, CommandContext, Commands,
};

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    let ctx = CommandContext::new(&args.asset_dir, args.endpoint.clone(), args.api_token.clone());

    // Ctrl-C stops the current wait; the backend keeps whatever it started
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let result = match args.command {
        Commands::Init(init) => cli::init(&ctx, &init).map(|path| {
            println!("Wrote {}", path.display());
            println!("Edit it, then run `kubestack plan` to check the network plan.");
        }),
        Commands::Plan => cli::plan(&ctx).map(|config| {
            print!("{}", format_network_plan(&config));
        }),
        Commands::Validate => {
            let validation = cli::validate(&ctx, &cancel).await;
            print!("{}", format_stack_validation(&validation));
            match validation.error {
                Some(e) => Err(e.into()),
                None => Ok(()),
            }
        }
        Commands::Up => cli::up(&ctx, &cancel).await.map(|info| {
            println!("Success! Your cluster is up.\n");
            print!("{}", format_cluster_info(&info));
        }),
        Commands::Status => cli::status(&ctx, &cancel).await.map(|info| {
            print!("{}", format_cluster_info(&info));
        }),
        Commands::Destroy => cli::destroy(&ctx, &cancel).await.map(|removed| {
            println!("Cluster destroyed.");
            if removed {
                println!("Removed local credentials.");
            }
        }),
    };

    if let Err(e) = result {
        eprint!("{}", format_command_error(&e));
        process::exit(1);
    }
}
