mod cascade;
mod categories;
mod classifier;
mod cli;
mod db;
mod error;
mod feed;
mod importer;
mod ledger;
mod models;
mod resolver;
mod review;
mod scheduler;
mod settings;
mod sync;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{AccountsCommands, CategoriesCommands, Cli, Commands, ReviewCommands, RulesCommands};
use settings::load_settings;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = load_settings();

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Accounts { command } => match command {
            AccountsCommands::Add {
                name,
                account_type,
                institution,
            } => cli::accounts::add(&name, &account_type, &institution),
            AccountsCommands::List => cli::accounts::list(),
            AccountsCommands::Link {
                name,
                access_token,
                external_id,
            } => cli::accounts::link(&name, &access_token, external_id.as_deref()),
            AccountsCommands::Status => cli::accounts::status(),
        },
        Commands::Sync { account } => cli::sync::run(account.as_deref(), &settings),
        Commands::Daemon => cli::daemon::run(&settings),
        Commands::Import {
            file,
            account,
            archive,
            deposit_convention,
        } => cli::import::run(&file, &account, archive, deposit_convention, &settings),
        Commands::Categorize { limit, clear } => cli::categorize::run(limit, clear, &settings),
        Commands::Review { command } => match command {
            ReviewCommands::List {
                status,
                account,
                search,
                limit,
            } => cli::review::list(status.as_deref(), account.as_deref(), search.as_deref(), limit),
            ReviewCommands::Stage { id, category } => cli::review::stage_cmd(id, &category),
            ReviewCommands::KickBack { id } => cli::review::kick_back_cmd(id),
            ReviewCommands::Commit => cli::review::commit_cmd(),
            ReviewCommands::Revert => cli::review::revert_cmd(),
            ReviewCommands::Confirm { id, category } => cli::review::confirm_cmd(id, &category),
            ReviewCommands::Bulk {
                ids,
                category,
                stage,
            } => cli::review::bulk_cmd(&ids, category.as_deref(), stage),
        },
        Commands::Categories { command } => match command {
            CategoriesCommands::List => cli::categories::list(),
            CategoriesCommands::Add {
                key,
                name,
                parent,
                income,
                recurring,
            } => cli::categories::add(&key, &name, parent.as_deref(), income, recurring),
            CategoriesCommands::Delete { key } => cli::categories::delete(&key),
            CategoriesCommands::Merge { from, into } => cli::categories::merge(&from, &into),
        },
        Commands::Rules { command } => match command {
            RulesCommands::List => cli::rules::list(),
            RulesCommands::AddMerchant {
                pattern,
                category,
                confidence,
            } => cli::rules::add_merchant(&pattern, &category, confidence),
            RulesCommands::AddAmount {
                pattern,
                amount,
                tolerance,
                category,
                note,
            } => cli::rules::add_amount(&pattern, amount, tolerance, &category, note.as_deref()),
        },
        Commands::History { account, limit } => cli::history::run(account.as_deref(), limit),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
