pub mod accounts;
pub mod categories;
pub mod categorize;
pub mod daemon;
pub mod history;
pub mod import;
pub mod init;
pub mod review;
pub mod rules;
pub mod sync;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "penny",
    about = "Personal ledger sync, reconciliation, and categorization CLI."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Set up Penny: choose a data directory and initialize the database.
    Init {
        /// Path for Penny data (default: ~/Documents/penny)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Manage accounts.
    Accounts {
        #[command(subcommand)]
        command: AccountsCommands,
    },
    /// Pull transactions from the aggregator feed.
    Sync {
        /// Account name (default: all connected accounts)
        #[arg(long)]
        account: Option<String>,
    },
    /// Run the background sync loop.
    Daemon,
    /// Import a CSV file of transactions.
    Import {
        /// Path to CSV file (date,description,amount[,merchant])
        file: String,
        /// Account name to import into
        #[arg(long)]
        account: String,
        /// Treat as historical archive (eligible for feed merging)
        #[arg(long)]
        archive: bool,
        /// Flip amount signs (statement records deposits as positive)
        #[arg(long = "deposit-convention")]
        deposit_convention: bool,
    },
    /// Run the categorization cascade over unreviewed transactions.
    Categorize {
        /// Max rows to process
        #[arg(long, default_value_t = 200)]
        limit: usize,
        /// Clear predictions instead, so the next run starts fresh
        #[arg(long)]
        clear: bool,
    },
    /// Review, stage, and confirm transactions.
    Review {
        #[command(subcommand)]
        command: ReviewCommands,
    },
    /// Manage the category taxonomy.
    Categories {
        #[command(subcommand)]
        command: CategoriesCommands,
    },
    /// Manage categorization rules.
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
    /// Show sync history.
    History {
        /// Account name
        #[arg(long)]
        account: Option<String>,
        /// Max entries
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub enum AccountsCommands {
    /// Add a new account.
    Add {
        /// Account name, e.g. 'Everyday Checking'
        name: String,
        /// Account type: checking, savings, credit
        #[arg(long = "type")]
        account_type: String,
        /// Institution name
        #[arg(long)]
        institution: String,
    },
    /// List all accounts.
    List,
    /// Link an account to the aggregator feed.
    Link {
        /// Account name
        name: String,
        /// Aggregator access token
        #[arg(long = "access-token")]
        access_token: String,
        /// Aggregator-side account id, to filter multi-account items
        #[arg(long = "external-id")]
        external_id: Option<String>,
    },
    /// Show connection status for each account.
    Status,
}

#[derive(Subcommand)]
pub enum ReviewCommands {
    /// List transactions awaiting review.
    List {
        /// Filter by status: pending_review, pending_save, confirmed, auto_confirmed
        #[arg(long)]
        status: Option<String>,
        /// Account name
        #[arg(long)]
        account: Option<String>,
        /// Substring match on description/merchant
        #[arg(long)]
        search: Option<String>,
        /// Max rows
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Stage a transaction with a category (pending_save).
    Stage {
        id: i64,
        category: String,
    },
    /// Send a staged transaction back to pending review.
    KickBack {
        id: i64,
    },
    /// Commit all staged transactions to confirmed.
    Commit,
    /// Send every staged transaction back to pending review.
    Revert,
    /// Confirm a transaction directly.
    Confirm {
        id: i64,
        category: String,
    },
    /// Confirm several transactions at once.
    Bulk {
        /// Transaction ids
        ids: Vec<i64>,
        /// Override category (default: each row's prediction)
        #[arg(long)]
        category: Option<String>,
        /// Stage instead of confirming (no confidence feedback)
        #[arg(long)]
        stage: bool,
    },
}

#[derive(Subcommand)]
pub enum CategoriesCommands {
    /// List the taxonomy.
    List,
    /// Add a category.
    Add {
        /// Unique key, e.g. 'gym'
        key: String,
        /// Display name
        #[arg(long)]
        name: String,
        /// Parent group key (omit to create a group)
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        income: bool,
        #[arg(long)]
        recurring: bool,
    },
    /// Delete an unused category.
    Delete {
        key: String,
    },
    /// Merge one category into another.
    Merge {
        from: String,
        into: String,
    },
}

#[derive(Subcommand)]
pub enum RulesCommands {
    /// List merchant mappings and amount rules.
    List,
    /// Add a merchant mapping.
    AddMerchant {
        /// Pattern matched against uppercased descriptions (regex or literal)
        pattern: String,
        /// Target category key
        #[arg(long)]
        category: String,
        /// Starting confidence (default 1; >= threshold auto-confirms)
        #[arg(long, default_value_t = 1)]
        confidence: i64,
    },
    /// Add an amount rule.
    AddAmount {
        /// Description substring
        pattern: String,
        /// Exact amount to match
        #[arg(long)]
        amount: f64,
        /// Tolerance around the amount
        #[arg(long, default_value_t = 0.01)]
        tolerance: f64,
        /// Target category key
        #[arg(long)]
        category: String,
        #[arg(long)]
        note: Option<String>,
    },
}
