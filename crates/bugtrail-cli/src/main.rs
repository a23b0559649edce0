//! bugtrail - command line client for the bugtrail issue tracker
//!
//! Talks to CockroachDB directly through bugtrail-core.

use anyhow::Result;
use bugtrail_core::config::DSN_ENV;
use bugtrail_core::db::OrderBy;
use bugtrail_core::{IssueStatus, IssueType};
use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

mod commands;

#[derive(Parser)]
#[command(name = "bugtrail")]
#[command(about = "Transactional issue tracker on CockroachDB")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Database to talk to (cockroach://user@host:port/db)
    #[arg(long, global = true, env = DSN_ENV)]
    dsn: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,

    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage the category tree
    Category {
        #[command(subcommand)]
        command: CategoryCommands,
    },

    /// File, inspect and update issues
    Issue {
        #[command(subcommand)]
        command: IssueCommands,
    },

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Register a user
    Add {
        username: String,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        display_name: Option<String>,
    },

    /// Show a user
    Show { username: String },
}

#[derive(Subcommand)]
enum CategoryCommands {
    /// Create a category
    Add {
        name: String,

        /// Parent category id (defaults to the root)
        #[arg(long)]
        parent: Option<Uuid>,

        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// Print a category subtree
    Tree {
        /// Category id (defaults to the root)
        id: Option<Uuid>,

        /// How many levels below the category to fetch
        #[arg(short, long, default_value = "3")]
        levels: u32,
    },

    /// Delete a category without children or issues
    Rm { id: Uuid },
}

#[derive(Subcommand)]
enum IssueCommands {
    /// File a new issue
    New {
        title: String,

        /// Reporting user
        #[arg(short, long)]
        author: String,

        /// Issue type (bug, feature, customer, cleanup, process, vulnerability)
        #[arg(short = 't', long, default_value = "bug")]
        issue_type: IssueType,

        /// Priority (0 = most urgent, 4 = least)
        #[arg(short, long, default_value = "2")]
        priority: i64,

        /// Initial assignee
        #[arg(long)]
        assignee: Option<String>,

        /// Initial status
        #[arg(long)]
        status: Option<IssueStatus>,

        #[arg(long)]
        category: Option<Uuid>,

        /// First comment
        #[arg(short, long)]
        comment: Option<String>,
    },

    /// Show an issue
    Show { id: i64 },

    /// Change an issue and/or comment on it
    Update {
        id: i64,

        /// Acting user
        #[arg(short, long)]
        author: String,

        #[arg(short, long)]
        comment: Option<String>,

        #[arg(long)]
        title: Option<String>,

        /// Assign to this user
        #[arg(long, conflicts_with = "unassign")]
        assignee: Option<String>,

        /// Remove the assignee
        #[arg(long)]
        unassign: bool,

        #[arg(short = 't', long)]
        issue_type: Option<IssueType>,

        #[arg(short, long)]
        priority: Option<i64>,

        #[arg(long)]
        status: Option<IssueStatus>,
    },

    /// Search issues, e.g. `author:q3k status:new`
    Search {
        query: String,

        #[arg(long, value_enum, default_value = "created")]
        order_by: OrderArg,

        /// Newest first
        #[arg(long)]
        desc: bool,

        /// Continue after this cursor
        #[arg(long, default_value = "")]
        after: String,

        /// Maximum number of issues (0 = default)
        #[arg(short = 'n', long, default_value = "0")]
        count: i64,
    },

    /// Show an issue's history
    History {
        id: i64,

        /// Continue after this update number
        #[arg(long, default_value = "")]
        after: String,

        #[arg(short = 'n', long, default_value = "0")]
        count: i64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    Created,
    LastUpdate,
}

impl From<OrderArg> for OrderBy {
    fn from(arg: OrderArg) -> Self {
        match arg {
            OrderArg::Created => OrderBy::Created,
            OrderArg::LastUpdate => OrderBy::LastUpdated,
        }
    }
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Write a commented default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    if let Commands::Config {
        command: Some(ConfigCommands::Init { force }),
    } = cli.command
    {
        return commands::config_init(force);
    }
    let ctx = commands::Context::new(cli.dsn, cli.json)?;

    match cli.command {
        Commands::Migrate => commands::migrate(&ctx).await,
        Commands::User { command } => match command {
            UserCommands::Add {
                username,
                email,
                display_name,
            } => commands::user_add(&ctx, username, email, display_name).await,
            UserCommands::Show { username } => commands::user_show(&ctx, &username).await,
        },
        Commands::Category { command } => match command {
            CategoryCommands::Add {
                name,
                parent,
                description,
            } => commands::category_add(&ctx, name, parent, description).await,
            CategoryCommands::Tree { id, levels } => commands::category_tree(&ctx, id, levels).await,
            CategoryCommands::Rm { id } => commands::category_rm(&ctx, id).await,
        },
        Commands::Issue { command } => match command {
            IssueCommands::New {
                title,
                author,
                issue_type,
                priority,
                assignee,
                status,
                category,
                comment,
            } => {
                let new = commands::NewIssueArgs {
                    title,
                    author,
                    issue_type,
                    priority,
                    assignee,
                    status,
                    category,
                    comment,
                };
                commands::issue_new(&ctx, new).await
            }
            IssueCommands::Show { id } => commands::issue_show(&ctx, id).await,
            IssueCommands::Update {
                id,
                author,
                comment,
                title,
                assignee,
                unassign,
                issue_type,
                priority,
                status,
            } => {
                let update = commands::UpdateArgs {
                    id,
                    author,
                    comment,
                    title,
                    assignee,
                    unassign,
                    issue_type,
                    priority,
                    status,
                };
                commands::issue_update(&ctx, update).await
            }
            IssueCommands::Search {
                query,
                order_by,
                desc,
                after,
                count,
            } => commands::issue_search(&ctx, query, order_by.into(), desc, after, count).await,
            IssueCommands::History { id, after, count } => {
                commands::issue_history(&ctx, id, after, count).await
            }
        },
        Commands::Config { command } => match command {
            Some(ConfigCommands::Init { force }) => commands::config_init(force),
            Some(ConfigCommands::Show) | None => commands::config_show(&ctx),
        },
    }
}
