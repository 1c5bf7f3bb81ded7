//! Parts CRM CLI - Database migrations and tenant management tools.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! crm-cli migrate
//!
//! # Create an organization with its first admin
//! crm-cli org create -n "Northside Auto" --admin-email ada@northside.test \
//!     --admin-name "Ada Lovelace" --admin-subject "idp|ada"
//!
//! # Suspend an organization
//! crm-cli org set-active --org 1 --active false
//!
//! # Add a staff member
//! crm-cli user create --org 1 -e pia@northside.test -n "Pia Moreno" -r processing -s "idp|pia"
//!
//! # Sign a development token for a subject
//! crm-cli token issue -s "idp|ada"
//!
//! # Load a catalog
//! crm-cli seed products --org 1 -f catalog.yaml
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `org create` - Bootstrap a tenant
//! - `org set-active` - Suspend or reactivate a tenant
//! - `user create` - Create staff users
//! - `token issue` - Sign bearer tokens for local testing
//! - `seed products` - Seed the catalog from YAML

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

use parts_crm_core::{OrganizationId, Role};

mod commands;

#[derive(Parser)]
#[command(name = "crm-cli")]
#[command(author, version, about = "Parts CRM CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage organizations
    Org {
        #[command(subcommand)]
        action: OrgAction,
    },
    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Bearer tokens for local testing
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Seed data from files
    Seed {
        #[command(subcommand)]
        target: SeedTarget,
    },
}

#[derive(Subcommand)]
enum OrgAction {
    /// Create an organization and its first admin
    Create {
        /// Organization name
        #[arg(short, long)]
        name: String,

        /// Organization contact email
        #[arg(long)]
        contact_email: Option<String>,

        /// Admin email address
        #[arg(long)]
        admin_email: String,

        /// Admin display name
        #[arg(long)]
        admin_name: String,

        /// Admin subject id at the identity provider
        #[arg(long)]
        admin_subject: String,
    },
    /// Activate or suspend an organization
    SetActive {
        /// Organization id
        #[arg(long)]
        org: i32,

        /// `true` to let its users sign in again, `false` to suspend
        #[arg(long, action = clap::ArgAction::Set)]
        active: bool,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a staff user
    Create {
        /// Organization id
        #[arg(long)]
        org: i32,

        /// Email address
        #[arg(short, long)]
        email: String,

        /// Display name
        #[arg(short, long)]
        name: String,

        /// Role (`admin`, `sales`, `processing`, `followup`)
        #[arg(short, long, default_value = "sales")]
        role: Role,

        /// Subject id at the identity provider
        #[arg(short, long)]
        subject: String,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Sign a token with `CRM_JWT_SECRET`
    Issue {
        /// Subject id the token is for
        #[arg(short, long)]
        subject: String,

        /// Role claim, in either provider vocabulary
        #[arg(short, long)]
        role: Option<String>,

        /// Lifetime in hours
        #[arg(long, default_value_t = 12)]
        ttl_hours: i64,
    },
}

#[derive(Subcommand)]
enum SeedTarget {
    /// Seed catalog products from a YAML file
    Products {
        /// Organization id
        #[arg(long)]
        org: i32,

        /// Path to YAML file
        #[arg(short, long)]
        file: String,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CliError> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Org { action } => match action {
            OrgAction::Create {
                name,
                contact_email,
                admin_email,
                admin_name,
                admin_subject,
            } => {
                commands::tenants::create_organization(
                    &name,
                    contact_email.as_deref(),
                    &admin_email,
                    &admin_name,
                    &admin_subject,
                )
                .await?;
            }
            OrgAction::SetActive { org, active } => {
                commands::tenants::set_organization_active(OrganizationId::new(org), active)
                    .await?;
            }
        },
        Commands::User { action } => match action {
            UserAction::Create {
                org,
                email,
                name,
                role,
                subject,
            } => {
                commands::tenants::create_user(
                    OrganizationId::new(org),
                    &email,
                    &name,
                    role,
                    &subject,
                )
                .await?;
            }
        },
        Commands::Token { action } => match action {
            TokenAction::Issue {
                subject,
                role,
                ttl_hours,
            } => commands::token::issue(&subject, role.as_deref(), ttl_hours)?,
        },
        Commands::Seed { target } => match target {
            SeedTarget::Products { org, file } => {
                commands::seed::products(OrganizationId::new(org), &file).await?;
            }
        },
    }
    Ok(())
}
