//! PayGuard CLI - Main entry point

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use payguard_core::{Actor, AgentId, AgentStatus, Cents, OrgId, Role};
use payguard_rpc::{commands, AppContext, GuardrailConfig};
use payguard_velocity::VelocityLimits;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "payguard")]
#[command(about = "PayGuard - prepaid balances and spend guardrails for agent cardholders", long_about = None)]
struct Cli {
    /// Data directory path
    #[arg(short, long, default_value = "./data")]
    data: PathBuf,

    /// Optional JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Caller user id (from the identity collaborator)
    #[arg(long, default_value = "cli-operator")]
    user: String,

    /// Caller role
    #[arg(long, value_enum, default_value = "owner")]
    role: CliRole,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliRole {
    Owner,
    Admin,
    Editor,
    Viewer,
}

impl From<CliRole> for Role {
    fn from(role: CliRole) -> Self {
        match role {
            CliRole::Owner => Role::Owner,
            CliRole::Admin => Role::Admin,
            CliRole::Editor => Role::Editor,
            CliRole::Viewer => Role::Viewer,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliStatus {
    Green,
    Yellow,
    Red,
}

impl From<CliStatus> for AgentStatus {
    fn from(status: CliStatus) -> Self {
        match status {
            CliStatus::Green => AgentStatus::Green,
            CliStatus::Yellow => AgentStatus::Yellow,
            CliStatus::Red => AgentStatus::Red,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Register an organization
    CreateOrg {
        /// Organization ID
        org: String,
        /// Opening balance in cents
        #[arg(long, default_value = "0")]
        opening_cents: i64,
    },

    /// Add funds to an organization's prepaid balance
    Fund {
        /// Organization ID
        org: String,
        /// Amount in cents
        amount_cents: i64,
    },

    /// Manually deduct funds from an organization
    Deduct {
        /// Organization ID
        org: String,
        /// Amount in cents
        amount_cents: i64,
    },

    /// Provision an agent cardholder
    RegisterAgent {
        /// Agent ID
        agent: String,
        /// Organization the agent spends against
        org: String,
        /// Monthly budget in cents (0 = unlimited)
        #[arg(long, default_value = "0")]
        budget_cents: i64,
        /// Days until the first budget reset
        #[arg(long, default_value = "30")]
        reset_in_days: i64,
        /// Soft per-minute limit in cents
        #[arg(long)]
        soft_minute: Option<i64>,
        /// Hard per-minute limit in cents
        #[arg(long)]
        hard_minute: Option<i64>,
        /// Soft per-day limit in cents
        #[arg(long)]
        soft_day: Option<i64>,
        /// Hard per-day limit in cents
        #[arg(long)]
        hard_day: Option<i64>,
    },

    /// Process a settlement notification
    Settle {
        /// Settlement ID (idempotency key)
        settlement_id: String,
        /// Agent ID
        agent: String,
        /// Organization ID
        org: String,
        /// Amount in cents
        amount_cents: i64,
        /// When the spend occurred (RFC3339; defaults to now)
        #[arg(long)]
        occurred_at: Option<DateTime<Utc>>,
    },

    /// Run a synchronous authorization check
    Authorize {
        /// Agent ID
        agent: String,
        /// Amount in cents
        amount_cents: i64,
    },

    /// Show an organization's balance
    Balance {
        /// Organization ID
        org: String,
    },

    /// Show an agent's budget usage and status
    Status {
        /// Agent ID
        agent: String,
    },

    /// List open alerts for an organization
    Alerts {
        /// Organization ID
        org: String,
    },

    /// Manually change an agent's circuit-breaker status
    ResetStatus {
        /// Agent ID
        agent: String,
        /// Target status
        #[arg(long, value_enum, default_value = "green")]
        to: CliStatus,
        /// Reason for the change (required, goes to the audit trail)
        #[arg(long)]
        reason: String,
    },

    /// Close out an agent's budget period early
    ResetBudget {
        /// Agent ID
        agent: String,
    },

    /// Deliver pending status-changed notifications
    Drain,

    /// Roll over all expired budget periods
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => GuardrailConfig::from_file(path)?,
        None => GuardrailConfig::default(),
    };

    let ctx = AppContext::open(&cli.data, config)?;

    // Organization-scoped actor; agent commands resolve the org from the
    // agent registry
    let actor_for = |org: &str| -> anyhow::Result<Actor> {
        Ok(Actor::new(&cli.user, OrgId::new(org)?, cli.role.into()))
    };

    match &cli.command {
        Commands::CreateOrg { org, opening_cents } => {
            commands::create_org(&ctx, &actor_for(org)?, org, *opening_cents)?;
        }

        Commands::Fund { org, amount_cents } => {
            commands::fund(&ctx, &actor_for(org)?, org, *amount_cents)?;
        }

        Commands::Deduct { org, amount_cents } => {
            commands::deduct(&ctx, &actor_for(org)?, org, *amount_cents)?;
        }

        Commands::RegisterAgent {
            agent,
            org,
            budget_cents,
            reset_in_days,
            soft_minute,
            hard_minute,
            soft_day,
            hard_day,
        } => {
            let to_cents = |v: &Option<i64>| -> anyhow::Result<Option<Cents>> {
                v.map(Cents::new).transpose().map_err(Into::into)
            };
            let limits = VelocityLimits {
                soft_limit_cents_per_minute: to_cents(soft_minute)?,
                hard_limit_cents_per_minute: to_cents(hard_minute)?,
                soft_limit_cents_per_day: to_cents(soft_day)?,
                hard_limit_cents_per_day: to_cents(hard_day)?,
            };
            commands::register_agent(
                &ctx,
                &actor_for(org)?,
                agent,
                org,
                *budget_cents,
                Utc::now() + Duration::days(*reset_in_days),
                limits,
            )?;
        }

        Commands::Settle {
            settlement_id,
            agent,
            org,
            amount_cents,
            occurred_at,
        } => {
            commands::settle(&ctx, settlement_id, agent, org, *amount_cents, *occurred_at)?;
        }

        Commands::Authorize { agent, amount_cents } => {
            commands::authorize(&ctx, agent, *amount_cents)?;
        }

        Commands::Balance { org } => {
            commands::balance(&ctx, org)?;
        }

        Commands::Status { agent } => {
            commands::status(&ctx, agent)?;
        }

        Commands::Alerts { org } => {
            commands::alerts(&ctx, org)?;
        }

        Commands::ResetStatus { agent, to, reason } => {
            let org = ctx.agent_org(&AgentId::new(agent.as_str())?)?;
            let actor = Actor::new(&cli.user, org, cli.role.into());
            commands::reset_status(&ctx, &actor, agent, (*to).into(), reason)?;
        }

        Commands::ResetBudget { agent } => {
            let org = ctx.agent_org(&AgentId::new(agent.as_str())?)?;
            let actor = Actor::new(&cli.user, org, cli.role.into());
            commands::reset_budget(&ctx, &actor, agent)?;
        }

        Commands::Drain => {
            commands::drain(&ctx).await?;
        }

        Commands::Sweep => {
            commands::sweep(&ctx)?;
        }
    }

    Ok(())
}
