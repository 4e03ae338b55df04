//! Helios Tenancy Admin
//!
//! Operator CLI for tenant schemas: bootstrap the system schema, provision,
//! validate, list and drop tenant schemas, and dry-run the isolation
//! validator or the tenant resolver without touching the database.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use helios_tenancy::audit::AuditTrail;
use helios_tenancy::schema::{DropConfirmation, InMemorySchemaRegistry, SchemaLifecycleManager};
use helios_tenancy::store::RelationalStore;
use helios_tenancy::tenant::{SchemaNaming, TenantId};
use helios_tenancy::validator::{HeuristicRiskScorer, IsolationValidator};
use helios_tenancy::{TenancyConfig, TenantResolver, TenantScope};
use serde_json::json;
use tracing::{info, warn};

/// Command-line configuration.
#[derive(Parser, Debug)]
#[command(name = "tenancy-admin")]
#[command(about = "Tenant schema provisioning and isolation checks")]
#[command(version)]
struct Cli {
    /// Path to a JSON tenancy configuration file.
    #[arg(long, env = "TENANCY_CONFIG")]
    config: Option<PathBuf>,

    /// PostgreSQL connection string. Falls back to the HELIOS_PG_* variables.
    #[arg(long, env = "TENANCY_DATABASE_URL")]
    database_url: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "TENANCY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Creates and validates the system schema.
    Bootstrap,

    /// Provisions the schema of a tenant.
    Provision {
        /// Tenant id.
        tenant: String,
    },

    /// Drops the schema of a tenant and all of its data.
    Drop {
        /// Tenant id.
        tenant: String,

        /// The tenant id again, to confirm the drop.
        #[arg(long)]
        confirm: String,
    },

    /// Validates the system schema, or one tenant's schema.
    Validate {
        /// Tenant id. Validates the system schema when omitted.
        tenant: Option<String>,
    },

    /// Lists provisioned tenant schemas.
    List,

    /// Runs a query through the isolation validator without executing it.
    CheckQuery(CheckQueryArgs),

    /// Resolves request metadata to a tenant context.
    Resolve(ResolveArgs),
}

#[derive(Args, Debug)]
struct CheckQueryArgs {
    /// The SQL to check.
    query: String,

    /// Tenant the query would run for.
    #[arg(long, conflicts_with = "system")]
    tenant: Option<String>,

    /// Check as a system operation.
    #[arg(long)]
    system: bool,

    /// Consult the heuristic advisory scorer.
    #[arg(long)]
    advisory: bool,

    /// Advisory timeout, e.g. `250ms`.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "250ms")]
    advisory_timeout: Duration,
}

#[derive(Args, Debug)]
struct ResolveArgs {
    /// Header as `name: value`. May be repeated.
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Host the request was addressed to.
    #[arg(long)]
    host: Option<String>,

    /// Request path.
    #[arg(long, default_value = "/")]
    path: String,

    /// Platform base domain for subdomain resolution.
    #[arg(long, env = "TENANCY_BASE_DOMAIN")]
    base_domain: Option<String>,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    raw.split_once(':')
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected `name: value`, got `{}`", raw))
}

/// Initializes the tracing subscriber, honoring `RUST_LOG` when set.
fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "helios_tenancy={level},tenancy_admin={level}"
        ))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<TenancyConfig> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        None => TenancyConfig::default(),
    };

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        anyhow::bail!("invalid tenancy configuration");
    }
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::CheckQuery(args) => check_query(&config, args).await,
        Command::Resolve(args) => resolve(config, args),
        command => run_against_database(cli.database_url.as_deref(), &config, command).await,
    }
}

// ============================================================================
// Offline commands
// ============================================================================

async fn check_query(config: &TenancyConfig, args: CheckQueryArgs) -> anyhow::Result<()> {
    let mut validator_config = config
        .validator
        .clone()
        .with_advisory_timeout(args.advisory_timeout);
    if !args.advisory {
        validator_config = validator_config.without_advisory();
    }

    let naming = SchemaNaming::new(&config.schema)?;
    let mut validator = IsolationValidator::new(validator_config, naming, AuditTrail::local())?;
    if args.advisory {
        validator = validator.with_advisory(Arc::new(HeuristicRiskScorer::new(
            config.validator.max_query_length / 4,
        )?));
    }

    let tenant = args.tenant.as_deref().map(TenantId::new);
    let verdict = validator
        .validate_query(&args.query, tenant.as_ref(), args.system)
        .await;
    print_json(&verdict)?;

    if !verdict.allowed {
        std::process::exit(2);
    }
    Ok(())
}

fn resolve(config: TenancyConfig, args: ResolveArgs) -> anyhow::Result<()> {
    let mut resolver_config = config.resolver;
    if let Some(domain) = args.base_domain {
        resolver_config = resolver_config.with_base_domain(domain);
    }

    let mut request = http::Request::get(&args.path);
    if let Some(host) = &args.host {
        request = request.header(http::header::HOST, host);
    }
    for (name, value) in &args.headers {
        request = request.header(name, value);
    }
    let (parts, _) = request.body(())?.into_parts();

    let resolver = TenantResolver::new(resolver_config, AuditTrail::local());
    let resolved = resolver.resolve(&parts);

    let schema = match resolved.context.tenant_id() {
        Some(id) => Some(SchemaNaming::new(&config.schema)?.schema_for(id)?),
        None => None,
    };
    print_json(&json!({
        "tenant_id": resolved.context.tenant_id(),
        "source": resolved.source(),
        "system": resolved.context.is_system(),
        "schema": schema.as_ref().map(|s| s.as_str()),
        "conflict": resolved.has_conflict(),
    }))
}

// ============================================================================
// Database commands
// ============================================================================

#[cfg(feature = "postgres")]
async fn run_against_database(
    database_url: Option<&str>,
    config: &TenancyConfig,
    command: Command,
) -> anyhow::Result<()> {
    use helios_tenancy::store::PostgresStore;

    let store = match database_url {
        Some(url) => PostgresStore::from_connection_string(url).await?,
        None => PostgresStore::from_env().await?,
    };
    info!(
        host = %store.config().host,
        dbname = %store.config().dbname,
        "Connected to PostgreSQL"
    );
    run_schema_command(Arc::new(store), config, command).await
}

/// Fallback when the postgres feature is not enabled.
#[cfg(not(feature = "postgres"))]
async fn run_against_database(
    _database_url: Option<&str>,
    _config: &TenancyConfig,
    _command: Command,
) -> anyhow::Result<()> {
    anyhow::bail!(
        "Schema commands require the 'postgres' feature. \
         Build with: cargo build -p helios-tenancy-admin --features postgres"
    )
}

async fn run_schema_command<S: RelationalStore>(
    store: Arc<S>,
    config: &TenancyConfig,
    command: Command,
) -> anyhow::Result<()> {
    info!(store = store.name(), "Running schema command");
    let manager = SchemaLifecycleManager::new(
        store,
        config.schema.clone(),
        Arc::new(InMemorySchemaRegistry::new()),
        AuditTrail::local(),
    )?;

    match command {
        Command::Bootstrap => {
            let report = manager.ensure_system_schema().await?;
            print_json(&report)
        }
        Command::Provision { tenant } => {
            let result = manager.create_tenant_schema(&TenantId::new(tenant)).await?;
            print_json(&result)
        }
        Command::Drop { tenant, confirm } => {
            let tenant = TenantId::new(tenant);
            let dropped = manager
                .drop_tenant_schema(&tenant, &DropConfirmation::new(confirm))
                .await?;
            if !dropped {
                warn!(tenant_id = %tenant, "No schema to drop");
            }
            print_json(&json!({ "tenant_id": tenant, "dropped": dropped }))
        }
        Command::Validate { tenant } => {
            let scope = match tenant {
                Some(tenant) => TenantScope::Tenant(TenantId::new(tenant)),
                None => TenantScope::System,
            };
            let report = manager.validate_integrity(&scope).await?;
            print_json(&report)?;
            if !report.valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::List => {
            let schemas = manager.list_tenant_schemas().await?;
            print_json(&schemas)
        }
        Command::CheckQuery(_) | Command::Resolve(_) => {
            anyhow::bail!("offline commands do not use the database")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_drop_requires_confirmation() {
        assert!(Cli::try_parse_from(["tenancy-admin", "drop", "acme"]).is_err());
        let cli = Cli::try_parse_from(["tenancy-admin", "drop", "acme", "--confirm", "acme"]).unwrap();
        assert!(matches!(cli.command, Command::Drop { .. }));
    }

    #[test]
    fn test_check_query_tenant_and_system_conflict() {
        let result = Cli::try_parse_from([
            "tenancy-admin",
            "check-query",
            "SELECT 1",
            "--tenant",
            "acme",
            "--system",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("X-Tenant-ID: acme").unwrap(),
            ("X-Tenant-ID".to_string(), "acme".to_string())
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": acme").is_err());
    }

    #[test]
    fn test_advisory_timeout_parses_humantime() {
        let cli = Cli::try_parse_from([
            "tenancy-admin",
            "check-query",
            "SELECT 1",
            "--advisory-timeout",
            "1s",
        ])
        .unwrap();
        match cli.command {
            Command::CheckQuery(args) => assert_eq!(args.advisory_timeout, Duration::from_secs(1)),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
