use access_policy::{resolve_policy, AccessPolicy, EnvFileSecrets, PolicyError};
use anyhow::{Context, Result};
use bootstrapper_medctl::admin::{AdminError, Call};
use bootstrapper_medctl::compute_effective_config;
use bootstrapper_medctl::loader::{self, LoadError};
use bootstrapper_medctl::mongo::MongoAdminClient;
use bootstrapper_medctl::report::RunStatus;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

const EXIT_PARTIAL: i32 = 1;
const EXIT_INVALID_POLICY: i32 = 2;
const EXIT_UNREACHABLE: i32 = 3;
const EXIT_INVALID_CONFIG: i32 = 4;

/// Provisions the roles and users of an access policy into MongoDB
#[derive(Parser)]
#[command(name = "medctl", version, about)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Args)]
struct PolicyArgs {
    /// Policy file (YAML or JSON); the built-in medical_data tables when omitted
    #[arg(long, value_name = "FILE")]
    policy: Option<PathBuf>,
    /// JSON secrets file for secret://<scope>/<key> references
    #[arg(long, value_name = "FILE", env = "MEDCTL_SECRETS_FILE")]
    secrets_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and cross-check the policy without contacting the engine
    Validate {
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Print the ordered create calls a run would issue
    Plan {
        #[command(flatten)]
        policy: PolicyArgs,
        /// Include the admissions collection and its indexes
        #[arg(long)]
        with_collections: bool,
    },
    /// Create roles, then users, in the policy database
    Apply {
        #[command(flatten)]
        policy: PolicyArgs,
        /// Connection string; built from MONGO_INITDB_* when unset
        #[arg(long, env = "MONGO_URI")]
        mongo_uri: Option<String>,
        #[arg(long)]
        server_selection_timeout_secs: Option<u64>,
        /// Also ensure the admissions collection and its indexes
        #[arg(long)]
        with_collections: bool,
    },
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load(args: &PolicyArgs) -> Result<AccessPolicy, PolicyError> {
    let provider = match &args.secrets_file {
        Some(path) => EnvFileSecrets::with_secrets_file(path),
        None => EnvFileSecrets::from_env(),
    };
    resolve_policy(args.policy.as_deref(), &provider)
}

fn invalid_policy(err: &PolicyError) -> ! {
    let issues: Vec<String> = err.issues().iter().map(|i| i.to_string()).collect();
    println!(
        "{}",
        serde_json::json!({"phase":"validate","ok":false,"error":err.to_string(),"issues":issues})
    );
    eprintln!("invalid policy: {}", err);
    std::process::exit(EXIT_INVALID_POLICY);
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Validate { policy } => {
            let p = load(&policy).unwrap_or_else(|e| invalid_policy(&e));
            println!(
                "{}",
                serde_json::json!({
                    "phase": "validate", "ok": true, "database": p.database,
                    "roles": p.roles.len(), "users": p.users.len()
                })
            );
        }
        Commands::Plan {
            policy,
            with_collections,
        } => {
            let p = load(&policy).unwrap_or_else(|e| invalid_policy(&e));
            let calls: Vec<Call> = loader::plan(&p, &loader::LoadOptions::new(with_collections));
            let calls = serde_json::to_value(&calls).context("serializing plan")?;
            println!(
                "{}",
                serde_json::json!({"phase":"plan","database":p.database,"calls":calls})
            );
        }
        Commands::Apply {
            policy,
            mongo_uri,
            server_selection_timeout_secs,
            with_collections,
        } => {
            let p = load(&policy).unwrap_or_else(|e| invalid_policy(&e));
            let cfg = compute_effective_config(
                mongo_uri.as_deref(),
                server_selection_timeout_secs,
                with_collections,
            );
            let client = match MongoAdminClient::connect(
                &cfg.mongo_uri,
                cfg.server_selection_timeout(),
            )
            .await
            {
                Ok(c) => c,
                Err(AdminError::Unreachable { message }) => {
                    println!(
                        "{}",
                        serde_json::json!({"phase":"apply","status":"engine-unreachable","during":"connect"})
                    );
                    eprintln!("cannot reach engine: {}", message);
                    std::process::exit(EXIT_UNREACHABLE);
                }
                Err(e) => {
                    println!(
                        "{}",
                        serde_json::json!({"phase":"apply","status":"invalid-config","error":e.to_string()})
                    );
                    eprintln!("invalid connection settings: {}", e);
                    std::process::exit(EXIT_INVALID_CONFIG);
                }
            };

            match loader::apply(&client, &p, &cfg.load_options()).await {
                Ok(report) => {
                    let rendered = serde_json::to_value(&report).context("serializing run report")?;
                    println!(
                        "{}",
                        serde_json::json!({"phase":"apply","status":report.status(),"report":rendered})
                    );
                    if report.status() == RunStatus::PartiallyProvisioned {
                        for f in report.failures() {
                            eprintln!("failed {:?} {}: {:?}", f.kind, f.name, f.outcome);
                        }
                        std::process::exit(EXIT_PARTIAL);
                    }
                }
                Err(LoadError::InvalidPolicy(e)) => invalid_policy(&e),
                Err(LoadError::EngineUnreachable {
                    during,
                    message,
                    report,
                }) => {
                    let rendered = serde_json::to_value(&report).context("serializing partial report")?;
                    println!(
                        "{}",
                        serde_json::json!({"phase":"apply","status":"engine-unreachable","during":during,"report":rendered})
                    );
                    eprintln!("engine unreachable during {}: {}", during, message);
                    std::process::exit(EXIT_UNREACHABLE);
                }
            }
        }
    }
    Ok(())
}
