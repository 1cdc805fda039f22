use anyhow::{bail, Context};
use api_client::config::{
    base_url_from_env_value, refresh_lead_from_env_value, request_timeout_from_env_value,
    token_file_from_env_value,
};
use api_client::{ApiClient, ClientConfig, ClientFormulaPersister, Credentials, RefreshTimer};
use clap::{Parser, Subcommand};
use formula::{
    export, ChartEditor, ConditionId, ConditionRegistry, DecodedFormula, EditOutcome, Formula,
    SurfaceEdit, SurfaceKey, ToothConditionsMap, ToothNumber,
};
use serde::Serialize;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Token file used when `DENTCHART_TOKEN_FILE` is not set.
const DEFAULT_TOKEN_FILE: &str = ".dentchart-tokens.json";

/// Environment variable read for the login password before falling back to stdin.
const PASSWORD_ENV: &str = "DENTCHART_PASSWORD";

#[derive(Parser)]
#[command(name = "dentchart")]
#[command(about = "Dental chart tooth formula tools")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a backend formula document into the flat chart
    Decode {
        /// Path to a formula document (JSON)
        file: PathBuf,
        /// Print export rows instead of the flat map
        #[arg(long)]
        rows: bool,
    },
    /// Encode a flat chart into a backend formula document
    Encode {
        /// Path to a flat chart (JSON object keyed by tooth number)
        file: PathBuf,
    },
    /// List the built-in conditions
    Conditions,
    /// Log in and store the issued tokens
    ///
    /// The password is read from DENTCHART_PASSWORD, or from stdin when that is unset.
    Login { username: String },
    /// Clear stored tokens
    Logout,
    /// Fetch and decode a client's formula
    ClientFormula {
        client_id: String,
        /// Print export rows instead of the flat map
        #[arg(long)]
        rows: bool,
    },
    /// Fetch and decode the formula attached to an appointment
    AppointmentFormula {
        appointment_id: String,
        /// Print export rows instead of the flat map
        #[arg(long)]
        rows: bool,
    },
    /// Set (or clear) one surface on a client's chart and save it
    SetCondition {
        client_id: String,
        /// FDI tooth number, e.g. 26
        tooth: ToothNumber,
        /// Surface key, e.g. crown, root_1, channel_1_2, pulp
        surface: SurfaceKey,
        /// Condition id; omit to clear the surface
        condition: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dentchart=info".parse()?)
                .add_directive("api_client=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let registry = ConditionRegistry::with_defaults();

    match cli.command {
        Some(Commands::Decode { file, rows }) => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let decoded = Formula::parse(&text)?;
            print_decoded(decoded, rows, &registry)?;
        }
        Some(Commands::Encode { file }) => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let chart: ToothConditionsMap =
                serde_json::from_str(&text).context("flat chart is not valid JSON")?;
            println!("{}", Formula::render(&chart)?);
        }
        Some(Commands::Conditions) => {
            let conditions: Vec<_> = registry.iter().collect();
            print_json(&conditions)?;
        }
        Some(Commands::Login { username }) => {
            let password =
                read_password(std::env::var(PASSWORD_ENV).ok(), std::io::stdin().lock())?;
            let (client, _refresh) = build_client()?;
            client.login(&Credentials::new(username, password)).await?;
            println!("Logged in.");
        }
        Some(Commands::Logout) => {
            let (client, _refresh) = build_client()?;
            client.logout()?;
            println!("Logged out.");
        }
        Some(Commands::ClientFormula { client_id, rows }) => {
            let (client, _refresh) = build_client()?;
            let decoded = client.fetch_client_formula(&client_id).await?;
            print_decoded(decoded, rows, &registry)?;
        }
        Some(Commands::AppointmentFormula {
            appointment_id,
            rows,
        }) => {
            let (client, _refresh) = build_client()?;
            let decoded = client.fetch_appointment_formula(&appointment_id).await?;
            print_decoded(decoded, rows, &registry)?;
        }
        Some(Commands::SetCondition {
            client_id,
            tooth,
            surface,
            condition,
        }) => {
            let edit = match condition {
                Some(id) => {
                    let id = ConditionId::new(&id)?;
                    if !registry.contains(id.as_str()) {
                        tracing::warn!(condition = %id, "condition is not in the built-in set");
                    }
                    SurfaceEdit::set(tooth, surface, id)
                }
                None => SurfaceEdit::clear(tooth, surface),
            };

            let (client, _refresh) = build_client()?;
            let decoded = client.fetch_client_formula(&client_id).await?;
            if !decoded.is_complete() {
                bail!(
                    "refusing to save: {} tooth entries could not be decoded and would be lost",
                    decoded.skipped.len()
                );
            }

            let persister = ClientFormulaPersister::new(client, client_id)?;
            let mut editor = ChartEditor::new(decoded.into_conditions());
            match editor.apply(&edit, &persister).await {
                EditOutcome::Committed(chart) => print_json(&chart)?,
                EditOutcome::RolledBack { reason, .. } => bail!("save failed: {reason}"),
            }
        }
        None => {
            println!("Use 'dentchart --help' for commands");
        }
    }

    Ok(())
}

/// Resolve client configuration from the environment and start proactive token refresh.
///
/// Refreshing runs for as long as the returned timer is held.
fn build_client() -> anyhow::Result<(Arc<ApiClient>, RefreshTimer)> {
    let token_file = token_file_from_env_value(std::env::var("DENTCHART_TOKEN_FILE").ok())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_FILE));
    let config = ClientConfig::new(
        base_url_from_env_value(std::env::var("DENTCHART_API_URL").ok()),
        refresh_lead_from_env_value(std::env::var("DENTCHART_REFRESH_LEAD_SECS").ok())?,
        request_timeout_from_env_value(std::env::var("DENTCHART_REQUEST_TIMEOUT_SECS").ok())?,
        Some(token_file),
    )?;
    tracing::debug!(
        base_url = config.base_url(),
        token_file = ?config.token_file(),
        refresh_lead_secs = config.refresh_lead().as_secs(),
        "client configured"
    );

    let client = Arc::new(ApiClient::from_config(&config)?);
    let refresh = client.spawn_refresh_timer(config.refresh_lead());
    Ok((client, refresh))
}

/// Password from the environment value when set, otherwise the first line of `input`.
fn read_password(env_value: Option<String>, mut input: impl BufRead) -> anyhow::Result<String> {
    if let Some(password) = env_value.filter(|p| !p.is_empty()) {
        return Ok(password);
    }
    eprint!("Password: ");
    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn print_decoded(
    decoded: DecodedFormula,
    rows: bool,
    registry: &ConditionRegistry,
) -> anyhow::Result<()> {
    for skipped in &decoded.skipped {
        eprintln!("skipped tooth entry {}: {}", skipped.index, skipped.reason);
    }
    if rows {
        print_json(&export::flatten(&decoded.conditions, registry))
    } else {
        print_json(&decoded.conditions)
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
