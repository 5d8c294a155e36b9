use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{Input, Password};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use kp_admin_client::config::{CliArgs, Config};
use kp_admin_client::{
    ApiClient, ApiError, ApiResponse, RequestOptions, ResponseBody, Scope, SqliteStorage,
};

/// KP admin API client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    args: CliArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and store credentials
    Login {
        /// Log in as an employee instead of an admin
        #[arg(long)]
        employee: bool,

        /// Account email (prompted when omitted)
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Remove stored credentials
    Logout {
        /// Remove the employee credentials instead of the admin ones
        #[arg(long, conflicts_with = "all")]
        employee: bool,

        /// Remove both credential sets
        #[arg(long)]
        all: bool,
    },

    /// Show which credential set requests will use
    Status,

    /// GET a path
    Get {
        path: String,

        /// Query parameter, repeatable (key=value)
        #[arg(short, long = "query", value_parser = parse_key_value)]
        query: Vec<(String, String)>,
    },

    /// DELETE a path
    Delete {
        path: String,

        #[arg(short, long = "query", value_parser = parse_key_value)]
        query: Vec<(String, String)>,
    },

    /// POST a JSON body
    Post {
        path: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },

    /// PUT a JSON body
    Put {
        path: String,

        #[arg(short, long)]
        data: Option<String>,
    },

    /// PATCH a JSON body
    Patch {
        path: String,

        #[arg(short, long)]
        data: Option<String>,
    },

    /// Download a file (e.g. a report export)
    Download {
        path: String,

        /// Where to write the file
        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long = "query", value_parser = parse_key_value)]
        query: Vec<(String, String)>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before clap reads env defaults
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::from_args(cli.args)?;
    config.validate()?;

    // Initialize logging with a configured level; stdout is reserved for responses
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    tracing::debug!(
        base_url = %config.base_url,
        storage = %config.storage_file.display(),
        "Configuration loaded"
    );

    let storage = SqliteStorage::open(&config.storage_file).with_context(|| {
        format!(
            "Failed to open credential storage: {}",
            config.storage_file.display()
        )
    })?;
    let client = ApiClient::new(&config, Arc::new(storage))?;

    if let Err(e) = run(&client, cli.command).await {
        if let Some(api_err) = e.downcast_ref::<ApiError>() {
            if api_err.is_unauthorized() {
                eprintln!("Not authorized. Log in again with `kp-admin login`.");
            }
        }
        return Err(e);
    }

    Ok(())
}

async fn run(client: &ApiClient, command: Command) -> Result<()> {
    match command {
        Command::Login { employee, email } => {
            let scope = scope_for(employee);
            let email = match email {
                Some(email) => email,
                None => Input::<String>::new()
                    .with_prompt("Email")
                    .interact_text()
                    .context("Failed to read email")?,
            };
            let password = Password::new()
                .with_prompt("Password")
                .interact()
                .context("Failed to read password")?;

            client.login(scope, &email, &password).await?;
            println!("Logged in as {} ({})", email, scope);
        }

        Command::Logout { employee, all } => {
            if all {
                client.logout(Scope::Admin)?;
                client.logout(Scope::Employee)?;
            } else {
                client.logout(scope_for(employee))?;
            }
            println!("Logged out");
        }

        Command::Status => {
            println!("API: {}", client.base_url());
            let session = client.session();
            match (session.scope(), session.credentials()) {
                (Some(scope), Some(creds)) => println!(
                    "Session: {} (token {}..., refresh token {})",
                    scope,
                    creds.access_token.chars().take(8).collect::<String>(),
                    if creds.has_refresh_token() { "stored" } else { "missing" }
                ),
                _ => println!("Session: none"),
            }
        }

        Command::Get { path, query } => {
            let response = client
                .request(reqwest::Method::GET, &path, None, with_query(query))
                .await?;
            print_response(&response)?;
        }

        Command::Delete { path, query } => {
            let response = client
                .request(reqwest::Method::DELETE, &path, None, with_query(query))
                .await?;
            print_response(&response)?;
        }

        Command::Post { path, data } => {
            let response = client.post(&path, parse_body(data)?).await?;
            print_response(&response)?;
        }

        Command::Put { path, data } => {
            let response = client.put(&path, parse_body(data)?).await?;
            print_response(&response)?;
        }

        Command::Patch { path, data } => {
            let response = client.patch(&path, parse_body(data)?).await?;
            print_response(&response)?;
        }

        Command::Download {
            path,
            output,
            query,
        } => {
            let bytes = client.download(&path, with_query(query)).await?;
            std::fs::write(&output, &bytes)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Saved {} bytes to {}", bytes.len(), output.display());
        }
    }

    Ok(())
}

fn scope_for(employee: bool) -> Scope {
    if employee {
        Scope::Employee
    } else {
        Scope::Admin
    }
}

fn with_query(query: Vec<(String, String)>) -> RequestOptions {
    RequestOptions {
        query,
        ..RequestOptions::default()
    }
}

/// Parse `--data`, defaulting to an empty object
fn parse_body(data: Option<String>) -> Result<Value> {
    match data {
        Some(raw) => serde_json::from_str(&raw).context("--data is not valid JSON"),
        None => Ok(Value::Object(Default::default())),
    }
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{}`", s))
}

fn print_response(response: &ApiResponse) -> Result<()> {
    match &response.body {
        ResponseBody::Json(value) => println!("{}", serde_json::to_string_pretty(value)?),
        ResponseBody::Text(text) => println!("{}", text),
        ResponseBody::Bytes(bytes) => println!("<{} bytes>", bytes.len()),
        ResponseBody::Empty => println!("{}", response.status),
    }
    Ok(())
}
