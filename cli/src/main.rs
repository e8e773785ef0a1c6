//! Berth CLI - Command-line interface for the Berth orchestrator
//!
//! Create, start, stop and destroy preview containers and run commands in them

use std::collections::HashMap;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

/// Berth CLI - Manage preview containers
#[derive(Parser)]
#[command(name = "berth")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CLI for the Berth preview container orchestrator", long_about = None)]
struct Cli {
    /// Berth API URL
    #[arg(short, long, env = "BERTH_API_URL", default_value = "http://127.0.0.1:8080")]
    api_url: String,

    /// API key for authentication
    #[arg(short, long, env = "BERTH_API_KEY")]
    key: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a container (it is not started)
    Create {
        /// Image to run
        image: String,

        /// Conversation the container belongs to
        #[arg(short, long)]
        conversation: String,

        /// Container name
        #[arg(short, long)]
        name: Option<String>,

        /// Port to publish, in `docker -p` order: [HOST:]CONTAINER[/udp]
        #[arg(short, long = "port")]
        ports: Vec<String>,

        /// Environment variable: KEY=VALUE
        #[arg(short, long = "env")]
        env: Vec<String>,

        /// Working directory inside the container
        #[arg(short, long)]
        workdir: Option<String>,

        /// Snapshot the container was built from
        #[arg(long)]
        snapshot: Option<String>,
    },

    /// List containers
    List,

    /// Show a container and its preview URL
    Get { id: String },

    /// Start a container
    Start { id: String },

    /// Stop a container
    Stop { id: String },

    /// Run a shell command in a running container
    Exec {
        id: String,

        /// Command line, passed to the container's shell
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,

        /// Working directory for the command
        #[arg(short, long)]
        workdir: Option<String>,

        /// Environment variable for the command: KEY=VALUE
        #[arg(short, long = "env")]
        env: Vec<String>,
    },

    /// Destroy a container
    Destroy { id: String },

    /// Get server health status
    Health,
}

struct ApiClient {
    client: Client,
    api_url: String,
    key: Option<String>,
}

impl ApiClient {
    fn new(api_url: String, key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            key,
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.key {
            Some(key) => request.header("Authorization", format!("ApiKey {}", key)),
            None => request,
        }
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.client.get(format!("{}{}", self.api_url, path));
        parse(self.authorize(request).send().context("Failed to send request")?)
    }

    fn post<T: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> Result<T> {
        let request = self
            .client
            .post(format!("{}{}", self.api_url, path))
            .json(body);
        parse(self.authorize(request).send().context("Failed to send request")?)
    }

    fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.client.delete(format!("{}{}", self.api_url, path));
        parse(self.authorize(request).send().context("Failed to send request")?)
    }
}

fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body: Value = response.json().unwrap_or(Value::Null);
        let message = body["message"].as_str().unwrap_or("Unknown error");
        anyhow::bail!("Request failed ({}): {}", status, message);
    }
    response.json().context("Failed to parse response")
}

/// Parse `[HOST:]CONTAINER[/udp|/tcp]`, the order `docker run -p` uses
fn parse_port(spec: &str) -> Result<Value> {
    let (ports, protocol) = match spec.split_once('/') {
        Some((ports, protocol)) => (ports, protocol.to_lowercase()),
        None => (spec, "tcp".to_string()),
    };
    if protocol != "tcp" && protocol != "udp" {
        anyhow::bail!("Unknown protocol in port spec: {}", spec);
    }

    let (host, container) = match ports.split_once(':') {
        Some((host, container)) => (Some(host), container),
        None => (None, ports),
    };

    let container_port: u16 = container
        .parse()
        .with_context(|| format!("Invalid container port: {}", spec))?;
    let host_port = host
        .map(|h| h.parse::<u16>())
        .transpose()
        .with_context(|| format!("Invalid host port: {}", spec))?;

    let mut mapping = json!({ "containerPort": container_port, "protocol": protocol });
    if let Some(host_port) = host_port {
        mapping["hostPort"] = json!(host_port);
    }
    Ok(mapping)
}

fn parse_env(vars: &[String]) -> Result<HashMap<String, String>> {
    vars.iter()
        .map(|var| {
            var.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("Expected KEY=VALUE, got {}", var))
        })
        .collect()
}

fn colored_status(status: &str) -> colored::ColoredString {
    match status {
        "running" => status.green(),
        "creating" => status.yellow(),
        "error" => status.red(),
        _ => status.normal(),
    }
}

fn print_container(response: &Value) {
    let container = &response["container"];
    println!("{}", "=".repeat(60).bright_blue());
    println!("{} {}", "ID:".bright_cyan(), container["id"].as_str().unwrap_or("?"));
    println!("{} {}", "Name:".bright_cyan(), container["name"].as_str().unwrap_or("?"));
    println!("{} {}", "Image:".bright_cyan(), container["image"].as_str().unwrap_or("?"));
    println!(
        "{} {}",
        "Status:".bright_cyan(),
        colored_status(container["status"].as_str().unwrap_or("?"))
    );

    if let Some(ports) = container["ports"].as_array() {
        for port in ports {
            let host = port["hostPort"]
                .as_u64()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{} {}/{} -> {}",
                "Port:".bright_cyan(),
                port["containerPort"],
                port["protocol"].as_str().unwrap_or("tcp"),
                host
            );
        }
    }

    if let Some(url) = response["baseUrl"].as_str() {
        println!("{} {}", "Preview:".bright_cyan(), url.underline());
    }

    if let Some(error) = container["error"].as_str() {
        println!("{} {}", "Error:".bright_red(), error);
    }
    println!("{}", "=".repeat(60).bright_blue());
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let api = ApiClient::new(cli.api_url, cli.key);
    let json_output = cli.output == OutputFormat::Json;

    match cli.command {
        Commands::Create {
            image,
            conversation,
            name,
            ports,
            env,
            workdir,
            snapshot,
        } => {
            let ports = ports
                .iter()
                .map(|p| parse_port(p))
                .collect::<Result<Vec<_>>>()?;

            let request = json!({
                "image": image,
                "name": name,
                "ports": ports,
                "environment": parse_env(&env)?,
                "workingDirectory": workdir,
                "conversationId": conversation,
                "snapshotId": snapshot,
            });

            let result: Value = api.post("/api/v1/containers", &request)?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", "✓ Created".green());
                print_container(&result);
            }
        }

        Commands::List => {
            let result: Value = api.get("/api/v1/containers")?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                let containers = result["containers"].as_array().context("Invalid response")?;
                println!("{} ({})", "Containers:".bright_cyan().bold(), containers.len());
                for entry in containers {
                    let container = &entry["container"];
                    println!(
                        "  {} {} {} {}",
                        container["id"].as_str().unwrap_or("?"),
                        container["name"].as_str().unwrap_or("?"),
                        colored_status(container["status"].as_str().unwrap_or("?")),
                        entry["baseUrl"].as_str().unwrap_or("")
                    );
                }
            }
        }

        Commands::Get { id } => {
            let result: Value = api.get(&format!("/api/v1/containers/{}", id))?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_container(&result);
            }
        }

        Commands::Start { id } => {
            let result: Value = api.post(&format!("/api/v1/containers/{}/start", id), &json!({}))?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", "✓ Started".green());
                print_container(&result);
            }
        }

        Commands::Stop { id } => {
            let result: Value = api.post(&format!("/api/v1/containers/{}/stop", id), &json!({}))?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{} {}", "✓ Stopped:".green(), id);
            }
        }

        Commands::Exec {
            id,
            command,
            workdir,
            env,
        } => {
            let request = json!({
                "command": command.join(" "),
                "workingDirectory": workdir,
                "environment": parse_env(&env)?,
            });

            let result: Value = api.post(&format!("/api/v1/containers/{}/exec", id), &request)?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                let exit_code = result["exitCode"].as_i64().unwrap_or(-1);
                let stdout = result["stdout"].as_str().unwrap_or("");
                let stderr = result["stderr"].as_str().unwrap_or("");

                if !stdout.is_empty() {
                    print!("{}", stdout);
                }
                if !stderr.is_empty() {
                    eprint!("{}", stderr.red());
                }

                let code = if exit_code == 0 {
                    exit_code.to_string().green()
                } else {
                    exit_code.to_string().red()
                };
                println!("{} {}", "Exit Code:".bright_cyan(), code);
            }
        }

        Commands::Destroy { id } => {
            let result: Value = api.delete(&format!("/api/v1/containers/{}", id))?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{} {}", "✓ Destroyed:".green(), id);
            }
        }

        Commands::Health => {
            let health: Value = api.get("/health")?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&health)?);
            } else {
                let status = health["status"].as_str().unwrap_or("unknown");
                println!("{}", "Berth Orchestrator Status".bright_cyan().bold());
                println!("{}", "=".repeat(40).bright_blue());
                println!(
                    "{} {}",
                    "Status:".cyan(),
                    if status == "healthy" {
                        status.green()
                    } else {
                        status.yellow()
                    }
                );
                println!("{} {}", "Version:".cyan(), health["version"].as_str().unwrap_or("?"));
                println!("{} {}s", "Uptime:".cyan(), health["uptimeSeconds"]);
                println!("{} {}", "Active Containers:".cyan(), health["activeContainers"]);
                println!(
                    "{} {}",
                    "Docker:".cyan(),
                    health["dockerVersion"].as_str().unwrap_or("unreachable")
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port() {
        assert_eq!(
            parse_port("3000").unwrap(),
            json!({ "containerPort": 3000, "protocol": "tcp" })
        );
        assert_eq!(
            parse_port("8080:5173").unwrap(),
            json!({ "containerPort": 5173, "hostPort": 8080, "protocol": "tcp" })
        );
        assert_eq!(
            parse_port("5353:53/udp").unwrap(),
            json!({ "containerPort": 53, "hostPort": 5353, "protocol": "udp" })
        );
        assert_eq!(parse_port("53/UDP").unwrap()["protocol"], "udp");
        assert!(parse_port("http").is_err());
        assert!(parse_port("80/sctp").is_err());
    }

    #[test]
    fn test_exec_accepts_environment() {
        let cli = Cli::try_parse_from([
            "berth", "exec", "c-1", "-e", "PORT=5173", "-w", "/app", "npm", "run", "dev",
        ])
        .unwrap();

        match cli.command {
            Commands::Exec {
                id,
                command,
                workdir,
                env,
            } => {
                assert_eq!(id, "c-1");
                assert_eq!(command.join(" "), "npm run dev");
                assert_eq!(workdir.as_deref(), Some("/app"));
                assert_eq!(parse_env(&env).unwrap()["PORT"], "5173");
            }
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn test_parse_env() {
        let env = parse_env(&["NODE_ENV=production".to_string(), "A=b=c".to_string()]).unwrap();
        assert_eq!(env["NODE_ENV"], "production");
        assert_eq!(env["A"], "b=c");
        assert!(parse_env(&["MISSING".to_string()]).is_err());
    }
}
