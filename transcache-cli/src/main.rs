use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use transcache::{Layer, RemoteLayer, TcpTransmitter, Transmitter};

#[derive(Parser, Debug)]
#[command(name = "transcache-cli")]
#[command(about = "transcache CLI - talk to the entry layer of a served chain", long_about = None)]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short = 'p', long, default_value = "15600")]
    port: u16,

    /// Command to execute (if not in interactive mode)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

struct ChainClient {
    layer: RemoteLayer<String, Vec<u8>>,
    transmitter: Arc<TcpTransmitter>,
}

impl ChainClient {
    fn new(host: &str, port: u16) -> Self {
        let transmitter = Arc::new(TcpTransmitter::new(format!("{}:{}", host, port)));
        Self {
            layer: RemoteLayer::new("server", transmitter.clone()),
            transmitter,
        }
    }

    async fn execute_command(&self, command: &str, args: &[String]) -> Result<String> {
        let start = Instant::now();

        let response = match command.to_uppercase().as_str() {
            "SET" => self.cmd_set(args).await?,
            "GET" => self.cmd_get(args).await?,
            "DEL" | "REMOVE" => self.cmd_del(args).await?,
            "SYNC" => self.cmd_sync().await?,
            "HELP" => self.help_text(),
            _ => return Err(anyhow::anyhow!("Unknown command: {}", command)),
        };

        let elapsed = start.elapsed();
        Ok(format!(
            "{}\n{}",
            response,
            format!("({:.2?})", elapsed).dimmed()
        ))
    }

    async fn cmd_set(&self, args: &[String]) -> Result<String> {
        if args.len() < 2 {
            return Err(anyhow::anyhow!("Usage: SET key value"));
        }

        let value = args[1..].join(" ").into_bytes();
        self.layer.set(args[0].clone(), value).await?;
        Ok("OK".green().to_string())
    }

    async fn cmd_get(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: GET key"));
        }

        match self.layer.get(&args[0]).await? {
            Some(value) => Ok(format!("\"{}\"", String::from_utf8_lossy(&value))),
            None => Ok("(nil)".yellow().to_string()),
        }
    }

    async fn cmd_del(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: DEL key [key ...]"));
        }

        for key in args {
            self.layer.remove(key).await?;
        }
        Ok(format!("(integer) {}", args.len()))
    }

    async fn cmd_sync(&self) -> Result<String> {
        self.layer.sync().await?;
        Ok("OK".green().to_string())
    }

    fn help_text(&self) -> String {
        format!(
            r#"{}

{}
  SET key value              Set key to hold a string value
  GET key                    Get the value of key
  DEL key [key ...]          Remove one or more keys
  SYNC                       Flush every layer down to the terminal layer
  HELP                       Show this help message
  QUIT                       Exit the CLI
"#,
            "transcache CLI - Available Commands".bold().cyan(),
            "Commands:".bold(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let args = Args::parse();
    let client = ChainClient::new(&args.host, args.port);

    let result = if !args.command.is_empty() {
        let cmd = &args.command[0];
        let cmd_args: Vec<String> = args.command[1..].to_vec();

        match client.execute_command(cmd, &cmd_args).await {
            Ok(output) => {
                info!("{}", output);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "{}", format!("Error: {}", e).red());
                std::process::exit(1);
            }
        }
    } else {
        run_interactive(&client, &args.host, args.port).await
    };

    client.transmitter.stop().await?;
    result
}

async fn run_interactive(client: &ChainClient, host: &str, port: u16) -> Result<()> {
    info!(
        "{}",
        format!("transcache CLI v{}", env!("CARGO_PKG_VERSION"))
            .bold()
            .cyan()
    );
    info!("Server at {}:{}", host, port);
    info!("Type {} for available commands\n", "HELP".bold());

    let mut rl = DefaultEditor::new()?;

    loop {
        let prompt = format!("{}> ", format!("transcache {}:{}", host, port).green());
        let readline = rl.readline(&prompt);

        match readline {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }

                rl.add_history_entry(&line)?;

                let parts: Vec<String> = line.split_whitespace().map(String::from).collect();
                let cmd = &parts[0];
                let args = &parts[1..];

                if cmd.eq_ignore_ascii_case("QUIT") || cmd.eq_ignore_ascii_case("EXIT") {
                    info!("Goodbye!");
                    break;
                }

                match client.execute_command(cmd, args).await {
                    Ok(output) => info!("{}", output),
                    Err(e) => {
                        error!(error = %e, "{}", format!("Error: {}", e).red());
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                info!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                info!("Goodbye!");
                break;
            }
            Err(err) => {
                error!(error = ?err, "Readline error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}
