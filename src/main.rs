//! Hive 命令行入口：加载配置、组装 Swarm、运行 N 轮并输出共识与遥测

use std::io::{IsTerminal, Read};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use hive::config::load_config;
use hive::{observability, SwarmBuilder};

#[derive(Parser)]
#[command(
    name = "hive",
    version,
    about = "Coordinate several model agents through consensus rounds"
)]
struct Cli {
    /// Task prompt; read from stdin when omitted
    task: Option<String>,

    /// Number of coordination rounds
    #[arg(long, env = "HIVE_ROUNDS")]
    rounds: Option<u32>,

    /// Extra TOML config file layered over config/default.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sandbox root for file tools
    #[arg(long)]
    root: Option<PathBuf>,

    /// Apply arbiter-approved write proposals
    #[arg(long)]
    allow_write: bool,

    /// Print the full run result (transcript, telemetry) as JSON
    #[arg(long)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn read_task(arg: Option<String>) -> anyhow::Result<String> {
    let task = match arg {
        Some(t) => t,
        None => {
            let mut stdin = std::io::stdin();
            if stdin.is_terminal() {
                eprintln!("Enter task, then Ctrl-D:");
            }
            let mut buf = String::new();
            stdin.read_to_string(&mut buf).context("Failed to read task from stdin")?;
            buf
        }
    };
    let task = task.trim().to_string();
    if task.is_empty() {
        bail!("Empty task");
    }
    Ok(task)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.clone()).context("Failed to load config")?;
    observability::init(cli.json_logs || config.swarm.json_logs);

    if let Some(rounds) = cli.rounds {
        config.swarm.rounds = rounds;
    }
    if let Some(root) = cli.root.clone() {
        config.tools.root = root;
    }
    if cli.allow_write {
        config.tools.allow_write = true;
    }

    let task = read_task(cli.task)?;
    let mut swarm = SwarmBuilder::new(config)
        .build()
        .context("Failed to assemble swarm")?;

    let result = swarm.run(&task).await;

    for (idx, consensus) in result.round_consensus.iter().enumerate() {
        println!("\n=== Round {} consensus ===", idx + 1);
        println!("{}", consensus.as_deref().unwrap_or("(arbiter unavailable)"));
    }
    println!("\n=== Telemetry Summary ===");
    println!("{}", result.telemetry.to_json_pretty());

    if cli.json {
        let out = serde_json::to_string_pretty(&result).context("Failed to serialize run result")?;
        println!("{out}");
    }
    Ok(())
}
