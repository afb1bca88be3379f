use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;

use common::{
    Method, NodeInfo, NodesRequest, ProcessReply, ProcessRequest, RpcClient, StatusReply,
    StatusRequest,
};

/// Igual que en el worker:
/// - En Docker: MASTER_URL=http://master:8080
/// - Local: default http://localhost:8080
fn master_base_url() -> String {
    env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con el master")]
struct Cli {
    /// Plazo de cada llamada, en segundos
    #[arg(long, default_value_t = 120)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Envía un corpus para repartir entre los nodos vivos
    Process {
        #[arg(value_name = "ARCHIVO")]
        file: PathBuf,
    },
    /// Estado de las tareas del job pull
    Status,
    /// Lista los nodos vivos
    Nodes,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let rpc = RpcClient::from_http(Client::new());
    let base_url = master_base_url();
    let deadline = Duration::from_secs(cli.timeout);

    match cli.command {
        Commands::Process { file } => {
            let corpus = tokio::fs::read(&file)
                .await
                .with_context(|| format!("no se pudo leer {}", file.display()))?;
            let reply: ProcessReply = rpc
                .call(&base_url, Method::Process, &ProcessRequest { corpus }, deadline)
                .await?;

            println!("Job {} procesado:", reply.job_id);
            println!("  nodos: {}", reply.nodes);
            println!("  bytes por chunk: {}", reply.chunk_len);
            if reply.dropped_bytes > 0 {
                println!("  bytes sin procesar al final: {}", reply.dropped_bytes);
            }
            for (node, output) in &reply.outputs {
                println!("  {} -> {}", node, output);
            }
        }
        Commands::Status => {
            let status: StatusReply = rpc
                .call(&base_url, Method::Status, &StatusRequest {}, deadline)
                .await?;

            println!("Tareas:");
            println!("  total: {}", status.total);
            println!("  idle: {}", status.idle);
            println!("  en curso: {}", status.leased);
            println!("  terminadas: {}", status.done);
            println!("  job terminado: {}", status.finished);
            println!("Workers con id: {}", status.workers);
            println!("Nodos vivos: {}", status.live_nodes);
        }
        Commands::Nodes => {
            let nodes: Vec<NodeInfo> = rpc
                .call(&base_url, Method::Nodes, &NodesRequest {}, deadline)
                .await?;

            if nodes.is_empty() {
                println!("No hay nodos vivos");
            }
            for n in nodes {
                let cpu = n
                    .last_cpu_percent
                    .map(|c| format!("{:.1}%", c))
                    .unwrap_or_else(|| "-".to_string());
                let mem = n
                    .last_mem_bytes
                    .map(|m| format!("{} MB", m / (1024 * 1024)))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{} ({}) worker={} cpu={} mem={} visto hace {}s",
                    n.address,
                    n.hostname,
                    n.worker_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
                    cpu,
                    mem,
                    n.last_seen_secs_ago
                );
            }
        }
    }

    Ok(())
}
