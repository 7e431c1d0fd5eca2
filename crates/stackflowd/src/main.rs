use clap::{Parser, Subcommand};
use stackflow_cloud_hpcloud::HpCloudBackend;
use stackflow_cloud_rightscale::RightScaleBackend;
use stackflow_config::Config;
use stackflow_worker::{
    CloudStackDeployer, DirectoryCatalog, JobExecutor, LinesQueue, Listener, NoopConfigurator,
    QueueMessage,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stackflowd")]
#[command(about = "Provision cloud stacks from queued deployment jobs", long_about = None)]
struct Cli {
    /// Configuration file (discovered when omitted)
    #[arg(short, long, env = "STACKFLOW_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume JSON queue messages from stdin, write YAML replies to stdout
    Serve,
    /// Deploy one stack and print the response
    Run {
        stack_reference: String,

        /// Job name (defaults to the stack reference)
        #[arg(short, long)]
        job_name: Option<String>,

        #[arg(short, long, default_value = "local")]
        request_id: String,
    },
    /// Show version information
    Version,
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load(&path)?,
        None => stackflow_config::load_config()?,
    };
    Ok(config)
}

fn build_listener(config: &Config) -> Listener {
    let deployer = CloudStackDeployer::new(
        config.deployer_credentials.clone(),
        config.poll.timeout(),
        Arc::new(NoopConfigurator),
    )
    .with_backend(Arc::new(HpCloudBackend::new()))
    .with_backend(Arc::new(RightScaleBackend::new()));

    let executor = JobExecutor::new(Arc::new(deployer), config.worker.pool_size);
    tracing::info!(
        "Worker pool of {}, stacks from {}",
        executor.pool_size(),
        config.worker.stack_dir.display()
    );
    Listener::new(
        Arc::new(DirectoryCatalog::new(&config.worker.stack_dir)),
        Arc::new(executor),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries replies, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Version => {
            println!("stackflowd {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Serve => {
            let listener = build_listener(&load_config(cli.config)?);
            let reader = tokio::io::BufReader::new(tokio::io::stdin());
            let mut queue = LinesQueue::new(reader, tokio::io::stdout());
            listener.serve(&mut queue).await?;
        }
        Commands::Run {
            stack_reference,
            job_name,
            request_id,
        } => {
            let listener = build_listener(&load_config(cli.config)?);
            let message = QueueMessage {
                job_name: job_name.unwrap_or_else(|| stack_reference.clone()),
                request_id,
                stack_reference,
            };
            let response = listener.handle(message).await;
            print!("{}", response.dump_yaml()?);
            if !response.is_success() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackflow_worker::Status;
    use std::fs;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from([
            "stackflowd",
            "run",
            "web-tier",
            "--request-id",
            "r1",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                stack_reference,
                job_name,
                request_id,
            } => {
                assert_eq!(stack_reference, "web-tier");
                assert_eq!(job_name, None);
                assert_eq!(request_id, "r1");
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_version_command() {
        let cli = Cli::try_parse_from(["stackflowd", "version"]).unwrap();
        assert!(matches!(cli.command, Commands::Version));
        assert!(cli.config.is_none());
    }

    #[tokio::test]
    async fn test_stack_for_unconfigured_backend_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(
            temp_dir.path().join("web-tier.yml"),
            "name: web-tier\nbackend: aws\n",
        )
        .unwrap();
        let mut config = Config::default();
        config.worker.stack_dir = temp_dir.path().to_path_buf();

        let response = build_listener(&config)
            .handle(QueueMessage {
                job_name: "web-tier".to_string(),
                request_id: "r1".to_string(),
                stack_reference: "web-tier".to_string(),
            })
            .await;
        assert_eq!(response.status, Status::Failure);
        assert_eq!(
            response.message.as_deref(),
            Some("Unknown backend 'aws'. See logs for a complete stack trace.")
        );
    }
}
