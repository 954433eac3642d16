use clap::Parser;
use dotenv::dotenv;
use rtgate::{
    global_config, setup_local_tracing, setup_tracing, AppError, AppResult, Gateway,
    ServerConfig, GLOBAL_CONFIG,
};
use std::path::PathBuf;
use tokio::runtime;

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log to the console only, skip the file appender and OTLP exporters
    #[arg(long)]
    pub local_log: bool,
}

#[derive(Parser)]
pub enum Command {
    /// print the effective config and exit
    PrintConfig,
}

fn main() -> AppResult<()> {
    dotenv().ok();
    let commandline: CommandLine = CommandLine::parse();

    let config_path = commandline
        .conf
        .as_ref()
        .map_or_else(|| PathBuf::from("./conf.toml"), PathBuf::from);
    let server_config = ServerConfig::set_up_config(config_path)?;
    GLOBAL_CONFIG
        .set(server_config)
        .map_err(|_| AppError::IllegalStateError("config already set".to_string()))?;

    if let Some(Command::PrintConfig) = commandline.command {
        println!("{:#?}", global_config());
        return Ok(());
    }

    // startup tokio runtime
    let rt = runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("rtgate-worker")
        .enable_all()
        .build()?;

    let _otel_guard = if commandline.local_log {
        setup_local_tracing()?;
        None
    } else {
        Some(rt.block_on(setup_tracing(&global_config().log))?)
    };

    let gateway = Gateway::new(global_config().clone());
    gateway.start(&rt)?;

    Ok(())
}
