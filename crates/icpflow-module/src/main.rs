use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use icpflow_core::config::{Config, ConfigBuilder, SharedConfig};
use icpflow_core::logging;
use icpflow_instrument::{RemoteControl, SimulatedInstrument};
use icpflow_module::{router, AppState, IcpModule};

/// Controls a PerkinElmer Syngistix ICP (such as the Avio 550 Max)
#[derive(Parser, Debug)]
#[command(name = "pe_icp_module", version, about)]
struct Args {
    /// Host to bind the HTTP server to
    #[arg(long)]
    host: Option<String>,

    /// Port to bind the HTTP server to
    #[arg(long)]
    port: Option<u16>,

    /// Address of the machine running Syngistix
    #[arg(long, alias = "server_ip")]
    server_ip: Option<String>,

    /// Address of this machine as seen by Syngistix
    #[arg(long, alias = "client_ip")]
    client_ip: Option<String>,

    /// Module and session name
    #[arg(long)]
    name: Option<String>,

    /// Directory of the Syngistix remote-control library
    #[arg(long)]
    library_path: Option<String>,

    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter, overridden by RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(server_ip) = self.server_ip {
            config.instrument.server_address = server_ip;
        }
        if let Some(client_ip) = self.client_ip {
            config.instrument.client_address = client_ip;
        }
        if let Some(name) = self.name {
            config.general.module_name = name.clone();
            config.instrument.session_name = name;
        }
        if let Some(library_path) = self.library_path {
            config.instrument.library_path = library_path;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

fn load_config(args: Args) -> Result<Config> {
    let mut builder = ConfigBuilder::new().with_environment_prefix("ICPFLOW");
    if let Some(path) = &args.config {
        builder = builder.with_config_file(path);
    }
    let mut config = builder.build().context("loading configuration")?;
    args.apply(&mut config);
    Ok(config)
}

async fn shutdown_signal(module: Arc<IcpModule>, token: tokio_util::sync::CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for ctrl-c: {}", e);
                token.cancelled().await;
            }
            info!("Interrupt received");
        }
        _ = token.cancelled() => {}
    }
    // Graceful shutdown waits for in-flight requests, including analysis waits.
    module.facade().interrupt_wait();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config(Args::parse())?;
    logging::init_from_config(&config.logging)?;
    icpflow_instrument::init()?;
    icpflow_engine::init()?;

    let config = SharedConfig::new(config);
    warn!("No vendor bridge is linked; driving a simulated instrument");
    let client: Arc<dyn RemoteControl> = Arc::new(SimulatedInstrument::default());

    let module = Arc::new(
        IcpModule::startup(config.clone(), client)
            .await
            .context("starting the module")?,
    );
    let state = AppState::new(module.clone());
    let token = state.shutdown.clone();

    let address = config.get().server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {}", address))?;
    info!("{} listening on {}", config.get().general.module_name, address);

    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(module.clone(), token))
        .await;

    module.shutdown().await?;
    served.context("serving HTTP")?;
    info!("Module stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_overrides_config_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[instrument]\nserver_address = \"10.1.1.1\"\ncommand_timeout_ms = 500\n\n[server]\nport = 3100"
        )
        .unwrap();

        let args = Args::parse_from([
            "pe_icp_module",
            "--config",
            file.path().to_str().unwrap(),
            "--client-ip",
            "10.1.1.2",
            "--name",
            "icp_bay_2",
        ]);
        let config = load_config(args).unwrap();

        assert_eq!(config.instrument.server_address, "10.1.1.1");
        assert_eq!(config.instrument.client_address, "10.1.1.2");
        assert_eq!(config.instrument.command_timeout_ms, 500);
        assert_eq!(config.instrument.session_name, "icp_bay_2");
        assert_eq!(config.general.module_name, "icp_bay_2");
        assert_eq!(config.server.port, 3100);
    }

    #[test]
    fn test_missing_config_file_fails() {
        let args = Args::parse_from(["pe_icp_module", "--config", "/nonexistent/pe_icp.toml"]);
        let err = load_config(args).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/pe_icp.toml"));
    }

    #[test]
    fn test_defaults_without_arguments() {
        let config = load_config(Args::parse_from(["pe_icp_module"])).unwrap();
        assert_eq!(config.instrument.server_address, "192.168.4.32");
        assert_eq!(config.general.module_name, "pe_icp_module");
    }
}
