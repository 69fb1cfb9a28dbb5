use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use reactive_ofp::clock::SystemClock;
use reactive_ofp::config::{AppConfig, Config};
use reactive_ofp::load_balancer::LoadBalancer;
use reactive_ofp::ofp_controller::{handle_client_connected, OfpApp};
use reactive_ofp::policy_switch::PolicySwitch;

/// Reactive OpenFlow 1.0 controller.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration.
    #[arg(short, long, default_value = "controller.toml")]
    config: PathBuf,
    /// Address to accept switch connections on, overriding the config file.
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

fn build_app(app: AppConfig) -> Result<Arc<dyn OfpApp>> {
    Ok(match app {
        AppConfig::LoadBalancer(lb) => {
            info!("load balancing {} over {} backends", lb.virtual_ip, lb.backends.len());
            Arc::new(LoadBalancer::new(lb)?)
        }
        AppConfig::PolicySwitch(ps) => {
            info!("policy switch with {} admission rules", ps.rules.len());
            Arc::new(PolicySwitch::new(ps, Arc::new(SystemClock))?)
        }
    })
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let listen = args.listen.unwrap_or(config.listen);
    let app = build_app(config.app)?;

    let listener = TcpListener::bind(listen).with_context(|| format!("binding {}", listen))?;
    info!("listening for switches on {}", listen);
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let app = Arc::clone(&app);
                std::thread::spawn(move || handle_client_connected(stream, app));
            }
            Err(e) => error!("accept failed: {}", e),
        }
    }
    Ok(())
}
