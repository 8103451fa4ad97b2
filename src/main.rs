use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use colored::*;
use humansize::{format_size, BINARY};
use std::path::PathBuf;
use std::sync::Arc;

use hyperv_agent::core::hyperv::ManagementClient;
use hyperv_agent::core::{
    collect_once, Agent, AgentConfig, AgentRuntime, HyperVAgent, MetricReporter,
    PlatformApiReporter, Schedule, StdoutReporter,
};
use hyperv_agent::platform::WmiClient;

fn main() -> Result<()> {
    hyperv_agent::init_logging();

    let matches = Command::new("hyperv-agent")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Reports Hyper-V host and virtual machine metrics")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("run")
                .about("Poll every configured host until interrupted")
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("PATH")
                        .help("Path to plugin.json (defaults to the user config directory)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Write metrics to stdout even if a license key is configured")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("poll")
                .about("Run a single poll cycle against one host and print the metrics")
                .arg(
                    Arg::new("host")
                        .value_name("HOST")
                        .required(true)
                        .help("Hyper-V host name or address"),
                ),
        )
        .subcommand(
            Command::new("check")
                .about("Verify that a host's management interface is reachable")
                .arg(
                    Arg::new("host")
                        .value_name("HOST")
                        .required(true)
                        .help("Hyper-V host name or address"),
                ),
        )
        .subcommand(Command::new("version").about("Shows version information"))
        .get_matches();

    match matches.subcommand() {
        Some(("run", sub_matches)) => execute_run(sub_matches),
        Some(("poll", sub_matches)) => execute_poll(sub_matches),
        Some(("check", sub_matches)) => execute_check(sub_matches),
        Some(("version", _)) => {
            println!("hyperv-agent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        _ => Ok(()),
    }
}

fn management_client() -> Result<Box<dyn ManagementClient>> {
    let client = WmiClient::new().context("Failed to create WMI client")?;
    Ok(Box::new(client))
}

fn execute_run(matches: &ArgMatches) -> Result<()> {
    let config = match matches.get_one::<String>("config") {
        Some(path) => AgentConfig::load_from(&PathBuf::from(path))?,
        None => AgentConfig::load()?,
    };

    let reporter: Arc<dyn MetricReporter> = match config.license_key() {
        Some(key) if !matches.get_flag("json") => Arc::new(PlatformApiReporter::new(
            &config.endpoint,
            key,
            config.poll_interval(),
        )?),
        _ => Arc::new(StdoutReporter::new()),
    };

    let mut agents: Vec<Arc<dyn Agent>> = Vec::new();
    for name in config.agent_names() {
        let client = WmiClient::new()
            .context("Failed to create WMI client")?
            .with_operation_timeout(config.call_timeout());
        let agent = HyperVAgent::new(name, Box::new(client) as Box<dyn ManagementClient>)
            .with_call_timeout(config.call_timeout());
        agents.push(Arc::new(agent));
    }

    let schedule = Schedule {
        poll_interval: config.poll_interval(),
        cycle_timeout: config.cycle_timeout(),
    };

    let runtime = AgentRuntime::start(agents, reporter, schedule)?;

    let shutdown_tx = runtime.shutdown_handle();
    ctrlc::set_handler(move || {
        log::info!("Shutdown requested, waiting for in-flight cycles");
        let _ = shutdown_tx.send(());
    })
    .map_err(|e| anyhow::anyhow!("Failed to set Ctrl+C handler: {}", e))?;

    runtime.wait();
    Ok(())
}

fn execute_poll(matches: &ArgMatches) -> Result<()> {
    let host = matches
        .get_one::<String>("host")
        .context("HOST is required")?;

    let agent = HyperVAgent::new(host.as_str(), management_client()?);
    let batch = collect_once(&agent);

    if batch.is_empty() {
        println!("{}", "No metrics collected (see log for details)".yellow());
        return Ok(());
    }

    for metric in &batch.metrics {
        println!(
            "{:<60} {:>14} {}",
            metric.name,
            format!("{:.2}", metric.value).bold(),
            metric.unit.dimmed()
        );
    }
    println!();
    println!("{} metrics from {}", batch.len(), agent.agent_name().cyan());

    Ok(())
}

fn execute_check(matches: &ArgMatches) -> Result<()> {
    let host = matches
        .get_one::<String>("host")
        .context("HOST is required")?;
    let client = management_client()?;

    println!("Checking Hyper-V host {}...\n", host.cyan().bold());

    let mut healthy = true;

    match client.fetch_inventory(host) {
        Ok(records) => {
            let guests = records.iter().filter(|r| !r.is_host_record()).count();
            println!("  {} Inventory: {} virtual machines", "✓".green(), guests);
        }
        Err(e) => {
            healthy = false;
            println!("  {} Inventory: {}", "✗".red(), e);
        }
    }

    match client.fetch_management_service(host) {
        Ok(service) => println!(
            "  {} Management service: {}",
            "✓".green(),
            service.service_path.dimmed()
        ),
        Err(e) => {
            healthy = false;
            println!("  {} Management service: {}", "✗".red(), e);
        }
    }

    match client.fetch_host_memory_capacity(host) {
        Ok(bytes) => println!(
            "  {} Physical memory: {}",
            "✓".green(),
            format_size(bytes, BINARY)
        ),
        Err(e) => println!("  {} Physical memory: {}", "!".yellow(), e),
    }

    println!();
    if healthy {
        println!("{}", "Host is ready to be monitored".green().bold());
        Ok(())
    } else {
        anyhow::bail!("Host '{}' cannot be monitored", host)
    }
}
