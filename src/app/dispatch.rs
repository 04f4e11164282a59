use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::controller::cron;
use crate::daemon::{self, Components};
use crate::resources::{AgentPolicy, AgentRun};
use crate::workload::{BuildContext, build_input_config_map, build_job};
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;

pub async fn dispatch(cli: Cli, mut config: Config) -> Result<()> {
    match cli.command {
        Commands::Daemon { host, port } => {
            apply_bind_overrides(&mut config, host, port);
            daemon::run(Arc::new(config), Components::ALL).await
        }
        Commands::Controller => daemon::run(Arc::new(config), Components::CONTROLLERS).await,
        Commands::Webhook { host, port } => {
            apply_bind_overrides(&mut config, host, port);
            daemon::run(Arc::new(config), Components::WEBHOOK).await
        }
        Commands::CronNext { expression, count } => {
            for time in cron::upcoming(&expression, Utc::now(), count)? {
                println!("{}", time.to_rfc3339());
            }
            Ok(())
        }
        Commands::Render {
            run,
            policy,
            memory,
        } => {
            let rendered = render(&config, &run, policy.as_deref(), memory)?;
            println!("{rendered}");
            Ok(())
        }
    }
}

fn apply_bind_overrides(config: &mut Config, host: Option<String>, port: Option<u16>) {
    if let Some(host) = host {
        config.webhook.host = host;
    }
    if let Some(port) = port {
        config.webhook.port = port;
    }
}

/// Renders the job and input config map for a run manifest as pretty JSON.
pub fn render(
    config: &Config,
    run_path: &Path,
    policy_path: Option<&Path>,
    memory_enabled: bool,
) -> Result<String> {
    let run: AgentRun = read_manifest(run_path)?;
    let policy: Option<AgentPolicy> = policy_path.map(read_manifest).transpose()?;

    let ctx = BuildContext {
        config: &config.workload,
        policy: policy.as_ref().map(|policy| &policy.spec),
        memory_enabled,
    };
    let job = build_job(&run, &ctx).context("Failed to build job")?;
    let rendered = serde_json::json!({
        "job": job,
        "inputConfigMap": build_input_config_map(&run),
    });
    Ok(serde_json::to_string_pretty(&rendered)?)
}

fn read_manifest<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}
