use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use nrm_api_client::{Coordinates, FieldApiClient, WorkDemandUpdate};
use nrm_client_core::{
    AuthConfig, AuthContext, AuthResolver, CredentialBundle, DetachedHost, FileHostBridge,
    HandshakeOutcome, HostBridge,
};
use serde_json::{Value, json};

#[derive(Parser, Debug)]
#[command(name = "nrm-dev-shell")]
#[command(about = "Drive the field client auth handshake and backend calls from a terminal")]
pub struct DevShellCli {
    /// JSON file standing in for the native host's injected credential.
    #[arg(long, global = true, env = "NRM_HOST_CREDENTIAL_FILE")]
    pub host_file: Option<PathBuf>,
    /// Overrides NRM_API_BASE_URL for this invocation.
    #[arg(long, global = true)]
    pub base_url: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the handshake and print the resolved identity
    Resolve,
    /// Manage the development credential override
    Override {
        #[command(subcommand)]
        action: OverrideCommand,
    },
    /// Ask the host (or the development fallback) for a fresh credential
    Refresh,
    /// List plans for a project
    Plans { project: String },
    /// Request a DPR document by email
    DprEmail {
        #[arg(long)]
        plan: String,
        #[arg(long)]
        email: String,
    },
    /// Upload a KML file
    UploadKml { path: PathBuf },
    /// Accept or reject a work-demand item
    WorkDemand {
        #[command(subcommand)]
        decision: WorkDemandCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum OverrideCommand {
    /// Install a credential bundle, given inline as JSON or as `@path`
    Set { input: String },
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum WorkDemandCommand {
    Accept(WorkDemandTarget),
    Reject {
        #[command(flatten)]
        target: WorkDemandTarget,
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct WorkDemandTarget {
    pub item: String,
    #[arg(long)]
    pub plan: Option<String>,
    #[arg(long, requires = "longitude", allow_hyphen_values = true)]
    pub latitude: Option<f64>,
    #[arg(long, requires = "latitude", allow_hyphen_values = true)]
    pub longitude: Option<f64>,
}

impl WorkDemandTarget {
    fn into_update(self, reject: Option<Option<String>>) -> Result<WorkDemandUpdate> {
        let mut update = match reject {
            None => WorkDemandUpdate::accept(self.item),
            Some(reason) => WorkDemandUpdate::reject(self.item, reason),
        };
        if let Some(plan) = self.plan {
            update = update.with_plan(plan);
        }
        if let (Some(latitude), Some(longitude)) = (self.latitude, self.longitude) {
            update = update.with_coordinates(Coordinates::new(latitude, longitude)?);
        }
        Ok(update)
    }
}

pub fn build_context(cli: &DevShellCli) -> Result<AuthContext> {
    let mut config = AuthConfig::from_env().context("invalid auth configuration")?;
    if let Some(base_url) = cli.base_url.as_deref() {
        config.api_base_url = nrm_client_core::normalize_base_url(base_url)
            .with_context(|| format!("invalid --base-url {base_url}"))?;
    }
    let host: Arc<dyn HostBridge> = match cli.host_file.as_ref() {
        Some(path) => Arc::new(FileHostBridge::new(path)),
        None => Arc::new(DetachedHost),
    };
    tracing::debug!(
        mode = config.mode.as_str(),
        api_base_url = %config.api_base_url,
        host_file = ?cli.host_file,
        "auth context configured"
    );
    Ok(AuthContext::new(host, config))
}

pub async fn execute(cli: DevShellCli, out: &mut impl Write) -> Result<()> {
    let context = build_context(&cli)?;
    let resolver = context.resolver();

    let report = match cli.command {
        Commands::Resolve => {
            let outcome = resolver.resolve_outcome().await;
            outcome_report(resolver, &outcome)
        }
        Commands::Override {
            action: OverrideCommand::Set { input },
        } => {
            let raw = read_override_input(&input).await?;
            let bundle = resolver
                .set_override_json(&raw)
                .context("override rejected; credential state unchanged")?;
            warn_if_ephemeral(resolver);
            bundle_report("dev_override", &bundle)
        }
        Commands::Override {
            action: OverrideCommand::Clear,
        } => {
            resolver.clear_override().context("override clear rejected")?;
            warn_if_ephemeral(resolver);
            json!({ "source": "absent", "signed_in": false })
        }
        Commands::Refresh => {
            resolver.resolve().await;
            let bundle = resolver.refresh().await.context("refresh failed")?;
            let source = resolver
                .last_outcome()
                .map_or("unknown", |outcome| outcome.source.as_str());
            bundle_report(source, &bundle)
        }
        Commands::Plans { project } => {
            let api = signed_in_api(&context).await?;
            let plans = api.list_plans(&project).await?;
            Value::Array(
                plans
                    .into_iter()
                    .map(|plan| {
                        json!({
                            "id": plan.id,
                            "name": plan.name,
                            "village": plan.village_name,
                            "completed": plan.is_completed,
                            "dpr_generated": plan.is_dpr_generated,
                        })
                    })
                    .collect(),
            )
        }
        Commands::DprEmail { plan, email } => {
            let api = signed_in_api(&context).await?;
            api.request_dpr_email(&plan, &email).await?
        }
        Commands::UploadKml { path } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let file_name = file_name(&path)?;
            let api = signed_in_api(&context).await?;
            api.upload_kml(&file_name, bytes).await?
        }
        Commands::WorkDemand { decision } => {
            let update = match decision {
                WorkDemandCommand::Accept(target) => target.into_update(None)?,
                WorkDemandCommand::Reject { target, reason } => {
                    target.into_update(Some(reason))?
                }
            };
            let api = signed_in_api(&context).await?;
            api.upsert_work_demand(&update).await?
        }
    };

    writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
    Ok(())
}

async fn signed_in_api(context: &AuthContext) -> Result<FieldApiClient> {
    if context.resolver().resolve().await.is_none() {
        bail!("no credential available; set one with `override set` or --host-file");
    }
    Ok(FieldApiClient::from_context(context)?)
}

async fn read_override_input(input: &str) -> Result<String> {
    match input.strip_prefix('@') {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read override file {path}")),
        None => Ok(input.to_string()),
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .with_context(|| format!("{} has no usable file name", path.display()))
}

fn warn_if_ephemeral(resolver: &AuthResolver) {
    if resolver.config().dev_cache_path.is_none() {
        tracing::warn!("NRM_AUTH_DEV_CACHE_PATH is unset; the change lasts only for this invocation");
    }
}

fn outcome_report(resolver: &AuthResolver, outcome: &HandshakeOutcome) -> Value {
    let mut report = match outcome.bundle.as_ref() {
        Some(bundle) => bundle_report(outcome.source.as_str(), bundle),
        None => json!({ "source": outcome.source.as_str(), "signed_in": false }),
    };
    if let Value::Object(map) = &mut report {
        map.insert("state".to_string(), json!(resolver.state().as_str()));
        map.insert("poll_attempts".to_string(), json!(outcome.poll_attempts));
        map.insert("timed_out".to_string(), json!(outcome.timed_out));
    }
    report
}

/// Identity summary. The access token itself is never printed.
fn bundle_report(source: &str, bundle: &CredentialBundle) -> Value {
    let user = bundle.user();
    json!({
        "source": source,
        "signed_in": true,
        "user_id": user.map(|user| user.id.clone()),
        "display_name": user.map(|user| user.display_name()),
        "organization": bundle.organization_name(),
        "superadmin": bundle.is_superadmin(),
        "projects": user.map(|user| user.project_details.len()).unwrap_or_default(),
        "has_refresh_token": bundle.refresh_token().is_some(),
    })
}
