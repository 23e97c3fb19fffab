//! The export-performance entry point: package a finished job's actual
//! execution record for the advisor's learning loop or for cost
//! reconciliation.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use tracing::{info, warn};

use burst_config::Config;
use burst_model::performance::{ExportContext, JobRecord, ParallelEfficiency, PerformanceReport};
use burst_slurm::{JobOverview, SlurmClient};

/// Overall deadline for one export.
const EXPORT_TIMEOUT: Duration = Duration::from_secs(120);

pub async fn run(
    config: Config,
    job_id: &str,
    output_dir: &Path,
    format: &str,
    anonymize: bool,
) -> anyhow::Result<()> {
    tokio::time::timeout(
        EXPORT_TIMEOUT,
        export(config, job_id, output_dir, format, anonymize),
    )
    .await
    .context("performance export timed out")?
}

async fn export(
    config: Config,
    job_id: &str,
    output_dir: &Path,
    format: &str,
    anonymize: bool,
) -> anyhow::Result<()> {
    info!(job_id, format, output_dir = %output_dir.display(), anonymize, "exporting performance data");

    let slurm = SlurmClient::new(&config.scheduler);
    let overview = if slurm.available().await {
        match slurm.job_overview(job_id).await {
            Ok(overview) => overview,
            Err(e) => {
                warn!(job_id, error = %e, "scheduler has no record of the job; exporting a skeleton");
                JobOverview {
                    job_id: job_id.to_string(),
                    ..JobOverview::default()
                }
            }
        }
    } else {
        warn!("scheduler tools unavailable; exporting a skeleton record");
        JobOverview {
            job_id: job_id.to_string(),
            ..JobOverview::default()
        }
    };

    let mut report = build_report(&config, &overview);
    if anonymize {
        report.anonymize();
    }

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output directory {}", output_dir.display()))?;

    let path = match format {
        "structured-feedback" | "json" => write_feedback(&report, output_dir)?,
        "structured-compact" => write_compact(&report, output_dir)?,
        "reconciliation" => write_reconciliation(&report, output_dir)?,
        other => anyhow::bail!("unsupported export format: {other}"),
    };

    info!(
        job_id,
        file = %path.display(),
        total_cost = report.cost.total_cost_usd,
        "performance data exported"
    );
    Ok(())
}

/// Assemble the report from the scheduler's view of the job plus the
/// engine metadata stashed in its comment field.
fn build_report(config: &Config, overview: &JobOverview) -> PerformanceReport {
    let metadata = parse_comment_metadata(&overview.comment);

    let mut report = PerformanceReport {
        job: JobRecord {
            job_id: overview.job_id.clone(),
            job_name: overview.job_name.clone(),
            user_id: overview.user.clone(),
            project_id: overview.account.clone(),
            partition: overview.partition.clone(),
            node_count: overview.node_count,
            duration_hours: overview.run_minutes as f64 / 60.0,
            success: overview.state == "COMPLETED",
            ..JobRecord::default()
        },
        context: ExportContext {
            region: config.cloud.region.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            execution_mode: if overview.comment.contains("execution_plan") {
                "plan".to_string()
            } else {
                "standalone".to_string()
            },
            ..ExportContext::default()
        },
        ..PerformanceReport::default()
    };

    if let Some(metadata) = metadata {
        report.job.instance_types_used = metadata.instances;
        report.cost.compute_cost_usd = metadata.cost;
        report.cost.total_cost_usd = metadata.cost;
        if metadata.fabric {
            report.parallel = Some(ParallelEfficiency::default());
        }
    }

    report
}

/// Engine metadata embedded in the scheduler's comment field as
/// `cloud_meta:{...}`.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
struct CommentMetadata {
    #[serde(default)]
    instances: Vec<String>,
    #[serde(default)]
    cost: f64,
    #[serde(default)]
    fabric: bool,
}

fn parse_comment_metadata(comment: &str) -> Option<CommentMetadata> {
    let json = comment.strip_prefix("cloud_meta:")?;
    match serde_json::from_str(json) {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            warn!(error = %e, "unparseable comment metadata");
            None
        }
    }
}

fn write_feedback(
    report: &PerformanceReport,
    output_dir: &Path,
) -> anyhow::Result<std::path::PathBuf> {
    let path = output_dir.join(format!("job-{}-performance.json", report.job.job_id));
    let data = serde_json::to_vec_pretty(report)?;
    std::fs::write(&path, data)?;
    Ok(path)
}

/// Compact single-line form, suitable for stuffing back into the
/// scheduler's comment field.
fn write_compact(
    report: &PerformanceReport,
    output_dir: &Path,
) -> anyhow::Result<std::path::PathBuf> {
    let mut metadata = json!({
        "cost": report.cost.total_cost_usd,
        "instances": report.job.instance_types_used,
        "duration_hours": report.job.duration_hours,
        "success": report.job.success,
    });
    if let Some(parallel) = &report.parallel {
        metadata["scaling_efficiency"] = json!(parallel.scaling_efficiency);
    }

    let path = output_dir.join(format!("job-{}-comment.txt", report.job.job_id));
    std::fs::write(&path, format!("cloud_meta:{metadata}"))?;
    Ok(path)
}

/// Flat cost-reconciliation record for the billing side.
fn write_reconciliation(
    report: &PerformanceReport,
    output_dir: &Path,
) -> anyhow::Result<std::path::PathBuf> {
    let record = json!({
        "job_id": report.job.job_id,
        "account": report.job.project_id,
        "user_id": report.job.user_id,
        "partition": report.job.partition,
        "actual_cost": report.cost.total_cost_usd,
        "compute_cost": report.cost.compute_cost_usd,
        "storage_cost": report.cost.storage_cost_usd,
        "network_cost": report.cost.network_cost_usd,
        "spot_savings": report.cost.spot_savings_usd,
        "instance_types": report.job.instance_types_used,
        "duration_hours": report.job.duration_hours,
        "success": report.job.success,
        "engine_version": report.context.engine_version,
    });

    let path = output_dir.join(format!("job-{}-reconciliation.json", report.job.job_id));
    std::fs::write(&path, serde_json::to_vec_pretty(&record)?)?;
    Ok(path)
}
