mod cli;
mod logging;

use std::error::Error;
use std::io::Write;
use std::path::Path;

use quarry_adapters::LocalAdapters;
use quarry_core::config::{default_config_dir, WorkspaceSettings, SETTINGS_FILE_NAME};
use quarry_core::execution::ExecutionSnapshot;
use quarry_core::WorkspaceSession;
use clap::Parser;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::cli::CliArgs;

async fn run_app(
    args: &CliArgs,
    config_dir: &Path,
    settings: &WorkspaceSettings,
    out: &mut impl Write,
) -> Result<(), Box<dyn Error>> {
    let adapters = LocalAdapters::open(config_dir, &settings.storage)?;
    let session = WorkspaceSession::new(adapters.services(), settings.execution.clone());

    let report = drive(&session, args).await;
    adapters.backend.disconnect_all().await;

    serde_json::to_writer_pretty(&mut *out, &report?)?;
    writeln!(out)?;
    Ok(())
}

async fn drive(session: &WorkspaceSession, args: &CliArgs) -> Result<Value, Box<dyn Error>> {
    if args.refresh {
        session.refresh().await?;
    } else {
        session.load_connections(false).await?;
    }
    if let Some(id) = args.connection {
        session.select_connection(id).await?;
    }
    if let Some(database) = &args.database {
        session.select_database(database.as_str()).await?;
    }
    if args.schema.is_some() {
        session.select_schema(args.schema.clone()).await;
    }

    let mut report = json!({
        "context": session.context(),
        "connections": session.connections(),
    });
    if args.list_tables {
        let tables = session
            .current_tables()
            .into_iter()
            .map(|node| json!({ "name": node.key, "pinned": node.pinned }))
            .collect::<Vec<_>>();
        report["tables"] = Value::Array(tables);
    }

    if let Some(sql) = args.sql_text() {
        if let Err(error) = session.execute(sql.as_str()).await {
            warn!(%error, "execution failed");
        }
        // Lets the spawned history write finish before the runtime shuts down.
        tokio::task::yield_now().await;
        report["execution"] = execution_report(&session.execution());
    }
    Ok(report)
}

fn execution_report(snapshot: &ExecutionSnapshot) -> Value {
    json!({
        "run_id": snapshot.run_id,
        "status": format!("{:?}", snapshot.status),
        "error": snapshot.error,
        "history_error": snapshot.history_error,
        "results": snapshot.pages,
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = CliArgs::parse();
    let config_dir = match &args.config_dir {
        Some(dir) => dir.clone(),
        None => default_config_dir()?,
    };
    let settings = WorkspaceSettings::load_from_path(config_dir.join(SETTINGS_FILE_NAME))?;
    logging::init_logging(&settings.logging.filter)?;
    info!(config_dir = %config_dir.display(), "starting quarry");

    run_app(&args, &config_dir, &settings, &mut std::io::stdout().lock()).await
}

#[cfg(test)]
mod tests {
    use quarry_core::config::WorkspaceSettings;
    use quarry_core::execution::{ExecutionSnapshot, ExecutionStatus};
    use serde_json::Value;
    use tempfile::TempDir;

    use super::{execution_report, run_app};
    use crate::cli::CliArgs;

    async fn run(temp_dir: &TempDir, args: &CliArgs) -> Value {
        let mut out = Vec::new();
        run_app(args, temp_dir.path(), &WorkspaceSettings::default(), &mut out)
            .await
            .expect("run should succeed");
        serde_json::from_slice(&out).expect("output should be JSON")
    }

    #[tokio::test]
    async fn empty_config_reports_an_empty_context() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let report = run(&temp_dir, &CliArgs::default()).await;

        assert_eq!(report["connections"], Value::Array(Vec::new()));
        assert_eq!(report["context"]["data_source_id"], Value::Null);
        assert!(report.get("execution").is_none());
    }

    #[tokio::test]
    async fn sql_without_a_connection_reports_the_failure() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let args = CliArgs {
            sql: vec!["SELECT".to_string(), "1".to_string()],
            list_tables: true,
            ..CliArgs::default()
        };
        let report = run(&temp_dir, &args).await;

        assert_eq!(report["tables"], Value::Array(Vec::new()));
        assert_eq!(report["execution"]["status"], "Failed");
        assert_eq!(report["execution"]["error"], "no data source selected");
        assert!(!temp_dir.path().join("history.ndjson").exists());
    }

    #[tokio::test]
    async fn unknown_connection_is_an_error() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let args = CliArgs {
            connection: Some(4),
            ..CliArgs::default()
        };
        let mut out = Vec::new();
        let result = run_app(&args, temp_dir.path(), &WorkspaceSettings::default(), &mut out).await;

        assert!(result.is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn execution_report_names_the_status() {
        let snapshot = ExecutionSnapshot {
            run_id: 7,
            status: ExecutionStatus::Cancelled,
            ..ExecutionSnapshot::default()
        };
        let report = execution_report(&snapshot);
        assert_eq!(report["run_id"], 7);
        assert_eq!(report["status"], "Cancelled");
        assert_eq!(report["results"], Value::Array(Vec::new()));
    }
}
