use std::path::PathBuf;

use clap::Parser;
use quarry_core::connection::DataSourceId;

/// Quarry - resolve a workspace scope and optionally run SQL against it
#[derive(Parser, Debug, Clone, PartialEq, Eq, Default)]
#[command(name = "quarry-app")]
#[command(version)]
#[command(about = "One-shot workspace client for Quarry", long_about = None)]
pub struct CliArgs {
    /// Directory holding settings.toml, profiles.toml and the local stores
    #[arg(long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Connection id to switch to
    #[arg(short = 'c', long = "connection", value_name = "ID")]
    pub connection: Option<DataSourceId>,

    /// Database to select on the resolved connection
    #[arg(short = 'd', long = "database", value_name = "NAME")]
    pub database: Option<String>,

    /// Schema to select on the resolved database
    #[arg(short = 's', long = "schema", value_name = "NAME")]
    pub schema: Option<String>,

    /// Refetch connections and metadata instead of using cached lists
    #[arg(long = "refresh")]
    pub refresh: bool,

    /// Include the table list of the resolved scope in the report
    #[arg(long = "tables")]
    pub list_tables: bool,

    /// SQL to run; words are joined with spaces. Put it after `--` when it
    /// starts with a dash.
    #[arg(value_name = "SQL", trailing_var_arg = true)]
    pub sql: Vec<String>,
}

impl CliArgs {
    #[must_use]
    pub fn sql_text(&self) -> Option<String> {
        let sql = self.sql.join(" ");
        (!sql.trim().is_empty()).then_some(sql)
    }
}
