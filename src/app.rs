//! Per-invocation context shared by every CLI command.

use crate::cli::{Cli, OutputFormat};
use crate::config::Config;
use crate::error::Result;
use crate::store::TableStore;

pub struct AppContext {
    pub config: Config,
    pub store: TableStore,
    pub output_format: OutputFormat,
    pub robot_mode: bool,
    pub quiet: bool,
}

impl AppContext {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = Config::load(cli.config.as_deref(), cli.data_dir.as_deref())?;
        if let Some(secrets) = &cli.secrets {
            config.remote.secrets_path = Some(secrets.clone());
        }

        let output_format = cli.output_format();
        if !output_format.use_colors() {
            console::set_colors_enabled(false);
            console::set_colors_enabled_stderr(false);
        }

        let store = TableStore::from_config(&config)?;
        Ok(Self {
            config,
            store,
            output_format,
            robot_mode: output_format == OutputFormat::Json,
            quiet: cli.quiet,
        })
    }
}
