//! Command line arguments.

use clap::Parser;
use prospector_core::AppConfig;
use std::path::PathBuf;

/// Scrape business listings for every industry in every town.
#[derive(Debug, Parser)]
#[command(name = "prospector", version, about)]
pub struct Cli {
    /// Towns to scrape, comma separated
    #[arg(long, value_delimiter = ',', required_unless_present = "lookup")]
    pub towns: Vec<String>,

    /// Industries to search in each town, comma separated
    #[arg(long, value_delimiter = ',', required_unless_present = "lookup")]
    pub industries: Vec<String>,

    /// Configuration file (defaults to the XDG config path)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write the records as JSON here instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Session database, overriding the configured path
    #[arg(long, conflicts_with = "no_db")]
    pub db: Option<PathBuf>,

    /// Do not record the session
    #[arg(long)]
    pub no_db: bool,

    /// Show the browser window
    #[arg(long)]
    pub headful: bool,

    /// Look up a single business by name instead of running towns
    #[arg(long, conflicts_with_all = ["towns", "industries"])]
    pub lookup: Option<String>,
}

impl Cli {
    /// Load the configuration and apply the command line overrides to it.
    pub fn app_config(&self) -> anyhow::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load_from(path)?,
            None => AppConfig::load()?,
        };
        config.apply_env_overrides();

        if self.headful {
            config.scraping.browser_headless = false;
        }
        if let Some(db) = &self.db {
            config.storage.db_path = Some(db.clone());
        }
        if self.no_db {
            config.storage.disabled = true;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_comma_separated_lists() {
        let cli = Cli::try_parse_from([
            "prospector",
            "--towns",
            "Springs,Benoni",
            "--industries",
            "plumbers",
            "--industries",
            "bakeries",
        ])
        .unwrap();

        assert_eq!(cli.towns, vec!["Springs", "Benoni"]);
        assert_eq!(cli.industries, vec!["plumbers", "bakeries"]);
        assert!(cli.lookup.is_none());
    }

    #[test]
    fn test_towns_required_without_lookup() {
        assert!(Cli::try_parse_from(["prospector", "--industries", "plumbers"]).is_err());

        let cli = Cli::try_parse_from(["prospector", "--lookup", "Acme Plumbing"]).unwrap();
        assert_eq!(cli.lookup.as_deref(), Some("Acme Plumbing"));
    }

    #[test]
    fn test_lookup_conflicts_with_towns() {
        let result = Cli::try_parse_from([
            "prospector",
            "--lookup",
            "Acme",
            "--towns",
            "Springs",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides_applied_to_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scraping]\nsimultaneous_towns = 4\nbrowser_headless = true").unwrap();

        let cli = Cli::try_parse_from([
            "prospector",
            "--towns",
            "Springs",
            "--industries",
            "plumbers",
            "--config",
            file.path().to_str().unwrap(),
            "--headful",
            "--db",
            "/tmp/prospector-test.db",
        ])
        .unwrap();
        let config = cli.app_config().unwrap();

        assert_eq!(config.scraping.simultaneous_towns, 4);
        assert!(!config.scraping.browser_headless);
        assert_eq!(
            config.storage.db_path,
            Some(PathBuf::from("/tmp/prospector-test.db"))
        );
    }
}
