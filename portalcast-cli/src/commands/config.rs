//! Config command - inspect and edit the portalcast config file

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use portalcast_core::config::{sample_config, CaptureConfig, ConfigFile};

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Config file to operate on instead of the default one
    #[arg(short, long, global = true)]
    pub file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the path to the config file
    Path,

    /// Show the effective settings
    Show,

    /// Write the documented sample config
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Store the restore token printed by `portalcast cast`
    SetToken {
        /// Token to store
        #[arg(required_unless_present = "clear")]
        token: Option<String>,

        /// Remove the stored token instead
        #[arg(long, conflicts_with = "token")]
        clear: bool,
    },

    /// Print the sample config to stdout
    Sample,
}

/// Run config subcommand
pub async fn config(args: ConfigArgs) -> Result<()> {
    let path = args.file.unwrap_or_else(ConfigFile::default_path);

    match args.command {
        ConfigCommand::Path => {
            let state = if path.exists() { "exists" } else { "not created yet" };
            println!("{} ({})", path.display(), state);
        }
        ConfigCommand::Show => {
            let file = ConfigFile::load_from(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            if path.exists() {
                println!("Configuration file: {}\n", path.display());
            } else {
                println!("No file at {}, showing defaults\n", path.display());
            }
            for line in describe(&file) {
                println!("{}", line);
            }
            for warning in CaptureConfig::from_file(&file).validate() {
                println!("warning: {}", warning);
            }
        }
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                println!("Configuration file already exists: {}", path.display());
                println!("Use --force to overwrite it.");
                return Ok(());
            }
            write_sample(&path)?;
            println!("Created configuration file: {}", path.display());
        }
        ConfigCommand::SetToken { token, clear } => {
            let token = if clear { None } else { token };
            let file = store_token(&path, token)?;
            match file.portal.restore_token {
                Some(_) => println!("Restore token stored in {}", path.display()),
                None => println!("Restore token cleared from {}", path.display()),
            }
        }
        ConfigCommand::Sample => {
            print!("{}", sample_config());
        }
    }

    Ok(())
}

/// Settings as shown by `config show`
fn describe(file: &ConfigFile) -> Vec<String> {
    let layouts: Vec<&str> = file.stream.layouts.iter().map(|l| l.name()).collect();
    let [first, second] = file.renegotiation.presets;
    vec![
        "[portal]".to_string(),
        format!("  cursor mode:    {:?}", file.portal.cursor_mode),
        format!("  persist mode:   {:?}", file.portal.persist_mode),
        format!(
            "  restore token:  {}",
            if file.portal.restore_token.is_some() { "stored" } else { "none" }
        ),
        "[stream]".to_string(),
        format!("  preset:         {}", file.stream.preset),
        format!("  layouts:        {}", layouts.join(", ")),
        format!(
            "  buffers:        {}..{}",
            file.stream.min_buffers, file.stream.max_buffers
        ),
        "[renegotiation]".to_string(),
        format!("  mode:           {}", file.renegotiation.mode),
        format!("  interval:       {} ms", file.renegotiation.interval_ms),
        format!("  presets:        {} <-> {}", first, second),
    ]
}

fn write_sample(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
    }
    std::fs::write(path, sample_config()).context("Failed to write config file")
}

/// Set or clear `[portal] restore_token`, keeping every other setting
fn store_token(path: &Path, token: Option<String>) -> Result<ConfigFile> {
    let mut file = ConfigFile::load_from(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    file.portal.restore_token = token;
    file.save_to(path)
        .with_context(|| format!("Failed to save {}", path.display()))?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use portalcast_core::config::RenegotiationMode;
    use tempfile::TempDir;

    #[test]
    fn test_describe_reports_token_presence() {
        let mut file = ConfigFile::default();
        assert!(describe(&file).iter().any(|l| l.ends_with("none")));

        file.portal.restore_token = Some("secret".to_string());
        let lines = describe(&file);
        assert!(lines.iter().any(|l| l.contains("restore token:  stored")));
        assert!(!lines.iter().any(|l| l.contains("secret")));
    }

    #[test]
    fn test_store_token_keeps_other_settings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        write_sample(&path).unwrap();
        let mut file = ConfigFile::load_from(&path).unwrap();
        file.renegotiation.mode = RenegotiationMode::Buffers;
        file.save_to(&path).unwrap();

        store_token(&path, Some("tok-1".to_string())).unwrap();
        let loaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(loaded.portal.restore_token.as_deref(), Some("tok-1"));
        assert_eq!(loaded.renegotiation.mode, RenegotiationMode::Buffers);

        store_token(&path, None).unwrap();
        let loaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(loaded.portal.restore_token, None);
    }

    #[test]
    fn test_store_token_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        store_token(&path, Some("tok-2".to_string())).unwrap();
        assert!(path.exists());
        let loaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(loaded.portal.restore_token.as_deref(), Some("tok-2"));
    }
}
