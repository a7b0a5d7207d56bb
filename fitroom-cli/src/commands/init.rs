use anyhow::Context;
use clap::Args;

use fitroom_core::config::FitroomConfig;

use super::Globals;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: InitArgs, globals: &Globals) -> anyhow::Result<()> {
    let path = &globals.config;
    if path.exists() && !args.force {
        anyhow::bail!(
            "Config already exists at {}. Use --force to overwrite it.",
            path.display()
        );
    }

    let raw = FitroomConfig::default().to_toml()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create config directory: {}", parent.display()))?;
    }
    std::fs::write(path, raw)
        .with_context(|| format!("Cannot write config: {}", path.display()))?;

    if !globals.quiet {
        println!("Wrote default config to {}", path.display());
        println!("Set the API key in the environment variable named by [oracle].api_key_env.");
    }
    Ok(())
}
