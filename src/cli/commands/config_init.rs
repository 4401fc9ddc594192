use std::path::Path;

use crate::config::save::{save_config, starter_config};
use crate::error::{ConfigError, Result};

pub fn run_config_init(path: &Path, destination: Option<&Path>, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(ConfigError::Invalid(format!(
            "{} already exists; use --force to overwrite",
            path.display()
        ))
        .into());
    }
    save_config(path.to_string_lossy().as_ref(), &starter_config(destination))?;
    println!("wrote {}", path.display());
    Ok(())
}
