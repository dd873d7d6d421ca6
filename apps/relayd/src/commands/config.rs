use relay_config::{AgentConfig, RelayConfig};
use std::path::Path;

pub fn cmd_init_config(
    path: &Path,
    cluster: Option<&str>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )
        .into());
    }

    let config = RelayConfig {
        agent: cluster.map(AgentConfig::for_cluster),
        ..Default::default()
    };
    config.validate()?;
    config.save_to(path)?;

    println!("✓ Wrote {}", path.display());
    Ok(())
}
