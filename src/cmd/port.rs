//! Service port assignment (`conductor port <SERVICE>`).

use anyhow::{Context, Result};
use std::path::Path;

pub fn cmd_port(
    project_dir: &Path,
    service: &str,
    base: Option<u16>,
    range: Option<u16>,
    project: Option<&str>,
    json: bool,
) -> Result<()> {
    use conductor::config::Config;
    use conductor::ports::allocate;

    let config = Config::new(project_dir.to_path_buf(), false)?;
    let base_port = match base.or_else(|| config.toml.base_port(service)) {
        Some(port) => port,
        None => anyhow::bail!(
            "No base port known for '{}'. Pass --base or add it under [ports.base] in conductor.toml.",
            service
        ),
    };
    let range_size = range.unwrap_or(config.toml.ports.range_size);
    let project_key = project
        .map(str::to_string)
        .unwrap_or_else(|| config.project_key());

    let assignment = allocate(service, &project_key, base_port, range_size)?;
    tracing::debug!(
        service,
        port = assignment.port,
        source = ?assignment.source,
        "port assigned"
    );

    if json {
        let out = serde_json::to_string_pretty(&assignment)
            .context("Failed to serialize port assignment")?;
        println!("{}", out);
    } else {
        println!("{}", assignment.port);
    }
    Ok(())
}
