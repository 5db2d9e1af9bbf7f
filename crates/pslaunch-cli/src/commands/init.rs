use std::path::Path;

use anyhow::{Context, bail};

use pslaunch_core::JobConfig;

use super::EXIT_SUCCESS;

pub fn init(path: &Path, name: &str, program: &str, hostfile: &str, force: bool) -> anyhow::Result<u8> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let config = JobConfig::scaffold(name, program, hostfile);
    let content = config.to_toml_string()?;
    std::fs::write(path, content)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("✓ Generated {}", path.display());
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaffold_round_trips_through_the_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.toml");
        init(&path, "lr-a9", "build/LinearClassifier", "machinefiles/local", false).unwrap();

        let config = JobConfig::from_file(&path).unwrap();
        assert_eq!(config.job.name, "lr-a9");
        assert_eq!(config.hostfile_path(), dir.path().join("machinefiles/local"));
    }

    #[test]
    fn refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.toml");
        std::fs::write(&path, "keep me").unwrap();

        assert!(init(&path, "lr", "p", "h", false).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");
        init(&path, "lr", "p", "h", true).unwrap();
    }
}
