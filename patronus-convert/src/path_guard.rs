use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Refuse to write a ruleset or document over one of the command's inputs.
pub fn ensure_output_not_same(output: &Path, inputs: &[&Path]) -> Result<()> {
    let target = resolve(output)
        .with_context(|| format!("failed to resolve output path {}", output.display()))?;

    for input in inputs {
        let source = resolve(input)
            .with_context(|| format!("failed to resolve input path {}", input.display()))?;
        if target == source {
            bail!(
                "refusing to overwrite input file: output {} is {}",
                output.display(),
                input.display()
            );
        }
    }
    Ok(())
}

/// Canonical form of `path`. A file that does not exist yet is resolved
/// through its parent directory, which must exist for the write to work.
fn resolve(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return path
            .canonicalize()
            .with_context(|| format!("canonicalize {}", path.display()));
    }
    let Some(name) = path.file_name() else {
        bail!("{} does not name a file", path.display());
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().context("current_dir")?,
    };
    let parent = parent.canonicalize().unwrap_or(parent);
    Ok(parent.join(name))
}

#[cfg(test)]
mod tests {
    use super::ensure_output_not_same;

    #[test]
    fn same_file_through_dot_segments_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("config.xml");
        std::fs::write(&input, "<pfsense/>").expect("write");
        let sneaky = dir.path().join(".").join("config.xml");
        assert!(ensure_output_not_same(&sneaky, &[&input]).is_err());
        let fresh = dir.path().join("out.nft");
        assert!(ensure_output_not_same(&fresh, &[&input]).is_ok());
    }
}
