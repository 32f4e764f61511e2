// SPDX-License-Identifier: MIT OR Apache-2.0

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Resolves a config path given on the command line (or a default) to an
/// absolute, canonicalized path, the same way the teacher's CLI layer does
/// before handing the path to [`crate::cfg::config::Config::load_from_file`].
pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);

    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir().context("cannot get current working dir")?.join(p)
    };

    abs.canonicalize().with_context(|| format!("failed to canonicalize path {abs:?}"))
}
