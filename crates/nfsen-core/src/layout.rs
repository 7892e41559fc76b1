//! Validation of the on-disk capture hierarchy.
//!
//! Capture files must be organised as
//! `<profiles-data>/<profile>/<source>/YYYY/MM/DD/nfcapd.*`. Collectors started
//! without `-S 1` write every file straight into the source directory, which the
//! day-based scheduler cannot see, so such setups are refused up front.

use std::path::Path;

use tracing::debug;

use crate::capture::{is_current_file, CAPTURE_PREFIX};
use crate::error::LayoutError;
use crate::settings::Config;

/// Check every configured source and report all problems at once.
pub fn validate_directory_structure(config: &Config) -> Result<(), LayoutError> {
    if config.sources.is_empty() || config.nfdump.profiles_data.as_os_str().is_empty() {
        return Ok(());
    }

    let mut problems = Vec::new();
    let mut sources = Vec::new();

    for source in &config.sources {
        let source_path = config.source_dir(source);
        let shown = source_path.display();

        if !source_path.is_dir() {
            problems.push(format!("Source directory does not exist: {shown}"));
            sources.push(source.to_string());
            continue;
        }

        let flat = count_flat_capture_files(&source_path);
        debug!(source = %source, flat, "checked capture layout");
        if flat > 0 {
            problems.push(format!("Source '{source}' has nfcapd files in flat structure at: {shown}"));
            problems.push(format!(
                "  nfsen-ng requires hierarchical structure: {shown}/YYYY/MM/DD/nfcapd.*"
            ));
            problems.push(format!("  Configure nfcapd with: -w {shown} -S 1"));
            problems.push(
                "  Run 'reorganize_nfcapd.sh' script to move existing files into proper structure."
                    .to_string(),
            );
            sources.push(source.to_string());
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(LayoutError { problems, sources })
    }
}

/// Regular capture files sitting directly in `source_path`. Symlinks and the
/// in-progress `.current.` file are ignored.
fn count_flat_capture_files(source_path: &Path) -> usize {
    walkdir::WalkDir::new(source_path)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.file_type().is_file() && name.starts_with(CAPTURE_PREFIX) && !is_current_file(&name)
        })
        .count()
}
