//! Shared styling utilities for terminal output.

use console::Style;

use cmsync_core::merge::MergeKind;
use cmsync_core::models::SyncOutcome;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold, white).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// Colored, fixed-width label for a planned action.
pub fn action(kind: MergeKind) -> String {
    let (label, style) = match kind {
        MergeKind::AdoptRemote => ("remote", Style::new().blue()),
        MergeKind::KeepLocal => ("local", Style::new().green()),
        MergeKind::Delete => ("delete", Style::new().red()),
        MergeKind::Merge => ("merge", Style::new().magenta().bold()),
    };
    style.apply_to(format!("{label:<7}")).to_string()
}

/// One-line summary of how an operation ended.
pub fn outcome(outcome: SyncOutcome) -> String {
    match outcome {
        SyncOutcome::UpToDate => success("Already up to date"),
        SyncOutcome::NoChanges => success("No local changes to push"),
        SyncOutcome::Pulled => success("Pulled remote changes"),
        SyncOutcome::Pushed => success("Pushed local changes"),
    }
}
