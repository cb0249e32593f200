//! Small helpers shared across modules.

use std::path::{Path, PathBuf};

/// Extract the first complete JSON object from text that may contain other output.
///
/// Braces inside string literals are ignored.
pub fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }

    None
}

/// Directory holding all engine state for a project.
pub fn state_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(".anvil")
}

/// Create the state directory with a `.gitignore` that hides it from snapshots.
pub fn ensure_state_dir(project_dir: &Path) -> std::io::Result<PathBuf> {
    let dir = state_dir(project_dir);
    std::fs::create_dir_all(&dir)?;
    let ignore = dir.join(".gitignore");
    if !ignore.exists() {
        std::fs::write(&ignore, "*\n")?;
    }
    Ok(dir)
}

/// First eight characters of an id, for branch and directory names.
pub fn short_id(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(8)
        .map_or(id.len(), |(i, _)| i);
    &id[..end]
}
