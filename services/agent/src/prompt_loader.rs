use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Key of the prompt that replaces the built-in persona preamble.
pub const PERSONA_PROMPT: &str = "persona";

pub fn load_prompts(dir_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();

    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read prompts directory: {}", dir_path.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem for prompt file")?
                .to_string();

            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;

            prompts.insert(prompt_key, content);
        }
    }

    Ok(prompts)
}

/// The persona preamble sessions start from: `persona.md` in `dir` when it
/// exists and is not blank, otherwise `fallback`.
pub fn resolve_persona(dir: Option<&Path>, fallback: &str) -> Result<String> {
    let Some(dir) = dir else {
        return Ok(fallback.to_string());
    };

    let prompts = load_prompts(dir)?;
    tracing::info!("Loaded {} prompts from {}", prompts.len(), dir.display());

    match prompts.get(PERSONA_PROMPT).map(|p| p.trim()) {
        Some(persona) if !persona.is_empty() => Ok(persona.to_string()),
        _ => Ok(fallback.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_load_prompts_successfully() -> Result<()> {
        let dir = tempdir()?;
        let dir_path = dir.path();

        let mut persona = File::create(dir_path.join("persona.md"))?;
        writeln!(persona, "You are a gentle breathing coach.")?;

        let mut greeting = File::create(dir_path.join("greeting.md"))?;
        writeln!(greeting, "Welcome the user.")?;

        // Not a prompt.
        let mut ignored_file = File::create(dir_path.join("notes.txt"))?;
        writeln!(ignored_file, "some notes")?;

        std::fs::create_dir(dir_path.join("subdir"))?;

        let prompts = load_prompts(dir_path)?;

        assert_eq!(prompts.len(), 2, "Should only load .md files");
        assert_eq!(
            prompts.get("persona").unwrap(),
            "You are a gentle breathing coach.\n"
        );
        assert_eq!(prompts.get("greeting").unwrap(), "Welcome the user.\n");
        assert!(prompts.get("notes").is_none());

        Ok(())
    }

    #[test]
    fn test_load_prompts_from_nonexistent_dir() {
        let dir_path = Path::new("nonexistent_dir_for_testing_prompts");

        assert!(load_prompts(dir_path).is_err());
    }

    #[test]
    fn test_load_prompts_from_empty_dir() -> Result<()> {
        let dir = tempdir()?;

        let prompts = load_prompts(dir.path())?;

        assert!(prompts.is_empty());
        Ok(())
    }

    #[test]
    fn test_persona_override_is_trimmed() -> Result<()> {
        let dir = tempdir()?;
        let mut persona = File::create(dir.path().join("persona.md"))?;
        writeln!(persona, "\n  You are a gentle breathing coach.  \n")?;

        let resolved = resolve_persona(Some(dir.path()), "built-in")?;

        assert_eq!(resolved, "You are a gentle breathing coach.");
        Ok(())
    }

    #[test]
    fn test_persona_falls_back_without_override() -> Result<()> {
        assert_eq!(resolve_persona(None, "built-in")?, "built-in");

        let dir = tempdir()?;
        File::create(dir.path().join("persona.md"))?;
        assert_eq!(resolve_persona(Some(dir.path()), "built-in")?, "built-in");

        Ok(())
    }
}
