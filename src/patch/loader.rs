use crate::patch::schema::{PatchFile, ValidationError};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum PatchFileError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
}

impl PatchFileError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            PatchFileError::Io { .. } => self,
            PatchFileError::Toml { path: None, source } => PatchFileError::Toml {
                path: Some(path),
                source,
            },
            PatchFileError::Validation { path: None, source } => PatchFileError::Validation {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for PatchFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchFileError::Io { path, source } => {
                write!(
                    f,
                    "failed to read patch file from {}: {}",
                    path.display(),
                    source
                )
            }
            PatchFileError::Toml { path, source } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse patch file TOML ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse patch file TOML: {}", source),
            },
            PatchFileError::Validation { path, source } => match path {
                Some(path) => write!(f, "invalid patch file ({}): {}", path.display(), source),
                None => write!(f, "invalid patch file: {}", source),
            },
        }
    }
}

impl std::error::Error for PatchFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PatchFileError::Io { source, .. } => Some(source),
            PatchFileError::Toml { source, .. } => Some(source),
            PatchFileError::Validation { source, .. } => Some(source),
        }
    }
}

pub fn load_from_str(input: &str) -> Result<PatchFile, PatchFileError> {
    let file: PatchFile = toml_edit::de::from_str(input)
        .map_err(|source| PatchFileError::Toml { path: None, source })?;
    file.validate()
        .map_err(|source| PatchFileError::Validation { path: None, source })?;
    Ok(file)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<PatchFile, PatchFileError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| PatchFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUARDED_HOOK: &str = r#"
[meta]
name = "chat-hooks"
description = "Command parsing extension"
host_range = ">=1.2.0, <2.0.0"

[[patches]]
id = "chat-command-hook"
routine = "Game::chat_parse_command"

[patches.anchor]
type = "call-to"
routine = "String::to_lower"

[patches.expect]
type = "opcode"
opcode = "call"

[patches.mode]
type = "insert-after"

[[patches.ops]]
op = "load-local"
index = 2

[[patches.ops]]
op = "call"
routine = "Hooks::in_chat_parse_command"

[[patches.ops]]
op = "jump-if-false"
target = "resume"

[[patches.ops]]
op = "return"

[[patches.ops]]
op = "nop"
mark = "resume"
"#;

    #[test]
    fn loads_wellformed_file() {
        let file = load_from_str(GUARDED_HOOK).unwrap();
        assert_eq!(file.meta.name, "chat-hooks");
        assert_eq!(file.meta.host_range.as_deref(), Some(">=1.2.0, <2.0.0"));
        assert_eq!(file.patches.len(), 1);
        assert_eq!(file.patches[0].ops.len(), 5);
    }

    #[test]
    fn toml_syntax_errors_are_reported() {
        let err = load_from_str("[[patches]\nid = ").unwrap_err();
        assert!(matches!(err, PatchFileError::Toml { .. }));
    }

    #[test]
    fn validation_errors_are_reported() {
        let err = load_from_str("[meta]\nname = \"empty\"\n").unwrap_err();
        assert!(matches!(err, PatchFileError::Validation { .. }));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_from_path("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, PatchFileError::Io { .. }));
    }
}
