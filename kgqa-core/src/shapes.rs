//! Shape files (ShEx or SHACL) used as opaque prompt context.
//!
//! Layout inside the shape directory:
//! - `local_graph_shape.<ext>`: one shape shared by every question of a local graph
//! - `question_<id>_shape.<ext>`: one shape per question for remote graphs

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShapeType {
    #[default]
    Shex,
    Shacl,
}

impl ShapeType {
    pub fn extension(&self) -> &'static str {
        match self {
            ShapeType::Shex => "shex",
            ShapeType::Shacl => "ttl",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ShapeType::Shex => "ShEx",
            ShapeType::Shacl => "SHACL",
        }
    }
}

impl fmt::Display for ShapeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Resolves shape text for questions from a directory.
#[derive(Debug, Clone)]
pub struct ShapeSource {
    dir: PathBuf,
    shape_type: ShapeType,
    shared: bool,
}

impl ShapeSource {
    /// `shared` selects the single local-graph shape instead of per-question files.
    pub fn new(dir: impl Into<PathBuf>, shape_type: ShapeType, shared: bool) -> Self {
        Self {
            dir: dir.into(),
            shape_type,
            shared,
        }
    }

    pub fn shape_type(&self) -> ShapeType {
        self.shape_type
    }

    pub fn path_for(&self, question_id: &str) -> PathBuf {
        let ext = self.shape_type.extension();
        if self.shared {
            self.dir.join(format!("local_graph_shape.{ext}"))
        } else {
            self.dir.join(format!("question_{question_id}_shape.{ext}"))
        }
    }

    /// Shape text for a question, `None` when the file is missing or blank.
    pub fn load(&self, question_id: &str) -> std::io::Result<Option<String>> {
        read_optional(&self.path_for(question_id))
    }
}

fn read_optional(path: &Path) -> std::io::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let text = text.trim();
            if text.is_empty() {
                tracing::warn!(path = %path.display(), "Shape file is empty");
                Ok(None)
            } else {
                Ok(Some(text.to_string()))
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_question_and_shared_paths() {
        let per_question = ShapeSource::new("/shapes", ShapeType::Shex, false);
        assert_eq!(
            per_question.path_for("42"),
            PathBuf::from("/shapes/question_42_shape.shex")
        );

        let shared = ShapeSource::new("/shapes", ShapeType::Shacl, true);
        assert_eq!(
            shared.path_for("42"),
            PathBuf::from("/shapes/local_graph_shape.ttl")
        );
    }

    #[test]
    fn test_missing_shape_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let source = ShapeSource::new(dir.path(), ShapeType::Shex, false);
        assert!(source.load("7").unwrap().is_none());

        std::fs::write(dir.path().join("question_7_shape.shex"), "\n<Person> {}\n").unwrap();
        assert_eq!(source.load("7").unwrap().as_deref(), Some("<Person> {}"));
    }

    #[test]
    fn test_shape_type_deserializes_lowercase() {
        let t: ShapeType = serde_json::from_str("\"shacl\"").unwrap();
        assert_eq!(t, ShapeType::Shacl);
        assert_eq!(t.to_string(), "SHACL");
    }
}
