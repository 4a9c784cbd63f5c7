//! Template Discovery
//!
//! Recursively scans a directory for `.ooml` files and reads the class
//! templates and instantiation markers each one declares.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::dom;
use crate::error::{OomlError, Result};
use crate::parse::{find_class_templates, parse_document, read_class_header};

pub const TEMPLATE_EXTENSION: &str = "ooml";

// ═══════════════════════════════════════════════════════════════════════════════
// METADATA TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub name: String,
    pub is_abstract: bool,
    pub extends: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateFile {
    pub path: String,
    pub source: String,
    pub classes: Vec<ClassSummary>,
    /// `ooml-instantiate` values, in document order
    pub instantiations: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// DISCOVERY
// ═══════════════════════════════════════════════════════════════════════════════

/// Recursively find all `.ooml` files under `dir`, sorted by path
pub fn find_template_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.is_file() && path.extension().is_some_and(|ext| ext == TEMPLATE_EXTENSION)
        })
        .collect();
    files.sort();
    files
}

pub fn read_template_file(path: &Path) -> Result<TemplateFile> {
    let source = fs::read_to_string(path).map_err(|e| OomlError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let document = parse_document(&source)?;

    let classes = find_class_templates(&document)
        .iter()
        .map(|template| {
            read_class_header(template).map(|header| ClassSummary {
                name: header.name,
                is_abstract: header.is_abstract,
                extends: header.extends,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let instantiations = dom::find_elements(&document, &|node| {
        dom::get_attribute(node, "ooml-instantiate").is_some()
    })
    .iter()
    .filter_map(|node| dom::get_attribute(node, "ooml-instantiate"))
    .collect();

    Ok(TemplateFile {
        path: path.to_string_lossy().to_string(),
        source,
        classes,
        instantiations,
    })
}

/// Read every template file under `dir`. A file that fails to read or parse
/// fails the whole scan.
pub fn discover_templates(dir: &Path) -> Result<Vec<TemplateFile>> {
    if !dir.exists() {
        return Err(OomlError::Io {
            path: dir.display().to_string(),
            message: "directory does not exist".to_string(),
        });
    }
    let files = find_template_files(dir);
    tracing::debug!("found {} template file(s) under {}", files.len(), dir.display());
    files.iter().map(|p| read_template_file(p)).collect()
}
