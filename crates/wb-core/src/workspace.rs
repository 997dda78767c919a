//! Project directories and the file operations scoped to them.
//!
//! A project is a directory directly under the workspace root; its id is the
//! directory name. Every path handed in by a client is relative to a project
//! root and is rejected if it would resolve outside that root (via `..`,
//! absolute components, or symlinks).
//!
//! File writes are not serialised against commands running in the same
//! project. A command and an editor touching the same file race.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("invalid project name: {0}")]
    InvalidProjectName(String),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("project already exists: {0}")]
    ProjectExists(String),

    #[error("path escapes the project root: {0}")]
    PathEscapesProject(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    /// Path relative to the project root, `/`-separated.
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// ProjectResolver
// ---------------------------------------------------------------------------

/// Maps a project identifier to the absolute directory commands run in.
///
/// The returned directory must exist at the time of the call.
#[async_trait]
pub trait ProjectResolver: Send + Sync {
    async fn resolve(&self, project_id: &str) -> Result<PathBuf>;

    /// Resolve an optional project-relative sub-directory to run in.
    async fn resolve_working_dir(&self, project_id: &str, sub_dir: Option<&str>) -> Result<PathBuf>;
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Open (creating if needed) the workspace root.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let root = tokio::fs::canonicalize(&root).await?;
        info!(root = %root.display(), "workspace opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All project directories, sorted by id.
    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let mut projects = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            if validate_project_name(&id).is_ok() {
                projects.push(Project {
                    id,
                    path: entry.path(),
                });
            }
        }
        projects.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(projects)
    }

    /// Create an empty project directory.
    pub async fn create_project(&self, name: &str) -> Result<Project> {
        validate_project_name(name)?;
        let path = self.root.join(name);
        match tokio::fs::create_dir(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(WorkspaceError::ProjectExists(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        info!(project = name, "project created");
        Ok(Project {
            id: name.to_string(),
            path,
        })
    }

    /// List one directory inside a project. `rel` may be empty for the root.
    pub async fn list_dir(&self, project_id: &str, rel: &str) -> Result<Vec<FileEntry>> {
        let project_root = self.resolve(project_id).await?;
        let dir = scoped_existing(&project_root, rel).await?;
        if !tokio::fs::metadata(&dir).await?.is_dir() {
            return Err(WorkspaceError::NotADirectory(rel.to_string()));
        }

        let mut entries = Vec::new();
        let mut read = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = read.next_entry().await? {
            let meta = entry.metadata().await?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let rel_path = entry
                .path()
                .strip_prefix(&project_root)
                .map(to_slash_path)
                .unwrap_or_else(|_| name.clone());
            entries.push(FileEntry {
                name,
                path: rel_path,
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        // Directories first, then by name.
        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    /// Read a UTF-8 (lossy) file inside a project.
    pub async fn read_file(&self, project_id: &str, rel: &str) -> Result<String> {
        let project_root = self.resolve(project_id).await?;
        let path = scoped_existing(&project_root, rel).await?;
        if tokio::fs::metadata(&path).await?.is_dir() {
            return Err(WorkspaceError::NotFound(rel.to_string()));
        }
        let bytes = tokio::fs::read(&path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Write (create or replace) a file inside a project, creating parent
    /// directories as needed. Returns the number of bytes written.
    pub async fn write_file(&self, project_id: &str, rel: &str, content: &str) -> Result<usize> {
        let project_root = self.resolve(project_id).await?;
        let relative = normalize_relative(rel)?;
        if relative.as_os_str().is_empty() {
            return Err(WorkspaceError::PathEscapesProject(rel.to_string()));
        }
        let target = project_root.join(&relative);
        ensure_within(&project_root, &target).await?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content.as_bytes()).await?;
        debug!(project = project_id, path = rel, bytes = content.len(), "file written");
        Ok(content.len())
    }
}

#[async_trait]
impl ProjectResolver for Workspace {
    async fn resolve(&self, project_id: &str) -> Result<PathBuf> {
        validate_project_name(project_id)?;
        let path = self.root.join(project_id);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(path),
            Ok(_) => Err(WorkspaceError::ProjectNotFound(project_id.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(WorkspaceError::ProjectNotFound(project_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve_working_dir(&self, project_id: &str, sub_dir: Option<&str>) -> Result<PathBuf> {
        let project_root = self.resolve(project_id).await?;
        let Some(sub) = sub_dir.filter(|s| !s.is_empty()) else {
            return Ok(project_root);
        };
        let dir = scoped_existing(&project_root, sub).await?;
        if !tokio::fs::metadata(&dir).await?.is_dir() {
            return Err(WorkspaceError::NotADirectory(sub.to_string()));
        }
        Ok(dir)
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

fn validate_project_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(WorkspaceError::InvalidProjectName(name.to_string()))
    }
}

/// Turn a client path into a clean relative path, rejecting anything that
/// could climb out of its base.
fn normalize_relative(rel: &str) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(WorkspaceError::PathEscapesProject(rel.to_string()));
            }
        }
    }
    Ok(out)
}

/// Resolve `rel` under `root` for a path that must already exist.
async fn scoped_existing(root: &Path, rel: &str) -> Result<PathBuf> {
    let relative = normalize_relative(rel)?;
    let candidate = root.join(relative);
    let canonical = match tokio::fs::canonicalize(&candidate).await {
        Ok(p) => p,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(WorkspaceError::NotFound(rel.to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    let canonical_root = tokio::fs::canonicalize(root).await?;
    if !canonical.starts_with(&canonical_root) {
        return Err(WorkspaceError::PathEscapesProject(rel.to_string()));
    }
    Ok(canonical)
}

/// Check that the nearest existing ancestor of `target` lies inside `root`,
/// so a symlinked directory cannot redirect a write elsewhere.
async fn ensure_within(root: &Path, target: &Path) -> Result<()> {
    let canonical_root = tokio::fs::canonicalize(root).await?;
    let mut cursor = Some(target);
    while let Some(path) = cursor {
        match tokio::fs::canonicalize(path).await {
            Ok(canonical) => {
                return if canonical.starts_with(&canonical_root) {
                    Ok(())
                } else {
                    Err(WorkspaceError::PathEscapesProject(target.display().to_string()))
                };
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => cursor = path.parent(),
            Err(e) => return Err(e.into()),
        }
    }
    Err(WorkspaceError::PathEscapesProject(target.display().to_string()))
}

fn to_slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
