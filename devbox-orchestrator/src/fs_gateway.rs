//! Filesystem operations on a workspace's bind-mounted host directory.
//!
//! Every caller-supplied path is workspace-relative. [`WorkspaceFs::resolve`] rejects
//! absolute paths and `..` components, then canonicalizes the nearest existing ancestor
//! so a symlink cannot lead outside the root.
//!
//! All methods are blocking; async callers run them on the blocking pool.

use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use utoipa::ToSchema;
use walkdir::WalkDir;

use crate::error::{OrchestratorError, Result};

/// Directories returned as empty placeholders instead of being expanded.
pub const DEPENDENCY_DIRS: &[&str] = &[
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
    "target",
    "vendor",
    ".next",
];

/// Version-control metadata, never shown.
pub const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn"];

const MAX_PATH_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FileNode {
    pub name: String,
    /// Root-relative, `/`-separated.
    pub path: String,
    pub kind: FileKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(no_recursion)]
    pub children: Option<Vec<FileNode>>,
}

#[derive(Debug, Clone)]
pub struct WorkspaceFs {
    root: PathBuf,
}

impl WorkspaceFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a workspace-relative path to a host path inside the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        if relative.len() > MAX_PATH_LEN {
            return Err(OrchestratorError::InvalidInput(format!(
                "path too long (max {} characters)",
                MAX_PATH_LEN
            )));
        }

        let relative_path = Path::new(relative);
        if relative_path.is_absolute() {
            return Err(OrchestratorError::InvalidInput(format!(
                "absolute paths are not allowed: {}",
                relative
            )));
        }

        for component in relative_path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => continue,
                Component::ParentDir => {
                    return Err(OrchestratorError::InvalidInput(format!(
                        "path traversal is not allowed: {}",
                        relative
                    )));
                }
                _ => {
                    return Err(OrchestratorError::InvalidInput(format!(
                        "invalid path component in: {}",
                        relative
                    )));
                }
            }
        }

        let target = self.root.join(relative_path);

        let canonical_root = self
            .root
            .canonicalize()
            .map_err(|e| self.io_error(&self.root, e))?;

        // The first ancestor that exists decides where the path really points
        for ancestor in target.ancestors() {
            if fs::symlink_metadata(ancestor).is_err() {
                continue;
            }
            let canonical = ancestor.canonicalize().map_err(|_| {
                OrchestratorError::InvalidInput(format!("cannot resolve path: {}", relative))
            })?;
            if !canonical.starts_with(&canonical_root) {
                return Err(OrchestratorError::InvalidInput(format!(
                    "path escapes workspace root: {}",
                    relative
                )));
            }
            break;
        }

        Ok(target)
    }

    /// Like [`Self::resolve`], but only the parent must stay inside the root.
    ///
    /// The entry itself may be a symlink pointing anywhere; it is acted on, not followed.
    fn resolve_entry(&self, relative: &str) -> Result<PathBuf> {
        let relative_path = Path::new(relative);
        let (Some(parent), Some(name)) = (relative_path.parent(), relative_path.file_name())
        else {
            return self.resolve_non_root(relative);
        };
        Ok(self.resolve(&parent.to_string_lossy())?.join(name))
    }

    fn resolve_non_root(&self, relative: &str) -> Result<PathBuf> {
        let target = self.resolve(relative)?;
        if self.is_root(&target) {
            return Err(OrchestratorError::InvalidInput(
                "operation not allowed on the workspace root".to_string(),
            ));
        }
        Ok(target)
    }

    fn is_root(&self, path: &Path) -> bool {
        path.components().eq(self.root.components())
    }

    fn relative_of(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .map(|rel| {
                rel.components()
                    .filter_map(|c| match c {
                        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default()
    }

    /// Error for a failed filesystem call, naming the path relative to the root.
    fn io_error(&self, path: impl AsRef<Path>, source: std::io::Error) -> OrchestratorError {
        let mut shown = self.relative_of(path.as_ref());
        if shown.is_empty() {
            shown.push('.');
        }
        if source.kind() == std::io::ErrorKind::NotFound {
            return OrchestratorError::NotFound(format!("path {}", shown));
        }
        OrchestratorError::Storage {
            path: PathBuf::from(shown),
            source,
        }
    }

    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| self.io_error(&self.root, e))
    }

    /// Write a set of template files (seed or overlay), creating parents as needed.
    #[instrument(skip(self, files), fields(root = %self.root.display(), count = files.len()))]
    pub fn write_files(&self, files: &IndexMap<String, String>) -> Result<()> {
        self.ensure_root()?;
        for (relative, content) in files {
            self.write_file(relative, content)?;
        }
        Ok(())
    }

    /// Immediate children of a directory.
    pub fn list(&self, relative: &str) -> Result<Vec<FileNode>> {
        let dir = self.resolve(relative)?;
        let mut nodes = Vec::new();

        for entry in fs::read_dir(&dir).map_err(|e| self.io_error(&dir, e))? {
            let entry = entry.map_err(|e| self.io_error(&dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir && VCS_DIRS.contains(&name.as_str()) {
                continue;
            }
            nodes.push(self.leaf(&entry.path(), name, is_dir));
        }

        sort_nodes(&mut nodes);
        Ok(nodes)
    }

    /// Recursive tree rooted at `relative`.
    pub fn tree(&self, relative: &str) -> Result<FileNode> {
        let start = self.resolve(relative)?;
        let metadata = fs::metadata(&start).map_err(|e| self.io_error(&start, e))?;

        let name = start
            .file_name()
            .filter(|_| !self.is_root(&start))
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if !metadata.is_dir() {
            return Ok(self.leaf(&start, name, false));
        }

        let children = self.walk(&start)?;
        Ok(FileNode {
            name,
            path: self.relative_of(&start),
            kind: FileKind::Directory,
            size: None,
            modified_at: None,
            children: Some(children),
        })
    }

    fn walk(&self, dir: &Path) -> Result<Vec<FileNode>> {
        let mut nodes = Vec::new();

        for entry in fs::read_dir(dir).map_err(|e| self.io_error(dir, e))? {
            let entry = entry.map_err(|e| self.io_error(dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            // file_type() does not follow symlinks, so linked directories stay leaves
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

            if !is_dir {
                nodes.push(self.leaf(&path, name, false));
                continue;
            }
            if VCS_DIRS.contains(&name.as_str()) {
                continue;
            }

            let children = if DEPENDENCY_DIRS.contains(&name.as_str()) {
                Vec::new()
            } else {
                self.walk(&path)?
            };

            nodes.push(FileNode {
                name,
                path: self.relative_of(&path),
                kind: FileKind::Directory,
                size: None,
                modified_at: None,
                children: Some(children),
            });
        }

        sort_nodes(&mut nodes);
        Ok(nodes)
    }

    fn leaf(&self, path: &Path, name: String, is_dir: bool) -> FileNode {
        if is_dir {
            return FileNode {
                name,
                path: self.relative_of(path),
                kind: FileKind::Directory,
                size: None,
                modified_at: None,
                children: Some(Vec::new()),
            };
        }

        let metadata = fs::metadata(path).ok();
        FileNode {
            name,
            path: self.relative_of(path),
            kind: FileKind::File,
            size: metadata.as_ref().map(|m| m.len()),
            modified_at: metadata
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from),
            children: None,
        }
    }

    pub fn read_file(&self, relative: &str) -> Result<String> {
        let path = self.resolve(relative)?;
        if path.is_dir() {
            return Err(OrchestratorError::InvalidInput(format!(
                "{} is a directory",
                relative
            )));
        }
        fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::InvalidData => {
                OrchestratorError::InvalidInput(format!("{} is not a UTF-8 text file", relative))
            }
            _ => self.io_error(&path, e),
        })
    }

    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub fn write_file(&self, relative: &str, content: &str) -> Result<()> {
        let path = self.resolve_non_root(relative)?;
        if path.is_dir() {
            return Err(OrchestratorError::InvalidInput(format!(
                "{} is a directory",
                relative
            )));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(parent, e))?;
        }
        fs::write(&path, content).map_err(|e| self.io_error(&path, e))?;
        debug!(path = %path.display(), "Wrote file");
        Ok(())
    }

    pub fn make_directory(&self, relative: &str) -> Result<()> {
        let path = self.resolve_non_root(relative)?;
        fs::create_dir_all(&path).map_err(|e| self.io_error(&path, e))
    }

    /// Remove a file or a whole directory tree. A symlink is removed, never its target.
    #[instrument(skip(self))]
    pub fn delete(&self, relative: &str) -> Result<()> {
        let path = self.resolve_entry(relative)?;
        let metadata =
            fs::symlink_metadata(&path).map_err(|e| self.io_error(&path, e))?;

        if metadata.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        }
        .map_err(|e| self.io_error(&path, e))
    }

    #[instrument(skip(self))]
    pub fn move_entry(&self, from: &str, to: &str) -> Result<()> {
        let (source, destination) = self.transfer_paths(from, to)?;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(parent, e))?;
        }
        fs::rename(&source, &destination).map_err(|e| self.io_error(&source, e))
    }

    /// Copy a file, or a directory recursively.
    #[instrument(skip(self))]
    pub fn copy_entry(&self, from: &str, to: &str) -> Result<()> {
        let (source, destination) = self.transfer_paths(from, to)?;

        if !source.is_dir() {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(parent, e))?;
            }
            fs::copy(&source, &destination).map_err(|e| self.io_error(&source, e))?;
            return Ok(());
        }

        for entry in WalkDir::new(&source).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.clone());
                self.io_error(path, std::io::Error::other(e.to_string()))
            })?;
            let relative = entry
                .path()
                .strip_prefix(&source)
                .map_err(|_| OrchestratorError::InvalidInput("copy source moved".to_string()))?;
            let target = destination.join(relative);

            if entry.file_type().is_dir() {
                fs::create_dir_all(&target).map_err(|e| self.io_error(&target, e))?;
            } else if entry.file_type().is_file() {
                fs::copy(entry.path(), &target)
                    .map_err(|e| self.io_error(entry.path(), e))?;
            }
        }

        Ok(())
    }

    fn transfer_paths(&self, from: &str, to: &str) -> Result<(PathBuf, PathBuf)> {
        let source = self.resolve_non_root(from)?;
        let destination = self.resolve_non_root(to)?;

        fs::symlink_metadata(&source).map_err(|e| self.io_error(&source, e))?;

        if fs::symlink_metadata(&destination).is_ok() {
            return Err(OrchestratorError::InvalidInput(format!(
                "destination {} already exists",
                to
            )));
        }
        if destination.starts_with(&source) {
            return Err(OrchestratorError::InvalidInput(format!(
                "cannot place {} inside itself",
                from
            )));
        }

        Ok((source, destination))
    }
}

fn sort_nodes(nodes: &mut [FileNode]) {
    nodes.sort_by(|a, b| {
        let a_dir = a.kind == FileKind::Directory;
        let b_dir = b.kind == FileKind::Directory;
        b_dir.cmp(&a_dir).then_with(|| a.name.cmp(&b.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, WorkspaceFs) {
        let dir = tempfile::tempdir().unwrap();
        let fs = WorkspaceFs::new(dir.path().join("root"));
        fs.ensure_root().unwrap();
        (dir, fs)
    }

    #[test]
    fn test_resolve_normal_path() {
        let (_dir, fs) = workspace();
        let resolved = fs.resolve("src/main.rs").unwrap();
        assert_eq!(resolved, fs.root().join("src/main.rs"));
    }

    #[test]
    fn test_resolve_rejects_traversal_and_absolute() {
        let (_dir, fs) = workspace();
        assert!(matches!(
            fs.resolve("../etc/passwd"),
            Err(OrchestratorError::InvalidInput(_))
        ));
        assert!(matches!(
            fs.resolve("src/../../x"),
            Err(OrchestratorError::InvalidInput(_))
        ));
        assert!(matches!(
            fs.resolve("/etc/passwd"),
            Err(OrchestratorError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_resolve_root_forms() {
        let (_dir, fs) = workspace();
        assert_eq!(fs.resolve("").unwrap(), fs.root().to_path_buf());
        assert!(fs.is_root(&fs.resolve(".").unwrap()));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let (dir, fs) = workspace();
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, fs.root().join("link")).unwrap();

        assert!(matches!(
            fs.resolve("link/secret.txt"),
            Err(OrchestratorError::InvalidInput(_))
        ));
        assert!(matches!(
            fs.write_file("link/secret.txt", "x"),
            Err(OrchestratorError::InvalidInput(_))
        ));
        assert!(!outside.join("secret.txt").exists());
    }

    #[test]
    fn test_write_read_round_trip_creates_parents() {
        let (_dir, fs) = workspace();
        fs.write_file("src/lib/util.js", "module.exports = 1;").unwrap();
        assert_eq!(fs.read_file("src/lib/util.js").unwrap(), "module.exports = 1;");
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let (_dir, fs) = workspace();
        match fs.read_file("docs/nope.txt") {
            Err(OrchestratorError::NotFound(message)) => {
                assert_eq!(message, "path docs/nope.txt");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_delete_removes_link_not_target() {
        let (dir, fs) = workspace();
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("keep.txt"), "x").unwrap();
        std::os::unix::fs::symlink(&outside, fs.root().join("link")).unwrap();

        assert!(matches!(
            fs.delete("link/keep.txt"),
            Err(OrchestratorError::InvalidInput(_))
        ));

        fs.delete("link").unwrap();
        assert!(std::fs::symlink_metadata(fs.root().join("link")).is_err());
        assert!(outside.join("keep.txt").exists());
    }

    #[test]
    fn test_tree_placeholders_and_vcs() {
        let (_dir, fs) = workspace();
        fs.write_file("index.js", "x").unwrap();
        fs.write_file("node_modules/express/index.js", "x").unwrap();
        fs.write_file(".git/HEAD", "ref").unwrap();
        fs.write_file("src/app.js", "x").unwrap();

        let tree = fs.tree("").unwrap();
        let children = tree.children.unwrap();
        let names: Vec<_> = children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["node_modules", "src", "index.js"]);

        let deps = &children[0];
        assert_eq!(deps.kind, FileKind::Directory);
        assert!(deps.children.as_ref().unwrap().is_empty());

        let src = &children[1];
        assert_eq!(src.children.as_ref().unwrap()[0].path, "src/app.js");

        let file = &children[2];
        assert_eq!(file.size, Some(1));
        assert!(file.modified_at.is_some());
    }

    #[test]
    fn test_list_is_shallow() {
        let (_dir, fs) = workspace();
        fs.write_file("a/b/c.txt", "x").unwrap();
        fs.write_file("z.txt", "x").unwrap();

        let nodes = fs.list("").unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "a");
        assert!(nodes[0].children.as_ref().is_some_and(|c| c.is_empty()));
        assert!(nodes[1].children.is_none());

        let json = serde_json::to_value(&nodes[0]).unwrap();
        assert_eq!(json["children"], serde_json::json!([]));
    }

    #[test]
    fn test_delete_directory_recursively() {
        let (_dir, fs) = workspace();
        fs.write_file("src/a/b.txt", "x").unwrap();
        fs.delete("src").unwrap();
        assert!(!fs.root().join("src").exists());
    }

    #[test]
    fn test_root_cannot_be_deleted_or_moved() {
        let (_dir, fs) = workspace();
        assert!(matches!(fs.delete(""), Err(OrchestratorError::InvalidInput(_))));
        assert!(matches!(fs.delete("."), Err(OrchestratorError::InvalidInput(_))));
        assert!(matches!(
            fs.move_entry(".", "elsewhere"),
            Err(OrchestratorError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_move_creates_destination_parent() {
        let (_dir, fs) = workspace();
        fs.write_file("a.txt", "hello").unwrap();
        fs.move_entry("a.txt", "docs/a.txt").unwrap();
        assert!(!fs.root().join("a.txt").exists());
        assert_eq!(fs.read_file("docs/a.txt").unwrap(), "hello");
    }

    #[test]
    fn test_move_into_itself_rejected() {
        let (_dir, fs) = workspace();
        fs.make_directory("src").unwrap();
        assert!(matches!(
            fs.move_entry("src", "src/inner"),
            Err(OrchestratorError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_copy_directory_recursively() {
        let (_dir, fs) = workspace();
        fs.write_file("src/a.txt", "a").unwrap();
        fs.write_file("src/nested/b.txt", "b").unwrap();

        fs.copy_entry("src", "backup/src").unwrap();

        assert_eq!(fs.read_file("backup/src/a.txt").unwrap(), "a");
        assert_eq!(fs.read_file("backup/src/nested/b.txt").unwrap(), "b");
        assert_eq!(fs.read_file("src/a.txt").unwrap(), "a");
    }

    #[test]
    fn test_copy_refuses_existing_destination() {
        let (_dir, fs) = workspace();
        fs.write_file("a.txt", "a").unwrap();
        fs.write_file("b.txt", "b").unwrap();
        assert!(matches!(
            fs.copy_entry("a.txt", "b.txt"),
            Err(OrchestratorError::InvalidInput(_))
        ));
    }
}
