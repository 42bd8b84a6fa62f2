use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};
use vaultsync_core::path_utils::VaultPath;
use vaultsync_core::{FileNode, FileTree};
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, thiserror::Error)]
pub enum ScannerError {
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Path is not valid UTF-8: {0}")]
    NonUtf8Path(String),
    #[error("Vault root is not a directory: {0}")]
    NotADirectory(Utf8PathBuf),
}

pub struct Scanner;

impl Scanner {
    /// Build the file tree of a vault. Hidden entries (the sync metadata file,
    /// `.git`, editor state) are skipped, and siblings are sorted by name so two
    /// scans of an unchanged vault compare equal.
    pub fn scan_tree(root: &Utf8Path) -> Result<FileTree, ScannerError> {
        if !root.is_dir() {
            return Err(ScannerError::NotADirectory(root.to_path_buf()));
        }
        info!("Scanning vault {}", root);

        // stack[d] holds the children collected so far for the directory at depth d.
        let mut stack: Vec<(Utf8PathBuf, Vec<FileNode>)> = vec![(root.to_path_buf(), Vec::new())];
        let mut files = 0usize;

        let walker = WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_hidden(e));

        for entry in walker {
            let entry = entry?;
            let depth = entry.depth();
            while stack.len() > depth {
                close_directory(&mut stack);
            }

            let path = Utf8PathBuf::from_path_buf(entry.path().to_path_buf())
                .map_err(|p| ScannerError::NonUtf8Path(p.display().to_string()))?;

            if entry.file_type().is_dir() {
                stack.push((path, Vec::new()));
            } else if entry.file_type().is_file() {
                files += 1;
                if let Some((_, children)) = stack.last_mut() {
                    children.push(FileNode::file(path));
                }
            }
        }

        while stack.len() > 1 {
            close_directory(&mut stack);
        }

        debug!(files, "Scan finished for {}", root);
        Ok(stack.pop().map(|(_, children)| children).unwrap_or_default())
    }
}

fn close_directory(stack: &mut Vec<(Utf8PathBuf, Vec<FileNode>)>) {
    if let Some((path, children)) = stack.pop() {
        if let Some((_, parent)) = stack.last_mut() {
            parent.push(FileNode::directory(path, children));
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(VaultPath::is_hidden)
        .unwrap_or(false)
}
