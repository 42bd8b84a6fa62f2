use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

/// A node of the vault's file tree, as handed to the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub name: String,
    pub path: Utf8PathBuf,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileNode>,
}

pub type FileTree = Vec<FileNode>;

impl FileNode {
    pub fn file(path: impl Into<Utf8PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: path.file_name().unwrap_or_default().to_string(),
            path,
            kind: NodeKind::File,
            children: Vec::new(),
        }
    }

    pub fn directory(path: impl Into<Utf8PathBuf>, children: Vec<FileNode>) -> Self {
        let path = path.into();
        Self {
            name: path.file_name().unwrap_or_default().to_string(),
            path,
            kind: NodeKind::Directory,
            children,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }
}

/// Depth-first list of every file node in `tree`.
pub fn flatten_files(tree: &[FileNode]) -> Vec<&FileNode> {
    let mut out = Vec::new();
    let mut stack: Vec<&FileNode> = tree.iter().rev().collect();
    while let Some(node) = stack.pop() {
        match node.kind {
            NodeKind::File => out.push(node),
            NodeKind::Directory => stack.extend(node.children.iter().rev()),
        }
    }
    out
}
