use camino::Utf8Path;

pub struct VaultPath;

impl VaultPath {
    /// Standardize directory separators to forward slashes.
    /// This is the wire format for metadata keys and remote paths.
    pub fn normalize(path: &str) -> String {
        path.replace('\\', "/")
    }

    /// Vault-relative, forward-slash path of `path`, or `None` if it lies outside `root`.
    pub fn relative_to(root: &Utf8Path, path: &Utf8Path) -> Option<String> {
        path.strip_prefix(root)
            .ok()
            .map(|rel| Self::normalize(rel.as_str()))
            .filter(|rel| !rel.is_empty())
    }

    /// Reject paths that could escape the vault root when joined to it.
    pub fn verify_safe(rel_path: &str) -> bool {
        let normalized = Self::normalize(rel_path);
        let p = std::path::Path::new(&normalized);
        !normalized.is_empty()
            && !normalized.starts_with('/')
            && !(normalized.len() > 1 && normalized.chars().nth(1) == Some(':'))
            && !p.is_absolute()
            && !p
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
    }

    pub fn is_markdown(path: &Utf8Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("md"))
    }

    /// Dotfiles and dot-directories (metadata side-file, `.git`, `.trash`).
    pub fn is_hidden(name: &str) -> bool {
        name.starts_with('.')
    }
}
