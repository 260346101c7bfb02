//! Where a volume lives: a local path, an HTTP(S) URL, or a memory buffer.

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;

#[derive(Clone, PartialEq, Eq)]
pub enum Locator {
    Path(PathBuf),
    Url(String),
    /// An in-memory volume. Derived volume names carry no data and are
    /// resolved by a [`MemoryCatalog`](crate::MemoryCatalog).
    Memory { name: String, data: Bytes },
}

impl Locator {
    /// Treat `http://` and `https://` strings as URLs, anything else as a path.
    pub fn parse(s: &str) -> Self {
        let lower = s.get(..8).unwrap_or(s).to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Url(s.to_string())
        } else {
            Self::Path(PathBuf::from(s))
        }
    }

    pub fn memory(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::Memory {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Final name component, used to derive sibling volume names.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Self::Path(path) => path.file_name().and_then(|n| n.to_str()),
            Self::Url(url) => {
                let (path, _) = split_url_suffix(url);
                path.rsplit('/').next().filter(|name| !name.is_empty())
            }
            Self::Memory { name, .. } => Some(name),
        }
    }

    /// Sibling locator with the final name component replaced.
    ///
    /// URL query strings and fragments are kept.
    pub fn with_file_name(&self, name: &str) -> Self {
        match self {
            Self::Path(path) => Self::Path(path.with_file_name(name)),
            Self::Url(url) => {
                let (path, suffix) = split_url_suffix(url);
                let dir = match path.rfind('/') {
                    Some(idx) => &path[..=idx],
                    None => "",
                };
                Self::Url(format!("{}{}{}", dir, name, suffix))
            }
            Self::Memory { .. } => Self::Memory {
                name: name.to_string(),
                data: Bytes::new(),
            },
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Url(_))
    }
}

/// Split `url` into the part before `?`/`#` and the rest.
fn split_url_suffix(url: &str) -> (&str, &str) {
    match url.find(['?', '#']) {
        Some(idx) => url.split_at(idx),
        None => (url, ""),
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Url(url) => f.write_str(url),
            Self::Memory { name, .. } => write!(f, "memory:{}", name),
        }
    }
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Self::Memory { name, data } => f
                .debug_struct("Memory")
                .field("name", name)
                .field("len", &data.len())
                .finish(),
        }
    }
}

impl From<&str> for Locator {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<String> for Locator {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<PathBuf> for Locator {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&std::path::Path> for Locator {
    fn from(path: &std::path::Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}
