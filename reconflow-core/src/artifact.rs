//! Named stage artifacts and the filesystem collaborator that stores them.

use std::borrow::Cow;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

/// How an artifact maps onto the target directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactLayout {
    /// `<name>_<base>.txt`
    File,
    /// `<name>/`, holding any number of files.
    Directory,
}

/// A named output of one stage, consumed as input by others.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Artifact {
    name: Cow<'static, str>,
    layout: ArtifactLayout,
}

impl Artifact {
    /// Single text file artifact.
    pub const fn file(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            layout: ArtifactLayout::File,
        }
    }

    /// Directory artifact.
    pub const fn directory(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            layout: ArtifactLayout::Directory,
        }
    }

    /// Artifact with a runtime name.
    pub fn new(name: impl Into<String>, layout: ArtifactLayout) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            layout,
        }
    }

    /// Name without layout decoration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File or directory.
    pub fn layout(&self) -> ArtifactLayout {
        self.layout
    }

    /// Location inside `target_dir`. File names carry the target's base name.
    pub fn path_in(&self, target_dir: &Path, base_name: &str) -> PathBuf {
        match self.layout {
            ArtifactLayout::File => target_dir.join(format!("{}_{}.txt", self.name, base_name)),
            ArtifactLayout::Directory => target_dir.join(self.name.as_ref()),
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.layout {
            ArtifactLayout::File => f.write_str(&self.name),
            ArtifactLayout::Directory => write!(f, "{}/", self.name),
        }
    }
}

/// Artifacts of the standard recon pipeline.
pub mod well_known {
    use super::Artifact;

    /// Raw subfinder output.
    pub const SUBFINDER: Artifact = Artifact::file("subfinder");
    /// Raw amass output.
    pub const AMASS: Artifact = Artifact::file("amass");
    /// One sublist3r report per run.
    pub const SUBLIST3R: Artifact = Artifact::directory("sublist3r");
    /// Normalised union of every discovery output.
    pub const SUBDOMAINS_MERGED: Artifact = Artifact::file("subdomains_merged");
    /// Raw httpx output, one URL per line.
    pub const HTTPX_ALIVE: Artifact = Artifact::file("httpx_alive");
    /// Alive hosts, optionally with a port.
    pub const ALIVE_HOSTS: Artifact = Artifact::file("subdomain_alive");
    /// Alive URLs with scheme.
    pub const ALIVE_URLS: Artifact = Artifact::file("urls");
    /// Raw dirsearch output.
    pub const DIRSEARCH: Artifact = Artifact::file("dirsearch");
    /// Raw katana output.
    pub const KATANA: Artifact = Artifact::file("katana");
    /// Raw urlfinder output.
    pub const URLFINDER: Artifact = Artifact::file("urlfinder");
    /// Raw waybackurls output.
    pub const WAYBACKURLS: Artifact = Artifact::file("waybackurls");
    /// One waymore report per run.
    pub const WAYMORE: Artifact = Artifact::directory("waymore");
    /// One ffuf report per run.
    pub const FFUF: Artifact = Artifact::directory("ffuf");
    /// One arjun report per run.
    pub const ARJUN: Artifact = Artifact::directory("arjun");
    /// One naabu report per run.
    pub const NAABU: Artifact = Artifact::directory("naabu");
    /// Raw cloudenum output.
    pub const CLOUDENUM: Artifact = Artifact::file("cloudenum");
    /// One nuclei report per run.
    pub const NUCLEI: Artifact = Artifact::directory("nuclei");
}

/// Storage used by stages for their artifacts. Paths are absolute.
#[async_trait]
pub trait ArtifactStore: Send + Sync + fmt::Debug {
    /// Creates `path` and its parents.
    async fn ensure_dir(&self, path: &Path) -> io::Result<()>;

    /// Replaces the file with one line per entry.
    async fn write_lines(&self, path: &Path, lines: &[String]) -> io::Result<()>;

    /// Appends `text` verbatim, creating the file if needed.
    async fn append(&self, path: &Path, text: &str) -> io::Result<()>;

    /// Reads a file, or every file of a directory in name order. Invalid
    /// UTF-8 is replaced, blank lines are dropped.
    async fn read_lines(&self, path: &Path) -> io::Result<Vec<String>>;

    /// A non-empty file, or a directory holding at least one non-empty file.
    async fn is_populated(&self, path: &Path) -> bool;

    /// Removes a file or directory; missing paths are not an error.
    async fn remove(&self, path: &Path) -> io::Result<()>;
}

/// [`ArtifactStore`] over the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct LocalArtifactStore;

impl LocalArtifactStore {
    /// Store rooted nowhere in particular; every path it gets is absolute.
    pub fn new() -> Self {
        Self
    }

    async fn directory_files(path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(path).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn write_lines(&self, path: &Path, lines: &[String]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut body = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines {
            body.push_str(line);
            body.push('\n');
        }
        tokio::fs::write(path, body).await
    }

    async fn append(&self, path: &Path, text: &str) -> io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await
    }

    async fn read_lines(&self, path: &Path) -> io::Result<Vec<String>> {
        let files = if tokio::fs::metadata(path).await?.is_dir() {
            Self::directory_files(path).await?
        } else {
            vec![path.to_path_buf()]
        };

        let mut lines = Vec::new();
        for file in files {
            let raw = tokio::fs::read(&file).await?;
            lines.extend(
                String::from_utf8_lossy(&raw)
                    .lines()
                    .map(str::trim_end)
                    .filter(|line| !line.trim().is_empty())
                    .map(str::to_string),
            );
        }
        Ok(lines)
    }

    async fn is_populated(&self, path: &Path) -> bool {
        let Ok(meta) = tokio::fs::metadata(path).await else {
            return false;
        };
        if meta.is_file() {
            return meta.len() > 0;
        }
        let Ok(files) = Self::directory_files(path).await else {
            return false;
        };
        for file in files {
            if let Ok(meta) = tokio::fs::metadata(&file).await
                && meta.len() > 0
            {
                return true;
            }
        }
        false
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        let meta = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };
        if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::well_known::*;
    use super::*;

    #[test]
    fn artifact_paths_follow_layout() {
        let dir = Path::new("/out/recon_example_com");
        assert_eq!(
            ALIVE_HOSTS.path_in(dir, "example_com"),
            dir.join("subdomain_alive_example_com.txt")
        );
        assert_eq!(NUCLEI.path_in(dir, "example_com"), dir.join("nuclei"));
        assert_eq!(NUCLEI.to_string(), "nuclei/");
    }

    #[tokio::test]
    async fn population_checks_files_and_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new();

        let file = tmp.path().join("hosts.txt");
        assert!(!store.is_populated(&file).await);
        store.write_lines(&file, &[]).await.unwrap();
        assert!(!store.is_populated(&file).await);
        store.write_lines(&file, &["a.example.com".into()]).await.unwrap();
        assert!(store.is_populated(&file).await);

        let dir = tmp.path().join("nuclei");
        store.ensure_dir(&dir).await.unwrap();
        assert!(!store.is_populated(&dir).await);
        store.write_lines(&dir.join("b.txt"), &[]).await.unwrap();
        assert!(!store.is_populated(&dir).await);
        store.append(&dir.join("a.txt"), "finding\n").await.unwrap();
        assert!(store.is_populated(&dir).await);

        store.write_lines(&dir.join("b.txt"), &["second".into()]).await.unwrap();
        assert_eq!(
            store.read_lines(&dir).await.unwrap(),
            vec!["finding".to_string(), "second".to_string()]
        );

        store.remove(&dir).await.unwrap();
        store.remove(&dir).await.unwrap();
        assert!(!store.is_populated(&dir).await);
    }
}
