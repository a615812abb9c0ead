//! Source file discovery.
//!
//! [`FileDiscovery`] walks a directory tree and returns every file whose
//! extension is on the allow-list, skipping any subtree rooted at a directory
//! whose name is on the deny-list. The root itself is always walked, whatever
//! its name. Symbolic links are not followed, so no path is visited twice.
//!
//! Both walks either succeed completely or fail with a [`ScanError`]; partial
//! results are never returned. Results are sorted so runs are reproducible.
//!
//! The parallel walk is a bounded recursive descent: a directory's files go
//! straight into a shared accumulator, and each subdirectory is handed to a new
//! task when a slot is free or walked inline when none is. Inline walking never
//! waits for a slot, so the walk always makes progress and never has more than
//! `max_workers` walkers running.
use crate::error::ScanError;
use futures::future::BoxFuture;
use ignore::WalkBuilder;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, Semaphore};
use tracing::debug;

/// File extensions (without the dot) treated as source code.
pub const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "cpp", "go", "java", "lua", "jsx", "tsx", "html", "css", "php", "rb", "rs",
    "cs", "swift", "kt",
];

/// Directory names whose subtrees are never walked.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "venv",
    "__pycache__",
    "dist",
    "build",
    ".idea",
    ".vscode",
    "target",
    "vendor",
];

#[derive(Debug, Clone)]
pub struct FileDiscovery {
    extensions: Arc<HashSet<String>>,
    skip_dirs: Arc<HashSet<String>>,
}

impl Default for FileDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl FileDiscovery {
    pub fn new() -> Self {
        Self {
            extensions: Arc::new(CODE_EXTENSIONS.iter().map(|s| s.to_string()).collect()),
            skip_dirs: Arc::new(SKIP_DIRS.iter().map(|s| s.to_string()).collect()),
        }
    }

    /// Replace the extension allow-list (builder style)
    pub fn with_extensions<I, S>(self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: Arc::new(
                extensions
                    .into_iter()
                    .map(|e| e.as_ref().trim_start_matches('.').to_string())
                    .collect(),
            ),
            ..self
        }
    }

    /// Replace the directory deny-list (builder style)
    pub fn with_skip_dirs<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            skip_dirs: Arc::new(names.into_iter().map(|n| n.as_ref().to_string()).collect()),
            ..self
        }
    }

    pub fn is_code_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| self.extensions.contains(ext))
    }

    pub fn is_skipped_dir(&self, name: &OsStr) -> bool {
        name.to_str().is_some_and(|name| self.skip_dirs.contains(name))
    }

    /// Walk `root` on the current thread.
    pub fn discover(&self, root: &Path) -> Result<Vec<PathBuf>, ScanError> {
        check_root(root)?;

        let skip_dirs = self.clone();
        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(false)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                !(entry.depth() > 0 && is_dir && skip_dirs.is_skipped_dir(entry.file_name()))
            })
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| ScanError::Walk {
                message: e.to_string(),
            })?;
            let is_dir = entry.file_type().is_none_or(|t| t.is_dir());
            if !is_dir && self.is_code_file(entry.path()) {
                files.push(entry.into_path());
            }
        }

        files.sort();
        debug!("Discovered {} files under {}", files.len(), root.display());
        Ok(files)
    }

    /// Walk `root` with up to `max_workers` concurrent directory walkers.
    ///
    /// A `max_workers` of zero means one walker per available core.
    pub async fn discover_parallel(
        &self,
        root: &Path,
        max_workers: usize,
    ) -> Result<Vec<PathBuf>, ScanError> {
        let (files, _) = self.walk_parallel(root, max_workers).await?;
        Ok(files)
    }

    /// Sorted matches plus the highest number of walkers that ran at once.
    async fn walk_parallel(
        &self,
        root: &Path,
        max_workers: usize,
    ) -> Result<(Vec<PathBuf>, usize), ScanError> {
        check_root(root)?;

        let max_workers = if max_workers == 0 {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            max_workers
        };

        // The caller's own walker counts against the budget.
        let walk = Arc::new(ParallelWalk {
            filter: self.clone(),
            slots: Arc::new(Semaphore::new(max_workers - 1)),
            files: Mutex::new(Vec::new()),
            walkers: AtomicUsize::new(0),
            peak_walkers: AtomicUsize::new(0),
        });
        walk.enter();
        let result = walk_dir(walk.clone(), root.to_path_buf()).await;
        walk.leave();
        result?;

        let mut files = std::mem::take(&mut *walk.files.lock().await);
        files.sort();
        let peak = walk.peak_walkers.load(Ordering::SeqCst);
        debug!(
            "Discovered {} files under {} with {peak} of {max_workers} walkers",
            files.len(),
            root.display()
        );
        Ok((files, peak))
    }
}

fn check_root(root: &Path) -> Result<(), ScanError> {
    let metadata = std::fs::metadata(root).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ScanError::NotFound {
                path: root.to_path_buf(),
            }
        } else {
            ScanError::Io {
                path: root.to_path_buf(),
                source,
            }
        }
    })?;
    if !metadata.is_dir() {
        return Err(ScanError::NotADirectory {
            path: root.to_path_buf(),
        });
    }
    Ok(())
}

struct ParallelWalk {
    filter: FileDiscovery,
    slots: Arc<Semaphore>,
    files: Mutex<Vec<PathBuf>>,
    walkers: AtomicUsize,
    peak_walkers: AtomicUsize,
}

impl ParallelWalk {
    fn enter(&self) {
        let now = self.walkers.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_walkers.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.walkers.fetch_sub(1, Ordering::SeqCst);
    }
}

fn walk_dir(walk: Arc<ParallelWalk>, dir: PathBuf) -> BoxFuture<'static, Result<(), ScanError>> {
    Box::pin(async move {
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| ScanError::Io { path, source }
        };

        let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_error(&dir))?;
        let mut spawned = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(io_error(&dir))? {
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(io_error(&path))?;

            if file_type.is_dir() {
                if walk.filter.is_skipped_dir(&entry.file_name()) {
                    continue;
                }
                match walk.slots.clone().try_acquire_owned() {
                    Ok(slot) => {
                        let walk = walk.clone();
                        spawned.push(tokio::spawn(async move {
                            let _slot = slot;
                            walk.enter();
                            let result = walk_dir(walk.clone(), path).await;
                            walk.leave();
                            result
                        }));
                    }
                    Err(_) => walk_dir(walk.clone(), path).await?,
                }
            } else if walk.filter.is_code_file(&path) {
                walk.files.lock().await.push(path);
            }
        }

        for handle in spawned {
            handle.await.map_err(|e| ScanError::Walk {
                message: e.to_string(),
            })??;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "x").unwrap();
    }

    fn relative(root: &Path, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    fn sample_tree() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(root, "main.go");
        touch(root, "README.md");
        touch(root, "src/lib.rs");
        touch(root, "src/app/view.tsx");
        touch(root, "src/app/style.css");
        touch(root, "src/node_modules/dep/index.js");
        touch(root, "node_modules/left-pad/index.js");
        touch(root, ".git/hooks/pre-commit.py");
        touch(root, "web/dist/bundle.js");
        touch(root, "pkg/__pycache__/mod.py");
        touch(root, "pkg/mod.py");
        touch(root, "notes.txt");
        dir
    }

    const EXPECTED: &[&str] = &[
        "main.go",
        "pkg/mod.py",
        "src/app/style.css",
        "src/app/view.tsx",
        "src/lib.rs",
    ];

    #[test]
    fn test_serial_discovery_filters() -> anyhow::Result<()> {
        let dir = sample_tree();
        let files = FileDiscovery::new().discover(dir.path())?;
        assert_eq!(relative(dir.path(), &files), EXPECTED);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_matches_serial() -> anyhow::Result<()> {
        let dir = sample_tree();
        for i in 0..30 {
            touch(dir.path(), &format!("deep/level{}/sub{i}/file{i}.kt", i % 5));
        }
        let discovery = FileDiscovery::new();
        let serial = discovery.discover(dir.path())?;

        for workers in [1, 2, 8, 0] {
            let parallel = discovery.discover_parallel(dir.path(), workers).await?;
            assert_eq!(parallel, serial, "mismatch with {workers} workers");
        }
        assert_eq!(serial.len(), EXPECTED.len() + 30);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_walkers_stay_within_budget() -> anyhow::Result<()> {
        let dir = tempdir()?;
        for a in 0..6 {
            for b in 0..4 {
                for c in 0..3 {
                    touch(dir.path(), &format!("d{a}/e{b}/f{c}/leaf.go"));
                }
                touch(dir.path(), &format!("d{a}/e{b}/mid.py"));
            }
        }
        let discovery = FileDiscovery::new();

        for max_workers in [1, 2, 3] {
            let (files, peak) = discovery.walk_parallel(dir.path(), max_workers).await?;
            assert_eq!(files.len(), 6 * 4 * 4);
            assert!(peak <= max_workers, "{peak} walkers with a budget of {max_workers}");
            assert_eq!(peak >= 2, max_workers >= 2, "peak {peak} with budget {max_workers}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_root_fails() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");

        assert!(matches!(
            FileDiscovery::new().discover(&missing),
            Err(ScanError::NotFound { .. })
        ));
        assert!(matches!(
            FileDiscovery::new().discover_parallel(&missing, 4).await,
            Err(ScanError::NotFound { .. })
        ));
    }

    #[test]
    fn test_file_root_fails() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "single.go");
        let err = FileDiscovery::new()
            .discover(&dir.path().join("single.go"))
            .unwrap_err();
        assert!(matches!(err, ScanError::NotADirectory { .. }));
    }

    #[test]
    fn test_root_named_like_skipped_dir_is_walked() -> anyhow::Result<()> {
        let dir = tempdir()?;
        touch(dir.path(), "build/tool.go");
        let files = FileDiscovery::new().discover(&dir.path().join("build"))?;
        assert_eq!(files.len(), 1);
        Ok(())
    }

    #[test]
    fn test_custom_lists() -> anyhow::Result<()> {
        let dir = sample_tree();
        let files = FileDiscovery::new()
            .with_extensions([".md", "txt"])
            .with_skip_dirs(Vec::<String>::new())
            .discover(dir.path())?;
        assert_eq!(relative(dir.path(), &files), vec!["README.md", "notes.txt"]);
        Ok(())
    }

    #[test]
    fn test_extension_matching() {
        let discovery = FileDiscovery::new();
        assert!(discovery.is_code_file(Path::new("a/b/c.swift")));
        assert!(!discovery.is_code_file(Path::new("Makefile")));
        assert!(!discovery.is_code_file(Path::new("archive.go.bak")));
        assert!(discovery.is_skipped_dir(OsStr::new("vendor")));
        assert!(!discovery.is_skipped_dir(OsStr::new("src")));
    }
}
