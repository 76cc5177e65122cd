use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FileFingerprint {
    size: u64,
    modified: SystemTime,
}

/// Polls a directory tree matching a glob at a fixed cadence, emitting a
/// file as settled once two successive polls observe an identical size and
/// modified time (§4.8).
pub struct FileWatcher {
    root: PathBuf,
    glob: glob::Pattern,
    poll_interval: Duration,
    /// The fingerprint seen on the previous poll for files not yet settled.
    pending: HashMap<PathBuf, FileFingerprint>,
    /// Settled files already emitted; never re-emitted.
    settled: HashSet<PathBuf>,
    existing_mode: bool,
    snapshot_emitted: bool,
}

impl FileWatcher {
    pub fn new(root: PathBuf, glob_pattern: &str, poll_interval: Duration, existing_mode: bool) -> Self {
        let glob = glob::Pattern::new(glob_pattern).unwrap_or_else(|_| glob::Pattern::new("*").unwrap());
        Self {
            root,
            glob,
            poll_interval,
            pending: HashMap::new(),
            settled: HashSet::new(),
            existing_mode,
            snapshot_emitted: false,
        }
    }

    fn scan_candidates(&self) -> Vec<(PathBuf, FileFingerprint)> {
        let mut out = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return out;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !self.glob.matches(name) {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let Ok(modified) = meta.modified() else {
                continue;
            };
            out.push((
                path,
                FileFingerprint {
                    size: meta.len(),
                    modified,
                },
            ));
        }
        out
    }

    /// Runs one poll, returning newly settled files discovered this tick.
    /// In `existing` mode, returns the full snapshot exactly once and an
    /// empty vec on every subsequent call.
    pub fn poll(&mut self) -> Vec<PathBuf> {
        if self.existing_mode {
            if self.snapshot_emitted {
                return Vec::new();
            }
            self.snapshot_emitted = true;
            let mut files: Vec<PathBuf> = self
                .scan_candidates()
                .into_iter()
                .map(|(path, _)| path)
                .collect();
            files.sort();
            for f in &files {
                self.settled.insert(f.clone());
            }
            return files;
        }

        let mut newly_settled = Vec::new();
        let candidates = self.scan_candidates();
        let mut seen_this_tick = HashSet::new();

        for (path, fingerprint) in candidates {
            seen_this_tick.insert(path.clone());
            if self.settled.contains(&path) {
                continue;
            }
            match self.pending.get(&path) {
                Some(prev) if *prev == fingerprint => {
                    self.settled.insert(path.clone());
                    self.pending.remove(&path);
                    newly_settled.push(path);
                }
                _ => {
                    self.pending.insert(path, fingerprint);
                }
            }
        }

        // Drop pending entries for files that disappeared between polls.
        self.pending.retain(|path, _| seen_this_tick.contains(path));

        newly_settled.sort();
        newly_settled
    }

    pub fn settled_count(&self) -> usize {
        self.settled.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::thread::sleep;

    #[test]
    fn settles_a_stable_file_after_two_polls() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.tiff");
        std::fs::write(&file_path, b"hello").unwrap();

        let mut watcher = FileWatcher::new(dir.path().to_path_buf(), "*.tiff", Duration::from_millis(1), false);
        let first = watcher.poll();
        assert!(first.is_empty(), "file should not settle on first poll");

        sleep(Duration::from_millis(5));
        let second = watcher.poll();
        assert_eq!(second, vec![file_path.clone()]);

        let third = watcher.poll();
        assert!(third.is_empty(), "settled file must not be re-emitted");
    }

    #[test]
    fn growing_file_never_settles_until_writes_stop() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("b.tiff");
        let mut f = std::fs::File::create(&file_path).unwrap();
        f.write_all(b"partial").unwrap();
        f.sync_all().unwrap();

        let mut watcher = FileWatcher::new(dir.path().to_path_buf(), "*.tiff", Duration::from_millis(1), false);
        watcher.poll();

        f.write_all(b"more data").unwrap();
        f.sync_all().unwrap();
        let settled = watcher.poll();
        assert!(settled.is_empty());
    }

    #[test]
    fn existing_mode_emits_snapshot_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.tiff"), b"x").unwrap();
        std::fs::write(dir.path().join("b.tiff"), b"y").unwrap();

        let mut watcher = FileWatcher::new(dir.path().to_path_buf(), "*.tiff", Duration::from_millis(1), true);
        let first = watcher.poll();
        assert_eq!(first.len(), 2);
        let second = watcher.poll();
        assert!(second.is_empty());
    }
}
