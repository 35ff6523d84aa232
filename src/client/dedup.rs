use chrono::NaiveDateTime;
use percent_encoding::percent_decode_str;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use url::Url;

/// Characters never kept in the path prefix of a dedup key
const DENYLIST: &[char] = &[
    '<', '>', ':', '"', '/', '\\', '|', '!', '?', '*', '%', '=', '&', ';', ',', '[', ']',
];

const PATH_PREFIX_CHARS: usize = 8;

/// Identity of one logical fetch on the requester side: the second it was
/// made, the target host and the start of the target path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    stamp: NaiveDateTime,
    host: String,
    path_prefix: String,
}

impl DedupKey {
    pub fn new(url: &Url, at: NaiveDateTime) -> Self {
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}_{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };
        let path_prefix: String = percent_decode_str(url.path())
            .decode_utf8_lossy()
            .chars()
            .take(PATH_PREFIX_CHARS)
            .filter(|c| !DENYLIST.contains(c))
            .collect();

        Self {
            stamp: at,
            host: strip_denied(&host),
            path_prefix,
        }
    }

    /// Local directory name; stable for equal keys.
    pub fn dir_name(&self) -> String {
        let mut name = format!(
            "relaybox_results_{}_{}",
            self.stamp.format("%Y_%m_%d_%H_%M_%S"),
            self.host
        );
        if !self.path_prefix.is_empty() {
            name.push('_');
            name.push_str(&self.path_prefix);
        }
        name
    }
}

fn strip_denied(value: &str) -> String {
    value.chars().filter(|c| !DENYLIST.contains(c)).collect()
}

/// Lookup of keys already fetched into a target directory
pub trait DedupIndex: Send + Sync {
    /// Records `key` under `target`. Returns `false` when it was already
    /// there, in which case the caller must not fetch again.
    fn claim(&self, target: &Path, key: &DedupKey) -> io::Result<bool>;
}

/// Uses the destination directories themselves as the index.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryIndex;

impl DedupIndex for DirectoryIndex {
    fn claim(&self, target: &Path, key: &DedupKey) -> io::Result<bool> {
        match std::fs::create_dir(target.join(key.dir_name())) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// In-process index; nothing is written to disk.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    claimed: Mutex<HashSet<(PathBuf, DedupKey)>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DedupIndex for MemoryIndex {
    fn claim(&self, target: &Path, key: &DedupKey) -> io::Result<bool> {
        let mut claimed = self
            .claimed
            .lock()
            .map_err(|_| io::Error::other("dedup index lock poisoned"))?;
        Ok(claimed.insert((target.to_path_buf(), key.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 1)
            .unwrap()
    }

    fn key(url: &str) -> DedupKey {
        DedupKey::new(&Url::parse(url).unwrap(), at())
    }

    #[test]
    fn test_dir_name_layout() {
        assert_eq!(
            key("http://example.com/a").dir_name(),
            "relaybox_results_2024_03_07_09_05_01_example.com_a"
        );
        assert_eq!(
            key("http://example.com/").dir_name(),
            "relaybox_results_2024_03_07_09_05_01_example.com"
        );
        assert_eq!(
            key("http://127.0.0.1:8080/x").dir_name(),
            "relaybox_results_2024_03_07_09_05_01_127.0.0.1_8080_x"
        );
    }

    #[test]
    fn test_path_prefix_is_truncated_then_sanitized() {
        assert_eq!(key("http://h/a:b|c*d/efgh").path_prefix, "abcd");
        assert_eq!(key("http://h/abcdefghijkl").path_prefix, "abcdefg");
    }

    #[test]
    fn test_path_prefix_is_decoded_before_truncation() {
        assert_eq!(key("http://h/a b").path_prefix, "a b");
        assert_eq!(key("http://h/a%20b").path_prefix, "a b");
        // "%C3%A9" is one character once decoded
        assert_eq!(key("http://h/%C3%A9tude-longue").path_prefix, "\u{e9}tude-l");
    }

    #[test]
    fn test_query_does_not_change_the_key() {
        assert_eq!(key("http://h/page?x=1"), key("http://h/page?x=2"));
    }

    #[test]
    fn test_memory_index_claims_once() {
        let index = MemoryIndex::new();
        let target = Path::new("/tmp/target");
        let key = key("http://example.com/a");

        assert!(index.claim(target, &key).unwrap());
        assert!(!index.claim(target, &key).unwrap());
        assert!(index.claim(Path::new("/tmp/other"), &key).unwrap());
    }

    #[test]
    fn test_directory_index_claims_once() {
        let target = TempDir::new().unwrap();
        let key = key("http://example.com/a");

        assert!(DirectoryIndex.claim(target.path(), &key).unwrap());
        assert!(target.path().join(key.dir_name()).is_dir());
        assert!(!DirectoryIndex.claim(target.path(), &key).unwrap());
    }
}
