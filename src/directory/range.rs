//! The persistent CustomerID range file and the carving policy (§4.5 "Range allocation")

use crate::error::RelayError;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt as _;
use tokio::sync::Mutex;

/// `[from, to]` inclusive bounds of a pool of not-yet-issued CustomerIDs.
///
/// `from == 0 && to == 0` is the sentinel for "no range owned" (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bounds {
    from: u64,
    to: u64,
}

impl Bounds {
    const EMPTY: Self = Self { from: 0, to: 0 };

    fn is_empty(self) -> bool {
        self == Self::EMPTY
    }

    fn remaining(self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.to - self.from + 1
        }
    }
}

/// One instance's persistent CustomerID range, guarded against concurrent
/// carves from multiple handlers in this process.
pub struct RangeFile {
    path: PathBuf,
    bounds: Mutex<Bounds>,
}

impl RangeFile {
    /// Loads (or creates, as an empty `(0,0)` range) the range file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RangeFileError`] if the file exists but cannot
    /// be read or its contents are not two base-10 integers.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, RelayError> {
        let path = path.into();
        let bounds = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => parse_bounds(&contents)?,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Bounds::EMPTY,
            Err(source) => return Err(RelayError::RangeFileError(source)),
        };
        Ok(Self {
            path,
            bounds: Mutex::new(bounds),
        })
    }

    /// True if this range currently holds no IDs to issue.
    pub async fn is_empty(&self) -> bool {
        self.bounds.lock().await.is_empty()
    }

    /// Replaces this range wholesale, e.g. after fetching a fresh allocation
    /// from the master or a peer. Persists immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RangeFileError`] if the file cannot be rewritten.
    pub async fn replace(&self, from: u64, to: u64) -> Result<(), RelayError> {
        let mut bounds = self.bounds.lock().await;
        *bounds = Bounds { from, to };
        persist(&self.path, *bounds).await
    }

    /// §4.5 `carve(file, num, fraction, auto=true)`.
    ///
    /// Tries `num` first (if given and the pool can satisfy it exactly);
    /// otherwise carves `fraction` of the remaining pool. Returns `None` if
    /// the pool is empty or `num` was given but exceeds what's left.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RangeFileError`] if the updated bounds cannot be persisted.
    pub async fn carve(
        &self,
        num: Option<u64>,
        fraction: f64,
    ) -> Result<Option<(u64, u64)>, RelayError> {
        let mut bounds = self.bounds.lock().await;
        if bounds.is_empty() {
            return Ok(None);
        }

        let remaining = bounds.remaining();
        let size = match num {
            Some(requested) if requested <= remaining => requested,
            Some(_) => return Ok(None),
            None if fraction < 1.0 => {
                #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
                let by_fraction = ((remaining as f64) * fraction).ceil() as u64;
                by_fraction.clamp(1, remaining)
            }
            None => remaining,
        };

        let carved_from = bounds.from;
        let carved_to = carved_from + size - 1;
        let new_from = carved_to + 1;
        *bounds = if new_from > bounds.to {
            Bounds::EMPTY
        } else {
            Bounds {
                from: new_from,
                to: bounds.to,
            }
        };
        persist(&self.path, *bounds).await?;
        tracing::info!(from = carved_from, to = carved_to, remaining = bounds.remaining(), "carved CustomerID range");
        Ok(Some((carved_from, carved_to)))
    }
}

fn parse_bounds(contents: &str) -> Result<Bounds, RelayError> {
    let mut lines = contents.lines();
    let corrupt = || {
        RelayError::RangeFileError(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "range file must contain exactly two base-10 integers",
        ))
    };
    let from: u64 = lines.next().ok_or_else(corrupt)?.trim().parse().map_err(|_| corrupt())?;
    let to: u64 = lines.next().ok_or_else(corrupt)?.trim().parse().map_err(|_| corrupt())?;
    Ok(Bounds { from, to })
}

async fn persist(path: &Path, bounds: Bounds) -> Result<(), RelayError> {
    let tmp_path = path.with_extension("tmp");
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(RelayError::RangeFileError)?;
    }
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .map_err(RelayError::RangeFileError)?;
    file.write_all(format!("{}\n{}\n", bounds.from, bounds.to).as_bytes())
        .await
        .map_err(RelayError::RangeFileError)?;
    file.flush().await.map_err(RelayError::RangeFileError)?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(RelayError::RangeFileError)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_starts_as_empty_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let range = RangeFile::load(dir.path().join("range.txt")).await.unwrap();
        assert!(range.is_empty().await);
        assert_eq!(range.carve(Some(1), 0.1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn carves_an_exact_num_and_advances_from() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("range.txt");
        let range = RangeFile::load(&path).await.unwrap();
        range.replace(1000, 1999).await.unwrap();

        let carved = range.carve(Some(100), 0.1).await.unwrap().unwrap();
        assert_eq!(carved, (1000, 1099));

        let persisted = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(persisted, "1100\n1999\n");
    }

    #[tokio::test]
    async fn falls_back_to_fraction_when_num_not_given() {
        let dir = tempfile::tempdir().unwrap();
        let range = RangeFile::load(dir.path().join("range.txt")).await.unwrap();
        range.replace(0, 9).await.unwrap();

        let carved = range.carve(None, 0.5).await.unwrap().unwrap();
        assert_eq!(carved, (0, 4));
    }

    #[tokio::test]
    async fn num_exceeding_remaining_pool_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let range = RangeFile::load(dir.path().join("range.txt")).await.unwrap();
        range.replace(0, 9).await.unwrap();
        assert_eq!(range.carve(Some(100), 0.1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn exhausting_the_pool_resets_to_the_empty_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let range = RangeFile::load(dir.path().join("range.txt")).await.unwrap();
        range.replace(5, 5).await.unwrap();
        let carved = range.carve(Some(1), 0.1).await.unwrap().unwrap();
        assert_eq!(carved, (5, 5));
        assert!(range.is_empty().await);
        assert_eq!(range.carve(Some(1), 0.1).await.unwrap(), None);
    }
}
