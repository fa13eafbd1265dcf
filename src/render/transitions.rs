//! Transition assets played as a lead-in before clips.

use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A transition video and how much of it to use.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub path: PathBuf,
    pub max_seconds: f64,
}

/// The `*.mp4` files of a transitions directory, in name order.
#[derive(Debug, Clone, Default)]
pub struct TransitionLibrary {
    assets: Vec<PathBuf>,
    max_seconds: f64,
}

impl TransitionLibrary {
    /// A library with no assets; every pick is `None`.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_assets(assets: Vec<PathBuf>, max_seconds: f64) -> Self {
        Self {
            assets,
            max_seconds,
        }
    }

    /// Scan `dir` for `.mp4` files. A missing directory yields an empty library.
    pub fn load(dir: &Path, max_seconds: f64) -> Result<Self> {
        if !dir.is_dir() {
            warn!("Transitions directory {} not found", dir.display());
            return Ok(Self::empty());
        }

        let mut assets: Vec<PathBuf> = std::fs::read_dir(dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| e.eq_ignore_ascii_case("mp4"))
            })
            .collect();
        assets.sort();

        info!("Found {} transition file(s)", assets.len());
        Ok(Self::from_assets(assets, max_seconds))
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Transition to play before the clip at `index`.
    ///
    /// The first clip has none; later clips cycle through the assets.
    pub fn pick(&self, index: usize) -> Option<Transition> {
        if index == 0 || self.assets.is_empty() || self.max_seconds <= 0.0 {
            return None;
        }
        let path = self.assets[index % self.assets.len()].clone();
        debug!("Clip {} uses transition {}", index, path.display());
        Some(Transition {
            path,
            max_seconds: self.max_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_cycles_and_skips_first() {
        let lib = TransitionLibrary::from_assets(
            vec![PathBuf::from("a.mp4"), PathBuf::from("b.mp4")],
            1.5,
        );
        assert_eq!(lib.pick(0), None);
        assert_eq!(lib.pick(1).unwrap().path, PathBuf::from("b.mp4"));
        assert_eq!(lib.pick(2).unwrap().path, PathBuf::from("a.mp4"));
        assert_eq!(lib.pick(3).unwrap().max_seconds, 1.5);
        assert_eq!(TransitionLibrary::empty().pick(4), None);
    }

    #[test]
    fn test_load_only_mp4() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.mp4"), b"").unwrap();
        std::fs::write(dir.path().join("a.MP4"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let lib = TransitionLibrary::load(dir.path(), 1.5).unwrap();
        assert_eq!(lib.len(), 2);
        assert!(lib.pick(1).unwrap().path.ends_with("b.mp4"));

        let missing = TransitionLibrary::load(&dir.path().join("nope"), 1.5).unwrap();
        assert!(missing.is_empty());
    }
}
