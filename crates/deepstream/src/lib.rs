//! Bindings to the pieces of DeepStream that are not reachable through plain
//! GStreamer element properties: batch metadata attached to buffers, and the
//! Smart Record (NvDsSR) library.
//!
//! Both libraries are opened at runtime so that the rest of the workspace
//! builds and tests on machines without DeepStream installed. The
//! [`element`] helpers cover the property quirks of the DeepStream plugins
//! themselves.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use libloading::Library;
use log::*;

pub mod element;
pub mod meta;
pub mod smart_record;

pub use meta::*;
pub use smart_record::*;

/// Where DeepStream installs its libraries on both Jetson and dGPU images.
pub const DEFAULT_LIB_DIR: &str = "/opt/nvidia/deepstream/deepstream/lib";

/// Overrides [`DEFAULT_LIB_DIR`].
pub const LIB_DIR_ENV: &str = "SMARTCAM_DEEPSTREAM_LIB_DIR";

/// Paths tried, in order, when opening `file_name`. The bare file name comes
/// last so that the dynamic loader's own search path is consulted.
pub fn library_candidates(override_dir: Option<&Path>, file_name: &str) -> Vec<PathBuf> {
    let mut candidates = Vec::with_capacity(3);

    if let Some(dir) = override_dir {
        candidates.push(dir.join(file_name));
    }

    candidates.push(Path::new(DEFAULT_LIB_DIR).join(file_name));
    candidates.push(PathBuf::from(file_name));
    candidates
}

pub(crate) fn open_library(file_name: &str) -> anyhow::Result<Library> {
    let override_dir = std::env::var_os(LIB_DIR_ENV).map(PathBuf::from);
    let mut last_err = None;

    for candidate in library_candidates(override_dir.as_deref(), file_name) {
        // SAFETY: the DeepStream libraries have no initialisers that depend on
        // being loaded at link time.
        match unsafe { Library::new(&candidate) } {
            Ok(lib) => {
                debug!("loaded {}", candidate.display());
                return Ok(lib);
            }
            Err(err) => {
                trace!("could not load {}: {err}", candidate.display());
                last_err = Some(err);
            }
        }
    }

    match last_err {
        Some(err) => Err(err).with_context(|| format!("failed to load {file_name}")),
        None => Err(anyhow!("no candidate paths for {file_name}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_dir_is_tried_first() {
        let candidates = library_candidates(Some(Path::new("/custom/lib")), "libfoo.so");

        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/custom/lib/libfoo.so"),
                PathBuf::from("/opt/nvidia/deepstream/deepstream/lib/libfoo.so"),
                PathBuf::from("libfoo.so"),
            ]
        );
    }

    #[test]
    fn default_dir_then_loader_path() {
        let candidates = library_candidates(None, "libfoo.so");

        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].starts_with(DEFAULT_LIB_DIR));
        assert_eq!(candidates[1], PathBuf::from("libfoo.so"));
    }

    #[test]
    fn missing_library_is_an_error() {
        let err = open_library("libsmartcam-does-not-exist.so").unwrap_err();
        assert!(format!("{err:#}").contains("libsmartcam-does-not-exist.so"));
    }
}
