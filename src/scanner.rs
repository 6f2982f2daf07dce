use std::collections::HashMap;
use std::path::Path;

use log::{debug, info};
use walkdir::WalkDir;

use crate::error::Error;
use crate::version_extractor::{read_file_version, VersionQuery};

/// Lower-cased file name to `FileVersion`.
pub type VersionMap = HashMap<String, String>;

const EXTENSIONS: [&str; 4] = ["exe", "dll", "sys", "mui"];

/// Whether `name` ends in one of the extensions worth querying. `name` must be lower-cased.
pub fn is_candidate(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| EXTENSIONS.contains(&ext))
}

/// Collects the version of every executable, library, driver and MUI file directly inside
/// `dir`. Files without a usable version resource are left out; a directory that cannot be
/// listed is an error.
pub fn scan_directory<Q: VersionQuery + ?Sized>(query: &Q, dir: &Path) -> Result<VersionMap, Error> {
    // walkdir yields nothing, not an error, for a root that is a plain file
    if dir.metadata().is_ok_and(|meta| !meta.is_dir()) {
        return Err(Error::NotADirectory { path: dir.to_path_buf() });
    }

    let mut versions = VersionMap::new();
    let mut candidates = 0usize;

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|source| Error::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_lowercase();
        if !is_candidate(&name) {
            continue;
        }
        candidates += 1;

        match read_file_version(query, dir, entry.file_name()) {
            Some(version) => {
                debug!("{}: {}", name, version);
                versions.insert(name, version);
            }
            None => debug!("skipping {}", name),
        }
    }

    info!(
        "{}: {} of {} candidate files carry a FileVersion",
        dir.display(),
        versions.len(),
        candidates
    );
    Ok(versions)
}
