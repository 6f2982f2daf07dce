use std::fmt;
use std::path::Path;

use log::debug;

pub const FILE_VERSION: &str = "FileVersion";

/// Language and code page pair naming one string table of a version resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    pub language: u16,
    pub code_page: u16,
}

impl fmt::Display for Translation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}{:04x}", self.language, self.code_page)
    }
}

/// The four calls needed to pull a string out of a file's version resource.
///
/// Mirrors `GetFileVersionInfoSize`, `GetFileVersionInfo` and `VerQueryValue`. Absence is the
/// only failure any of them reports.
pub trait VersionQuery {
    /// Size of the version resource block, 0 if the file has none.
    fn query_size(&self, path: &Path) -> u32;

    fn query_block(&self, path: &Path, size: u32) -> Option<Vec<u8>>;

    fn query_translations(&self, block: &[u8]) -> Vec<Translation>;

    fn query_string_field(
        &self,
        block: &[u8],
        translation: Translation,
        field: &str,
    ) -> Option<String>;
}

#[cfg(windows)]
pub type SystemVersionQuery = crate::winver::WinVerQuery;

#[cfg(not(windows))]
pub type SystemVersionQuery = crate::pe::PeVersionQuery;

/// Returns the `FileVersion` string of `dir/file_name`, untouched, or `None` if any step of
/// the lookup comes up empty.
pub fn read_file_version<Q: VersionQuery + ?Sized, N: AsRef<Path>>(
    query: &Q,
    dir: &Path,
    file_name: N,
) -> Option<String> {
    let path = dir.join(file_name);

    let size = query.query_size(&path);
    if size == 0 {
        debug!("{}: no version resource", path.display());
        return None;
    }

    let Some(block) = query.query_block(&path, size) else {
        debug!("{}: failed to read {} byte version block", path.display(), size);
        return None;
    };

    let Some(&translation) = query.query_translations(&block).first() else {
        debug!("{}: no translation table", path.display());
        return None;
    };

    let version = query.query_string_field(&block, translation, FILE_VERSION);
    if version.is_none() {
        debug!("{}: no {} in string table {}", path.display(), FILE_VERSION, translation);
    }
    version
}
