use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use log::debug;
use thiserror::Error;

use crate::version_block;
use crate::version_extractor::{Translation, VersionQuery};

// PE file structure constants
const IMAGE_DOS_SIGNATURE: u16 = 0x5A4D; // "MZ"
const PE_SIGNATURE: u32 = 0x00004550; // "PE\0\0"
const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;

const COFF_HEADER_LEN: u64 = 20;
const SECTION_HEADER_LEN: u64 = 40;
const RESOURCE_DIRECTORY_LEN: u32 = 16;
const RESOURCE_ENTRY_LEN: u32 = 8;
const IMAGE_DIRECTORY_ENTRY_RESOURCE: u32 = 2;

const RT_VERSION: u32 = 16;
const SUBDIRECTORY_FLAG: u32 = 0x8000_0000;

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("not a PE image: {0}")]
    NotPe(&'static str),

    #[error("image has no resource directory")]
    NoResources,

    #[error("no section contains RVA 0x{0:08X}")]
    UnmappedRva(u32),

    #[error("image has no RT_VERSION resource")]
    NoVersionResource,

    #[error("malformed resource directory: {0}")]
    Malformed(&'static str),

    #[error("version resource of {size} bytes does not fit in a {file_len} byte file")]
    Truncated { size: u32, file_len: u64 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy)]
struct Section {
    virtual_address: u32,
    virtual_size: u32,
    pointer_to_raw_data: u32,
}

impl Section {
    fn contains(&self, rva: u32) -> bool {
        rva >= self.virtual_address && (rva - self.virtual_address) < self.virtual_size
    }

    fn file_offset(&self, rva: u32) -> u64 {
        (rva - self.virtual_address) as u64 + self.pointer_to_raw_data as u64
    }
}

#[derive(Debug)]
struct ResourceDirectoryEntry {
    name_or_id: u32,
    offset_to_data_or_subdirectory: u32,
}

impl ResourceDirectoryEntry {
    fn is_subdirectory(&self) -> bool {
        self.offset_to_data_or_subdirectory & SUBDIRECTORY_FLAG != 0
    }

    fn offset(&self) -> u32 {
        self.offset_to_data_or_subdirectory & !SUBDIRECTORY_FLAG
    }
}

/// Location and size of a resource's raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceData {
    pub offset: u64,
    pub size: u32,
}

/// Reads the resource section of a PE image straight from disk.
pub struct ResourceReader {
    file: File,
    file_len: u64,
    sections: Vec<Section>,
    /// File offset of the root resource directory.
    resource_root: u64,
}

impl ResourceReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ResourceError> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();

        let dos_signature = read_u16_at(&mut file, 0)?;
        if dos_signature != IMAGE_DOS_SIGNATURE {
            return Err(ResourceError::NotPe("invalid DOS signature"));
        }

        let pe_offset = read_u32_at(&mut file, 0x3C)? as u64;
        if read_u32_at(&mut file, pe_offset)? != PE_SIGNATURE {
            return Err(ResourceError::NotPe("invalid PE signature"));
        }

        // COFF header follows the signature
        let coff = pe_offset + 4;
        let number_of_sections = read_u16_at(&mut file, coff + 2)?;
        let optional_header_size = read_u16_at(&mut file, coff + 16)? as u64;
        let optional_header = coff + COFF_HEADER_LEN;

        let data_directory_offset = match read_u16_at(&mut file, optional_header)? {
            PE32_MAGIC => 96,
            PE32_PLUS_MAGIC => 112,
            _ => return Err(ResourceError::NotPe("unknown optional header magic")),
        };
        let number_of_rva_and_sizes =
            read_u32_at(&mut file, optional_header + data_directory_offset - 4)?;
        if number_of_rva_and_sizes <= IMAGE_DIRECTORY_ENTRY_RESOURCE {
            return Err(ResourceError::NoResources);
        }

        let resource_entry =
            optional_header + data_directory_offset + IMAGE_DIRECTORY_ENTRY_RESOURCE as u64 * 8;
        let resource_rva = read_u32_at(&mut file, resource_entry)?;
        let resource_size = read_u32_at(&mut file, resource_entry + 4)?;
        if resource_rva == 0 || resource_size == 0 {
            return Err(ResourceError::NoResources);
        }

        let section_table = optional_header + optional_header_size;
        let mut sections = Vec::with_capacity(number_of_sections as usize);
        for i in 0..number_of_sections as u64 {
            let header = section_table + i * SECTION_HEADER_LEN;
            let virtual_size = read_u32_at(&mut file, header + 8)?;
            let virtual_address = read_u32_at(&mut file, header + 12)?;
            let size_of_raw_data = read_u32_at(&mut file, header + 16)?;
            let pointer_to_raw_data = read_u32_at(&mut file, header + 20)?;
            sections.push(Section {
                virtual_address,
                // Some linkers leave VirtualSize zero
                virtual_size: if virtual_size == 0 { size_of_raw_data } else { virtual_size },
                pointer_to_raw_data,
            });
        }

        let resource_root = section_for_rva(&sections, resource_rva)?.file_offset(resource_rva);

        Ok(ResourceReader {
            file,
            file_len,
            sections,
            resource_root,
        })
    }

    fn read_u16(&mut self, offset: u64) -> io::Result<u16> {
        read_u16_at(&mut self.file, offset)
    }

    fn read_u32(&mut self, offset: u64) -> io::Result<u32> {
        read_u32_at(&mut self.file, offset)
    }

    /// Returns the entries of the resource directory at `offset`, relative to the root.
    fn read_directory(&mut self, offset: u32) -> Result<Vec<ResourceDirectoryEntry>, ResourceError> {
        let base = self.resource_root + offset as u64;
        let named = self.read_u16(base + 12)? as u32;
        let ids = self.read_u16(base + 14)? as u32;

        let mut entries = Vec::with_capacity((named + ids) as usize);
        for i in 0..named + ids {
            let entry = base + (RESOURCE_DIRECTORY_LEN + i * RESOURCE_ENTRY_LEN) as u64;
            entries.push(ResourceDirectoryEntry {
                name_or_id: self.read_u32(entry)?,
                offset_to_data_or_subdirectory: self.read_u32(entry + 4)?,
            });
        }
        Ok(entries)
    }

    /// Takes the first name, then the first language, below the type directory at `offset`.
    fn first_leaf(&mut self, offset: u32) -> Result<ResourceData, ResourceError> {
        let name = self
            .read_directory(offset)?
            .into_iter()
            .next()
            .ok_or(ResourceError::NoVersionResource)?;
        if !name.is_subdirectory() {
            return Err(ResourceError::Malformed("expected a language directory"));
        }

        let leaf = self
            .read_directory(name.offset())?
            .into_iter()
            .next()
            .ok_or(ResourceError::NoVersionResource)?;
        if leaf.is_subdirectory() {
            return Err(ResourceError::Malformed("expected a data entry"));
        }

        let data_entry = self.resource_root + leaf.offset() as u64;
        let rva = self.read_u32(data_entry)?;
        let size = self.read_u32(data_entry + 4)?;
        let offset = section_for_rva(&self.sections, rva)?.file_offset(rva);

        if offset + size as u64 > self.file_len {
            return Err(ResourceError::Truncated { size, file_len: self.file_len });
        }
        Ok(ResourceData { offset, size })
    }

    /// Finds the version resource, the bytes `GetFileVersionInfo` would return.
    pub fn find_version(&mut self) -> Result<ResourceData, ResourceError> {
        let version_type = self
            .read_directory(0)?
            .into_iter()
            .find(|e| e.name_or_id & SUBDIRECTORY_FLAG == 0 && e.name_or_id == RT_VERSION)
            .ok_or(ResourceError::NoVersionResource)?;
        if !version_type.is_subdirectory() {
            return Err(ResourceError::Malformed("RT_VERSION is not a directory"));
        }
        self.first_leaf(version_type.offset())
    }

    pub fn read_data(&mut self, data: ResourceData) -> io::Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(data.offset))?;
        let mut buf = vec![0u8; data.size as usize];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

fn section_for_rva(sections: &[Section], rva: u32) -> Result<Section, ResourceError> {
    sections
        .iter()
        .copied()
        .find(|s| s.contains(rva))
        .ok_or(ResourceError::UnmappedRva(rva))
}

fn read_u16_at(file: &mut File, offset: u64) -> io::Result<u16> {
    file.seek(SeekFrom::Start(offset))?;
    let mut bytes = [0u8; 2];
    file.read_exact(&mut bytes)?;
    Ok(u16::from_le_bytes(bytes))
}

fn read_u32_at(file: &mut File, offset: u64) -> io::Result<u32> {
    file.seek(SeekFrom::Start(offset))?;
    let mut bytes = [0u8; 4];
    file.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

/// Version queries answered by reading PE images directly, for hosts without `version.dll`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PeVersionQuery;

impl PeVersionQuery {
    fn locate(path: &Path) -> Result<(ResourceReader, ResourceData), ResourceError> {
        let mut reader = ResourceReader::open(path)?;
        let data = reader.find_version()?;
        Ok((reader, data))
    }
}

impl VersionQuery for PeVersionQuery {
    fn query_size(&self, path: &Path) -> u32 {
        match Self::locate(path) {
            Ok((_, data)) => data.size,
            Err(e) => {
                debug!("{}: {}", path.display(), e);
                0
            }
        }
    }

    fn query_block(&self, path: &Path, size: u32) -> Option<Vec<u8>> {
        let (mut reader, data) = Self::locate(path).ok()?;
        let data = ResourceData { size: size.min(data.size), ..data };
        match reader.read_data(data) {
            Ok(block) => Some(block),
            Err(e) => {
                debug!("{}: {}", path.display(), e);
                None
            }
        }
    }

    fn query_translations(&self, block: &[u8]) -> Vec<Translation> {
        version_block::translations(block)
    }

    fn query_string_field(
        &self,
        block: &[u8],
        translation: Translation,
        field: &str,
    ) -> Option<String> {
        version_block::string_field(block, translation, field)
    }
}


#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::version_block::fixtures::with_file_version;
    use crate::version_extractor::read_file_version;

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn finds_version_resource() {
        let dir = TempDir::new().unwrap();
        let block = with_file_version("6.1.7601.17514 (win7sp1_rtm.101119-1850)");
        let path = write(&dir, "kernel32.dll", &fixtures::with_version_block(&block));

        let mut reader = ResourceReader::open(&path).unwrap();
        let data = reader.find_version().unwrap();
        assert_eq!(data.size as usize, block.len());
        assert_eq!(reader.read_data(data).unwrap(), block);
    }

    #[test]
    fn reads_file_version_end_to_end() {
        let dir = TempDir::new().unwrap();
        let block = with_file_version("6.1.7601.17514 (win7sp1_rtm.101119-1850)");
        write(&dir, "kernel32.dll", &fixtures::with_version_block(&block));

        assert_eq!(
            read_file_version(&PeVersionQuery, dir.path(), "kernel32.dll").as_deref(),
            Some("6.1.7601.17514 (win7sp1_rtm.101119-1850)")
        );
    }

    #[test]
    fn non_pe_file_has_no_version() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "readme.dll", b"this is not an executable");

        assert!(matches!(ResourceReader::open(&path), Err(ResourceError::NotPe(_))));
        assert_eq!(PeVersionQuery.query_size(&path), 0);
    }

    #[test]
    fn short_file_has_no_version() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "tiny.exe", b"MZ");

        assert!(matches!(ResourceReader::open(&path), Err(ResourceError::Io(_))));
        assert_eq!(PeVersionQuery.query_size(&path), 0);
    }

    #[test]
    fn image_without_resources_has_no_version() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "plain.exe", &fixtures::without_resources());

        assert!(matches!(ResourceReader::open(&path), Err(ResourceError::NoResources)));
        assert_eq!(PeVersionQuery.query_size(&path), 0);
    }

    #[test]
    fn image_without_rt_version_has_no_version() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "manifest.exe", &fixtures::with_manifest_only());

        let mut reader = ResourceReader::open(&path).unwrap();
        assert!(matches!(reader.find_version(), Err(ResourceError::NoVersionResource)));
        assert_eq!(PeVersionQuery.query_size(&path), 0);
    }

    #[test]
    fn missing_file_has_no_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.sys");
        assert_eq!(PeVersionQuery.query_size(&path), 0);
        assert_eq!(PeVersionQuery.query_block(&path, 16), None);
    }
}
