use std::ffi::OsStr;
use std::iter::once;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr::null_mut;

use winapi::shared::minwindef::{DWORD, FALSE, LPVOID, UINT};
use winapi::um::winver::{GetFileVersionInfoSizeW, GetFileVersionInfoW, VerQueryValueW};

use crate::version_extractor::{Translation, VersionQuery};

fn wide<S: AsRef<OsStr>>(s: S) -> Vec<u16> {
    s.as_ref().encode_wide().chain(once(0)).collect()
}

/// Version queries answered by `version.dll`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WinVerQuery;

impl WinVerQuery {
    /// Runs `VerQueryValueW` and returns the value as a slice of `len` units of `T`.
    fn query_value<'a, T>(block: &'a [u8], sub_block: &str) -> Option<&'a [T]> {
        let sub_block = wide(sub_block);
        let mut value: LPVOID = null_mut();
        let mut len: UINT = 0;
        let ok = unsafe {
            VerQueryValueW(block.as_ptr().cast(), sub_block.as_ptr(), &mut value, &mut len)
        };
        if ok == FALSE || value.is_null() {
            return None;
        }
        // The pointer lands inside `block`, which outlives the returned slice.
        Some(unsafe { std::slice::from_raw_parts(value as *const T, len as usize) })
    }
}

impl VersionQuery for WinVerQuery {
    fn query_size(&self, path: &Path) -> u32 {
        let path = wide(path);
        let mut handle: DWORD = 0;
        unsafe { GetFileVersionInfoSizeW(path.as_ptr(), &mut handle) }
    }

    fn query_block(&self, path: &Path, size: u32) -> Option<Vec<u8>> {
        let path = wide(path);
        let mut block = vec![0u8; size as usize];
        let ok = unsafe { GetFileVersionInfoW(path.as_ptr(), 0, size, block.as_mut_ptr().cast()) };
        if ok == FALSE {
            return None;
        }
        Some(block)
    }

    fn query_translations(&self, block: &[u8]) -> Vec<Translation> {
        // len is in bytes here
        let Some(bytes) = Self::query_value::<u8>(block, r"\VarFileInfo\Translation") else {
            return Vec::new();
        };
        bytes
            .chunks_exact(4)
            .map(|c| Translation {
                language: u16::from_le_bytes([c[0], c[1]]),
                code_page: u16::from_le_bytes([c[2], c[3]]),
            })
            .collect()
    }

    fn query_string_field(
        &self,
        block: &[u8],
        translation: Translation,
        field: &str,
    ) -> Option<String> {
        // len is in characters, terminator included
        let sub_block = format!(r"\StringFileInfo\{}\{}", translation, field);
        let units = Self::query_value::<u16>(block, &sub_block)?;
        let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
        Some(String::from_utf16_lossy(&units[..end]))
    }
}
