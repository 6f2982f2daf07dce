//! Walks a raw `VS_VERSIONINFO` block, the same bytes `GetFileVersionInfo` hands back.
//!
//! Every node in the tree has the same shape:
//!
//! ```text
//! u16   wLength        whole node including children
//! u16   wValueLength   bytes for binary values, UTF-16 units for text
//! u16   wType          0 binary, 1 text
//! WCHAR szKey[]        NUL terminated
//!       padding        to a 4 byte boundary
//!       Value
//!       padding        to a 4 byte boundary
//!       Children
//! ```

use crate::version_extractor::Translation;

const HEADER_LEN: usize = 6;
const TYPE_TEXT: u16 = 1;

struct Node<'a> {
    key: String,
    value_len: u16,
    /// From the start of the value to the end of the node.
    tail: &'a [u8],
    value: &'a [u8],
    children: &'a [u8],
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Decodes UTF-16LE units up to the first NUL or the end of `data`.
fn utf16_until_nul(data: &[u8]) -> (String, usize) {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    let consumed = units.len() * 2;
    (String::from_utf16_lossy(&units), consumed)
}

fn parse_node(data: &[u8]) -> Option<Node<'_>> {
    let length = read_u16(data, 0)? as usize;
    if length < HEADER_LEN || length > data.len() {
        return None;
    }
    let node = &data[..length];
    let value_len = read_u16(node, 2)?;
    let kind = read_u16(node, 4)?;

    let (key, key_bytes) = utf16_until_nul(&node[HEADER_LEN..]);
    let key_end = HEADER_LEN + key_bytes + 2;
    if key_end > length {
        return None;
    }

    let value_start = align4(key_end).min(length);
    let value_bytes = if kind == TYPE_TEXT {
        value_len as usize * 2
    } else {
        value_len as usize
    };
    let value_end = (value_start + value_bytes).min(length);
    let children_start = align4(value_end).min(length);

    Some(Node {
        key,
        value_len,
        tail: &node[value_start..],
        value: &node[value_start..value_end],
        children: &node[children_start..],
    })
}

fn children(data: &[u8]) -> impl Iterator<Item = Node<'_>> {
    let mut offset = 0;
    std::iter::from_fn(move || {
        let rest = data.get(offset..)?;
        let node = parse_node(rest)?;
        let length = read_u16(rest, 0)? as usize;
        offset += align4(length);
        Some(node)
    })
}

fn child<'a>(data: &'a [u8], key: &str) -> Option<Node<'a>> {
    children(data).find(|n| n.key.eq_ignore_ascii_case(key))
}

fn text_value(node: &Node<'_>) -> String {
    if node.value_len == 0 {
        return String::new();
    }
    // Some resource compilers record the text length in bytes, so read to the terminator.
    utf16_until_nul(node.tail).0
}

/// Returns the `\VarFileInfo\Translation` entries of `block`, in stored order.
pub fn translations(block: &[u8]) -> Vec<Translation> {
    let Some(root) = parse_node(block) else {
        return Vec::new();
    };
    let Some(var) = child(root.children, "VarFileInfo")
        .and_then(|info| child(info.children, "Translation"))
    else {
        return Vec::new();
    };

    var.value
        .chunks_exact(4)
        .map(|c| Translation {
            language: u16::from_le_bytes([c[0], c[1]]),
            code_page: u16::from_le_bytes([c[2], c[3]]),
        })
        .collect()
}

/// Looks up `\StringFileInfo\<translation>\<field>` in `block`.
pub fn string_field(block: &[u8], translation: Translation, field: &str) -> Option<String> {
    let root = parse_node(block)?;
    let table = child(root.children, "StringFileInfo")
        .and_then(|info| child(info.children, &translation.to_string()))?;
    child(table.children, field).map(|entry| text_value(&entry))
}
