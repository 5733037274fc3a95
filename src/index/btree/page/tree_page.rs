use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, INVALID_PAGE_ID};

/// Size of the header shared by both index page variants
pub const TREE_PAGE_HEADER_SIZE: usize = 13;

/// Index page variant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPageType {
    Leaf = 1,
    Internal = 2,
}

/// Common header of every B+ tree page.
///
/// Layout (byteorder, little endian):
/// - byte 0:      page type tag
/// - bytes 1..3:  current size (u16)
/// - bytes 3..5:  max size (u16)
/// - bytes 5..9:  parent page id (u32)
/// - bytes 9..13: this page's id (u32)
///
/// Leaf pages additionally store a next-leaf pointer (see
/// `leaf_page::LEAF_PAGE_HEADER_SIZE`).
#[derive(Debug, Clone, Copy)]
pub struct BTreePageHeader {
    pub page_type: IndexPageType,
    pub size: u16,
    pub max_size: u16,
    pub parent_page_id: PageId,
    pub page_id: PageId,
}

impl BTreePageHeader {
    pub fn to_bytes(&self) -> [u8; TREE_PAGE_HEADER_SIZE] {
        let mut bytes = [0u8; TREE_PAGE_HEADER_SIZE];
        bytes[0] = self.page_type as u8;
        LittleEndian::write_u16(&mut bytes[1..3], self.size);
        LittleEndian::write_u16(&mut bytes[3..5], self.max_size);
        LittleEndian::write_u32(&mut bytes[5..9], self.parent_page_id);
        LittleEndian::write_u32(&mut bytes[9..13], self.page_id);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let page_type = match bytes[0] {
            1 => IndexPageType::Leaf,
            2 => IndexPageType::Internal,
            _ => return None,
        };
        Some(Self {
            page_type,
            size: LittleEndian::read_u16(&bytes[1..3]),
            max_size: LittleEndian::read_u16(&bytes[3..5]),
            parent_page_id: LittleEndian::read_u32(&bytes[5..9]),
            page_id: LittleEndian::read_u32(&bytes[9..13]),
        })
    }
}

/// Read the variant tag of an index page; `None` for an uninitialized
/// or foreign page.
pub fn page_type(page: &Page) -> Option<IndexPageType> {
    match page.data[0] {
        1 => Some(IndexPageType::Leaf),
        2 => Some(IndexPageType::Internal),
        _ => None,
    }
}

/// Current entry count
pub fn size(page: &Page) -> usize {
    LittleEndian::read_u16(&page.data[1..3]) as usize
}

pub fn set_size(page: &mut Page, size: usize) {
    LittleEndian::write_u16(&mut page.data[1..3], size as u16);
}

/// Configured entry capacity
pub fn max_size(page: &Page) -> usize {
    LittleEndian::read_u16(&page.data[3..5]) as usize
}

pub fn parent_page_id(page: &Page) -> PageId {
    LittleEndian::read_u32(&page.data[5..9])
}

pub fn set_parent_page_id(page: &mut Page, parent: PageId) {
    LittleEndian::write_u32(&mut page.data[5..9], parent);
}

pub fn page_id(page: &Page) -> PageId {
    LittleEndian::read_u32(&page.data[9..13])
}

/// A page with no parent is the root
pub fn is_root(page: &Page) -> bool {
    parent_page_id(page) == INVALID_PAGE_ID
}
