use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::common::types::{Page, PageId, PAGE_SIZE};

/// Maximum encoded length of an index name
pub const MAX_NAME_LEN: usize = 32;

const RECORD_SIZE: usize = MAX_NAME_LEN + 4;
const COUNT_SIZE: usize = 4;
const MAX_RECORDS: usize = (PAGE_SIZE - COUNT_SIZE) / RECORD_SIZE;

#[derive(Error, Debug)]
pub enum HeaderPageError {
    #[error("Index name '{0}' too long")]
    NameTooLong(String),

    #[error("Header page is full")]
    PageFull,

    #[error("Record for index '{0}' already exists")]
    DuplicateRecord(String),

    #[error("No record for index '{0}'")]
    RecordNotFound(String),
}

/// View over the bootstrap directory page (page id 0).
///
/// The page stores a table of `(index_name, root_page_id)` records so an
/// index can re-find its root across restarts. Record layout: a u32
/// record count followed by fixed 36-byte records (32-byte zero-padded
/// name + u32 root page id).
pub struct HeaderPage;

impl HeaderPage {
    /// Append a record for a new index. Fails if the name is already
    /// present.
    pub fn insert_record(
        page: &mut Page,
        name: &str,
        root_page_id: PageId,
    ) -> Result<(), HeaderPageError> {
        let encoded = Self::encode_name(name)?;
        if Self::find_record(page, &encoded).is_some() {
            return Err(HeaderPageError::DuplicateRecord(name.to_string()));
        }

        let count = Self::record_count(page);
        if count >= MAX_RECORDS {
            return Err(HeaderPageError::PageFull);
        }

        let offset = COUNT_SIZE + count * RECORD_SIZE;
        page.data[offset..offset + MAX_NAME_LEN].copy_from_slice(&encoded);
        LittleEndian::write_u32(
            &mut page.data[offset + MAX_NAME_LEN..offset + RECORD_SIZE],
            root_page_id,
        );
        LittleEndian::write_u32(&mut page.data[0..COUNT_SIZE], (count + 1) as u32);

        Ok(())
    }

    /// Overwrite the root page id of an existing record
    pub fn update_record(
        page: &mut Page,
        name: &str,
        root_page_id: PageId,
    ) -> Result<(), HeaderPageError> {
        let encoded = Self::encode_name(name)?;
        let index = Self::find_record(page, &encoded)
            .ok_or_else(|| HeaderPageError::RecordNotFound(name.to_string()))?;

        let offset = COUNT_SIZE + index * RECORD_SIZE;
        LittleEndian::write_u32(
            &mut page.data[offset + MAX_NAME_LEN..offset + RECORD_SIZE],
            root_page_id,
        );

        Ok(())
    }

    /// Look up the root page id registered under `name`
    pub fn get_record(page: &Page, name: &str) -> Option<PageId> {
        let encoded = Self::encode_name(name).ok()?;
        let index = Self::find_record(page, &encoded)?;
        let offset = COUNT_SIZE + index * RECORD_SIZE;
        Some(LittleEndian::read_u32(
            &page.data[offset + MAX_NAME_LEN..offset + RECORD_SIZE],
        ))
    }

    fn record_count(page: &Page) -> usize {
        LittleEndian::read_u32(&page.data[0..COUNT_SIZE]) as usize
    }

    fn find_record(page: &Page, encoded: &[u8; MAX_NAME_LEN]) -> Option<usize> {
        let count = Self::record_count(page);
        (0..count).find(|i| {
            let offset = COUNT_SIZE + i * RECORD_SIZE;
            &page.data[offset..offset + MAX_NAME_LEN] == encoded
        })
    }

    fn encode_name(name: &str) -> Result<[u8; MAX_NAME_LEN], HeaderPageError> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > MAX_NAME_LEN {
            return Err(HeaderPageError::NameTooLong(name.to_string()));
        }
        let mut encoded = [0u8; MAX_NAME_LEN];
        encoded[..bytes.len()].copy_from_slice(bytes);
        Ok(encoded)
    }
}
