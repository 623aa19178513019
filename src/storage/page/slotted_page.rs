use std::ops::{Deref, DerefMut};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::storage::PAGE_SIZE;

// Header structure (16 bytes)
const HEADER_SIZE: usize = 16;
const TABLE_ID_OFFSET: usize = 0;
const PAGE_NO_OFFSET: usize = 4;
const FREE_SPACE_POINTER_OFFSET: usize = 12;
const TUPLE_COUNT_OFFSET: usize = 14;

// Slot size (4 bytes: 2 for offset, 2 for length)
const SLOT_SIZE: usize = 4;

/// Largest tuple an empty page can hold.
pub const fn max_tuple_size() -> usize {
    PAGE_SIZE - HEADER_SIZE - SLOT_SIZE
}

/// The `PageFull` error for a tuple no page could ever hold.
pub fn oversized(tuple_size: usize) -> Option<StorageError> {
    (tuple_size > max_tuple_size()).then(|| StorageError::PageFull {
        required: tuple_size + SLOT_SIZE,
        available: PAGE_SIZE - HEADER_SIZE,
    })
}

/// Slotted tuple layout over a page's bytes.
///
/// Tuple data grows upward from the header, the slot array grows downward
/// from the end of the page. A deleted slot is zeroed. Read access works over
/// any borrow of the bytes, writes need a mutable one.
pub struct SlottedPage<D> {
    data: D,
}

impl<D: Deref<Target = [u8; PAGE_SIZE]>> SlottedPage<D> {
    pub fn from_data(data: D) -> Self {
        Self { data }
    }

    pub fn get_tuple(&self, slot: u16) -> StorageResult<&[u8]> {
        let (offset, length) = self.slot(slot)?;
        if offset == 0 && length == 0 {
            return Err(StorageError::TupleNotFound {
                page: self.page_id(),
                slot,
            });
        }
        Ok(&self.data[offset as usize..(offset + length) as usize])
    }

    /// Live tuples in slot order.
    pub fn tuples(&self) -> Vec<(u16, &[u8])> {
        (0..self.get_tuple_count())
            .filter_map(|slot| self.get_tuple(slot).ok().map(|data| (slot, data)))
            .collect()
    }

    pub fn page_id(&self) -> PageId {
        let table_id = u32::from_le_bytes([
            self.data[TABLE_ID_OFFSET],
            self.data[TABLE_ID_OFFSET + 1],
            self.data[TABLE_ID_OFFSET + 2],
            self.data[TABLE_ID_OFFSET + 3],
        ]);
        let page_no = u32::from_le_bytes([
            self.data[PAGE_NO_OFFSET],
            self.data[PAGE_NO_OFFSET + 1],
            self.data[PAGE_NO_OFFSET + 2],
            self.data[PAGE_NO_OFFSET + 3],
        ]);
        PageId::new(table_id, page_no)
    }

    /// Free bytes between the tuple data and the slot array. An unformatted
    /// page counts as empty.
    pub fn get_free_space(&self) -> usize {
        let slot_array_end = PAGE_SIZE - (self.get_tuple_count() as usize * SLOT_SIZE);
        let free_space_pointer = (self.get_free_space_pointer() as usize).max(HEADER_SIZE);
        slot_array_end.saturating_sub(free_space_pointer)
    }

    /// Whether a tuple of `tuple_size` bytes still fits.
    pub fn has_room_for(&self, tuple_size: usize) -> bool {
        self.get_free_space() >= tuple_size + SLOT_SIZE
    }

    pub fn get_tuple_count(&self) -> u16 {
        u16::from_le_bytes([
            self.data[TUPLE_COUNT_OFFSET],
            self.data[TUPLE_COUNT_OFFSET + 1],
        ])
    }

    fn slot(&self, slot: u16) -> StorageResult<(u16, u16)> {
        let tuple_count = self.get_tuple_count();
        if slot >= tuple_count {
            return Err(StorageError::InvalidSlotId {
                slot,
                max_slot: tuple_count,
            });
        }
        let slot_offset = slot_offset(slot);
        let offset = u16::from_le_bytes([self.data[slot_offset], self.data[slot_offset + 1]]);
        let length = u16::from_le_bytes([self.data[slot_offset + 2], self.data[slot_offset + 3]]);
        Ok((offset, length))
    }

    fn get_free_space_pointer(&self) -> u16 {
        u16::from_le_bytes([
            self.data[FREE_SPACE_POINTER_OFFSET],
            self.data[FREE_SPACE_POINTER_OFFSET + 1],
        ])
    }
}

impl<D: DerefMut<Target = [u8; PAGE_SIZE]>> SlottedPage<D> {
    pub fn new(mut data: D, page_id: PageId) -> Self {
        data[TABLE_ID_OFFSET..TABLE_ID_OFFSET + 4].copy_from_slice(&page_id.table_id.to_le_bytes());
        data[PAGE_NO_OFFSET..PAGE_NO_OFFSET + 4].copy_from_slice(&page_id.page_no.to_le_bytes());

        let free_space_pointer = HEADER_SIZE as u16;
        data[FREE_SPACE_POINTER_OFFSET..FREE_SPACE_POINTER_OFFSET + 2]
            .copy_from_slice(&free_space_pointer.to_le_bytes());
        data[TUPLE_COUNT_OFFSET..TUPLE_COUNT_OFFSET + 2].copy_from_slice(&0u16.to_le_bytes());

        Self { data }
    }

    /// Opens the layout, formatting the page first if it is still all zeroes.
    pub fn open(data: D, page_id: PageId) -> Self {
        let page = Self::from_data(data);
        if page.get_free_space_pointer() == 0 {
            Self::new(page.data, page_id)
        } else {
            page
        }
    }

    pub fn insert_tuple(&mut self, tuple_data: &[u8]) -> StorageResult<u16> {
        let tuple_size = tuple_data.len();
        let tuple_count = self.get_tuple_count();
        let free_space_pointer = self.get_free_space_pointer() as usize;
        let slot_array_end = PAGE_SIZE - (tuple_count as usize * SLOT_SIZE);

        let required = tuple_size + SLOT_SIZE;
        let available = slot_array_end.saturating_sub(free_space_pointer);
        if available < required {
            return Err(StorageError::PageFull {
                required,
                available,
            });
        }

        let tuple_offset = free_space_pointer;
        self.data[tuple_offset..tuple_offset + tuple_size].copy_from_slice(tuple_data);
        self.set_free_space_pointer((tuple_offset + tuple_size) as u16);

        let slot_offset = slot_offset(tuple_count);
        self.data[slot_offset..slot_offset + 2].copy_from_slice(&(tuple_offset as u16).to_le_bytes());
        self.data[slot_offset + 2..slot_offset + 4]
            .copy_from_slice(&(tuple_size as u16).to_le_bytes());

        self.set_tuple_count(tuple_count + 1);

        Ok(tuple_count)
    }

    pub fn delete_tuple(&mut self, slot: u16) -> StorageResult<()> {
        let (offset, length) = self.slot(slot)?;
        if offset == 0 && length == 0 {
            return Err(StorageError::TupleNotFound {
                page: self.page_id(),
                slot,
            });
        }
        let slot_offset = slot_offset(slot);
        self.data[slot_offset..slot_offset + SLOT_SIZE].fill(0);
        Ok(())
    }

    fn set_free_space_pointer(&mut self, pointer: u16) {
        self.data[FREE_SPACE_POINTER_OFFSET..FREE_SPACE_POINTER_OFFSET + 2]
            .copy_from_slice(&pointer.to_le_bytes());
    }

    fn set_tuple_count(&mut self, count: u16) {
        self.data[TUPLE_COUNT_OFFSET..TUPLE_COUNT_OFFSET + 2].copy_from_slice(&count.to_le_bytes());
    }
}

fn slot_offset(slot: u16) -> usize {
    PAGE_SIZE - ((slot as usize + 1) * SLOT_SIZE)
}
