use std::cmp::Ordering;

use crate::storage::page::PageId;

/// Location of a tuple: its page plus the slot inside that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TupleId {
    pub page_id: PageId,
    pub slot_id: u16,
}

impl TupleId {
    pub fn new(page_id: PageId, slot_id: u16) -> Self {
        Self { page_id, slot_id }
    }
}

impl PartialOrd for TupleId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TupleId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.page_id
            .cmp(&other.page_id)
            .then(self.slot_id.cmp(&other.slot_id))
    }
}

/// Raw tuple bytes. The id is assigned when the tuple is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    pub tuple_id: Option<TupleId>,
    pub data: Vec<u8>,
}

impl Tuple {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            tuple_id: None,
            data: data.into(),
        }
    }

    pub fn with_id(tuple_id: TupleId, data: impl Into<Vec<u8>>) -> Self {
        Self {
            tuple_id: Some(tuple_id),
            data: data.into(),
        }
    }
}
