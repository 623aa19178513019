use parking_lot::RwLock;

use crate::storage::page::{Page, PageId, PageImage, PageRef};
use crate::storage::PAGE_SIZE;
use crate::transaction::TransactionId;

/// A heap file page held in memory: raw bytes plus dirty state and the
/// before image used for undo.
pub struct HeapPage {
    page_id: PageId,
    data: Box<[u8; PAGE_SIZE]>,
    dirtied_by: Option<TransactionId>,
    old_data: Box<[u8; PAGE_SIZE]>,
}

impl HeapPage {
    /// Builds a page from bytes read from disk. The before image starts out
    /// equal to the on-disk content.
    pub fn new(page_id: PageId, data: Box<[u8; PAGE_SIZE]>) -> Self {
        let old_data = data.clone();
        Self {
            page_id,
            data,
            dirtied_by: None,
            old_data,
        }
    }

    pub fn from_image(image: PageImage) -> Self {
        let page_id = image.page_id();
        Self::new(page_id, image.into_data())
    }

    /// Wraps the page for sharing through the buffer pool.
    pub fn into_ref(self) -> PageRef {
        std::sync::Arc::new(RwLock::new(self))
    }
}

impl Page for HeapPage {
    fn page_id(&self) -> PageId {
        self.page_id
    }

    fn is_dirty(&self) -> Option<TransactionId> {
        self.dirtied_by
    }

    fn mark_dirty(&mut self, dirty: bool, txn: TransactionId) {
        self.dirtied_by = if dirty { Some(txn) } else { None };
    }

    fn before_image(&self) -> PageImage {
        PageImage::new(self.page_id, self.old_data.clone())
    }

    fn set_before_image(&mut self) {
        self.old_data.copy_from_slice(&self.data[..]);
    }

    fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_tracking() {
        let mut page = HeapPage::new(PageId::new(1, 0), Box::new([0u8; PAGE_SIZE]));
        assert_eq!(page.is_dirty(), None);

        page.mark_dirty(true, TransactionId::new(3));
        assert_eq!(page.is_dirty(), Some(TransactionId::new(3)));

        page.mark_dirty(false, TransactionId::new(3));
        assert_eq!(page.is_dirty(), None);
    }

    #[test]
    fn test_before_image_survives_writes() {
        let mut page = HeapPage::new(PageId::new(1, 4), Box::new([7u8; PAGE_SIZE]));
        page.data_mut()[0] = 99;

        let before = page.before_image();
        assert_eq!(before.data()[0], 7);
        assert_eq!(page.image().data()[0], 99);

        page.set_before_image();
        assert_eq!(page.before_image().data()[0], 99);
        assert_eq!(page.before_image().page_id(), PageId::new(1, 4));
    }

    #[test]
    fn test_shared_ref_coerces_to_capability() {
        let page = HeapPage::from_image(PageImage::zeroed(PageId::new(2, 2))).into_ref();
        page.write().data_mut()[1] = 5;
        assert_eq!(page.read().data()[1], 5);
        assert_eq!(page.read().page_id(), PageId::new(2, 2));
    }
}
