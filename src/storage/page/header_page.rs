use crate::common::{PageId, PAGE_SIZE};

// Layout: record_count(4) followed by fixed 36-byte records of
// name(32, zero padded) + root_page_id(4). An all-zero page is an empty
// header, so a freshly created database file needs no formatting.
const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// Mutable view of the well-known header page (page id 0), which persists
/// the root page id of every named index.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        u32::from_le_bytes(self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4].try_into().unwrap())
            as usize
    }

    fn set_record_count(&mut self, count: usize) {
        self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .copy_from_slice(&(count as u32).to_le_bytes());
    }

    fn name_at(&self, index: usize) -> &[u8] {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE;
        let name = &self.data[offset..offset + NAME_SIZE];
        let len = name.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
        &name[..len]
    }

    fn root_at(&self, index: usize) -> PageId {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE + NAME_SIZE;
        PageId::new(u32::from_le_bytes(
            self.data[offset..offset + 4].try_into().unwrap(),
        ))
    }

    fn set_root_at(&mut self, index: usize, root: PageId) {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE + NAME_SIZE;
        self.data[offset..offset + 4].copy_from_slice(&root.as_u32().to_le_bytes());
    }

    fn find_record(&self, name: &str) -> Option<usize> {
        (0..self.record_count()).find(|&i| self.name_at(i) == name.as_bytes())
    }

    /// Appends a new (name, root) record. Returns false if the name already
    /// exists or the page is full.
    pub fn insert_record(&mut self, name: &str, root: PageId) -> bool {
        assert!(name.len() < NAME_SIZE, "index name too long");
        let count = self.record_count();
        if count >= MAX_RECORDS || self.find_record(name).is_some() {
            return false;
        }

        let offset = RECORDS_OFFSET + count * RECORD_SIZE;
        self.data[offset..offset + NAME_SIZE].fill(0);
        self.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        self.set_root_at(count, root);
        self.set_record_count(count + 1);
        true
    }

    /// Rewrites the root of an existing record. Returns false if the name
    /// is unknown.
    pub fn update_record(&mut self, name: &str, root: PageId) -> bool {
        match self.find_record(name) {
            Some(index) => {
                self.set_root_at(index, root);
                true
            }
            None => false,
        }
    }

    /// Looks up the root page id recorded for `name`.
    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.find_record(name).map(|index| self.root_at(index))
    }
}

/// Read-only view of the header page
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        u32::from_le_bytes(self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4].try_into().unwrap())
            as usize
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        (0..self.record_count())
            .find(|&i| {
                let offset = RECORDS_OFFSET + i * RECORD_SIZE;
                let record_name = &self.data[offset..offset + NAME_SIZE];
                let len = record_name.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
                &record_name[..len] == name.as_bytes()
            })
            .map(|i| {
                let offset = RECORDS_OFFSET + i * RECORD_SIZE + NAME_SIZE;
                PageId::new(u32::from_le_bytes(
                    self.data[offset..offset + 4].try_into().unwrap(),
                ))
            })
    }
}
