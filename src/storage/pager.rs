//! # Page Manager
//!
//! The single source of page handles for a tree. Owns the data file, the
//! mapped header, the free set, and a table of weak references to every
//! resident page mapping.
//!
//! ## Handle protocol
//!
//! [`PageHandle`] is a cheap `Rc` clone. All clones of one page share one
//! OS mapping; the last clone to drop unmaps the page and removes it from
//! the table. The table never keeps a page alive on its own; it exists
//! only so that overlapping lifetimes observe the same mapping.
//!
//! ## Free set
//!
//! A page whose `is_live` flag is off belongs to the free set. The set is
//! rebuilt by scanning every page at open. Allocation pops the smallest
//! free id before extending the file, so files do not grow while holes
//! exist and page ids stay dense.
//!
//! ## Mutable access from shared handles
//!
//! The engine is strictly single-writer (no locking anywhere, by
//! contract), but B+ tree rebalancing legitimately holds several handles
//! to neighbouring pages at once. `bytes_mut` therefore hands out `&mut`
//! from a shared handle through an `UnsafeCell`, with the same discipline
//! the page-cache layer of a concurrent engine would enforce with pins:
//! callers never hold a `bytes()` borrow of a page across a `bytes_mut()`
//! write to the same page.

use std::cell::{RefCell, UnsafeCell};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

use eyre::{ensure, eyre, Result, WrapErr};
use hashbrown::HashMap;

use crate::config::NO_PAGE;

use super::header::{HeaderFile, TreeHeader};
use super::mmap::{extend_file, MappedRegion};
use super::page::{validate_page, PageLayout, PagePrefix};
use super::PageId;

struct PageTable {
    entries: HashMap<PageId, Weak<PageSlot>>,
}

struct PageSlot {
    id: PageId,
    region: UnsafeCell<MappedRegion>,
    table: Weak<RefCell<PageTable>>,
}

impl Drop for PageSlot {
    fn drop(&mut self) {
        // the last handle is gone: leave the table so a later access maps
        // the page afresh
        if let Some(table) = self.table.upgrade() {
            table.borrow_mut().entries.remove(&self.id);
        }
    }
}

/// Reference-counted handle to one mapped page.
#[derive(Clone)]
pub struct PageHandle {
    slot: Rc<PageSlot>,
}

impl PageHandle {
    pub fn id(&self) -> PageId {
        self.slot.id
    }

    pub fn bytes(&self) -> &[u8] {
        // SAFETY: the UnsafeCell is only ever accessed through this handle
        // type. The store is single-writer and single-threaded by
        // contract, and callers do not hold a bytes() borrow across a
        // bytes_mut() write to the same page, so no &/&mut overlap forms.
        unsafe { (*self.slot.region.get()).bytes() }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn bytes_mut(&self) -> &mut [u8] {
        // SAFETY: see bytes(); exclusivity is guaranteed by the
        // single-writer discipline, not the type system.
        unsafe { (*self.slot.region.get()).bytes_mut() }
    }

    pub fn prefix(&self) -> &PagePrefix {
        // INVARIANT: every mapped page is at least PAGE_PREFIX_SIZE long
        PagePrefix::from_bytes(self.bytes()).expect("page shorter than its prefix")
    }

    #[allow(clippy::mut_from_ref)]
    pub fn prefix_mut(&self) -> &mut PagePrefix {
        // INVARIANT: every mapped page is at least PAGE_PREFIX_SIZE long
        PagePrefix::from_bytes_mut(self.bytes_mut()).expect("page shorter than its prefix")
    }

    /// Number of live handles to this page (this one included).
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.slot)
    }

    pub fn flush(&self) -> Result<()> {
        // SAFETY: shared access only; flush does not touch the bytes.
        unsafe { (*self.slot.region.get()).flush() }
    }
}

impl std::fmt::Debug for PageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageHandle")
            .field("id", &self.slot.id)
            .field("refs", &Rc::strong_count(&self.slot))
            .finish()
    }
}

pub struct PageManager {
    data_path: PathBuf,
    data_file: File,
    header: Option<HeaderFile>,
    layout: PageLayout,
    table: Rc<RefCell<PageTable>>,
    free: BTreeSet<PageId>,
}

impl PageManager {
    /// Creates the `<name>` / `<name>_header` file pair for an empty tree.
    pub fn create(
        base: &Path,
        key_schema: &crate::records::Schema,
        data_schema: &crate::records::Schema,
        page_bytes: usize,
    ) -> Result<Self> {
        let header = TreeHeader::new(page_bytes, key_schema, data_schema)?;
        let layout = PageLayout::new(page_bytes, key_schema.width(), data_schema.width())?;

        let data_path = base.to_path_buf();
        let data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&data_path)
            .wrap_err_with(|| format!("failed to create data file '{}'", data_path.display()))?;

        let header_file = HeaderFile::create(&header_path_for(base), &header)?;

        Ok(Self {
            data_path,
            data_file,
            header: Some(header_file),
            layout,
            table: Rc::new(RefCell::new(PageTable {
                entries: HashMap::new(),
            })),
            free: BTreeSet::new(),
        })
    }

    /// Opens an existing tree and rebuilds the free set by scanning every
    /// page's `is_live` flag. Live pages are structurally validated here.
    pub fn open(base: &Path) -> Result<Self> {
        let header_file = HeaderFile::open(&header_path_for(base))?;
        let header = header_file.header();

        let layout = PageLayout::new(
            header.page_bytes() as usize,
            header.key_size(),
            header.data_size(),
        )?;
        ensure!(
            layout.slot_capacity == header.slot_capacity(),
            "corrupt header: derived slot capacity {} != stored {}",
            layout.slot_capacity,
            header.slot_capacity()
        );

        let data_path = base.to_path_buf();
        let data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&data_path)
            .wrap_err_with(|| format!("failed to open data file '{}'", data_path.display()))?;

        let n_pages = header.n_pages();
        let file_len = data_file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", data_path.display()))?
            .len();
        ensure!(
            file_len >= n_pages as u64 * layout.page_bytes as u64,
            "data file '{}' is truncated: {} bytes for {} pages of {}",
            data_path.display(),
            file_len,
            n_pages,
            layout.page_bytes
        );

        let mut mgr = Self {
            data_path,
            data_file,
            header: Some(header_file),
            layout,
            table: Rc::new(RefCell::new(PageTable {
                entries: HashMap::new(),
            })),
            free: BTreeSet::new(),
        };

        for id in 0..n_pages as PageId {
            let page = mgr.fetch(id)?;
            if page.prefix().is_live() {
                validate_page(page.bytes(), &mgr.layout, id)?;
            } else {
                mgr.free.insert(id);
            }
        }

        Ok(mgr)
    }

    pub fn is_open(&self) -> bool {
        self.header.is_some()
    }

    /// Flushes the header and forgets it. Outstanding handles keep their
    /// mappings until they drop; new operations fail with "not open".
    pub fn close(&mut self) -> Result<()> {
        if let Some(header) = self.header.take() {
            header.flush()?;
        }
        self.free.clear();
        Ok(())
    }

    pub fn layout(&self) -> PageLayout {
        self.layout
    }

    pub fn page_bytes(&self) -> usize {
        self.layout.page_bytes
    }

    fn header(&self) -> Result<&TreeHeader> {
        self.header
            .as_ref()
            .map(|h| h.header())
            .ok_or_else(|| eyre!("tree is not open"))
    }

    fn header_mut(&mut self) -> Result<&mut TreeHeader> {
        self.header
            .as_mut()
            .map(|h| h.header_mut())
            .ok_or_else(|| eyre!("tree is not open"))
    }

    /// Allocates a page: the smallest free id if any, otherwise a new page
    /// at the end of the data file. The returned page is marked live; its
    /// slot contents are whatever was there before (callers initialize).
    pub fn allocate_page(&mut self) -> Result<PageHandle> {
        if let Some(&id) = self.free.iter().next() {
            self.free.remove(&id);
            let page = self.fetch(id)?;
            page.prefix_mut().set_live(true);

            let header = self.header_mut()?;
            header.set_used_pages(header.used_pages() + 1);
            return Ok(page);
        }

        let id = self.header()?.n_pages() as PageId;
        let new_size = (id as u64 + 1) * self.layout.page_bytes as u64;
        extend_file(&self.data_path, new_size)?;

        let page = self.fetch(id)?;
        {
            let prefix = page.prefix_mut();
            prefix.set_live(true);
            prefix.set_id(id);
            prefix.set_slot_capacity(self.layout.slot_capacity as i32);
        }

        let header = self.header_mut()?;
        header.set_n_pages(id as u32 + 1);
        header.set_used_pages(header.used_pages() + 1);
        header.set_file_size(new_size);

        Ok(page)
    }

    /// Returns a handle to page `id`, or `None` when the id is out of
    /// range or in the free set.
    pub fn get_page(&self, id: PageId) -> Result<Option<PageHandle>> {
        let n_pages = self.header()?.n_pages() as PageId;
        if id < 0 || id >= n_pages || self.free.contains(&id) {
            return Ok(None);
        }
        self.fetch(id).map(Some)
    }

    /// Marks page `id` recycled and adds it to the free set. The mapping
    /// survives only as long as outstanding handles do.
    pub fn free_page(&mut self, id: PageId) -> Result<()> {
        let n_pages = self.header()?.n_pages() as PageId;
        if id < 0 || id >= n_pages || self.free.contains(&id) {
            return Ok(());
        }

        let page = self.fetch(id)?;
        page.prefix_mut().set_live(false);
        self.free.insert(id);

        let header = self.header_mut()?;
        header.set_used_pages(header.used_pages().saturating_sub(1));
        Ok(())
    }

    /// Cached handle for `id`, mapping the page on first access.
    fn fetch(&self, id: PageId) -> Result<PageHandle> {
        ensure!(id >= 0, "page id {} is negative", id);

        {
            let table = self.table.borrow();
            if let Some(slot) = table.entries.get(&id).and_then(Weak::upgrade) {
                return Ok(PageHandle { slot });
            }
        }

        let offset = id as u64 * self.layout.page_bytes as u64;
        let region = MappedRegion::map(&self.data_file, offset, self.layout.page_bytes)
            .wrap_err_with(|| format!("failed to map page {}", id))?;

        let slot = Rc::new(PageSlot {
            id,
            region: UnsafeCell::new(region),
            table: Rc::downgrade(&self.table),
        });
        self.table
            .borrow_mut()
            .entries
            .insert(id, Rc::downgrade(&slot));

        Ok(PageHandle { slot })
    }

    /// Number of pages currently resident (mapped through live handles).
    pub fn resident_pages(&self) -> usize {
        self.table.borrow().entries.len()
    }

    pub fn n_pages(&self) -> Result<u32> {
        Ok(self.header()?.n_pages())
    }

    pub fn used_pages(&self) -> Result<u32> {
        Ok(self.header()?.used_pages())
    }

    pub fn free_pages(&self) -> &BTreeSet<PageId> {
        &self.free
    }

    pub fn root_page(&self) -> Result<PageId> {
        Ok(self.header()?.root_page())
    }

    pub fn set_root_page(&mut self, id: PageId) -> Result<()> {
        self.header_mut()?.set_root_page(id);
        Ok(())
    }

    pub fn head_leaf(&self) -> Result<PageId> {
        Ok(self.header()?.head_leaf())
    }

    pub fn set_head_leaf(&mut self, id: PageId) -> Result<()> {
        self.header_mut()?.set_head_leaf(id);
        Ok(())
    }

    pub fn tail_leaf(&self) -> Result<PageId> {
        Ok(self.header()?.tail_leaf())
    }

    pub fn set_tail_leaf(&mut self, id: PageId) -> Result<()> {
        self.header_mut()?.set_tail_leaf(id);
        Ok(())
    }

    pub fn item_count(&self) -> Result<u64> {
        Ok(self.header()?.item_count())
    }

    pub fn inc_item_count(&mut self) -> Result<()> {
        let header = self.header_mut()?;
        header.set_item_count(header.item_count() + 1);
        Ok(())
    }

    pub fn dec_item_count(&mut self) -> Result<()> {
        let header = self.header_mut()?;
        header.set_item_count(header.item_count().saturating_sub(1));
        Ok(())
    }

    pub fn decode_key_schema(&self) -> Result<crate::records::Schema> {
        self.header()?.decode_key_schema()
    }

    pub fn decode_data_schema(&self) -> Result<crate::records::Schema> {
        self.header()?.decode_data_schema()
    }

    /// Flushes every resident page and the header.
    pub fn sync(&self) -> Result<()> {
        let handles: Vec<PageHandle> = {
            let table = self.table.borrow();
            table
                .entries
                .values()
                .filter_map(Weak::upgrade)
                .map(|slot| PageHandle { slot })
                .collect()
        };
        for handle in &handles {
            handle.flush()?;
        }
        if let Some(header) = &self.header {
            header.flush()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageManager")
            .field("data_path", &self.data_path)
            .field("open", &self.header.is_some())
            .field("resident", &self.resident_pages())
            .field("free", &self.free.len())
            .finish()
    }
}

fn header_path_for(base: &Path) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push("_header");
    PathBuf::from(name)
}
