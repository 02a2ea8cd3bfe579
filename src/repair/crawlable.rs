use std::{
    collections::{BTreeSet, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tracing::{debug, warn};

use crate::{
    storage::pager::Pager,
    types::{
        PageNo,
        cell::Cell,
        error::{DatabaseError, Result},
        page::{Page, PageType},
    },
    utils::notifier,
};

/// Cooperative stop flag shared between a crawl and whoever wants it to end.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Idle,
    Crawling,
    Done,
    Stopped,
}

/// Callbacks driving what a crawl does with the pages and cells it reaches.
pub trait CrawlerDelegate {
    /// Called for every page before its children or cells are visited.
    /// Returning `false` skips the page.
    fn will_crawl_page(&mut self, _page: &Page, _height: u32) -> bool {
        true
    }

    fn on_cell_crawled(&mut self, cell: &Cell) -> Result<()>;

    /// Every error met on the way, critical or not. `page` is the page being
    /// visited when it happened.
    fn on_crawler_error(&mut self, _error: &DatabaseError, _page: Option<PageNo>) {}

    /// Called once all cells of a leaf table page were offered, with the
    /// number that were accepted.
    fn did_crawl_page(&mut self, _page: &Page, _accepted: usize) {}
}

/// Depth-first walker over table B-trees that keeps going past damage.
///
/// A page or cell that fails to parse is reported and skipped; the walk
/// carries on with the pages already enumerated. Only a critical error or
/// an interrupt stops it.
#[derive(Debug)]
pub struct Crawler {
    state: CrawlState,
    interrupt: InterruptHandle,
    critical_error: Option<DatabaseError>,
    corrupted_pages: BTreeSet<PageNo>,
}

impl Default for Crawler {
    fn default() -> Self {
        Self::new(InterruptHandle::new())
    }
}

impl Crawler {
    pub fn new(interrupt: InterruptHandle) -> Self {
        Self {
            state: CrawlState::Idle,
            interrupt,
            critical_error: None,
            corrupted_pages: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub fn is_error_critical(&self) -> bool {
        self.critical_error.is_some()
    }

    pub fn critical_error(&self) -> Option<&DatabaseError> {
        self.critical_error.as_ref()
    }

    pub fn take_critical_error(&mut self) -> Option<DatabaseError> {
        self.critical_error.take()
    }

    pub fn corrupted_pages(&self) -> &BTreeSet<PageNo> {
        &self.corrupted_pages
    }

    pub fn is_stopped(&self) -> bool {
        self.state == CrawlState::Stopped
    }

    pub fn stop(&mut self) {
        self.state = CrawlState::Stopped;
    }

    /// Walks the table B-tree rooted at `root`. Returns `true` when the walk
    /// ran to the end, `false` when a critical error or an interrupt stopped it.
    pub fn crawl(&mut self, pager: &mut Pager, root: PageNo, delegate: &mut dyn CrawlerDelegate) -> bool {
        self.begin();
        let mut visited = HashSet::new();
        let mut stack = vec![(root, 0u32)];

        while let Some((number, height)) = stack.pop() {
            if self.should_stop() {
                return false;
            }
            if !visited.insert(number) {
                self.on_error(
                    DatabaseError::corrupted_page(number, "Page is referenced more than once"),
                    Some(number),
                    pager,
                    delegate,
                );
                continue;
            }

            let Some(page) = self.visit(pager, number, height, delegate) else {
                continue;
            };
            if page.page_type == PageType::InteriorTable {
                // reversed so the left-most child is popped first
                for child in page.sub_page_numbers().iter().rev() {
                    stack.push((*child, height + 1));
                }
            }
        }

        self.finish()
    }

    /// Visits the given pages on their own, without descending into children.
    pub fn crawl_pages(&mut self, pager: &mut Pager, pages: &[PageNo], delegate: &mut dyn CrawlerDelegate) -> bool {
        self.begin();
        for number in pages {
            if self.should_stop() {
                return false;
            }
            self.visit(pager, *number, 0, delegate);
        }
        self.finish()
    }

    fn begin(&mut self) {
        self.state = CrawlState::Crawling;
    }

    fn finish(&mut self) -> bool {
        if self.state == CrawlState::Stopped {
            return false;
        }
        self.state = CrawlState::Done;
        true
    }

    fn should_stop(&mut self) -> bool {
        if self.interrupt.is_interrupted() {
            debug!("Crawl interrupted");
            self.stop();
        }
        self.state == CrawlState::Stopped
    }

    /// Parses one page, offers its cells when it is a table leaf and returns
    /// it for further descent.
    fn visit(
        &mut self,
        pager: &mut Pager,
        number: PageNo,
        height: u32,
        delegate: &mut dyn CrawlerDelegate,
    ) -> Option<Page> {
        let page = match pager.acquire_page(number) {
            Ok(page) => page,
            Err(error) => {
                self.on_error(error, Some(number), pager, delegate);
                return None;
            }
        };

        if !page.page_type.is_table() {
            self.on_error(
                DatabaseError::corrupted_page(
                    number,
                    format!("Unexpected {:?} page in a table b-tree", page.page_type),
                ),
                Some(number),
                pager,
                delegate,
            );
            return None;
        }

        if !delegate.will_crawl_page(&page, height) {
            return None;
        }

        if page.page_type == PageType::LeafTable {
            let mut accepted = 0;
            for index in 0..page.cell_count() {
                let result = Cell::parse(&page, index, pager)
                    .and_then(|cell| delegate.on_cell_crawled(&cell));
                match result {
                    Ok(()) => accepted += 1,
                    Err(error) => {
                        self.on_error(error, Some(number), pager, delegate);
                        if self.state == CrawlState::Stopped {
                            return None;
                        }
                    }
                }
            }
            delegate.did_crawl_page(&page, accepted);
        }

        Some(page)
    }

    fn on_error(
        &mut self,
        error: DatabaseError,
        page: Option<PageNo>,
        pager: &Pager,
        delegate: &mut dyn CrawlerDelegate,
    ) {
        notifier::notify(&error, pager.path());
        delegate.on_crawler_error(&error, page);

        if error.is_critical() {
            warn!(path = %pager.path().display(), %error, "Critical error stops the crawl");
            self.critical_error = Some(error);
            self.stop();
            return;
        }
        if error.is_corruption() {
            if let Some(number) = error.page().or(page) {
                self.corrupted_pages.insert(number);
            }
        }
    }
}
