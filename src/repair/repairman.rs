use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    config::RepairConfig,
    repair::{
        assembler::Assembler,
        cipher::CipherDelegate,
        crawlable::{Crawler, CrawlerDelegate, InterruptHandle},
    },
    storage::pager::Pager,
    types::{
        PageNo,
        cell::Cell,
        error::{DatabaseError, ErrorKind, Result},
        fraction::Fraction,
        page::{Page, PageType},
    },
    utils::notifier,
};

/// Outcome of one repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairReport {
    /// Share of the reached data that was salvaged: 0 nothing, 1 everything.
    pub score: f64,
    /// `false` when the repair was interrupted before reaching every table.
    pub completed: bool,
    pub tables: usize,
    pub cells: u64,
    pub conflicts: u64,
    pub corrupted_pages: Vec<PageNo>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RepairReport {
    fn new() -> Self {
        Self {
            score: 0.0,
            completed: false,
            tables: 0,
            cells: 0,
            conflicts: 0,
            corrupted_pages: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Receives `(progress, increment)` each time progress grows.
pub type ProgressCallback<'a> = Box<dyn FnMut(f64, f64) + 'a>;

/// Everything a repair tracks apart from the pager and crawler.
pub(crate) struct RepairState<'a> {
    assembler: &'a mut dyn Assembler,
    pub(crate) config: RepairConfig,
    progress: Fraction,
    progress_callback: Option<ProgressCallback<'a>>,
    score: Fraction,
    scored_pages: u64,
    fixed_score_pages: Option<u64>,
    cells_since_milestone: u64,
    // pages whose content no longer matches the material
    mismatched_pages: BTreeSet<PageNo>,
    pub(crate) report: RepairReport,
}

impl<'a> RepairState<'a> {
    fn new(assembler: &'a mut dyn Assembler) -> Self {
        Self {
            assembler,
            config: RepairConfig::default(),
            progress: Fraction::zero(),
            progress_callback: None,
            score: Fraction::zero(),
            scored_pages: 0,
            fixed_score_pages: None,
            cells_since_milestone: 0,
            mismatched_pages: BTreeSet::new(),
            report: RepairReport::new(),
        }
    }

    pub(crate) fn mark_as_assembling(&mut self) -> Result<()> {
        self.report = RepairReport::new();
        self.assembler.mark_as_assembling()
    }

    /// Returns whether the table was accepted. Refused tables are notices.
    pub(crate) fn assemble_table(&mut self, path: &Path, name: &str, sql: &str) -> Result<bool> {
        match self.assembler.assemble_table(name, sql) {
            Ok(()) => {
                self.report.tables += 1;
                debug!(table = name, "Assembling table");
                Ok(true)
            }
            Err(error) => {
                notifier::notify(&error, path);
                if error.is_critical() { Err(error) } else { Ok(false) }
            }
        }
    }

    fn assemble_cell(&mut self, cell: &Cell) -> Result<()> {
        if let Err(error) = self.assembler.assemble_cell(cell) {
            if error.kind() == ErrorKind::Conflict {
                self.report.conflicts += 1;
            }
            return Err(error);
        }
        self.report.cells += 1;
        self.cells_since_milestone += 1;
        if self.cells_since_milestone >= self.config.milestone_interval {
            self.cells_since_milestone = 0;
            self.assembler.mark_as_milestone()?;
        }
        Ok(())
    }

    pub(crate) fn assemble_sequence(&mut self, path: &Path, name: &str, sequence: i64) -> Result<()> {
        match self.assembler.assemble_sequence(name, sequence) {
            Ok(()) => Ok(()),
            Err(error) if !error.is_critical() => {
                notifier::notify(&error, path);
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    pub(crate) fn mark_as_assembled(&mut self) -> Result<()> {
        self.assembler.mark_as_assembled()
    }

    pub(crate) fn increase_progress(&mut self, increment: Fraction) {
        let before = self.progress;
        self.progress = self.progress.saturating_add(&increment, &Fraction::one());
        if self.progress > before {
            if let Some(callback) = self.progress_callback.as_mut() {
                callback(self.progress.value(), self.progress.value() - before.value());
            }
        }
    }

    pub(crate) fn finish_progress(&mut self) {
        self.increase_progress(Fraction::one());
    }

    pub(crate) fn progress(&self) -> f64 {
        self.progress.value()
    }

    /// Scores are divided by this many pages instead of the pages reached.
    pub(crate) fn set_fixed_score_pages(&mut self, pages: u64) {
        self.fixed_score_pages = Some(pages);
    }

    fn credit_page(&mut self, accepted: usize, total: usize) {
        self.score += if total == 0 {
            Fraction::one()
        } else {
            Fraction::new(accepted as u64, total as u64)
        };
        self.scored_pages += 1;
    }

    fn credit_failed_page(&mut self) {
        self.scored_pages += 1;
    }

    pub(crate) fn score(&self) -> f64 {
        let pages = self.fixed_score_pages.unwrap_or(self.scored_pages);
        if pages == 0 {
            return 0.0;
        }
        self.score.div(&Fraction::new(pages, 1)).value().clamp(0.0, 1.0)
    }
}

/// Drives one repair session: the pager over the damaged file, the crawler
/// walking it and the assembler receiving what is salvaged.
pub struct Repairman<'a> {
    pub(crate) pager: Pager,
    pub(crate) crawler: Crawler,
    pub(crate) state: RepairState<'a>,
    cipher: Option<&'a mut dyn CipherDelegate>,
}

impl<'a> Repairman<'a> {
    pub fn new<P: AsRef<Path>>(path: P, assembler: &'a mut dyn Assembler) -> Self {
        Self {
            pager: Pager::new(path),
            crawler: Crawler::default(),
            state: RepairState::new(assembler),
            cipher: None,
        }
    }

    pub fn set_config(&mut self, config: RepairConfig) {
        self.state.config = config;
    }

    pub fn config(&self) -> &RepairConfig {
        &self.state.config
    }

    pub fn set_cipher_delegate(&mut self, cipher: &'a mut dyn CipherDelegate) {
        self.cipher = Some(cipher);
    }

    pub(crate) fn cipher_delegate(&mut self) -> Option<&mut (dyn CipherDelegate + 'a)> {
        self.cipher.as_deref_mut()
    }

    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: FnMut(f64, f64) + 'a,
    {
        self.state.progress_callback = Some(Box::new(callback));
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.crawler.interrupt_handle()
    }

    pub fn is_interrupted(&self) -> bool {
        self.crawler.interrupt_handle().is_interrupted()
    }

    pub fn path(&self) -> &Path {
        self.pager.path()
    }

    pub fn progress(&self) -> f64 {
        self.state.progress()
    }

    pub fn score(&self) -> f64 {
        self.state.score()
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    /// Applies the configuration and cipher to the pager and opens it.
    pub(crate) fn initialize_pager(&mut self) -> Result<()> {
        let config = self.state.config.clone();
        config.validate()?;
        if let Some(page_size) = config.page_size {
            self.pager.set_page_size(page_size);
        }
        if let Some(reserved_bytes) = config.reserved_bytes {
            self.pager.set_reserved_bytes(reserved_bytes);
        }
        if config.skip_wal {
            self.pager.set_wal_skipped();
        }
        self.pager.set_cache_capacity(config.page_cache_capacity);

        if let Some(cipher) = self.cipher.as_deref_mut() {
            cipher.open_cipher_in_memory().map_err(|error| DatabaseError::Cipher {
                details: error.to_string(),
            })?;
            let codec = cipher.cipher_context().ok_or_else(|| DatabaseError::Cipher {
                details: "Cipher context is unavailable".to_string(),
            })?;
            if config.page_size.is_none() {
                self.pager.set_page_size(cipher.cipher_page_size());
            }
            self.pager.set_codec(codec);
        }

        self.pager.initialize()
    }

    /// A report for a file in which nothing can be salvaged at all.
    pub(crate) fn unsalvageable(&mut self, error: DatabaseError) -> Result<RepairReport> {
        if error.is_critical() {
            return Err(error);
        }
        notifier::notify(&error, self.pager.path());
        info!(path = %self.pager.path().display(), %error, "Nothing to salvage");
        self.close_cipher();
        let mut report = RepairReport::new();
        report.completed = true;
        report.finished_at = Some(Utc::now());
        Ok(report)
    }

    /// Fails with the crawler's critical error, if one stopped it.
    pub(crate) fn check_critical(&mut self) -> Result<()> {
        match self.crawler.take_critical_error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn close_cipher(&mut self) {
        if let Some(cipher) = self.cipher.as_deref_mut() {
            cipher.close_cipher();
        }
    }

    pub(crate) fn finish(&mut self, completed: bool) -> RepairReport {
        self.close_cipher();
        if !completed {
            notifier::notify(&DatabaseError::Interrupted, self.pager.path());
        }
        if completed {
            self.state.finish_progress();
        }
        let score = self.state.score();
        let report = &mut self.state.report;
        report.completed = completed;
        report.score = score;
        report.corrupted_pages = self
            .crawler
            .corrupted_pages()
            .union(&self.state.mismatched_pages)
            .copied()
            .collect();
        report.finished_at = Some(Utc::now());
        info!(
            path = %self.pager.path().display(),
            score,
            completed,
            tables = report.tables,
            cells = report.cells,
            "Repair finished"
        );
        report.clone()
    }
}

/// Feeds the cells of one table to the assembler while crediting progress
/// and score. With `expected` hashes set, a page whose content differs from
/// its recorded hash is skipped.
pub(crate) struct TableDelegate<'s, 'a> {
    state: &'s mut RepairState<'a>,
    path: &'s Path,
    weight: Fraction,
    expected: Option<&'s BTreeMap<PageNo, u32>>,
    credited: BTreeSet<PageNo>,
    scored: BTreeSet<PageNo>,
    errored: BTreeSet<PageNo>,
}

impl<'s, 'a> TableDelegate<'s, 'a> {
    pub(crate) fn new(
        state: &'s mut RepairState<'a>,
        path: &'s Path,
        weight: Fraction,
        expected: Option<&'s BTreeMap<PageNo, u32>>,
    ) -> Self {
        Self {
            state,
            path,
            weight,
            expected,
            credited: BTreeSet::new(),
            scored: BTreeSet::new(),
            errored: BTreeSet::new(),
        }
    }

    fn credit_progress(&mut self, page: PageNo) {
        if self.credited.insert(page) {
            self.state.increase_progress(self.weight);
        }
    }

    /// Scores the pages that failed before any of their cells were counted.
    pub(crate) fn finish(self) {
        for page in self.errored.difference(&self.scored) {
            debug!(page, "Page lost");
            self.state.credit_failed_page();
        }
    }
}

impl CrawlerDelegate for TableDelegate<'_, '_> {
    fn will_crawl_page(&mut self, page: &Page, _height: u32) -> bool {
        self.credit_progress(page.number);
        let Some(expected) = self.expected else {
            return true;
        };
        match expected.get(&page.number) {
            Some(hash) if page.hash() == *hash => true,
            _ => {
                let error = DatabaseError::corrupted_page(page.number, "Page content differs from the material");
                notifier::notify(&error, self.path);
                self.scored.insert(page.number);
                self.state.mismatched_pages.insert(page.number);
                self.state.credit_failed_page();
                false
            }
        }
    }

    fn on_cell_crawled(&mut self, cell: &Cell) -> Result<()> {
        self.state.assemble_cell(cell)
    }

    fn on_crawler_error(&mut self, error: &DatabaseError, page: Option<PageNo>) {
        if let Some(page) = page {
            self.credit_progress(page);
            if error.is_corruption() {
                self.errored.insert(page);
            }
        }
    }

    fn did_crawl_page(&mut self, page: &Page, accepted: usize) {
        if page.page_type == PageType::LeafTable && self.scored.insert(page.number) {
            self.state.credit_page(accepted, page.cell_count());
        }
    }
}
