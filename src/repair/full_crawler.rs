use std::path::Path;

use tracing::{debug, info};

use crate::{
    config::RepairConfig,
    repair::{
        assembler::Assembler,
        cipher::CipherDelegate,
        crawlable::InterruptHandle,
        master::{MasterCrawler, MasterItem, SEQUENCE_TABLE_NAME},
        repairman::{RepairReport, Repairman, TableDelegate},
        sequence::{SequenceCrawler, sequences_by_table},
    },
    types::{error::Result, fraction::Fraction},
};

/// Repairs a database without any backup: reads the schema from
/// `sqlite_master` and walks every table b-tree it names.
pub struct FullCrawler<'a> {
    repairman: Repairman<'a>,
}

impl<'a> FullCrawler<'a> {
    pub fn new<P: AsRef<Path>>(path: P, assembler: &'a mut dyn Assembler) -> Self {
        Self {
            repairman: Repairman::new(path, assembler),
        }
    }

    pub fn with_config(mut self, config: RepairConfig) -> Self {
        self.repairman.set_config(config);
        self
    }

    pub fn set_cipher_delegate(&mut self, cipher: &'a mut dyn CipherDelegate) {
        self.repairman.set_cipher_delegate(cipher);
    }

    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: FnMut(f64, f64) + 'a,
    {
        self.repairman.set_progress_callback(callback);
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.repairman.interrupt_handle()
    }

    pub fn progress(&self) -> f64 {
        self.repairman.progress()
    }

    pub fn score(&self) -> f64 {
        self.repairman.score()
    }

    /// Salvages every readable row into the assembler.
    ///
    /// Damage anywhere in the file lowers the score instead of failing; only
    /// critical errors are returned.
    pub fn work(&mut self) -> Result<RepairReport> {
        let repairman = &mut self.repairman;
        if let Err(error) = repairman.initialize_pager() {
            return repairman.unsalvageable(error);
        }

        let items = MasterCrawler::new(&mut repairman.crawler).work(&mut repairman.pager)?;
        let sequences = match items
            .iter()
            .find(|item| item.is_table() && item.name.eq_ignore_ascii_case(SEQUENCE_TABLE_NAME))
        {
            Some(item) if item.root_page > 0 => {
                let items = SequenceCrawler::new(&mut repairman.crawler).work(&mut repairman.pager, item.root_page)?;
                sequences_by_table(items)
            }
            _ => Default::default(),
        };

        let tables: Vec<&MasterItem> = items.iter().filter(|item| item.is_recoverable_table()).collect();
        info!(
            path = %repairman.pager.path().display(),
            tables = tables.len(),
            pages = repairman.pager.number_of_pages(),
            "Crawling database"
        );
        let weight = Fraction::new(1, repairman.pager.number_of_pages() as u64);

        repairman.state.mark_as_assembling()?;
        let mut completed = true;
        for table in tables {
            if repairman.is_interrupted() {
                completed = false;
                break;
            }
            let path = repairman.pager.path().to_path_buf();
            if !repairman.state.assemble_table(&path, &table.name, &table.sql)? {
                continue;
            }

            let mut delegate = TableDelegate::new(&mut repairman.state, &path, weight, None);
            let finished = repairman
                .crawler
                .crawl(&mut repairman.pager, table.root_page, &mut delegate);
            delegate.finish();
            repairman.check_critical()?;
            if !finished {
                completed = false;
                break;
            }

            if let Some(sequence) = sequences.get(&table.name).filter(|sequence| **sequence > 0) {
                repairman.state.assemble_sequence(&path, &table.name, *sequence)?;
            }
            debug!(table = %table.name, "Table crawled");
        }
        if repairman.is_interrupted() {
            completed = false;
        }
        repairman.state.mark_as_assembled()?;

        Ok(repairman.finish(completed))
    }
}
