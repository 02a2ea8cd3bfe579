use std::{collections::BTreeMap, path::Path};

use tracing::{debug, info};

use crate::{
    config::RepairConfig,
    repair::{
        crawlable::{Crawler, CrawlerDelegate},
        master::{MasterCrawler, MasterItem, SEQUENCE_TABLE_NAME},
        material::{Content, Material, MaterialInfo},
        sequence::{SequenceCrawler, sequences_by_table},
    },
    storage::pager::Pager,
    types::{
        PageNo,
        cell::Cell,
        error::{DatabaseError, Result},
        page::{Page, PageType},
    },
};

type TableFilter = Box<dyn FnMut(&str) -> bool>;

/// Captures a [`Material`] from a healthy database: for every user table,
/// its schema, its autoincrement counter and the hash of each leaf page.
///
/// A backup must describe the database exactly, so any damage met on the
/// way fails it.
pub struct Backup {
    pager: Pager,
    crawler: Crawler,
    config: RepairConfig,
    filter: Option<TableFilter>,
}

impl Backup {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            pager: Pager::new(path),
            crawler: Crawler::default(),
            config: RepairConfig::default(),
            filter: None,
        }
    }

    pub fn with_config(mut self, config: RepairConfig) -> Self {
        self.config = config;
        self
    }

    /// Only tables for which `filter` returns `true` are captured.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: FnMut(&str) -> bool + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn work(&mut self) -> Result<Material> {
        self.config.validate()?;
        if let Some(page_size) = self.config.page_size {
            self.pager.set_page_size(page_size);
        }
        if let Some(reserved_bytes) = self.config.reserved_bytes {
            self.pager.set_reserved_bytes(reserved_bytes);
        }
        if self.config.skip_wal {
            self.pager.set_wal_skipped();
        }
        self.pager.set_cache_capacity(self.config.page_cache_capacity);
        self.pager.initialize()?;

        let items = MasterCrawler::new(&mut self.crawler).work(&mut self.pager)?;
        self.ensure_intact("sqlite_master")?;

        let sequences = match items
            .iter()
            .find(|item| item.is_table() && item.name.eq_ignore_ascii_case(SEQUENCE_TABLE_NAME))
        {
            Some(item) if item.root_page > 0 => {
                let sequences = SequenceCrawler::new(&mut self.crawler).work(&mut self.pager, item.root_page)?;
                self.ensure_intact(SEQUENCE_TABLE_NAME)?;
                sequences_by_table(sequences)
            }
            _ => BTreeMap::new(),
        };

        let mut material = Material::new(MaterialInfo {
            page_size: self.pager.page_size() as u32,
            reserved_bytes: self.pager.reserved_bytes() as u32,
            wal_salt: self.pager.wal_salt(),
            wal_frame_count: self.pager.wal_max_frame(),
        });

        for table in items.iter().filter(|item| item.is_recoverable_table()) {
            if let Some(filter) = self.filter.as_mut() {
                if !filter(&table.name) {
                    debug!(table = %table.name, "Table filtered out of the backup");
                    continue;
                }
            }

            let mut delegate = BackupDelegate::default();
            self.crawler.crawl(&mut self.pager, table.root_page, &mut delegate);
            if let Some(error) = self.crawler.take_critical_error() {
                return Err(error);
            }
            if let Some(error) = delegate.error {
                return Err(error);
            }

            material.contents.insert(
                table.name.clone(),
                Content {
                    sql: table.sql.clone(),
                    root_page: table.root_page,
                    sequence: sequences.get(&table.name).copied().unwrap_or_default(),
                    associated_sqls: associated_sqls(&items, &table.name),
                    pages: delegate.pages,
                },
            );
        }

        info!(
            path = %self.pager.path().display(),
            tables = material.contents.len(),
            pages = material.number_of_pages(),
            "Backup captured"
        );
        Ok(material)
    }

    fn ensure_intact(&self, table: &str) -> Result<()> {
        match self.crawler.corrupted_pages().iter().next() {
            Some(page) => Err(DatabaseError::CorruptedDatabase {
                reason: format!("{} is damaged at page {}", table, page),
            }),
            None => Ok(()),
        }
    }
}

/// Indexes, triggers and views defined on `table`.
fn associated_sqls(items: &[MasterItem], table: &str) -> Vec<String> {
    items
        .iter()
        .filter(|item| !item.is_table() && !item.sql.is_empty() && item.tbl_name.eq_ignore_ascii_case(table))
        .map(|item| item.sql.clone())
        .collect()
}

#[derive(Default)]
struct BackupDelegate {
    pages: BTreeMap<PageNo, u32>,
    error: Option<DatabaseError>,
}

impl CrawlerDelegate for BackupDelegate {
    fn will_crawl_page(&mut self, page: &Page, _height: u32) -> bool {
        if page.page_type == PageType::LeafTable {
            self.pages.insert(page.number, page.hash());
            // leaf cells are not needed, only the page hash
            return false;
        }
        true
    }

    fn on_cell_crawled(&mut self, _cell: &Cell) -> Result<()> {
        Ok(())
    }

    fn on_crawler_error(&mut self, error: &DatabaseError, page: Option<PageNo>) {
        if self.error.is_none() {
            self.error = Some(match error.page().or(page) {
                Some(page) => DatabaseError::corrupted_page(page, error.to_string()),
                None => DatabaseError::CorruptedDatabase {
                    reason: error.to_string(),
                },
            });
        }
    }
}
