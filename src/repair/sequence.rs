use std::collections::BTreeMap;

use crate::{
    repair::crawlable::{Crawler, CrawlerDelegate},
    storage::pager::Pager,
    types::{
        PageNo,
        cell::Cell,
        error::{DatabaseError, Result},
        value::ColumnType,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceItem {
    pub name: String,
    pub seq: i64,
}

/// Crawls `sqlite_sequence` for autoincrement counters.
pub struct SequenceCrawler<'c> {
    crawler: &'c mut Crawler,
    items: Vec<SequenceItem>,
}

impl<'c> SequenceCrawler<'c> {
    pub fn new(crawler: &'c mut Crawler) -> Self {
        Self {
            crawler,
            items: Vec::new(),
        }
    }

    pub fn work(mut self, pager: &mut Pager, root: PageNo) -> Result<Vec<SequenceItem>> {
        let mut delegate = SequenceDelegate { items: &mut self.items };
        self.crawler.crawl(pager, root, &mut delegate);
        if let Some(error) = self.crawler.take_critical_error() {
            return Err(error);
        }
        Ok(self.items)
    }
}

/// Counters keyed by table name; a later row for the same table wins.
pub fn sequences_by_table(items: Vec<SequenceItem>) -> BTreeMap<String, i64> {
    items.into_iter().map(|item| (item.name, item.seq)).collect()
}

struct SequenceDelegate<'i> {
    items: &'i mut Vec<SequenceItem>,
}

impl CrawlerDelegate for SequenceDelegate<'_> {
    fn on_cell_crawled(&mut self, cell: &Cell) -> Result<()> {
        if cell.count() != 2
            || cell.column_type(0) != ColumnType::Text
            || cell.column_type(1) != ColumnType::Integer
        {
            return Err(DatabaseError::corrupted_page(
                cell.page_number(),
                "Malformed sqlite_sequence row",
            ));
        }
        self.items.push(SequenceItem {
            name: cell.text_value(0),
            seq: cell.integer_value(1),
        });
        Ok(())
    }
}
