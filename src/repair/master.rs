use serde::{Deserialize, Serialize};
use tracing::debug;

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

/// Root page of `sqlite_master`.
pub const MASTER_ROOT_PAGE: PageNo = 1;
pub const SEQUENCE_TABLE_NAME: &str = "sqlite_sequence";

/// Names starting with `sqlite_` belong to SQLite itself.
pub fn is_reserved_table_name(name: &str) -> bool {
    name.len() >= 7 && name.as_bytes()[..7].eq_ignore_ascii_case(b"sqlite_")
}

/// `WITHOUT ROWID` tables are stored as index b-trees and hold no rowids.
fn is_without_rowid(sql: &str) -> bool {
    let Some(close) = sql.rfind(')') else {
        return false;
    };
    let options: Vec<String> = sql[close + 1..]
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .filter(|word| !word.is_empty())
        .map(str::to_ascii_uppercase)
        .collect();
    options.windows(2).any(|pair| pair[0] == "WITHOUT" && pair[1] == "ROWID")
}

/// One row of `sqlite_master`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterItem {
    pub item_type: String,
    pub name: String,
    pub tbl_name: String,
    pub root_page: PageNo,
    pub sql: String,
}

impl MasterItem {
    pub fn is_table(&self) -> bool {
        self.item_type == "table"
    }

    /// A user table whose rows can be recovered from its b-tree.
    pub fn is_recoverable_table(&self) -> bool {
        self.is_table()
            && self.root_page > 0
            && !self.sql.is_empty()
            && !is_reserved_table_name(&self.name)
            && !is_without_rowid(&self.sql)
    }

    fn from_cell(cell: &Cell) -> Result<Self> {
        let malformed = || DatabaseError::corrupted_page(cell.page_number(), "Malformed sqlite_master row");

        let column_types = [
            ColumnType::Text,
            ColumnType::Text,
            ColumnType::Text,
            ColumnType::Integer,
        ];
        if cell.count() != 5 {
            return Err(malformed());
        }
        for (index, expected) in column_types.iter().enumerate() {
            if cell.column_type(index) != *expected {
                return Err(malformed());
            }
        }
        // indexes implied by constraints carry NULL sql
        let sql = match cell.column_type(4) {
            ColumnType::Text => cell.text_value(4),
            ColumnType::Null => String::new(),
            _ => return Err(malformed()),
        };

        let root_page = PageNo::try_from(cell.integer_value(3)).map_err(|_| malformed())?;
        Ok(Self {
            item_type: cell.text_value(0),
            name: cell.text_value(1),
            tbl_name: cell.text_value(2),
            root_page,
            sql,
        })
    }
}

/// Crawls `sqlite_master` for the schema of the database.
pub struct MasterCrawler<'c> {
    crawler: &'c mut Crawler,
    items: Vec<MasterItem>,
}

impl<'c> MasterCrawler<'c> {
    pub fn new(crawler: &'c mut Crawler) -> Self {
        Self {
            crawler,
            items: Vec::new(),
        }
    }

    /// Every readable schema row. Malformed rows are reported and skipped.
    /// Fails only when a critical error stopped the crawl.
    pub fn work(mut self, pager: &mut Pager) -> Result<Vec<MasterItem>> {
        let mut delegate = MasterDelegate { items: &mut self.items };
        self.crawler.crawl(pager, MASTER_ROOT_PAGE, &mut delegate);
        if let Some(error) = self.crawler.take_critical_error() {
            return Err(error);
        }
        debug!(items = self.items.len(), "Master crawled");
        Ok(self.items)
    }
}

struct MasterDelegate<'i> {
    items: &'i mut Vec<MasterItem>,
}

impl CrawlerDelegate for MasterDelegate<'_> {
    fn on_cell_crawled(&mut self, cell: &Cell) -> Result<()> {
        self.items.push(MasterItem::from_cell(cell)?);
        Ok(())
    }
}
