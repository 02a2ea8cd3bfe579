use std::{collections::HashSet, io::Write};

use sqlparser::{
    ast::{ColumnOption, Statement, TableConstraint},
    dialect::SQLiteDialect,
    parser::Parser,
};
use tracing::debug;

use crate::types::{
    RowId,
    cell::Cell,
    error::{DatabaseError, Result},
    value::Value,
};

/// Destination of recovered data.
///
/// A repair drives it as
/// `mark_as_assembling → (assemble_table → assemble_cell* → assemble_sequence?)* → mark_as_assembled`,
/// calling `mark_as_milestone` periodically in between. A `Conflict` error from
/// `assemble_cell` is a notice; any other error on the destination side stops the repair.
pub trait Assembler {
    fn mark_as_assembling(&mut self) -> Result<()>;

    fn assemble_table(&mut self, table_name: &str, sql: &str) -> Result<()>;

    fn assemble_cell(&mut self, cell: &Cell) -> Result<()>;

    fn assemble_sequence(&mut self, table_name: &str, sequence: i64) -> Result<()>;

    fn mark_as_milestone(&mut self) -> Result<()>;

    fn mark_as_assembled(&mut self) -> Result<()>;
}

/// Column layout of a table, read from its CREATE statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableLayout {
    pub columns: Vec<String>,
    /// Index of the `INTEGER PRIMARY KEY` column, whose value is the rowid.
    pub rowid_alias: Option<usize>,
}

fn unquote(identifier: &str) -> String {
    let trimmed = identifier.trim();
    let quoted = [('"', '"'), ('`', '`'), ('[', ']'), ('\'', '\'')]
        .iter()
        .any(|(open, close)| trimmed.starts_with(*open) && trimmed.ends_with(*close) && trimmed.len() >= 2);
    if quoted {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

impl TableLayout {
    /// Returns `None` when the statement cannot be parsed as a CREATE TABLE.
    pub fn parse(sql: &str) -> Option<Self> {
        let statements = Parser::parse_sql(&SQLiteDialect {}, sql).ok()?;
        let Some(Statement::CreateTable(create)) = statements.into_iter().next() else {
            return None;
        };

        let columns: Vec<String> = create.columns.iter().map(|column| column.name.value.clone()).collect();
        let is_integer = |index: usize| {
            create.columns[index]
                .data_type
                .to_string()
                .eq_ignore_ascii_case("INTEGER")
        };

        let mut rowid_alias = create.columns.iter().position(|column| {
            column
                .options
                .iter()
                .any(|option| matches!(option.option, ColumnOption::Unique { is_primary: true, .. }))
        });
        if rowid_alias.is_none() {
            for constraint in &create.constraints {
                if let TableConstraint::PrimaryKey { columns: keys, .. } = constraint {
                    if keys.len() == 1 {
                        let key = unquote(&keys[0].to_string());
                        rowid_alias = columns.iter().position(|column| column.eq_ignore_ascii_case(&key));
                    }
                }
            }
        }

        Some(Self {
            rowid_alias: rowid_alias.filter(|index| is_integer(*index)),
            columns,
        })
    }
}

pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

struct AssemblingTable {
    name: String,
    layout: Option<TableLayout>,
    rowids: HashSet<RowId>,
}

/// Writes recovered data as a SQL script that rebuilds the database when
/// replayed, e.g. through `sqlite3 new.db < dump.sql`.
pub struct SqlDumpAssembler<W: Write> {
    writer: W,
    table: Option<AssemblingTable>,
    statements: u64,
}

impl<W: Write> SqlDumpAssembler<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            table: None,
            statements: 0,
        }
    }

    pub fn statements(&self) -> u64 {
        self.statements
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.statements += 1;
        Ok(())
    }
}

impl<W: Write> Assembler for SqlDumpAssembler<W> {
    fn mark_as_assembling(&mut self) -> Result<()> {
        self.write_line("PRAGMA foreign_keys=OFF;")?;
        self.write_line("BEGIN TRANSACTION;")
    }

    fn assemble_table(&mut self, table_name: &str, sql: &str) -> Result<()> {
        let layout = TableLayout::parse(sql);
        if layout.is_none() {
            debug!(table = table_name, "Unparsed schema, inserting positionally");
        }
        self.write_line(&format!("{};", sql.trim_end().trim_end_matches(';')))?;
        self.table = Some(AssemblingTable {
            name: table_name.to_string(),
            layout,
            rowids: HashSet::new(),
        });
        Ok(())
    }

    fn assemble_cell(&mut self, cell: &Cell) -> Result<()> {
        let Some(table) = self.table.as_mut() else {
            return Err(DatabaseError::Misuse {
                details: "Cell assembled before its table".to_string(),
            });
        };
        if !table.rowids.insert(cell.rowid()) {
            return Err(DatabaseError::Conflict {
                table: table.name.clone(),
                details: format!("Duplicate rowid {}", cell.rowid()),
            });
        }

        let mut values = cell.values();
        let line = match &table.layout {
            Some(layout) if values.len() <= layout.columns.len() => {
                if let Some(alias) = layout.rowid_alias {
                    if values.get(alias).is_some_and(Value::is_null) {
                        values[alias] = Value::Integer(cell.rowid());
                    }
                }
                let mut names = vec!["rowid".to_string()];
                names.extend(layout.columns[..values.len()].iter().map(|column| quote_identifier(column)));
                let mut literals = vec![cell.rowid().to_string()];
                literals.extend(values.iter().map(Value::to_sql_literal));
                format!(
                    "INSERT INTO {}({}) VALUES({});",
                    quote_identifier(&table.name),
                    names.join(", "),
                    literals.join(", ")
                )
            }
            _ => format!(
                "INSERT INTO {} VALUES({});",
                quote_identifier(&table.name),
                values.iter().map(Value::to_sql_literal).collect::<Vec<_>>().join(", ")
            ),
        };
        self.write_line(&line)
    }

    fn assemble_sequence(&mut self, table_name: &str, sequence: i64) -> Result<()> {
        let name = quote_literal(table_name);
        self.write_line(&format!(
            "UPDATE sqlite_sequence SET seq = MAX(seq, {}) WHERE name = {};",
            sequence, name
        ))?;
        self.write_line(&format!(
            "INSERT INTO sqlite_sequence(name, seq) SELECT {}, {} WHERE NOT EXISTS (SELECT 1 FROM sqlite_sequence WHERE name = {});",
            name, sequence, name
        ))
    }

    fn mark_as_milestone(&mut self) -> Result<()> {
        self.write_line("COMMIT;")?;
        self.write_line("BEGIN TRANSACTION;")?;
        self.writer.flush()?;
        Ok(())
    }

    fn mark_as_assembled(&mut self) -> Result<()> {
        self.table = None;
        self.write_line("COMMIT;")?;
        self.writer.flush()?;
        Ok(())
    }
}
