use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
};

use rustyline::{DefaultEditor, Result, error::ReadlineError};
use tambal::{
    art::welcome_message,
    config::RepairConfig,
    repair::{
        FullCrawler, MaterialStore, Mechanic, RepairReport, SqlDumpAssembler,
        crawlable::Crawler,
        master::MasterCrawler,
    },
    storage::pager::Pager,
    types::error::DatabaseError,
};
use tracing_subscriber::EnvFilter;

const HISTORY_FILE: &str = ".tambal_history";

fn read_multiline_command(rl: &mut DefaultEditor) -> Result<String> {
    let mut input = String::new();
    let mut prompt = "tambal> ".to_string();

    loop {
        let line = rl.readline(&prompt)?;
        let trimmed_line = line.trim_end();

        // Check if line ends with backslash (multiline continuation)
        if let Some(continued) = trimmed_line.strip_suffix('\\') {
            input.push_str(continued);
            input.push(' ');
            prompt = "      -> ".to_string();
        } else {
            input.push_str(trimmed_line);
            break;
        }
    }

    Ok(input)
}

struct Session {
    database: Option<PathBuf>,
    config: RepairConfig,
}

impl Session {
    fn database(&self) -> std::result::Result<&PathBuf, DatabaseError> {
        self.database.as_ref().ok_or_else(|| DatabaseError::Misuse {
            details: "No database opened, use 'open <path>' first".to_string(),
        })
    }

    fn info(&self) -> std::result::Result<(), DatabaseError> {
        let mut pager = Pager::new(self.database()?);
        if self.config.skip_wal {
            pager.set_wal_skipped();
        }
        pager.initialize()?;
        println!("  file size      : {} bytes", pager.file_size());
        println!("  page size      : {}", pager.page_size());
        println!("  reserved bytes : {}", pager.reserved_bytes());
        println!("  pages          : {}", pager.number_of_pages());
        println!("  text encoding  : {:?}", pager.text_encoding());
        println!("  schema cookie  : {}", pager.schema_cookie());
        println!(
            "  wal            : {} frames, {} committed, {} pages",
            pager.wal_frame_count(),
            pager.wal_max_frame(),
            pager.wal_page_count()
        );
        Ok(())
    }

    fn tables(&self) -> std::result::Result<(), DatabaseError> {
        let mut pager = Pager::new(self.database()?);
        pager.initialize()?;
        let mut crawler = Crawler::default();
        let items = MasterCrawler::new(&mut crawler).work(&mut pager)?;
        for item in &items {
            println!("  {:<8} {:<24} root={:<6} {}", item.item_type, item.name, item.root_page, item.sql);
        }
        if !crawler.corrupted_pages().is_empty() {
            println!("  damaged schema pages: {:?}", crawler.corrupted_pages());
        }
        Ok(())
    }

    fn backup(&self) -> std::result::Result<(), DatabaseError> {
        let store = MaterialStore::new(self.database()?);
        let path = store.backup(&self.config)?;
        println!("Material saved to {}", path.display());
        Ok(())
    }

    fn materials(&self) -> std::result::Result<(), DatabaseError> {
        let store = MaterialStore::new(self.database()?);
        let materials = store.materials()?;
        if materials.is_empty() {
            println!("No materials in {}", store.directory().display());
        }
        for path in materials {
            println!("  {}", path.display());
        }
        Ok(())
    }

    fn repair(&self, output: &str) -> std::result::Result<(), DatabaseError> {
        let database = self.database()?.clone();
        let mut assembler = SqlDumpAssembler::new(BufWriter::new(File::create(output)?));
        let report = {
            let mut crawler = FullCrawler::new(&database, &mut assembler).with_config(self.config.clone());
            crawler.set_progress_callback(print_progress);
            crawler.work()?
        };
        assembler.into_inner().flush()?;
        print_report(&report, output);
        Ok(())
    }

    fn restore(&self, output: &str) -> std::result::Result<(), DatabaseError> {
        let database = self.database()?.clone();
        let material = MaterialStore::new(&database).require_latest()?;
        let mut assembler = SqlDumpAssembler::new(BufWriter::new(File::create(output)?));
        let report = {
            let mut mechanic = Mechanic::new(&database, &material, &mut assembler).with_config(self.config.clone());
            mechanic.set_progress_callback(print_progress);
            mechanic.work()?
        };
        assembler.into_inner().flush()?;
        print_report(&report, output);
        Ok(())
    }

    fn config(&mut self, arguments: &[&str]) -> std::result::Result<(), DatabaseError> {
        match arguments {
            [] => match serde_json::to_string_pretty(&self.config) {
                Ok(json) => println!("{}", json),
                Err(e) => println!("Error: {}", e),
            },
            ["load", path] => self.config = RepairConfig::load(path)?,
            ["save", path] => self.config.save(path)?,
            _ => println!("Usage: config [load <path> | save <path>]"),
        }
        Ok(())
    }
}

fn print_progress(progress: f64, _increment: f64) {
    print!("\r  progress: {:>6.2}%", progress * 100.0);
    let _ = std::io::stdout().flush();
}

fn print_report(report: &RepairReport, output: &str) {
    println!();
    println!(
        "  score {:.4}, {} tables, {} rows, {} conflicts, {} damaged pages{}",
        report.score,
        report.tables,
        report.cells,
        report.conflicts,
        report.corrupted_pages.len(),
        if report.completed { "" } else { " (interrupted)" }
    );
    println!("  SQL written to {}", output);
}

fn process_command(session: &mut Session, command: &str) -> bool {
    let words: Vec<&str> = command.split_whitespace().collect();
    let Some((first, arguments)) = words.split_first() else {
        return true;
    };

    let result = match (first.to_lowercase().as_str(), arguments) {
        ("exit" | "quit" | "q", _) => {
            println!("Goodbye!");
            return false;
        }
        ("help" | "h", _) => {
            println!(
                r#"
Available commands:
  open <path>          - Select the database to work on
  info                 - Show header and WAL details
  tables               - List the schema read from sqlite_master
  backup               - Capture a material of the database
  materials            - List stored materials
  repair <output.sql>  - Salvage every readable row by crawling the file
  restore <output.sql> - Salvage rows using the latest material
  config [load|save <path>]
                       - Show, load or save the configuration
  set <key> <value>    - Change one configuration value
  help, h              - Show this help message
  clear, ctrl + l      - Clear the screen
  exit, quit, q        - Exit

Use '\' at the end of a line for multiline input.
Use Up/Down arrows to navigate command history.
"#
            );
            Ok(())
        }
        ("clear", _) => {
            print!("\x1B[2J\x1B[1;1H");
            let _ = std::io::stdout().flush();
            Ok(())
        }
        ("open", [path]) => {
            session.database = Some(PathBuf::from(path));
            println!("Opened {}", path);
            Ok(())
        }
        ("info", []) => session.info(),
        ("tables", []) => session.tables(),
        ("backup", []) => session.backup(),
        ("materials", []) => session.materials(),
        ("repair", [output]) => session.repair(output),
        ("restore", [output]) => session.restore(output),
        ("config", arguments) => session.config(arguments),
        ("set", [key, value]) => session.config.set(key, value),
        _ => {
            println!("Unknown command: {}. Type 'help' for usage.", command.trim());
            Ok(())
        }
    };

    if let Err(e) = result {
        println!("Error: {}", e);
    }
    true
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    println!("{}", welcome_message("TAMBAL"));

    let mut session = Session {
        database: std::env::args().nth(1).map(PathBuf::from),
        config: RepairConfig::default(),
    };
    if let Some(database) = &session.database {
        println!("Opened {}", database.display());
    }

    let mut rl = DefaultEditor::new()?;
    let _ = rl.load_history(HISTORY_FILE);

    loop {
        match read_multiline_command(&mut rl) {
            Ok(input) => {
                let command = input.trim().to_string();

                if !command.is_empty() {
                    rl.add_history_entry(&command)?;
                    if !process_command(&mut session, &command) {
                        break;
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Interrupted");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("EOF");
                break;
            }
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    let _ = rl.save_history(HISTORY_FILE);
    Ok(())
}
