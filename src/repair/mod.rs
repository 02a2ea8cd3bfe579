pub mod assembler;
pub mod backup;
pub mod cipher;
pub mod crawlable;
pub mod factory;
pub mod full_crawler;
pub mod master;
pub mod material;
pub mod mechanic;
pub mod repairman;
pub mod sequence;

pub use assembler::{Assembler, SqlDumpAssembler};
pub use backup::Backup;
pub use factory::MaterialStore;
pub use full_crawler::FullCrawler;
pub use material::Material;
pub use mechanic::Mechanic;
pub use repairman::RepairReport;
