use std::path::Path;

use tracing::{debug, info, warn};

use crate::{
    config::RepairConfig,
    repair::{
        assembler::Assembler,
        cipher::CipherDelegate,
        crawlable::InterruptHandle,
        material::Material,
        repairman::{RepairReport, Repairman, TableDelegate},
    },
    types::{
        PageNo,
        error::{DatabaseError, Result},
        fraction::Fraction,
    },
};

/// Repairs a database from a [`Material`] captured while it was healthy.
///
/// Only the leaf pages the material recorded are read, and only those whose
/// content still hashes to the recorded value are trusted. No b-tree is
/// walked, so damaged interior pages cost nothing.
pub struct Mechanic<'a> {
    repairman: Repairman<'a>,
    material: &'a Material,
}

impl<'a> Mechanic<'a> {
    pub fn new<P: AsRef<Path>>(path: P, material: &'a Material, assembler: &'a mut dyn Assembler) -> Self {
        Self {
            repairman: Repairman::new(path, assembler),
            material,
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

    pub fn work(&mut self) -> Result<RepairReport> {
        let material = self.material;
        let info = material.info;
        if info.page_size == 0 {
            return Err(DatabaseError::Misuse {
                details: "Material carries no page size".to_string(),
            });
        }

        // the material knows the geometry better than a possibly damaged header
        let mut config = self.repairman.config().clone();
        config.page_size = Some(info.page_size as usize);
        config.reserved_bytes = Some(info.reserved_bytes as usize);
        self.repairman.set_config(config);
        if let Some(cipher) = self.repairman.cipher_delegate() {
            cipher.set_cipher_salt(info.wal_salt);
        }

        let repairman = &mut self.repairman;
        repairman.pager.set_wal_max_frame(info.wal_frame_count);
        if let Err(error) = repairman.initialize_pager() {
            return repairman.unsalvageable(error);
        }
        if repairman.pager.wal_frame_count() > 0 && repairman.pager.wal_salt() != info.wal_salt {
            warn!(
                path = %repairman.pager.path().display(),
                "WAL was rewritten after the material was captured, ignoring it"
            );
            repairman.pager.dispose_wal();
        }

        let total = material.number_of_pages() as u64;
        info!(
            path = %repairman.pager.path().display(),
            tables = material.contents.len(),
            pages = total,
            "Repairing with material"
        );
        let weight = Fraction::new(1, total);
        repairman.state.set_fixed_score_pages(total);

        repairman.state.mark_as_assembling()?;
        let mut completed = true;
        for (name, content) in &material.contents {
            if repairman.is_interrupted() {
                completed = false;
                break;
            }
            let path = repairman.pager.path().to_path_buf();
            if !repairman.state.assemble_table(&path, name, &content.sql)? {
                repairman
                    .state
                    .increase_progress(weight.mul(&Fraction::new(content.pages.len() as u64, 1)));
                continue;
            }

            let pages: Vec<PageNo> = content.pages.keys().copied().collect();
            let mut delegate = TableDelegate::new(&mut repairman.state, &path, weight, Some(&content.pages));
            let finished = repairman
                .crawler
                .crawl_pages(&mut repairman.pager, &pages, &mut delegate);
            delegate.finish();
            repairman.check_critical()?;
            if !finished {
                completed = false;
                break;
            }

            if content.sequence > 0 {
                repairman.state.assemble_sequence(&path, name, content.sequence)?;
            }
            debug!(table = %name, pages = pages.len(), "Table restored");
        }
        if repairman.is_interrupted() {
            completed = false;
        }
        repairman.state.mark_as_assembled()?;

        Ok(repairman.finish(completed))
    }
}
