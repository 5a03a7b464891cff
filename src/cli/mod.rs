// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for user interaction. clap parses the single
// `--config_path` flag; everything else lives in the YAML file.
// All work is delegated to Layer 2 (application).
//
// Reference: Rust Book §12 (CLI programs)

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::application::train_use_case::TrainUseCase;

#[derive(Parser, Debug)]
#[command(
    name = "face-trainer",
    version = "0.1.0",
    about = "Train a face embedding model (margin softmax, center or triplet loss) from a YAML config."
)]
pub struct Cli {
    /// Training configuration file
    #[arg(long = "config_path", default_value = "configs/config.yaml")]
    pub config_path: PathBuf,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let reports = TrainUseCase::new(&self.config_path).execute()?;

        match reports.last() {
            Some(last) => println!(
                "Training complete. {} epoch(s) run, latest checkpoint: {}",
                reports.len(),
                last.checkpoint.display()
            ),
            None => println!("Training complete. Nothing left to train."),
        }
        Ok(())
    }
}
