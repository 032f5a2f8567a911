use crate::run_log::merge_run_logs;
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

pub async fn run(inputs: &[PathBuf], output: &Path) -> Result<()> {
    if inputs.is_empty() {
        return Err(anyhow!("merge-logs needs at least one input file"));
    }
    if inputs.iter().any(|input| input == output) {
        return Err(anyhow!(
            "Output {} is also an input; choose a different destination",
            output.display()
        ));
    }
    let written = merge_run_logs(inputs, output)?;
    println!("{} distinct runs written to {}", written, output.display());
    Ok(())
}
