use anyhow::Context;
use veneer_core::unhook;
use veneer_windows::unpatch;

pub fn execute() -> anyhow::Result<()> {
    let path = unhook::override_path().context("could not determine the data directory")?;
    let count = unpatch::record_original_bytes(&path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Recorded {count} prologue(s) to {}", path.display());
    Ok(())
}
