use veneer_core::ipc::{Command, Response, ResponseStatus};
use veneer_core::priority::ProcessPriority;
use veneer_windows::ipc;

fn ask(command: &Command) -> anyhow::Result<Response> {
    if !ipc::is_session_running() {
        anyhow::bail!("Veneer is not running.");
    }
    let response = ipc::send_command(command).map_err(|e| anyhow::anyhow!("{e}"))?;
    if response.status != ResponseStatus::Ok {
        anyhow::bail!(response.message.unwrap_or("unknown error".into()));
    }
    Ok(response)
}

pub fn settings() -> anyhow::Result<()> {
    let settings = ask(&Command::Settings)?.settings.unwrap_or_default();
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

pub fn pids() -> anyhow::Result<()> {
    for pid in ask(&Command::LaunchedPids)?.pids.unwrap_or_default() {
        println!("{pid}");
    }
    Ok(())
}

pub fn set_priority(priority: ProcessPriority) -> anyhow::Result<()> {
    let response = ask(&Command::SetPriority { priority })?;
    println!("{}", response.message.unwrap_or_default());
    Ok(())
}
