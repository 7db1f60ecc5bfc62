use veneer_core::ipc::{Command, ResponseStatus};
use veneer_core::pid;
use veneer_windows::{ipc, process};

pub fn execute() -> anyhow::Result<()> {
    // Try graceful shutdown first; it runs the session's teardown.
    if ipc::is_session_running() {
        match ipc::send_command(&Command::Shutdown) {
            Ok(response) if response.status == ResponseStatus::Ok => {
                println!("Veneer stopped. {}", response.message.unwrap_or_default());
                return Ok(());
            }
            Ok(response) => {
                anyhow::bail!(response.message.unwrap_or("unknown error".into()));
            }
            Err(e) => eprintln!("Control endpoint failed: {e}"),
        }
    }

    // The pipe is gone but the process may still be alive. The watchdog
    // restores device visibility after a kill.
    match pid::read_pid_file() {
        Some(pid) if process::is_process_alive(pid) => {
            if !process::terminate(pid) {
                anyhow::bail!("Failed to kill process {pid}.");
            }
            pid::remove_pid_file();
            println!("Veneer stopped (killed PID {pid}).");
        }
        _ => println!("Veneer is not running."),
    }
    Ok(())
}
