use veneer_core::ipc::Command;
use veneer_core::pid;
use veneer_windows::{ipc, process};

pub fn execute() -> anyhow::Result<()> {
    if ipc::is_session_running() {
        match ipc::send_command(&Command::Status) {
            Ok(response) => println!(
                "Veneer is {}.",
                response.message.unwrap_or_else(|| "running".into())
            ),
            Err(_) => println!("Veneer is running."),
        }
        return Ok(());
    }

    // A stale PID file is left behind by a session that was killed.
    match pid::read_pid_file() {
        Some(pid) if process::is_process_alive(pid) => {
            println!("Veneer process exists (PID: {pid}) but is not responding.");
        }
        Some(_) => {
            pid::remove_pid_file();
            println!("Veneer is not running (cleaned up stale PID file).");
        }
        None => println!("Veneer is not running."),
    }
    Ok(())
}
