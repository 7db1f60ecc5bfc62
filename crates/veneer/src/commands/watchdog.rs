pub fn execute(pid: u32) {
    veneer_windows::watchdog::run(pid);
}
