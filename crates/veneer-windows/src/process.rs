use std::mem;
use std::path::Path;
use std::thread;

use veneer_core::process::{ProcessHost, ProcessInfo, SharedPids};
use veneer_core::{LaunchError, LaunchResult};
use windows::Win32::Foundation::{
    ERROR_ACCESS_DENIED, ERROR_CANCELLED, ERROR_ELEVATION_REQUIRED, ERROR_FILE_NOT_FOUND,
    ERROR_PATH_NOT_FOUND, WAIT_TIMEOUT,
};
use windows::Win32::System::Com::{
    CLSCTX_LOCAL_SERVER, COINIT_APARTMENTTHREADED, CoCreateInstance, CoInitializeEx,
    CoUninitialize,
};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW,
    TH32CS_SNAPPROCESS,
};
use windows::Win32::System::Threading::{
    CreateProcessW, GetProcessId, OpenProcess, PROCESS_CREATION_FLAGS, PROCESS_INFORMATION,
    PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_SYNCHRONIZE, PROCESS_TERMINATE, STARTUPINFOW,
    TerminateProcess, WaitForSingleObject,
};
use windows::Win32::UI::Shell::{
    AO_NONE, ApplicationActivationManager, IApplicationActivationManager,
    SEE_MASK_NOCLOSEPROCESS, SHELLEXECUTEINFOW, ShellExecuteExW,
};
use windows::Win32::UI::WindowsAndMessaging::SW_SHOWNORMAL;
use windows::core::{HSTRING, PCWSTR, PWSTR, w};

use crate::handle::{OwnedHandle, from_wide, wide};

/// Checks whether a process with the given PID is still alive.
///
/// Uses `OpenProcess` with minimal access rights. If the handle can be
/// opened, the process exists.
pub fn is_process_alive(pid: u32) -> bool {
    // SAFETY: OpenProcess attempts to open an existing process.
    // PROCESS_QUERY_LIMITED_INFORMATION is the least-privilege access
    // right that still lets us confirm the process exists.
    let result = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) };
    result.map(OwnedHandle::new).is_ok()
}

/// Kills `pid`. Returns whether it was terminated.
pub fn terminate(pid: u32) -> bool {
    // SAFETY: the handle is closed by the guard; TerminateProcess only
    // needs PROCESS_TERMINATE.
    unsafe {
        let Ok(handle) = OpenProcess(PROCESS_TERMINATE, false, pid) else {
            return false;
        };
        let handle = OwnedHandle::new(handle);
        TerminateProcess(handle.raw(), 1).is_ok()
    }
}

fn launch_error(e: windows::core::Error, target: &str) -> LaunchError {
    let code = e.code();
    if code == ERROR_ELEVATION_REQUIRED.to_hresult() {
        LaunchError::ElevationRequired
    } else if code == ERROR_ACCESS_DENIED.to_hresult() {
        LaunchError::AccessDenied
    } else if code == ERROR_FILE_NOT_FOUND.to_hresult() || code == ERROR_PATH_NOT_FOUND.to_hresult()
    {
        LaunchError::NotFound(target.to_string())
    } else if code == ERROR_CANCELLED.to_hresult() {
        LaunchError::Other("cancelled by the user".into())
    } else {
        LaunchError::Other(e.message())
    }
}

/// Launches and inspects processes through the Win32 API.
#[derive(Debug, Default)]
pub struct Win32Processes {
    /// Process handles retained from launches, released on close.
    handles: Vec<OwnedHandle>,
}

impl Win32Processes {
    pub fn new() -> Self {
        Self::default()
    }

    fn shell_execute(&mut self, file: &str, args: &str, verb: PCWSTR) -> LaunchResult<Option<u32>> {
        let file_w = HSTRING::from(file);
        let args_w = HSTRING::from(args);
        let mut info = SHELLEXECUTEINFOW {
            cbSize: mem::size_of::<SHELLEXECUTEINFOW>() as u32,
            fMask: SEE_MASK_NOCLOSEPROCESS,
            lpVerb: verb,
            lpFile: PCWSTR(file_w.as_ptr()),
            lpParameters: PCWSTR(args_w.as_ptr()),
            nShow: SW_SHOWNORMAL.0,
            ..Default::default()
        };
        // SAFETY: the strings referenced by `info` outlive the call.
        unsafe { ShellExecuteExW(&mut info) }.map_err(|e| launch_error(e, file))?;

        if info.hProcess.is_invalid() {
            return Ok(None);
        }
        // SAFETY: hProcess was opened for us by the shell.
        let pid = unsafe { GetProcessId(info.hProcess) };
        self.handles.push(OwnedHandle::new(info.hProcess));
        Ok((pid != 0).then_some(pid))
    }
}

impl ProcessHost for Win32Processes {
    fn launch_native(&mut self, path: &str, args: &str, elevated: bool) -> LaunchResult<u32> {
        if elevated {
            return self
                .shell_execute(path, args, w!("runas"))?
                .ok_or_else(|| LaunchError::Other("elevated launch reported no process".into()));
        }

        // Children started through a hooked CreateProcessW get the host
        // platform's overlay injected into them.
        crate::unpatch::unpatch_launch_hooks();
        let mut command_line = wide(&format!("\"{path}\" {args}"));
        let application = HSTRING::from(path);
        let directory = Path::new(path)
            .parent()
            .map(|p| HSTRING::from(p.as_os_str()))
            .unwrap_or_default();
        let startup = STARTUPINFOW {
            cb: mem::size_of::<STARTUPINFOW>() as u32,
            ..Default::default()
        };
        let mut info = PROCESS_INFORMATION::default();

        // SAFETY: every pointer references a live local; handles are not
        // inherited by the child.
        unsafe {
            CreateProcessW(
                &application,
                Some(PWSTR(command_line.as_mut_ptr())),
                None,
                None,
                false,
                PROCESS_CREATION_FLAGS(0),
                None,
                if directory.is_empty() {
                    PCWSTR::null()
                } else {
                    PCWSTR(directory.as_ptr())
                },
                &startup,
                &mut info,
            )
        }
        .map_err(|e| launch_error(e, path))?;

        drop(OwnedHandle::new(info.hThread));
        self.handles.push(OwnedHandle::new(info.hProcess));
        Ok(info.dwProcessId)
    }

    fn open_url(&mut self, url: &str, args: &str, elevated: bool) -> LaunchResult<Option<u32>> {
        let verb = if elevated { w!("runas") } else { w!("open") };
        self.shell_execute(url, args, verb)
    }

    fn activate_package(&mut self, app_id: &str, args: &str, pids: SharedPids) -> LaunchResult<()> {
        let app_id = app_id.to_string();
        let args = args.to_string();

        // Activation blocks until the package is up; keep it off the
        // frame loop.
        thread::Builder::new()
            .name("package-activation".into())
            .spawn(move || match activate(&app_id, &args) {
                Ok(pid) => {
                    let name = snapshot()
                        .into_iter()
                        .find(|p| p.pid == pid)
                        .map(|p| p.name)
                        .unwrap_or_default();
                    pids.resolve_pending(pid, &name);
                }
                Err(e) => {
                    tracing::error!("Couldn't activate {app_id}: {e}");
                    pids.abandon_pending();
                }
            })
            .map_err(|e| LaunchError::ActivationFailed(e.to_string()))?;
        Ok(())
    }

    fn is_alive(&mut self, pid: u32) -> bool {
        // SAFETY: the handle is closed by the guard; a zero timeout never
        // blocks.
        unsafe {
            let Ok(handle) = OpenProcess(PROCESS_SYNCHRONIZE, false, pid) else {
                return false;
            };
            let handle = OwnedHandle::new(handle);
            WaitForSingleObject(handle.raw(), 0) == WAIT_TIMEOUT
        }
    }

    fn snapshot(&mut self) -> Vec<ProcessInfo> {
        snapshot()
    }

    fn release(&mut self) {
        self.handles.clear();
    }
}

fn activate(app_id: &str, args: &str) -> Result<u32, LaunchError> {
    // SAFETY: COM is initialized for this thread only and torn down
    // before returning.
    unsafe {
        CoInitializeEx(None, COINIT_APARTMENTTHREADED)
            .ok()
            .map_err(|e| LaunchError::ActivationFailed(e.message()))?;
        let result = CoCreateInstance::<_, IApplicationActivationManager>(
            &ApplicationActivationManager,
            None,
            CLSCTX_LOCAL_SERVER,
        )
        .and_then(|manager| {
            manager.ActivateApplication(&HSTRING::from(app_id), &HSTRING::from(args), AO_NONE)
        })
        .map_err(|e| LaunchError::ActivationFailed(e.message()));
        CoUninitialize();
        result
    }
}

/// Every process in the system.
fn snapshot() -> Vec<ProcessInfo> {
    let mut processes = Vec::new();
    // SAFETY: the snapshot handle is closed by the guard; the entry struct
    // carries its own size.
    unsafe {
        let Ok(snapshot) = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) else {
            tracing::warn!("Couldn't snapshot the process table");
            return processes;
        };
        let snapshot = OwnedHandle::new(snapshot);
        let mut entry = PROCESSENTRY32W {
            dwSize: mem::size_of::<PROCESSENTRY32W>() as u32,
            ..Default::default()
        };
        let mut more = Process32FirstW(snapshot.raw(), &mut entry).is_ok();
        while more {
            processes.push(ProcessInfo {
                pid: entry.th32ProcessID,
                parent_pid: entry.th32ParentProcessID,
                name: from_wide(&entry.szExeFile),
            });
            more = Process32NextW(snapshot.raw(), &mut entry).is_ok();
        }
    }
    processes
}
