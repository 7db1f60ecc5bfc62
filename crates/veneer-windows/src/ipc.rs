//! The session's control endpoint: a named pipe carrying one JSON command
//! line and one JSON response line per connection.

use std::io::{BufRead, BufReader, Write};
use std::os::windows::io::FromRawHandle;

use serde::Serialize;
use serde::de::DeserializeOwned;
use veneer_core::PlatformResult;
use veneer_core::ipc::{Command, PIPE_NAME, Response};
use windows::Win32::Foundation::{
    DUPLICATE_SAME_ACCESS, DuplicateHandle, ERROR_PIPE_CONNECTED, HANDLE,
};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_SHARE_NONE, FlushFileBuffers, OPEN_EXISTING, PIPE_ACCESS_DUPLEX,
};
use windows::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe, PIPE_READMODE_BYTE, PIPE_TYPE_BYTE,
    PIPE_UNLIMITED_INSTANCES, PIPE_WAIT, WaitNamedPipeW,
};
use windows::Win32::System::Threading::GetCurrentProcess;
use windows::core::HSTRING;

use crate::handle::OwnedHandle;

const GENERIC_READ_WRITE: u32 = 0x80000000 | 0x40000000;

/// Settings replies carry the whole effective configuration.
const REPLY_BUFFER: u32 = 4096;
const COMMAND_BUFFER: u32 = 512;

/// One instance of the control endpoint, owned by the session.
pub struct ControlEndpoint {
    pipe: OwnedHandle,
}

impl ControlEndpoint {
    /// Opens a fresh instance at the well-known name.
    pub fn open() -> PlatformResult<Self> {
        Self::open_at(PIPE_NAME)
    }

    fn open_at(name: &str) -> PlatformResult<Self> {
        // SAFETY: creates a pipe instance from valid parameters; the
        // handle is checked before use.
        let pipe = unsafe {
            CreateNamedPipeW(
                &HSTRING::from(name),
                PIPE_ACCESS_DUPLEX,
                PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_WAIT,
                PIPE_UNLIMITED_INSTANCES,
                REPLY_BUFFER,
                COMMAND_BUFFER,
                0,
                None,
            )
        };
        if pipe.is_invalid() {
            return Err(format!("couldn't open the control endpoint {name}").into());
        }
        Ok(Self {
            pipe: OwnedHandle::new(pipe),
        })
    }

    /// Waits for a controller to connect and reads its command. A
    /// controller that connected before the wait counts as connected.
    pub fn next_command(&self) -> PlatformResult<Command> {
        // SAFETY: blocks on this instance until a client connects.
        if let Err(e) = unsafe { ConnectNamedPipe(self.pipe.raw(), None) }
            && e.code() != ERROR_PIPE_CONNECTED.to_hresult()
        {
            return Err(e.into());
        }
        read_line(self.pipe.raw())
    }

    /// Answers the connected controller and frees the instance.
    pub fn reply(&self, response: &Response) -> PlatformResult<()> {
        write_line(self.pipe.raw(), response)?;
        // SAFETY: waits for the client to drain the reply; disconnecting
        // first would discard it.
        unsafe {
            let _ = FlushFileBuffers(self.pipe.raw());
            DisconnectNamedPipe(self.pipe.raw())?;
        }
        Ok(())
    }
}

/// Sends `command` to the running session and waits for its answer.
pub fn send_command(command: &Command) -> PlatformResult<Response> {
    request_at(PIPE_NAME, command)
}

fn request_at(name: &str, command: &Command) -> PlatformResult<Response> {
    // SAFETY: opens the client end of an existing pipe.
    let pipe = unsafe {
        CreateFileW(
            &HSTRING::from(name),
            GENERIC_READ_WRITE,
            FILE_SHARE_NONE,
            None,
            OPEN_EXISTING,
            Default::default(),
            None,
        )
    }
    .map_err(|e| format!("no session answers at {name}: {e}"))?;
    let pipe = OwnedHandle::new(pipe);
    write_line(pipe.raw(), command)?;
    read_line(pipe.raw())
}

/// Whether a session's control endpoint has a free instance.
///
/// Waits 1 ms on the name, which doesn't consume a connection.
pub fn is_session_running() -> bool {
    // SAFETY: only queries the pipe name.
    unsafe { WaitNamedPipeW(&HSTRING::from(PIPE_NAME), 1).as_bool() }
}

fn write_line(pipe: HANDLE, value: &impl Serialize) -> PlatformResult<()> {
    let mut writer = as_file(pipe)?;
    writeln!(writer, "{}", serde_json::to_string(value)?)?;
    writer.flush()?;
    Ok(())
}

fn read_line<T: DeserializeOwned>(pipe: HANDLE) -> PlatformResult<T> {
    let mut line = String::new();
    BufReader::new(as_file(pipe)?).read_line(&mut line)?;
    Ok(serde_json::from_str(line.trim())?)
}

/// A `File` over a duplicate of `pipe`, so each side closes independently.
fn as_file(pipe: HANDLE) -> PlatformResult<std::fs::File> {
    let mut duplicate = HANDLE::default();
    // SAFETY: the duplicate is owned by the returned File.
    unsafe {
        DuplicateHandle(
            GetCurrentProcess(),
            pipe,
            GetCurrentProcess(),
            &mut duplicate,
            0,
            false,
            DUPLICATE_SAME_ACCESS,
        )?;
        Ok(std::fs::File::from_raw_handle(duplicate.0))
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn command_and_reply_cross_the_endpoint() {
        // Arrange
        let name = format!(r"\\.\pipe\veneer-test-{}", std::process::id());
        let endpoint = ControlEndpoint::open_at(&name).unwrap();
        let session = thread::spawn(move || {
            let command = endpoint.next_command().unwrap();
            endpoint.reply(&Response::with_pids(vec![7])).unwrap();
            command
        });

        // Act
        let response = request_at(&name, &Command::LaunchedPids).unwrap();

        // Assert
        assert_eq!(session.join().unwrap(), Command::LaunchedPids);
        assert_eq!(response.pids, Some(vec![7]));
    }

    #[test]
    fn request_without_a_session_names_the_endpoint() {
        // Act
        let error = request_at(r"\\.\pipe\veneer-test-absent", &Command::Status).unwrap_err();

        // Assert
        assert!(error.to_string().contains("no session answers"));
    }
}
