//! The HidHide filter driver's control device.

use std::ffi::c_void;

use veneer_core::device::FilterDriver;
use veneer_core::device::multi_sz;
use veneer_core::{DriverError, DriverResult};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_GENERIC_READ, FILE_SHARE_DELETE, FILE_SHARE_READ,
    FILE_SHARE_WRITE, OPEN_EXISTING, QueryDosDeviceW,
};
use windows::Win32::System::IO::DeviceIoControl;
use windows::core::{HSTRING, w};

use crate::handle::OwnedHandle;

const DEVICE_TYPE: u32 = 32769;
const METHOD_BUFFERED: u32 = 0;
const FILE_READ_DATA: u32 = 1;

const fn ctl_code(function: u32) -> u32 {
    (DEVICE_TYPE << 16) | (FILE_READ_DATA << 14) | (function << 2) | METHOD_BUFFERED
}

const GET_WHITELIST: u32 = ctl_code(2048);
const SET_WHITELIST: u32 = ctl_code(2049);
const GET_BLACKLIST: u32 = ctl_code(2050);
const SET_BLACKLIST: u32 = ctl_code(2051);
const GET_ACTIVE: u32 = ctl_code(2052);
const SET_ACTIVE: u32 = ctl_code(2053);

#[derive(Debug, Default)]
pub struct HidHide {
    handle: Option<OwnedHandle>,
}

impl HidHide {
    pub fn new() -> Self {
        Self::default()
    }

    fn device(&self, code: u32) -> DriverResult<&OwnedHandle> {
        self.handle.as_ref().ok_or_else(|| DriverError::RequestFailed {
            code,
            reason: "control device is not open".into(),
        })
    }

    fn control(&self, code: u32, input: Option<&[u8]>, output: Option<&mut [u8]>) -> DriverResult<u32> {
        let device = self.device(code)?;
        let (in_ptr, in_len) = match input {
            Some(bytes) => (Some(bytes.as_ptr() as *const c_void), bytes.len() as u32),
            None => (None, 0),
        };
        let (out_ptr, out_len) = match output {
            Some(bytes) => (Some(bytes.as_mut_ptr() as *mut c_void), bytes.len() as u32),
            None => (None, 0),
        };
        let mut returned = 0u32;

        // SAFETY: the buffers outlive the synchronous call and their
        // lengths are passed alongside.
        unsafe {
            DeviceIoControl(
                device.raw(),
                code,
                in_ptr,
                in_len,
                out_ptr,
                out_len,
                Some(&mut returned),
                None,
            )
        }
        .map_err(|e| DriverError::RequestFailed {
            code,
            reason: e.message(),
        })?;
        Ok(returned)
    }

    fn get_list(&self, code: u32) -> DriverResult<Vec<String>> {
        let needed = self.control(code, None, None)? as usize;
        if needed == 0 {
            return Ok(Vec::new());
        }
        let mut bytes = vec![0u8; needed];
        let returned = self.control(code, None, Some(&mut bytes))? as usize;
        let chars: Vec<u16> = bytes[..returned.min(needed)]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Ok(multi_sz::decode(&chars))
    }

    fn set_list(&self, code: u32, list: &[String]) -> DriverResult<()> {
        let bytes: Vec<u8> = multi_sz::encode(list)
            .into_iter()
            .flat_map(u16::to_le_bytes)
            .collect();
        self.control(code, Some(&bytes), None).map(|_| ())
    }
}

impl FilterDriver for HidHide {
    fn open(&mut self) -> DriverResult<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        // SAFETY: opens the driver's control device; the handle is owned
        // by the returned guard.
        let handle = unsafe {
            CreateFileW(
                w!(r"\\.\HidHide"),
                FILE_GENERIC_READ.0,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                None,
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL,
                None,
            )
        }
        .map_err(|e| DriverError::OpenFailed(e.message()))?;
        self.handle = Some(OwnedHandle::new(handle));
        Ok(())
    }

    fn close(&mut self) {
        self.handle = None;
    }

    fn allow_list(&mut self) -> DriverResult<Vec<String>> {
        self.get_list(GET_WHITELIST)
    }

    fn set_allow_list(&mut self, list: &[String]) -> DriverResult<()> {
        self.set_list(SET_WHITELIST, list)
    }

    fn deny_list(&mut self) -> DriverResult<Vec<String>> {
        self.get_list(GET_BLACKLIST)
    }

    fn set_deny_list(&mut self, list: &[String]) -> DriverResult<()> {
        self.set_list(SET_BLACKLIST, list)
    }

    fn active(&mut self) -> DriverResult<bool> {
        let mut state = [0u8; 1];
        self.control(GET_ACTIVE, None, Some(&mut state))?;
        Ok(state[0] != 0)
    }

    fn set_active(&mut self, active: bool) -> DriverResult<()> {
        self.control(SET_ACTIVE, Some(&[u8::from(active)]), None)
            .map(|_| ())
    }

    /// `C:\dir\app.exe` becomes `\Device\HarddiskVolumeN\dir\app.exe`.
    fn driver_path(&self, path: &str) -> Option<String> {
        let path = path.replace('/', "\\");
        let (volume, rest) = path.split_once(":\\")?;
        if volume.is_empty() {
            return None;
        }
        let device = dos_device(&format!("{volume}:"))?;
        Some(format!("{device}\\{rest}"))
    }
}

/// NT device path behind a drive letter.
fn dos_device(volume: &str) -> Option<String> {
    let mut buffer = [0u16; 1024];
    // SAFETY: QueryDosDeviceW writes at most buffer.len() characters.
    let written = unsafe { QueryDosDeviceW(&HSTRING::from(volume), Some(&mut buffer)) };
    if written == 0 {
        tracing::warn!("Couldn't resolve the device path of {volume}");
        return None;
    }
    multi_sz::decode(&buffer[..written as usize]).into_iter().next()
}
