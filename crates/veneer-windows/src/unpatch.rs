//! Writes original prologues back over the host platform's hooks on
//! device enumeration and process creation.

use std::collections::HashMap;
use std::ffi::c_void;
use std::mem;
use std::path::Path;

use veneer_core::unhook::{
    self, HID_FUNCTIONS, LAUNCH_FUNCTIONS, OriginalBytes, RECORDED_LEN, SETUPAPI_FUNCTIONS,
};
use windows::Win32::Foundation::{ERROR_SUCCESS, HMODULE};
use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress, LoadLibraryW};
use windows::Win32::System::Registry::{HKEY_LOCAL_MACHINE, RRF_RT_REG_SZ, RegGetValueW};
use windows::core::{HSTRING, PCSTR, w};

use crate::handle::from_wide;
use crate::hook::write_code;

static DEVICE_MODULES: [(&str, &[&str]); 2] = [
    ("setupapi.dll", SETUPAPI_FUNCTIONS),
    ("hid.dll", HID_FUNCTIONS),
];

static LAUNCH_MODULE: (&str, &[&str]) = ("kernel32.dll", LAUNCH_FUNCTIONS);

/// Restores the device enumeration functions so every controller is
/// visible to this process. Returns how many were unpatched.
pub fn unpatch_device_hooks() -> usize {
    tracing::debug!("Unpatching host device enumeration hooks");
    let table = original_bytes();
    DEVICE_MODULES
        .iter()
        .map(|(module, functions)| unpatch_module(module, functions, &table))
        .sum()
}

/// Restores `CreateProcessW` so launched children aren't reported to the
/// host platform's overlay. Returns how many functions were unpatched.
pub fn unpatch_launch_hooks() -> usize {
    tracing::debug!("Unpatching host process creation hook");
    let (module, functions) = &LAUNCH_MODULE;
    unpatch_module(module, functions, &original_bytes())
}

/// Saves this process's prologues of every hooked function to `path`, for
/// sessions on this machine to write back. Must run outside the host
/// platform. Functions that already look hooked are left out.
pub fn record_original_bytes(path: &Path) -> std::io::Result<usize> {
    let mut records = HashMap::new();
    for (module, functions) in DEVICE_MODULES.iter().chain([&LAUNCH_MODULE]) {
        let Some(handle) = load(module) else {
            tracing::warn!("Couldn't load {module}");
            continue;
        };
        for function in functions.iter() {
            let Some(address) = export(handle, function) else {
                continue;
            };
            // SAFETY: an exported function has at least this many bytes of
            // mapped code.
            let code = unsafe { std::slice::from_raw_parts(address as *const u8, RECORDED_LEN) };
            if unhook::looks_hooked(code) {
                tracing::warn!("{function} is already hooked; not recording it");
                continue;
            }
            records.insert(function.to_string(), code.to_vec());
        }
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, unhook::serialize(&records))?;
    tracing::info!("Recorded {} prologue(s) to {}", records.len(), path.display());
    Ok(records.len())
}

fn original_bytes() -> OriginalBytes {
    OriginalBytes::load(unhook::override_path().as_deref(), windows_build())
}

fn unpatch_module(module: &str, functions: &[&str], table: &OriginalBytes) -> usize {
    // SAFETY: looks up an already loaded module by name.
    let Ok(handle) = (unsafe { GetModuleHandleW(&HSTRING::from(module)) }) else {
        tracing::trace!("{module} isn't loaded; nothing to unpatch");
        return 0;
    };
    functions
        .iter()
        .filter(|function| unpatch(handle, function, table))
        .count()
}

fn unpatch(handle: HMODULE, function: &str, table: &OriginalBytes) -> bool {
    let Some(address) = export(handle, function) else {
        tracing::error!("Couldn't find {function} to unpatch");
        return false;
    };
    let Some(original) = table.get(function) else {
        return false;
    };
    // SAFETY: the first bytes of an export are mapped code.
    let current = unsafe { std::slice::from_raw_parts(address as *const u8, original.len()) };
    if !unhook::looks_hooked(current) {
        tracing::debug!("{function} doesn't appear to be hooked");
        return false;
    }
    // SAFETY: overwrites the jump the hook placed over the prologue with
    // bytes of the same length.
    if unsafe { write_code(address, original) } {
        tracing::trace!("Unpatched {function}");
        true
    } else {
        tracing::error!("Couldn't unpatch {function}");
        false
    }
}

fn load(module: &str) -> Option<HMODULE> {
    let name = HSTRING::from(module);
    // SAFETY: the module name outlives both calls.
    unsafe { GetModuleHandleW(&name).or_else(|_| LoadLibraryW(&name)).ok() }
}

fn export(handle: HMODULE, function: &str) -> Option<usize> {
    let symbol = format!("{function}\0");
    // SAFETY: the NUL-terminated symbol outlives the call.
    unsafe { GetProcAddress(handle, PCSTR(symbol.as_ptr())) }.map(|f| f as usize)
}

/// `CurrentBuildNumber` from the registry, or 0 when unreadable.
fn windows_build() -> u32 {
    let mut buffer = [0u16; 32];
    let mut size = mem::size_of_val(&buffer) as u32;
    // SAFETY: buffer and size describe the same writable region.
    let result = unsafe {
        RegGetValueW(
            HKEY_LOCAL_MACHINE,
            w!(r"SOFTWARE\Microsoft\Windows NT\CurrentVersion"),
            w!("CurrentBuildNumber"),
            RRF_RT_REG_SZ,
            None,
            Some(buffer.as_mut_ptr() as *mut c_void),
            Some(&mut size),
        )
    };
    if result != ERROR_SUCCESS {
        return 0;
    }
    from_wide(&buffer).trim().parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_number_is_read() {
        // Act
        let build = windows_build();

        // Assert
        assert!(build >= 10240, "{build}");
    }

    #[test]
    fn recorded_prologues_read_back() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("unhook_bytes");

        // Act
        let recorded = record_original_bytes(&path).unwrap();

        // Assert
        let parsed = unhook::parse(&std::fs::read(&path).unwrap());
        assert!(recorded > 0);
        assert_eq!(parsed.len(), recorded);
        assert!(parsed.values().all(|bytes| bytes.len() == RECORDED_LEN));
    }

    #[test]
    fn unhooked_functions_are_left_alone() {
        // Arrange
        let table = OriginalBytes::builtin(windows_build());
        let handle = load("hid.dll").unwrap();

        // Act
        let unpatched = unpatch_module("hid.dll", HID_FUNCTIONS, &table);

        // Assert
        assert!(export(handle, "HidD_GetAttributes").is_some());
        assert_eq!(unpatched, 0);
    }
}
