//! Original prologues of system functions the host platform hooks.
//!
//! The host platform's in-process overlay patches a jump over the start of
//! several device enumeration functions (to hide controllers from the
//! processes it injects into) and over `CreateProcessW` (to track
//! children). Writing the original bytes back restores them. The bytes
//! come from an override file when one was recorded on this machine, and
//! from built-in tables otherwise.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// First opcodes of `jmp`/`call` forms a hook starts with.
pub const JUMP_OPCODES: [u8; 5] = [0xE9, 0xE8, 0xEB, 0xEA, 0xFF];

/// Bytes recorded per function in the override file.
pub const RECORDED_LEN: usize = 8;

/// First Windows build with the newer setup API prologues.
pub const NEWER_SETUPAPI_BUILD: u32 = 22000;

/// Device enumeration exports of `setupapi.dll`.
pub const SETUPAPI_FUNCTIONS: &[&str] = &["SetupDiEnumDeviceInfo", "SetupDiGetClassDevsW"];

/// Device enumeration exports of `hid.dll`.
pub const HID_FUNCTIONS: &[&str] = &[
    "HidD_GetPreparsedData",
    "HidP_GetCaps",
    "HidD_GetAttributes",
    "HidD_GetProductString",
    "HidP_GetUsages",
    "HidP_GetData",
    "HidP_GetValueCaps",
    "HidP_GetUsageValue",
    "HidP_GetButtonCaps",
];

/// Process creation export of `kernel32.dll`.
pub const LAUNCH_FUNCTIONS: &[&str] = &["CreateProcessW"];

const BUILTIN: &[(&str, &[u8])] = &[
    ("SetupDiEnumDeviceInfo", &[0x48, 0x89, 0x5C, 0x24, 0x08]),
    ("SetupDiGetClassDevsW", &[0x48, 0x89, 0x5C, 0x24, 0x08]),
    ("HidD_GetPreparsedData", &[0x48, 0x89, 0x5C, 0x24, 0x18]),
    ("HidP_GetCaps", &[0x4C, 0x8B, 0xD1, 0x48, 0x85, 0xC9]),
    ("HidD_GetAttributes", &[0x40, 0x53, 0x48, 0x83, 0xEC]),
    ("HidD_GetProductString", &[0x48, 0x83, 0xEC, 0x48, 0x48]),
    ("HidP_GetUsages", &[0x4C, 0x89, 0x4C, 0x24, 0x20]),
    ("HidP_GetData", &[0x4C, 0x89, 0x44, 0x24, 0x18]),
    ("HidP_GetValueCaps", &[0x48, 0x83, 0xEC, 0x48, 0x49]),
    ("HidP_GetUsageValue", &[0x40, 0x53, 0x55, 0x56, 0x48]),
    ("HidP_GetButtonCaps", &[0x48, 0x83, 0xEC, 0x48, 0x49]),
    ("CreateProcessW", &[0x4C, 0x8B, 0xDC, 0x48, 0x83]),
];

/// Setup API prologues before [`NEWER_SETUPAPI_BUILD`].
const BUILTIN_OLDER_SETUPAPI: &[(&str, &[u8])] = &[
    ("SetupDiEnumDeviceInfo", &[0x40, 0x53, 0x56, 0x57, 0x41, 0x54, 0x41, 0x55]),
    ("SetupDiGetClassDevsW", &[0x48, 0x8B, 0xC4, 0x48, 0x89, 0x58, 0x08]),
];

/// Whether `code` starts the way a hook does.
pub fn looks_hooked(code: &[u8]) -> bool {
    code.first().is_some_and(|op| JUMP_OPCODES.contains(op))
}

/// Where recorded prologues are kept: `<data dir>/unhook_bytes`.
pub fn override_path() -> Option<PathBuf> {
    crate::config::data_dir().map(|d| d.join("unhook_bytes"))
}

/// Prologues to write back, keyed by function name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginalBytes {
    recorded: HashMap<String, Vec<u8>>,
    build: u32,
}

impl OriginalBytes {
    /// Built-in tables only, for Windows build `build`.
    pub fn builtin(build: u32) -> Self {
        Self {
            recorded: HashMap::new(),
            build,
        }
    }

    /// Built-in tables plus whatever `path` holds. A missing or unreadable
    /// file leaves only the built-ins.
    pub fn load(path: Option<&Path>, build: u32) -> Self {
        let recorded = match path.map(std::fs::read) {
            Some(Ok(bytes)) => parse(&bytes),
            Some(Err(e)) if e.kind() != std::io::ErrorKind::NotFound => {
                tracing::warn!("Couldn't read recorded prologues: {e}");
                HashMap::new()
            }
            _ => HashMap::new(),
        };
        Self { recorded, build }
    }

    /// Recorded bytes win over the built-in tables.
    pub fn get(&self, function: &str) -> Option<&[u8]> {
        if let Some(bytes) = self.recorded.get(function) {
            tracing::trace!("Using recorded prologue for {function}");
            return Some(bytes.as_slice());
        }
        let older = (self.build != 0 && self.build < NEWER_SETUPAPI_BUILD)
            .then_some(BUILTIN_OLDER_SETUPAPI)
            .into_iter()
            .flatten();
        older
            .chain(BUILTIN)
            .find(|(name, _)| *name == function)
            .map(|(_, bytes)| *bytes)
    }
}

/// Reads `name:<8 raw bytes>\n` records. A truncated tail is dropped.
pub fn parse(data: &[u8]) -> HashMap<String, Vec<u8>> {
    let mut records = HashMap::new();
    let mut rest = data;
    while let Some(colon) = rest.iter().position(|&b| b == b':') {
        let name = String::from_utf8_lossy(&rest[..colon]).trim().to_string();
        let body = &rest[colon + 1..];
        if body.len() < RECORDED_LEN {
            break;
        }
        if !name.is_empty() {
            records.insert(name, body[..RECORDED_LEN].to_vec());
        }
        rest = body.get(RECORDED_LEN + 1..).unwrap_or_default();
    }
    records
}

/// Writes records in the form [`parse`] reads. Names are sorted.
pub fn serialize(records: &HashMap<String, Vec<u8>>) -> Vec<u8> {
    let mut names: Vec<_> = records.keys().collect();
    names.sort();
    let mut out = Vec::new();
    for name in names {
        let bytes = &records[name];
        if bytes.len() != RECORDED_LEN {
            continue;
        }
        out.extend_from_slice(name.as_bytes());
        out.push(b':');
        out.extend_from_slice(bytes);
        out.push(b'\n');
    }
    out
}
