//! Process-local interception of `GetForegroundWindow`.
//!
//! A function that is a `jmp [slot]` stub is hooked by swapping the
//! pointer in its slot. Any other function gets its first bytes
//! overwritten with an absolute jump to [`detour`], after checking that
//! the body is long enough to hold it. Removing the hook writes the saved
//! bytes back. The true value is read through the system call stub the
//! hooked function wraps, so neither the detour nor
//! [`true_foreground_window`] needs the hook lifted.

use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use veneer_core::focus::{FocusFlags, ForegroundInterceptor};
use veneer_core::locate::{Locate, ScanRegion};
use windows::Win32::Foundation::HWND;
use windows::Win32::System::Diagnostics::Debug::FlushInstructionCache;
use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress, LoadLibraryW};
use windows::Win32::System::Memory::{
    PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS, PAGE_READWRITE, VirtualProtect,
};
use windows::Win32::System::Threading::GetCurrentProcess;
use windows::Win32::UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowThreadProcessId};
use windows::core::{HSTRING, PCSTR};

/// `jmp qword ptr [rip+0]` followed by the destination.
const PATCH_LEN: usize = 14;

/// Relative jumps followed before giving up on finding a body.
const MAX_HOPS: usize = 4;

type ForegroundFn = unsafe extern "system" fn() -> HWND;

struct HookContext {
    flags: Arc<FocusFlags>,
}

static CONTEXT: RwLock<Option<HookContext>> = RwLock::new(None);

/// The unhooked system call stub behind `GetForegroundWindow`.
fn real_query() -> Option<ForegroundFn> {
    static REAL: OnceLock<Option<ForegroundFn>> = OnceLock::new();
    *REAL.get_or_init(|| {
        let real = ExportLocator::new("win32u.dll", "NtUserGetForegroundWindow")
            .locate()
            // SAFETY: the export has the signature of GetForegroundWindow.
            .map(|address| unsafe { std::mem::transmute::<usize, ForegroundFn>(address) });
        if real.is_none() {
            tracing::warn!("Real foreground query not found; the hook must be lifted to read it");
        }
        real
    })
}

/// The real foreground window, whether or not the hook is in place.
///
/// Falls back to `GetForegroundWindow` when the system call stub is
/// missing; [`ForegroundHook`] then asks to be lifted around reads.
pub fn true_foreground_window() -> HWND {
    // SAFETY: both take no arguments and return null when nothing is
    // focused.
    unsafe {
        match real_query() {
            Some(real) => real(),
            None => GetForegroundWindow(),
        }
    }
}

/// Replacement for the intercepted query. Runs on whichever thread asked.
unsafe extern "system" fn detour() -> HWND {
    let context = CONTEXT.read().unwrap_or_else(PoisonError::into_inner);
    let Some(context) = context.as_ref() else {
        return HWND::default();
    };
    let (real, pid) = match real_query() {
        Some(real) => {
            // SAFETY: the syscall stub takes no arguments.
            let window = unsafe { real() };
            let mut pid = 0u32;
            // SAFETY: writes the owning pid of `window`.
            unsafe { GetWindowThreadProcessId(window, Some(&mut pid)) };
            (window.0 as usize, (pid != 0).then_some(pid))
        }
        None => (0, None),
    };
    HWND(context.flags.answer(real, pid) as *mut c_void)
}

/// Encodes an absolute x86-64 jump to `destination`.
fn absolute_jump(destination: usize) -> [u8; PATCH_LEN] {
    let mut patch = [0u8; PATCH_LEN];
    patch[..6].copy_from_slice(&[0xFF, 0x25, 0x00, 0x00, 0x00, 0x00]);
    patch[6..].copy_from_slice(&(destination as u64).to_le_bytes());
    patch
}

/// Where and how to hook a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatchSite {
    /// Overwrite the function's first [`PATCH_LEN`] bytes.
    Inline(usize),
    /// The function is a `jmp [slot]` stub; swap the pointer in the slot.
    Slot(usize),
}

/// What a function's first bytes say about hooking it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prologue {
    Site(PatchSite),
    /// A relative jump stub; the body is at the destination.
    Jump(usize),
    /// A return or padding within the patch window.
    TooShort,
}

fn rel32(bytes: &[u8]) -> isize {
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as isize
}

/// Classifies the code at `address`, given its first bytes.
fn read_prologue(address: usize, code: &[u8; PATCH_LEN]) -> Prologue {
    let after = |len: usize, displacement: isize| address.wrapping_add(len).wrapping_add_signed(displacement);
    match code {
        [0xFF, 0x25, ..] => Prologue::Site(PatchSite::Slot(after(6, rel32(&code[2..])))),
        [0x48, 0xFF, 0x25, ..] => Prologue::Site(PatchSite::Slot(after(7, rel32(&code[3..])))),
        [0xE9, ..] => Prologue::Jump(after(5, rel32(&code[1..]))),
        [0xEB, offset, ..] => Prologue::Jump(after(2, *offset as i8 as isize)),
        _ if code[0] == 0xC3
            || code
                .windows(2)
                .any(|pair| matches!(pair, [0xCC, 0xCC] | [0xC3, 0xCC])) =>
        {
            Prologue::TooShort
        }
        _ => Prologue::Site(PatchSite::Inline(address)),
    }
}

/// Follows jump stubs from `address` to a site that can take the hook.
///
/// # Safety
/// `address` must point at mapped code, as must every jump it leads to.
unsafe fn resolve_site(mut address: usize) -> Option<PatchSite> {
    for _ in 0..MAX_HOPS {
        let mut code = [0u8; PATCH_LEN];
        // SAFETY: the caller guarantees mapped code at `address`.
        unsafe { std::ptr::copy_nonoverlapping(address as *const u8, code.as_mut_ptr(), PATCH_LEN) };
        match read_prologue(address, &code) {
            Prologue::Site(PatchSite::Slot(slot)) if slot % align_of::<usize>() != 0 => {
                tracing::error!("Jump slot at {slot:#x} is misaligned");
                return None;
            }
            Prologue::Site(site) => return Some(site),
            Prologue::Jump(next) => address = next,
            Prologue::TooShort => {
                tracing::error!("Function at {address:#x} is too short to patch");
                return None;
            }
        }
    }
    tracing::error!("Too many jumps from the foreground query");
    None
}

/// Overwrites code at `address`. Returns whether the write went through.
///
/// # Safety
/// `address` must point at `bytes.len()` bytes of mapped code that no
/// other thread is executing mid-instruction.
pub(crate) unsafe fn write_code(address: usize, bytes: &[u8]) -> bool {
    let target = address as *const c_void;
    let mut previous = PAGE_PROTECTION_FLAGS::default();
    unsafe {
        if VirtualProtect(target, bytes.len(), PAGE_EXECUTE_READWRITE, &mut previous).is_err() {
            return false;
        }
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());
        let mut ignored = PAGE_PROTECTION_FLAGS::default();
        let _ = VirtualProtect(target, bytes.len(), previous, &mut ignored);
        let _ = FlushInstructionCache(GetCurrentProcess(), Some(target), bytes.len());
    }
    true
}

/// Stores `value` into the pointer slot at `slot` in one aligned write, so
/// a concurrent caller jumps to either the old or the new target.
///
/// # Safety
/// `slot` must be an aligned, mapped pointer slot.
unsafe fn write_slot(slot: usize, value: usize) -> bool {
    let target = slot as *const c_void;
    let len = size_of::<usize>();
    let mut previous = PAGE_PROTECTION_FLAGS::default();
    unsafe {
        if VirtualProtect(target, len, PAGE_READWRITE, &mut previous).is_err() {
            return false;
        }
        AtomicUsize::from_ptr(slot as *mut usize).store(value, Ordering::SeqCst);
        let mut ignored = PAGE_PROTECTION_FLAGS::default();
        let _ = VirtualProtect(target, len, previous, &mut ignored);
    }
    true
}

/// Address of an exported function in a loaded (or loadable) module.
#[derive(Debug, Clone)]
pub struct ExportLocator {
    module: String,
    symbol: String,
}

impl ExportLocator {
    pub fn new(module: &str, symbol: &str) -> Self {
        Self {
            module: module.to_string(),
            symbol: symbol.to_string(),
        }
    }
}

impl Locate for ExportLocator {
    fn locate(&self) -> Option<usize> {
        let module = HSTRING::from(self.module.as_str());
        let symbol = format!("{}\0", self.symbol);
        // SAFETY: the module name and the NUL-terminated symbol outlive
        // the calls.
        unsafe {
            let handle = GetModuleHandleW(&module)
                .or_else(|_| LoadLibraryW(&module))
                .ok()?;
            GetProcAddress(handle, PCSTR(symbol.as_ptr())).map(|f| f as usize)
        }
    }
}

/// The mapped image of a loaded module.
#[derive(Debug, Clone, Copy)]
pub struct ModuleRegion {
    base: usize,
    size: usize,
}

impl ModuleRegion {
    /// `None` when the module isn't loaded.
    pub fn loaded(module: &str) -> Option<Self> {
        // SAFETY: reads the module's own PE headers, which stay mapped
        // while the module is loaded.
        unsafe {
            let handle = GetModuleHandleW(&HSTRING::from(module)).ok()?;
            let base = handle.0 as usize;
            let nt_offset = std::ptr::read_unaligned((base + 0x3C) as *const u32) as usize;
            // OptionalHeader.SizeOfImage sits at the same offset in PE32
            // and PE32+.
            let size = std::ptr::read_unaligned((base + nt_offset + 0x50) as *const u32) as usize;
            Some(Self { base, size })
        }
    }

    pub fn contains(&self, address: usize) -> bool {
        address >= self.base && address + PATCH_LEN <= self.base + self.size
    }
}

impl ScanRegion for ModuleRegion {
    fn base(&self) -> usize {
        self.base
    }

    fn bytes(&self) -> Option<&[u8]> {
        // SAFETY: the whole image is mapped while the module is loaded.
        Some(unsafe { std::slice::from_raw_parts(self.base as *const u8, self.size) })
    }
}

/// What `install` replaced.
#[derive(Debug, Clone, Copy)]
enum Saved {
    Code([u8; PATCH_LEN]),
    Pointer(usize),
}

/// Patches the foreground query of this process.
pub struct ForegroundHook {
    site: Option<PatchSite>,
    saved: Option<Saved>,
}

impl ForegroundHook {
    /// Publishes `flags` to the detour and resolves the patch site.
    pub fn new(flags: Arc<FocusFlags>, locator: &dyn Locate) -> Self {
        let real = real_query().map(|f| f as usize);
        *CONTEXT.write().unwrap_or_else(PoisonError::into_inner) = Some(HookContext { flags });

        let target = locator.locate().filter(|&address| {
            let inside = ModuleRegion::loaded("user32.dll").is_none_or(|m| m.contains(address));
            if !inside {
                tracing::error!("Foreground query located outside user32 at {address:#x}");
            }
            inside
        });
        // SAFETY: a located export is mapped code.
        let site = target
            .and_then(|address| unsafe { resolve_site(address) })
            .filter(|&site| {
                // Patching the stub the detour calls would make it call itself.
                let loops = real.is_some_and(|real| site == PatchSite::Inline(real));
                if loops {
                    tracing::error!("Foreground query resolves to the system call stub; not hooking it");
                }
                !loops
            });
        match site {
            Some(site) => tracing::debug!("Foreground query patch site {site:x?}"),
            None => tracing::error!("Couldn't locate the foreground query"),
        }
        Self { site, saved: None }
    }

    /// Hooks `user32!GetForegroundWindow`.
    pub fn for_user32(flags: Arc<FocusFlags>) -> Self {
        Self::new(flags, &ExportLocator::new("user32.dll", "GetForegroundWindow"))
    }
}

impl ForegroundInterceptor for ForegroundHook {
    fn install(&mut self) -> bool {
        if self.saved.is_some() {
            return true;
        }
        let Some(site) = self.site else {
            return false;
        };
        let detour = detour as usize;
        // SAFETY: `resolve_site` checked that an inline site has room for
        // the patch and that a slot is an aligned pointer.
        unsafe {
            match site {
                PatchSite::Inline(address) => {
                    let mut original = [0u8; PATCH_LEN];
                    std::ptr::copy_nonoverlapping(address as *const u8, original.as_mut_ptr(), PATCH_LEN);
                    if write_code(address, &absolute_jump(detour)) {
                        self.saved = Some(Saved::Code(original));
                    }
                }
                PatchSite::Slot(slot) => {
                    let original = AtomicUsize::from_ptr(slot as *mut usize).load(Ordering::SeqCst);
                    if write_slot(slot, detour) {
                        self.saved = Some(Saved::Pointer(original));
                    }
                }
            }
        }
        self.saved.is_some()
    }

    fn remove(&mut self) {
        let (Some(site), Some(saved)) = (self.site, self.saved) else {
            return;
        };
        // SAFETY: writes back what `install` replaced at the same site.
        let restored = unsafe {
            match (site, saved) {
                (PatchSite::Inline(address), Saved::Code(original)) => write_code(address, &original),
                (PatchSite::Slot(slot), Saved::Pointer(original)) => write_slot(slot, original),
                _ => false,
            }
        };
        if restored {
            self.saved = None;
        } else {
            tracing::error!("Couldn't restore the foreground query");
        }
    }

    fn is_installed(&self) -> bool {
        self.saved.is_some()
    }

    /// Only without the system call stub. Otherwise reads go through
    /// [`true_foreground_window`].
    fn lift_for_real_reads(&self) -> bool {
        real_query().is_none()
    }
}

impl Drop for ForegroundHook {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use veneer_core::locate::PatternLocator;
    use veneer_core::process::SharedPids;

    use super::*;

    fn padded(prefix: &[u8]) -> [u8; PATCH_LEN] {
        let mut code = [0x90; PATCH_LEN];
        code[..prefix.len()].copy_from_slice(prefix);
        code
    }

    #[test]
    fn jump_encodes_destination_little_endian() {
        // Act
        let patch = absolute_jump(0x1122_3344_5566_7788);

        // Assert
        assert_eq!(&patch[..6], &[0xFF, 0x25, 0, 0, 0, 0]);
        assert_eq!(&patch[6..], &[0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]);
    }

    #[test]
    fn indirect_jump_stub_is_hooked_through_its_slot() {
        // Arrange
        let code = padded(&[0xFF, 0x25, 0x10, 0x00, 0x00, 0x00, 0xCC, 0xCC]);

        // Act
        let prologue = read_prologue(0x1000, &code);

        // Assert
        assert_eq!(prologue, Prologue::Site(PatchSite::Slot(0x1016)));
    }

    #[test]
    fn relative_jumps_are_followed_backwards_too() {
        // Arrange
        let near = padded(&[0xE9, 0xFB, 0xFF, 0xFF, 0xFF]);
        let short = padded(&[0xEB, 0x10]);

        // Act / Assert
        assert_eq!(read_prologue(0x2000, &near), Prologue::Jump(0x2000));
        assert_eq!(read_prologue(0x2000, &short), Prologue::Jump(0x2012));
    }

    #[test]
    fn body_shorter_than_the_patch_is_refused() {
        // Arrange
        let returns_early = padded(&[0x33, 0xC0, 0xC3, 0xCC, 0xCC]);
        let bare_ret = padded(&[0xC3]);
        let full_body = padded(&[0x48, 0x83, 0xEC, 0x28, 0x48, 0x8B, 0x05]);

        // Act / Assert
        assert_eq!(read_prologue(0x3000, &returns_early), Prologue::TooShort);
        assert_eq!(read_prologue(0x3000, &bare_ret), Prologue::TooShort);
        assert_eq!(read_prologue(0x3000, &full_body), Prologue::Site(PatchSite::Inline(0x3000)));
    }

    #[test]
    fn user32_query_resolves_to_a_patchable_site() {
        // Arrange
        let address = ExportLocator::new("user32.dll", "GetForegroundWindow")
            .locate()
            .unwrap();

        // Act
        // SAFETY: a located export is mapped code.
        let site = unsafe { resolve_site(address) };

        // Assert
        assert!(site.is_some());
    }

    #[test]
    fn true_value_is_read_while_hooked() {
        // Arrange
        let flags = Arc::new(FocusFlags::new(0x1234, false, SharedPids::default()));
        let before = true_foreground_window();
        let mut hook = ForegroundHook::for_user32(flags);

        // Act
        let installed = hook.install();
        let during = true_foreground_window();
        // SAFETY: no arguments.
        let answered = unsafe { GetForegroundWindow() };
        hook.remove();

        // Assert
        assert!(installed);
        assert!(!hook.lift_for_real_reads());
        assert_eq!(during, before);
        assert_eq!(answered.0 as usize, 0x1234);
        assert!(!hook.is_installed());
    }

    #[test]
    fn export_is_found_inside_its_module_image() {
        // Arrange
        let region = ModuleRegion::loaded("kernel32.dll").unwrap();
        let address = ExportLocator::new("kernel32.dll", "GetCurrentProcessId")
            .locate()
            .unwrap();
        let prologue = region.bytes().unwrap()[address - region.base()..][..8].to_vec();

        // Act
        let found = PatternLocator::new(region, &prologue, "xxxxxxxx").locate();

        // Assert
        assert!(region.contains(address));
        assert!(found.is_some_and(|f| f <= address));
    }

    #[test]
    fn missing_export_is_none() {
        // Act / Assert
        assert_eq!(ExportLocator::new("kernel32.dll", "NoSuchExport").locate(), None);
    }
}
