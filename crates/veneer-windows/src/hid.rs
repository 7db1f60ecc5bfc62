//! HID device enumeration for the device panel and the deny-list.

use std::ffi::c_void;
use std::mem;
use std::path::PathBuf;

use veneer_core::device::multi_sz;
use veneer_core::device::{DeviceVisibilityEntry, HOST_EXECUTABLES, HidEnumerator};
use windows::Win32::Devices::DeviceAndDriverInstallation::{
    CM_GET_DEVICE_INTERFACE_LIST_PRESENT, CM_Get_DevNode_PropertyW,
    CM_Get_Device_Interface_List_SizeW, CM_Get_Device_Interface_ListW,
    CM_Get_Device_Interface_PropertyW, CM_Get_Parent, CM_LOCATE_DEVNODE_PHANTOM,
    CM_Locate_DevNodeW, CR_SUCCESS,
};
use windows::Win32::Devices::HumanInterfaceDevice::{
    HIDD_ATTRIBUTES, HIDP_CAPS, HIDP_STATUS_SUCCESS, HidD_FreePreparsedData, HidD_GetAttributes,
    HidD_GetHidGuid, HidD_GetPreparsedData, HidD_GetProductString, HidP_GetCaps,
    PHIDP_PREPARSED_DATA,
};
use windows::Win32::Devices::Properties::{
    DEVPKEY_Device_ContainerId, DEVPKEY_Device_InstanceId, DEVPROPTYPE,
};
use windows::Win32::Foundation::{DEVPROPKEY, ERROR_SUCCESS};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::Registry::{HKEY_CURRENT_USER, RRF_RT_REG_SZ, RegGetValueW};
use windows::core::{GUID, HSTRING, PCWSTR, w};

use crate::handle::{OwnedHandle, from_wide, wide};

/// Present HID interfaces, described through the HID class driver and the
/// configuration manager.
#[derive(Debug, Default)]
pub struct HidDevices;

impl HidEnumerator for HidDevices {
    /// Unpatches the host platform's enumeration hooks first; otherwise
    /// controllers it hides from injected processes are missing.
    fn devices(&mut self) -> Vec<DeviceVisibilityEntry> {
        crate::unpatch::unpatch_device_hooks();
        interface_paths()
            .iter()
            .filter_map(|path| describe(path))
            .collect()
    }

    fn host_executables(&mut self) -> Vec<String> {
        let Some(dir) = steam_dir() else {
            tracing::warn!("Couldn't find the host platform's install directory");
            return Vec::new();
        };
        HOST_EXECUTABLES
            .iter()
            .map(|exe| dir.join(exe).to_string_lossy().replace('/', "\\"))
            .collect()
    }
}

fn interface_paths() -> Vec<String> {
    // SAFETY: returns the HID interface class GUID.
    let guid = unsafe { HidD_GetHidGuid() };
    let mut len = 0u32;

    // SAFETY: the size query and the list query get a matching buffer.
    unsafe {
        if CM_Get_Device_Interface_List_SizeW(
            &mut len,
            &guid,
            PCWSTR::null(),
            CM_GET_DEVICE_INTERFACE_LIST_PRESENT,
        ) != CR_SUCCESS
        {
            tracing::error!("Couldn't size the HID interface list");
            return Vec::new();
        }
        let mut buffer = vec![0u16; len as usize];
        if CM_Get_Device_Interface_ListW(
            &guid,
            PCWSTR::null(),
            &mut buffer,
            CM_GET_DEVICE_INTERFACE_LIST_PRESENT,
        ) != CR_SUCCESS
        {
            tracing::error!("Couldn't list HID interfaces");
            return Vec::new();
        }
        multi_sz::decode(&buffer)
    }
}

fn describe(interface: &str) -> Option<DeviceVisibilityEntry> {
    let path = HSTRING::from(interface);
    // SAFETY: zero-access open; only attribute queries follow.
    let handle = unsafe {
        CreateFileW(
            &path,
            0,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            None,
            OPEN_EXISTING,
            FILE_FLAGS_AND_ATTRIBUTES(0),
            None,
        )
    };
    // Exclusive, hidden or unplugged devices can't be opened. Skip them.
    let handle = OwnedHandle::new(handle.ok()?);

    let mut attributes = HIDD_ATTRIBUTES {
        Size: mem::size_of::<HIDD_ATTRIBUTES>() as u32,
        ..Default::default()
    };
    let mut caps = HIDP_CAPS::default();
    let mut name = [0u16; 127];

    // SAFETY: every out-parameter is a live local; the preparsed data is
    // freed before leaving the block.
    unsafe {
        if !HidD_GetAttributes(handle.raw(), &mut attributes) {
            tracing::debug!("Couldn't read HID attributes of {interface}");
            return None;
        }
        let mut preparsed = PHIDP_PREPARSED_DATA::default();
        if !HidD_GetPreparsedData(handle.raw(), &mut preparsed) {
            tracing::debug!("Couldn't read HID preparsed data of {interface}");
            return None;
        }
        let status = HidP_GetCaps(preparsed, &mut caps);
        let _ = HidD_FreePreparsedData(preparsed);
        if status != HIDP_STATUS_SUCCESS {
            return None;
        }
        let _ = HidD_GetProductString(
            handle.raw(),
            name.as_mut_ptr() as *mut c_void,
            mem::size_of_val(&name) as u32,
        );
    }

    let instance_path = interface_string(&path, &DEVPKEY_Device_InstanceId).unwrap_or_default();
    let container_id = container_id(&instance_path);
    let container_path = container_id
        .map(|id| base_container_path(&instance_path, id))
        .unwrap_or_default();

    Some(DeviceVisibilityEntry {
        name: from_wide(&name),
        instance_path,
        container_path,
        container_id: container_id.map(|id| format!("{id:?}")).unwrap_or_default(),
        vendor_id: attributes.VendorID,
        product_id: attributes.ProductID,
        usage_page: caps.UsagePage,
        usage: caps.Usage,
        hidden: false,
    })
}

fn interface_string(interface: &HSTRING, key: &DEVPROPKEY) -> Option<String> {
    let mut buffer = [0u16; 512];
    let mut size = mem::size_of_val(&buffer) as u32;
    let mut kind = DEVPROPTYPE::default();
    // SAFETY: buffer and size describe the same writable region.
    let result = unsafe {
        CM_Get_Device_Interface_PropertyW(
            interface,
            key,
            &mut kind,
            Some(buffer.as_mut_ptr() as *mut u8),
            &mut size,
            0,
        )
    };
    (result == CR_SUCCESS).then(|| from_wide(&buffer))
}

fn devnode(instance_path: &str) -> Option<u32> {
    if instance_path.is_empty() {
        return None;
    }
    let id = wide(instance_path);
    let mut node = 0u32;
    // SAFETY: `id` is NUL-terminated and outlives the call.
    let result =
        unsafe { CM_Locate_DevNodeW(&mut node, PCWSTR(id.as_ptr()), CM_LOCATE_DEVNODE_PHANTOM) };
    (result == CR_SUCCESS).then_some(node)
}

fn node_property(node: u32, key: &DEVPROPKEY, buffer: &mut [u8]) -> bool {
    let mut size = buffer.len() as u32;
    let mut kind = DEVPROPTYPE::default();
    // SAFETY: buffer and size describe the same writable region.
    let result = unsafe {
        CM_Get_DevNode_PropertyW(node, key, &mut kind, Some(buffer.as_mut_ptr()), &mut size, 0)
    };
    result == CR_SUCCESS
}

fn node_container(node: u32) -> Option<GUID> {
    let mut id = GUID::zeroed();
    let found = {
        // SAFETY: GUID is plain data, exactly the size of the property.
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(&mut id as *mut GUID as *mut u8, mem::size_of::<GUID>())
        };
        node_property(node, &DEVPKEY_Device_ContainerId, bytes)
    };
    found.then_some(id)
}

/// Container of devices built into the machine.
const SYSTEM_CONTAINER: GUID = GUID::from_u128(0x00000000_0000_0000_ffff_ffffffffffff);

fn container_id(instance_path: &str) -> Option<GUID> {
    node_container(devnode(instance_path)?)
        .filter(|id| *id != GUID::zeroed() && *id != SYSTEM_CONTAINER)
}

/// Walks up the device tree while the parent shares the container; the
/// topmost such ancestor is the physical device.
fn base_container_path(instance_path: &str, container: GUID) -> String {
    let Some(mut node) = devnode(instance_path) else {
        return String::new();
    };
    let mut base = instance_path.to_string();
    loop {
        let mut parent = 0u32;
        // SAFETY: writes the parent devnode of a located node.
        if unsafe { CM_Get_Parent(&mut parent, node, 0) } != CR_SUCCESS {
            return base;
        }
        if node_container(parent) != Some(container) {
            return base;
        }
        let mut bytes = [0u8; 1024];
        if !node_property(parent, &DEVPKEY_Device_InstanceId, &mut bytes) {
            return base;
        }
        let chars: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        base = from_wide(&chars);
        node = parent;
    }
}

/// The host platform's install directory, from its registry entry.
fn steam_dir() -> Option<PathBuf> {
    let mut buffer = [0u16; 512];
    let mut size = mem::size_of_val(&buffer) as u32;
    // SAFETY: buffer and size describe the same writable region.
    let result = unsafe {
        RegGetValueW(
            HKEY_CURRENT_USER,
            w!(r"Software\Valve\Steam"),
            w!("SteamPath"),
            RRF_RT_REG_SZ,
            None,
            Some(buffer.as_mut_ptr() as *mut c_void),
            Some(&mut size),
        )
    };
    if result != ERROR_SUCCESS {
        return None;
    }
    let path = from_wide(&buffer);
    (!path.is_empty()).then(|| PathBuf::from(path))
}
