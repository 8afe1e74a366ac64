//! Registry access for the user search path and the runtime probe.

use std::ffi::c_void;

use windows::core::w;
use windows::Win32::Foundation::{ERROR_FILE_NOT_FOUND, LPARAM, WPARAM};
use windows::Win32::System::Registry::{
    RegGetValueW, RegSetKeyValueW, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, REG_EXPAND_SZ,
    REG_SZ, REG_VALUE_TYPE, RRF_NOEXPAND, RRF_RT_REG_DWORD, RRF_RT_REG_EXPAND_SZ, RRF_RT_REG_SZ,
    RRF_SUBKEY_WOW6464KEY,
};
use windows::Win32::UI::WindowsAndMessaging::{
    SendMessageTimeoutW, HWND_BROADCAST, SMTO_ABORTIFHUNG, WM_SETTINGCHANGE,
};

/// Read `HKCU\Environment\Path` without expanding it.
///
/// Returns the value and whether it is `REG_EXPAND_SZ`; `None` when unset.
pub(crate) fn read_user_path() -> Result<Option<(String, bool)>, String> {
    let flags = RRF_RT_REG_SZ | RRF_RT_REG_EXPAND_SZ | RRF_NOEXPAND;
    let mut kind = REG_VALUE_TYPE::default();
    let mut size: u32 = 0;

    let status = unsafe {
        RegGetValueW(
            HKEY_CURRENT_USER,
            w!("Environment"),
            w!("Path"),
            flags,
            Some(&mut kind as *mut REG_VALUE_TYPE),
            None,
            Some(&mut size as *mut u32),
        )
    };
    if status == ERROR_FILE_NOT_FOUND {
        return Ok(None);
    }
    status
        .ok()
        .map_err(|e| format!("cannot read user Path: {e}"))?;

    let mut buf = vec![0u16; (size as usize).div_ceil(2)];
    let status = unsafe {
        RegGetValueW(
            HKEY_CURRENT_USER,
            w!("Environment"),
            w!("Path"),
            flags,
            Some(&mut kind as *mut REG_VALUE_TYPE),
            Some(buf.as_mut_ptr() as *mut c_void),
            Some(&mut size as *mut u32),
        )
    };
    status
        .ok()
        .map_err(|e| format!("cannot read user Path: {e}"))?;

    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    Ok(Some((String::from_utf16_lossy(&buf[..len]), kind == REG_EXPAND_SZ)))
}

pub(crate) fn write_user_path(value: &str, expandable: bool) -> Result<(), String> {
    let wide: Vec<u16> = value.encode_utf16().chain(std::iter::once(0)).collect();
    let kind = if expandable { REG_EXPAND_SZ } else { REG_SZ };
    unsafe {
        RegSetKeyValueW(
            HKEY_CURRENT_USER,
            w!("Environment"),
            w!("Path"),
            kind.0,
            Some(wide.as_ptr() as *const c_void),
            (wide.len() * 2) as u32,
        )
    }
    .ok()
    .map_err(|e| format!("cannot write user Path: {e}"))
}

/// Tell running shells and Explorer that the environment changed.
pub(crate) fn broadcast_environment_change() {
    unsafe {
        SendMessageTimeoutW(
            HWND_BROADCAST,
            WM_SETTINGCHANGE,
            WPARAM(0),
            LPARAM(w!("Environment").as_ptr() as isize),
            SMTO_ABORTIFHUNG,
            5000,
            None,
        );
    }
}

/// Read a `REG_DWORD` under `HKLM` from the 64-bit view.
pub(crate) fn read_machine_dword(subkey: &str, value: &str) -> Option<u32> {
    let subkey = windows::core::HSTRING::from(subkey);
    let value = windows::core::HSTRING::from(value);
    let mut data: u32 = 0;
    let mut size = std::mem::size_of::<u32>() as u32;
    let status = unsafe {
        RegGetValueW(
            HKEY_LOCAL_MACHINE,
            &subkey,
            &value,
            RRF_RT_REG_DWORD | RRF_SUBKEY_WOW6464KEY,
            None,
            Some(&mut data as *mut u32 as *mut c_void),
            Some(&mut size as *mut u32),
        )
    };
    status.ok().ok().map(|()| data)
}
