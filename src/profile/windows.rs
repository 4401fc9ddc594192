use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr;

use ::windows::core::{PCWSTR, PWSTR};
use ::windows::Win32::Foundation::{LocalFree, HLOCAL};
use ::windows::Win32::NetworkManagement::NetManagement::{
    NetApiBufferFree, NetUserEnum, FILTER_NORMAL_ACCOUNT, MAX_PREFERRED_LENGTH, USER_INFO_0,
};
use ::windows::Win32::Security::Authorization::ConvertSidToStringSidW;
use ::windows::Win32::Security::{LookupAccountNameW, PSID, SID_NAME_USE};
use ::windows::Win32::System::RemoteDesktop::{
    WTSActive, WTSEnumerateSessionsW, WTSFreeMemory, WTSQuerySessionInformationW, WTSUserName,
    WTS_CURRENT_SERVER_HANDLE, WTS_SESSION_INFOW,
};
use winreg::enums::HKEY_LOCAL_MACHINE;
use winreg::RegKey;

use crate::error::{Result, VaultError};
use crate::profile::AccountProbe;
use crate::util::paths::default_users_root;

const PROFILE_LIST: &str = "SOFTWARE\\Microsoft\\Windows NT\\CurrentVersion\\ProfileList";
const NERR_SUCCESS: u32 = 0;
const ERROR_MORE_DATA: u32 = 234;

/// SAM, LSA, WTS and registry backed probe.
#[derive(Debug, Clone)]
pub struct WindowsProbe {
    users_root: PathBuf,
}

impl WindowsProbe {
    pub fn new(users_root: &Path) -> Self {
        Self {
            users_root: users_root.to_path_buf(),
        }
    }
}

impl Default for WindowsProbe {
    fn default() -> Self {
        Self::new(&default_users_root())
    }
}

impl AccountProbe for WindowsProbe {
    fn account_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut resume: u32 = 0;
        loop {
            let mut buffer: *mut u8 = ptr::null_mut();
            let mut read: u32 = 0;
            let mut total: u32 = 0;
            let status = unsafe {
                NetUserEnum(
                    PCWSTR::null(),
                    0,
                    FILTER_NORMAL_ACCOUNT,
                    &mut buffer,
                    MAX_PREFERRED_LENGTH,
                    &mut read,
                    &mut total,
                    Some(&mut resume),
                )
            };
            if status != NERR_SUCCESS && status != ERROR_MORE_DATA {
                return Err(VaultError::message(format!(
                    "account enumeration failed: status {}",
                    status
                )));
            }
            if !buffer.is_null() {
                let entries =
                    unsafe { std::slice::from_raw_parts(buffer as *const USER_INFO_0, read as usize) };
                for entry in entries {
                    if let Ok(name) = unsafe { entry.usri0_name.to_string() } {
                        names.push(name);
                    }
                }
                unsafe {
                    let _ = NetApiBufferFree(Some(buffer as *const c_void));
                }
            }
            if status != ERROR_MORE_DATA {
                break;
            }
        }
        Ok(names)
    }

    fn lookup_sid(&self, username: &str) -> Result<String> {
        let wide: Vec<u16> = username.encode_utf16().chain(Some(0)).collect();
        let mut sid_len: u32 = 0;
        let mut domain_len: u32 = 0;
        let mut use_kind = SID_NAME_USE::default();
        unsafe {
            // first call sizes the buffers
            let _ = LookupAccountNameW(
                PCWSTR::null(),
                PCWSTR(wide.as_ptr()),
                PSID::default(),
                &mut sid_len,
                PWSTR::null(),
                &mut domain_len,
                &mut use_kind,
            );
        }
        if sid_len == 0 {
            return Ok(String::new());
        }
        let mut sid_buf = vec![0u8; sid_len as usize];
        let mut domain_buf = vec![0u16; domain_len.max(1) as usize];
        let psid = PSID(sid_buf.as_mut_ptr() as *mut c_void);
        unsafe {
            LookupAccountNameW(
                PCWSTR::null(),
                PCWSTR(wide.as_ptr()),
                psid,
                &mut sid_len,
                PWSTR(domain_buf.as_mut_ptr()),
                &mut domain_len,
                &mut use_kind,
            )
            .map_err(|e| VaultError::message(format!("lookup {}: {}", username, e.message())))?;
            let mut text = PWSTR::null();
            ConvertSidToStringSidW(psid, &mut text)
                .map_err(|e| VaultError::message(format!("sid {}: {}", username, e.message())))?;
            let sid = text.to_string().unwrap_or_default();
            let _ = LocalFree(HLOCAL(text.0 as *mut c_void));
            Ok(sid)
        }
    }

    fn registry_profile_root(&self, sid: &str) -> Option<PathBuf> {
        let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
        let key = hklm.open_subkey(format!("{}\\{}", PROFILE_LIST, sid)).ok()?;
        let path: String = key.get_value("ProfileImagePath").ok()?;
        Some(PathBuf::from(expand_system_root(&path)))
    }

    fn users_root(&self) -> PathBuf {
        self.users_root.clone()
    }

    fn active_session_users(&self) -> Result<Vec<String>> {
        let mut sessions: *mut WTS_SESSION_INFOW = ptr::null_mut();
        let mut count: u32 = 0;
        unsafe {
            WTSEnumerateSessionsW(WTS_CURRENT_SERVER_HANDLE, 0, 1, &mut sessions, &mut count)
                .map_err(|e| VaultError::message(format!("enumerate sessions: {}", e.message())))?;
        }
        let mut users = Vec::new();
        let list = unsafe { std::slice::from_raw_parts(sessions, count as usize) };
        for session in list {
            if session.State != WTSActive {
                continue;
            }
            let mut name = PWSTR::null();
            let mut bytes: u32 = 0;
            let queried = unsafe {
                WTSQuerySessionInformationW(
                    WTS_CURRENT_SERVER_HANDLE,
                    session.SessionId,
                    WTSUserName,
                    &mut name,
                    &mut bytes,
                )
            };
            if queried.is_ok() {
                if let Ok(user) = unsafe { name.to_string() } {
                    if !user.is_empty() {
                        users.push(user);
                    }
                }
                unsafe { WTSFreeMemory(name.0 as *mut c_void) };
            }
        }
        unsafe { WTSFreeMemory(sessions as *mut c_void) };
        Ok(users)
    }
}

fn expand_system_root(path: &str) -> String {
    let drive = std::env::var("SystemDrive").unwrap_or_else(|_| "C:".to_string());
    path.replace("%SystemDrive%", &drive)
}
