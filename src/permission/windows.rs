use std::io;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use ::windows::core::{PCWSTR, PWSTR};
use ::windows::Win32::Foundation::{
    CloseHandle, LocalFree, ERROR_SUCCESS, GENERIC_ALL, HANDLE, HLOCAL, LUID, WIN32_ERROR,
};
use ::windows::Win32::Security::Authorization::{
    ConvertStringSidToSidW, SetEntriesInAclW, SetNamedSecurityInfoW, EXPLICIT_ACCESS_W,
    NO_MULTIPLE_TRUSTEE, SET_ACCESS, SE_FILE_OBJECT, TRUSTEE_IS_SID, TRUSTEE_IS_USER, TRUSTEE_W,
};
use ::windows::Win32::Security::{
    AdjustTokenPrivileges, LookupPrivilegeValueW, ACL, DACL_SECURITY_INFORMATION,
    LUID_AND_ATTRIBUTES, OWNER_SECURITY_INFORMATION, PROTECTED_DACL_SECURITY_INFORMATION, PSID,
    SE_BACKUP_NAME, SE_PRIVILEGE_ENABLED, SE_RESTORE_NAME, SE_TAKE_OWNERSHIP_NAME,
    SUB_CONTAINERS_AND_OBJECTS_INHERIT, TOKEN_ADJUST_PRIVILEGES, TOKEN_PRIVILEGES, TOKEN_QUERY,
    UNPROTECTED_DACL_SECURITY_INFORMATION,
};
use ::windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

const PRIVILEGES: [PCWSTR; 3] = [SE_TAKE_OWNERSHIP_NAME, SE_BACKUP_NAME, SE_RESTORE_NAME];

/// Backup, restore and take-ownership privileges enabled on the process
/// token. Disabled again on drop.
#[derive(Debug)]
pub struct PrivilegeScope {
    held: bool,
}

impl PrivilegeScope {
    pub fn acquire(needed: bool) -> Self {
        if !needed {
            return Self { held: false };
        }
        let held = PRIVILEGES
            .iter()
            .map(|name| set_privilege(*name, true).is_ok())
            .fold(true, |acc, ok| acc && ok);
        Self { held }
    }

    pub fn is_held(&self) -> bool {
        self.held
    }
}

impl Drop for PrivilegeScope {
    fn drop(&mut self) {
        if self.held {
            for name in PRIVILEGES {
                let _ = set_privilege(name, false);
            }
        }
    }
}

fn set_privilege(name: PCWSTR, enable: bool) -> io::Result<()> {
    unsafe {
        let mut token = HANDLE::default();
        OpenProcessToken(
            GetCurrentProcess(),
            TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
            &mut token,
        )
        .map_err(to_io)?;
        let mut luid = LUID::default();
        let looked_up = LookupPrivilegeValueW(PCWSTR::null(), name, &mut luid);
        if let Err(err) = looked_up {
            let _ = CloseHandle(token);
            return Err(to_io(err));
        }
        let privileges = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [LUID_AND_ATTRIBUTES {
                Luid: luid,
                Attributes: if enable {
                    SE_PRIVILEGE_ENABLED
                } else {
                    Default::default()
                },
            }],
        };
        let adjusted = AdjustTokenPrivileges(token, false, Some(&privileges), 0, None, None);
        let _ = CloseHandle(token);
        adjusted.map_err(to_io)
    }
}

pub fn strip(path: &Path) -> io::Result<()> {
    let wide = to_wide(path);
    unsafe {
        let mut empty: *mut ACL = ptr::null_mut();
        check(SetEntriesInAclW(None, None, &mut empty))?;
        let status = SetNamedSecurityInfoW(
            PCWSTR(wide.as_ptr()),
            SE_FILE_OBJECT,
            DACL_SECURITY_INFORMATION | UNPROTECTED_DACL_SECURITY_INFORMATION,
            PSID::default(),
            PSID::default(),
            Some(empty as *const ACL),
            None,
        );
        let _ = LocalFree(HLOCAL(empty as *mut _));
        check(status)
    }
}

pub fn assign(path: &Path, sid: &str) -> io::Result<()> {
    let wide = to_wide(path);
    let sid_wide: Vec<u16> = sid.encode_utf16().chain(Some(0)).collect();
    unsafe {
        let mut psid = PSID::default();
        ConvertStringSidToSidW(PCWSTR(sid_wide.as_ptr()), &mut psid).map_err(to_io)?;

        let access = EXPLICIT_ACCESS_W {
            grfAccessPermissions: GENERIC_ALL.0,
            grfAccessMode: SET_ACCESS,
            grfInheritance: SUB_CONTAINERS_AND_OBJECTS_INHERIT,
            Trustee: TRUSTEE_W {
                pMultipleTrustee: ptr::null_mut(),
                MultipleTrusteeOperation: NO_MULTIPLE_TRUSTEE,
                TrusteeForm: TRUSTEE_IS_SID,
                TrusteeType: TRUSTEE_IS_USER,
                ptstrName: PWSTR(psid.0 as *mut u16),
            },
        };
        let mut acl: *mut ACL = ptr::null_mut();
        let built = check(SetEntriesInAclW(Some(&[access]), None, &mut acl));
        if let Err(err) = built {
            let _ = LocalFree(HLOCAL(psid.0));
            return Err(err);
        }
        let status = SetNamedSecurityInfoW(
            PCWSTR(wide.as_ptr()),
            SE_FILE_OBJECT,
            OWNER_SECURITY_INFORMATION
                | DACL_SECURITY_INFORMATION
                | PROTECTED_DACL_SECURITY_INFORMATION,
            psid,
            PSID::default(),
            Some(acl as *const ACL),
            None,
        );
        let _ = LocalFree(HLOCAL(acl as *mut _));
        let _ = LocalFree(HLOCAL(psid.0));
        check(status)
    }
}

fn to_wide(path: &Path) -> Vec<u16> {
    path.as_os_str().encode_wide().chain(Some(0)).collect()
}

fn check(status: WIN32_ERROR) -> io::Result<()> {
    if status == ERROR_SUCCESS {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(status.0 as i32))
    }
}

fn to_io(err: ::windows::core::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.message())
}
