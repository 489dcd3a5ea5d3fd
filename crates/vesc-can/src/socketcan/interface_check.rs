//! CAN 接口状态检查
//!
//! 通过 `if_nametoindex()` 和 `ioctl(SIOCGIFFLAGS)` 读取接口是否存在及管理态，
//! 只读操作，普通用户即可执行。

use crate::CanError;
use libc::{AF_INET, IFF_UP, SIOCGIFFLAGS, SOCK_DGRAM, if_nametoindex, ifreq};
use std::ffi::CString;
use std::io;
use tracing::trace;

/// IFNAMSIZ - 1
const MAX_IFACE_NAME_LEN: usize = 15;

/// 检查接口是否存在且处于 UP 状态
///
/// - `Ok(true)`: 存在且 UP
/// - `Ok(false)`: 存在但 DOWN
/// - `Err(TransportUnavailable)`: 接口不存在或名称非法
/// - `Err(Io)`: socket / ioctl 调用失败
pub fn check_interface_status(interface: &str) -> Result<bool, CanError> {
    if interface.is_empty() || interface.len() > MAX_IFACE_NAME_LEN {
        return Err(CanError::TransportUnavailable(format!(
            "Invalid interface name '{}' (1..={} characters)",
            interface, MAX_IFACE_NAME_LEN
        )));
    }

    let c_iface = CString::new(interface).map_err(|e| {
        CanError::TransportUnavailable(format!("Invalid interface name: {}", e))
    })?;

    let ifindex = unsafe { if_nametoindex(c_iface.as_ptr()) };
    if ifindex == 0 {
        let errno = io::Error::last_os_error();
        return Err(CanError::TransportUnavailable(format!(
            "CAN interface '{}' does not exist ({})",
            interface, errno
        )));
    }

    let mut ifr: ifreq = unsafe { std::mem::zeroed() };
    let name = interface.as_bytes();
    unsafe {
        std::ptr::copy_nonoverlapping(
            name.as_ptr(),
            ifr.ifr_name.as_mut_ptr() as *mut u8,
            name.len(),
        );
    }
    ifr.ifr_name[name.len()] = 0;

    struct FdGuard(libc::c_int);
    impl Drop for FdGuard {
        fn drop(&mut self) {
            if self.0 >= 0 {
                unsafe { libc::close(self.0) };
            }
        }
    }

    let sockfd = unsafe { libc::socket(AF_INET, SOCK_DGRAM, 0) };
    if sockfd < 0 {
        return Err(CanError::Io(io::Error::last_os_error()));
    }
    let _guard = FdGuard(sockfd);

    let result = unsafe { libc::ioctl(sockfd, SIOCGIFFLAGS, &mut ifr as *mut _ as *mut libc::c_void) };
    if result < 0 {
        return Err(CanError::Io(io::Error::last_os_error()));
    }

    // ifru_flags 是 ifr_ifru 联合体的第一个字段
    let flags = unsafe { *(std::ptr::addr_of!(ifr.ifr_ifru) as *const libc::c_short) };
    let is_up = (flags as i32 & IFF_UP) != 0;

    trace!(
        "Interface '{}' status: {}",
        interface,
        if is_up { "UP" } else { "DOWN" }
    );
    Ok(is_up)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_too_long() {
        let err = check_interface_status("a_very_long_interface_name").unwrap_err();
        assert!(matches!(err, CanError::TransportUnavailable(_)));
    }

    #[test]
    fn test_empty_name() {
        assert!(matches!(
            check_interface_status(""),
            Err(CanError::TransportUnavailable(_))
        ));
    }

    #[test]
    fn test_missing_interface() {
        let err = check_interface_status("vescnope0").unwrap_err();
        match err {
            CanError::TransportUnavailable(msg) => assert!(msg.contains("does not exist")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_loopback_exists() {
        assert!(check_interface_status("lo").is_ok());
    }
}
