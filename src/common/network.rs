//! 网络连通性探测

use sysinfo::Networks;

/// 网络可用性接口
pub trait NetworkMonitor: Send + Sync {
    fn is_available(&self) -> bool;
}

/// 只要存在非回环网卡即视为网络可用
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemNetwork;

impl NetworkMonitor for SystemNetwork {
    fn is_available(&self) -> bool {
        let networks = Networks::new_with_refreshed_list();
        let available = (&networks)
            .into_iter()
            .any(|(name, _)| !is_loopback(name));
        if !available {
            tracing::debug!("未检测到可用网卡");
        }
        available
    }
}

fn is_loopback(name: &str) -> bool {
    name == "lo" || name.starts_with("lo0") || name.eq_ignore_ascii_case("loopback")
}
