//! 设备标识 - 一次性 identifiers 载荷的数据来源

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 设备标识字段
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentifiers {
    pub mac: String,
    pub phone_number: String,
    pub device_id: String,
    pub device_os: String,
    pub os_version: String,
    pub product: String,
    pub brand: String,
    pub hardware_id: String,
    pub manufacturer: String,
    pub model: String,
}

impl DeviceIdentifiers {
    /// 转为上报字段
    pub fn to_fields(&self) -> BTreeMap<String, String> {
        [
            ("mac", &self.mac),
            ("phone_number", &self.phone_number),
            ("device_id", &self.device_id),
            ("device_os", &self.device_os),
            ("os_version", &self.os_version),
            ("product", &self.product),
            ("brand", &self.brand),
            ("hardware_id", &self.hardware_id),
            ("manufacturer", &self.manufacturer),
            ("model", &self.model),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
    }
}

/// 设备元数据提供者（同步访问）
pub trait DeviceInfoProvider: Send + Sync {
    fn identifiers(&self) -> DeviceIdentifiers;
}

/// 固定值（来自配置）
#[derive(Debug, Clone)]
pub struct StaticDeviceInfo {
    identifiers: DeviceIdentifiers,
}

impl StaticDeviceInfo {
    pub fn new(identifiers: DeviceIdentifiers) -> Self {
        Self { identifiers }
    }
}

impl DeviceInfoProvider for StaticDeviceInfo {
    fn identifiers(&self) -> DeviceIdentifiers {
        self.identifiers.clone()
    }
}

/// 从宿主系统读取可获得的字段，读不到的留空
#[derive(Debug, Clone, Default)]
pub struct SystemDeviceInfo;

impl DeviceInfoProvider for SystemDeviceInfo {
    fn identifiers(&self) -> DeviceIdentifiers {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_default();

        DeviceIdentifiers {
            device_id: host.clone(),
            device_os: std::env::consts::OS.to_string(),
            hardware_id: std::env::consts::ARCH.to_string(),
            product: host,
            ..Default::default()
        }
    }
}
