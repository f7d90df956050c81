//! 传感器类型枚举 - 受控枚举
//!
//! 整数编码写入本地缓冲（sensor_data.sensor_type），字符串名称用于上报协议，
//! 两者都不可随意修改，新增类型需与服务端同步升级。

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 传感器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Accelerometer,
    Calls,
    Gps,
    PowerState,
    Texts,
    Wifi,
    Proximity,
    Gyroscope,
    Magnetometer,
    Reachability,
    AppLog,
    /// 一次性设备标识载荷，不写入本地缓冲，按需生成
    Identifiers,
}

impl SensorType {
    /// 可写入本地缓冲的类型（不含 Identifiers）
    pub const STORED: [SensorType; 11] = [
        SensorType::Accelerometer,
        SensorType::Calls,
        SensorType::Gps,
        SensorType::PowerState,
        SensorType::Texts,
        SensorType::Wifi,
        SensorType::Proximity,
        SensorType::Gyroscope,
        SensorType::Magnetometer,
        SensorType::Reachability,
        SensorType::AppLog,
    ];

    /// 本地存储使用的整数编码
    pub fn code(self) -> i64 {
        match self {
            Self::Accelerometer => 1,
            Self::Calls => 2,
            Self::Gps => 3,
            Self::PowerState => 4,
            Self::Texts => 5,
            Self::Wifi => 6,
            Self::Proximity => 7,
            Self::Gyroscope => 8,
            Self::Magnetometer => 9,
            Self::Reachability => 10,
            Self::AppLog => 11,
            Self::Identifiers => 100,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Accelerometer),
            2 => Some(Self::Calls),
            3 => Some(Self::Gps),
            4 => Some(Self::PowerState),
            5 => Some(Self::Texts),
            6 => Some(Self::Wifi),
            7 => Some(Self::Proximity),
            8 => Some(Self::Gyroscope),
            9 => Some(Self::Magnetometer),
            10 => Some(Self::Reachability),
            11 => Some(Self::AppLog),
            100 => Some(Self::Identifiers),
            _ => None,
        }
    }

    /// 上报协议中的 category 名称
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accelerometer => "accelerometer",
            Self::Calls => "calls",
            Self::Gps => "gps",
            Self::PowerState => "powerstate",
            Self::Texts => "texts",
            Self::Wifi => "wifi",
            Self::Proximity => "proximity",
            Self::Gyroscope => "gyro",
            Self::Magnetometer => "magnetometer",
            Self::Reachability => "reachability",
            Self::AppLog => "applog",
            Self::Identifiers => "identifiers",
        }
    }

    /// 是否允许进入本地缓冲
    pub fn is_stored(self) -> bool {
        !matches!(self, Self::Identifiers)
    }
}

impl FromStr for SensorType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accelerometer" => Ok(Self::Accelerometer),
            "calls" => Ok(Self::Calls),
            "gps" => Ok(Self::Gps),
            "powerstate" => Ok(Self::PowerState),
            "texts" => Ok(Self::Texts),
            "wifi" => Ok(Self::Wifi),
            "proximity" => Ok(Self::Proximity),
            "gyro" => Ok(Self::Gyroscope),
            "magnetometer" => Ok(Self::Magnetometer),
            "reachability" => Ok(Self::Reachability),
            "applog" => Ok(Self::AppLog),
            "identifiers" => Ok(Self::Identifiers),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for SensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_type_codes_are_stable() {
        for sensor in SensorType::STORED {
            assert_eq!(SensorType::from_code(sensor.code()), Some(sensor));
            assert!(sensor.is_stored());
        }
        assert_eq!(SensorType::from_code(100), Some(SensorType::Identifiers));
        assert!(!SensorType::Identifiers.is_stored());
        assert_eq!(SensorType::from_code(0), None);
        assert_eq!(SensorType::from_code(12), None);
    }

    #[test]
    fn sensor_type_wire_names() {
        assert_eq!(SensorType::Accelerometer.as_str(), "accelerometer");
        assert_eq!(SensorType::PowerState.as_str(), "powerstate");
        assert_eq!(SensorType::Gyroscope.as_str(), "gyro");
        assert_eq!(SensorType::AppLog.as_str(), "applog");
        assert_eq!("gps".parse::<SensorType>(), Ok(SensorType::Gps));
        assert_eq!("gyro".parse::<SensorType>(), Ok(SensorType::Gyroscope));
        assert!("gyroscope".parse::<SensorType>().is_err());
    }
}
