//! 载荷编码器 - 原始记录 → 上报载荷
//!
//! 每种传感器注册一个编码函数（表驱动），编码是纯函数：
//! 原始字符串按逗号切分后按下标取字段，下标越界即该条记录编码失败，
//! 不影响同批其他记录。

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::device_info::DeviceIdentifiers;
use crate::error::EncodeError;
use crate::sensor_type::SensorType;
use crate::storage::RawRecord;

/// 上报字段
pub type Fields = BTreeMap<String, String>;

/// 单类型编码函数
pub type EncodeFn = fn(&str) -> Result<Fields, EncodeError>;

/// 上报载荷，每次上报前临时生成，不落盘
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedPayload {
    pub timestamp: i64,
    /// 类型的上报名称（如 "accelerometer"、"gps"）
    pub category: String,
    pub fields: Fields,
}

/// 一个窗口的编码结果
#[derive(Debug, Default)]
pub struct EncodedBatch {
    pub payloads: Vec<EncodedPayload>,
    /// 编码失败的记录 id 及原因
    pub failures: Vec<(i64, EncodeError)>,
}

impl EncodedBatch {
    pub fn failed_ids(&self) -> Vec<i64> {
        self.failures.iter().map(|(id, _)| *id).collect()
    }
}

/// 表驱动编码器
#[derive(Clone)]
pub struct PayloadEncoder {
    encoders: HashMap<SensorType, EncodeFn>,
}

impl std::fmt::Debug for PayloadEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut registered: Vec<&SensorType> = self.encoders.keys().collect();
        registered.sort();
        f.debug_struct("PayloadEncoder")
            .field("registered", &registered)
            .finish()
    }
}

impl PayloadEncoder {
    /// 注册全部内置类型
    pub fn new() -> Self {
        let mut encoder = Self {
            encoders: HashMap::new(),
        };
        encoder.register(SensorType::Accelerometer, encode_accelerometer);
        encoder.register(SensorType::Calls, encode_calls);
        encoder.register(SensorType::Gps, encode_gps);
        encoder.register(SensorType::PowerState, encode_power_state);
        encoder.register(SensorType::Texts, encode_texts);
        encoder.register(SensorType::Wifi, encode_wifi);
        encoder.register(SensorType::Proximity, encode_event);
        encoder.register(SensorType::Gyroscope, encode_gyroscope);
        encoder.register(SensorType::Magnetometer, encode_magnetometer);
        encoder.register(SensorType::Reachability, encode_event);
        encoder.register(SensorType::AppLog, encode_event);
        encoder
    }

    /// 注册（或替换）某类型的编码函数
    pub fn register(&mut self, sensor_type: SensorType, encode: EncodeFn) {
        self.encoders.insert(sensor_type, encode);
    }

    pub fn encode(&self, record: &RawRecord) -> Result<EncodedPayload, EncodeError> {
        let encode = self
            .encoders
            .get(&record.sensor_type)
            .ok_or(EncodeError::Unsupported(record.sensor_type.as_str()))?;

        Ok(EncodedPayload {
            timestamp: record.timestamp,
            category: record.sensor_type.as_str().to_string(),
            fields: encode(&record.payload)?,
        })
    }

    /// 编码一个窗口的记录，失败的记录记日志后排除，保持原顺序
    pub fn encode_batch(&self, records: &[RawRecord]) -> EncodedBatch {
        let mut batch = EncodedBatch {
            payloads: Vec::with_capacity(records.len()),
            failures: Vec::new(),
        };

        for record in records {
            match self.encode(record) {
                Ok(payload) => batch.payloads.push(payload),
                Err(e) => {
                    warn!(
                        "记录编码失败，已排除: id={}, type={}, timestamp={}, error={}",
                        record.id, record.sensor_type, record.timestamp, e
                    );
                    batch.failures.push((record.id, e));
                }
            }
        }

        batch
    }

    /// 一次性设备标识载荷
    pub fn identifiers_payload(identifiers: &DeviceIdentifiers, timestamp: i64) -> EncodedPayload {
        EncodedPayload {
            timestamp,
            category: SensorType::Identifiers.as_str().to_string(),
            fields: identifiers.to_fields(),
        }
    }
}

impl Default for PayloadEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// 按 (字段名, 下标) 从逗号分隔字符串中取值
fn positional(
    sensor_type: SensorType,
    raw: &str,
    layout: &[(&str, usize)],
) -> Result<Fields, EncodeError> {
    let parts: Vec<&str> = raw.split(',').collect();
    layout
        .iter()
        .map(|&(name, index)| {
            parts
                .get(index)
                .map(|value| (name.to_string(), value.to_string()))
                .ok_or(EncodeError::MissingField {
                    sensor: sensor_type.as_str(),
                    index,
                    found: parts.len(),
                })
        })
        .collect()
}

/// 0 -> accuracy, 1 -> x, 2 -> y, 3 -> z
fn encode_accelerometer(raw: &str) -> Result<Fields, EncodeError> {
    positional(
        SensorType::Accelerometer,
        raw,
        &[("accuracy", 0), ("x", 1), ("y", 2), ("z", 3)],
    )
}

/// 0 -> 号码哈希, 1 -> 通话类型, 2 -> 通话时间（不上报）, 3 -> 时长（秒）
fn encode_calls(raw: &str) -> Result<Fields, EncodeError> {
    positional(
        SensorType::Calls,
        raw,
        &[("hashed_phone_number", 0), ("call_type", 1), ("duration_in_seconds", 3)],
    )
}

fn encode_gps(raw: &str) -> Result<Fields, EncodeError> {
    positional(
        SensorType::Gps,
        raw,
        &[("latitude", 0), ("longitude", 1), ("altitude", 2), ("accuracy", 3)],
    )
}

fn encode_texts(raw: &str) -> Result<Fields, EncodeError> {
    positional(
        SensorType::Texts,
        raw,
        &[
            ("hashed_phone_number", 0),
            ("sent_vs_received", 1),
            ("message_length", 2),
            ("time_sent", 3),
        ],
    )
}

/// 0 -> mac 哈希, 1 -> 频率, 2 -> 信号强度
fn encode_wifi(raw: &str) -> Result<Fields, EncodeError> {
    positional(
        SensorType::Wifi,
        raw,
        &[("hashed_mac", 0), ("frequency", 1), ("rssi", 2)],
    )
}

// 陀螺仪 / 磁力计的下标 0 是精度，不上报
fn encode_gyroscope(raw: &str) -> Result<Fields, EncodeError> {
    positional(SensorType::Gyroscope, raw, &[("x", 1), ("y", 2), ("z", 3)])
}

fn encode_magnetometer(raw: &str) -> Result<Fields, EncodeError> {
    positional(SensorType::Magnetometer, raw, &[("x", 1), ("y", 2), ("z", 3)])
}

/// 原始字符串整体作为 event
fn encode_event(raw: &str) -> Result<Fields, EncodeError> {
    Ok(Fields::from([("event".to_string(), raw.to_string())]))
}

fn encode_power_state(raw: &str) -> Result<Fields, EncodeError> {
    let mut fields = encode_event(raw)?;
    // 电量暂未采集，固定占位
    fields.insert("level".to_string(), "0.0".to_string());
    Ok(fields)
}
