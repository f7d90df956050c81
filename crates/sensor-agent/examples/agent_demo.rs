//! 采集代理演示
//!
//! 使用内存缓冲和控制台上报端，演示写入、分窗同步与事件订阅。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sensor_agent::{
    AgentComponents, AgentConfig, EncodedPayload, MemorySensorBuffer, MemorySyncStateStore,
    RemoteSink, SensorAgent, SensorType, StaticDeviceInfo, SystemDeviceInfo, TokioAlarmScheduler,
    UploadFailure,
};
use sensor_agent::DeviceInfoProvider;

/// 打印到控制台的上报端
struct ConsoleSink;

#[async_trait]
impl RemoteSink for ConsoleSink {
    async fn upload(&self, batch: &[EncodedPayload]) -> Result<(), UploadFailure> {
        println!("📤 上报 {} 条:", batch.len());
        for payload in batch {
            println!("   [{}] {} {:?}", payload.timestamp, payload.category, payload.fields);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("========================================");
    println!("Sensor Agent 演示");
    println!("========================================\n");

    let config = AgentConfig::builder()
        .sync_interval(Duration::from_secs(10))
        .fixed_window(Duration::from_secs(60))
        .build();

    let buffer = Arc::new(MemorySensorBuffer::new());
    let agent = SensorAgent::with_components(
        config,
        AgentComponents {
            buffer: buffer.clone(),
            sink: Arc::new(ConsoleSink),
            state_store: Arc::new(MemorySyncStateStore::new()),
            device_info: Arc::new(StaticDeviceInfo::new(SystemDeviceInfo.identifiers())),
            scheduler: Arc::new(TokioAlarmScheduler::new()?),
        },
    )
    .await?;

    let mut events = agent.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("📣 事件: {:?}", event);
        }
    });

    // === 1. 写入跨越多个窗口的数据 ===
    let now = chrono::Utc::now().timestamp_millis();
    for minute in (1..=5).rev() {
        let ts = now - minute * 60_000;
        agent.record(SensorType::Accelerometer, "3,0.01,9.81,0.02", ts).await?;
        agent.record(SensorType::Gps, "31.23,121.47,12,5", ts + 500).await?;
    }
    // 字段不足，编码会失败并被保留
    agent.record(SensorType::Calls, "1.0,0.1", now - 30_000).await?;
    println!("已写入 {} 条记录\n", buffer.len());

    // === 2. 立即同步 ===
    tokio::time::sleep(Duration::from_millis(10)).await;
    let outcome = agent.sync_now().await?;
    println!("\n同步结果: {:?}", outcome);
    println!("剩余记录: {}", buffer.len());
    println!("保留的异常记录: {}", agent.malformed_backlog().await?);

    // === 3. 等一次闹钟 ===
    agent.record_now(SensorType::Proximity, "near").await?;
    tokio::time::sleep(Duration::from_secs(11)).await;

    agent.shutdown().await?;
    println!("\n演示结束");
    Ok(())
}
