use std::collections::VecDeque;
use std::time::Duration;
use parking_lot::Mutex;
use tokio::time::Instant;
use crate::core::{JobId, ProgressCallback, ProgressSnapshot, UploadConfig};

/// 速度估算参数
#[derive(Debug, Clone)]
pub struct EstimatorSettings {
    /// 采样窗口大小
    pub window: usize,
    /// 两次回调之间的最小间隔
    pub emit_interval: Duration,
    /// 速度变化超过该比例立即回调
    pub change_threshold: f64,
    /// 低于该速度不计算剩余时间
    pub min_speed: f64,
    /// 启动阶段，在此之前不回退到平均速度
    pub warmup: Duration,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self::from(&UploadConfig::default())
    }
}

impl From<&UploadConfig> for EstimatorSettings {
    fn from(config: &UploadConfig) -> Self {
        Self {
            window: config.speed_window.max(1),
            emit_interval: config.progress_interval,
            change_threshold: config.speed_change_threshold,
            min_speed: config.min_speed,
            warmup: config.speed_warmup,
        }
    }
}

/// 平滑速度 / 剩余时间估算，并对回调做节流
pub struct ThroughputEstimator {
    settings: EstimatorSettings,
    total_bytes: u64,
    start_time: Instant,
    last_tick: Instant,
    last_bytes: u64,
    samples: VecDeque<f64>,
    last_emit: Instant,
    last_reported_speed: f64,
}

impl ThroughputEstimator {
    pub fn new(total_bytes: u64, now: Instant, settings: EstimatorSettings) -> Self {
        Self {
            samples: VecDeque::with_capacity(settings.window),
            settings,
            total_bytes,
            start_time: now,
            last_tick: now,
            last_bytes: 0,
            last_emit: now,
            last_reported_speed: 0.0,
        }
    }

    /// 记录当前已上传的总字节数，满足节流条件时返回需要推送的快照
    pub fn record(&mut self, uploaded: u64, now: Instant) -> Option<ProgressSnapshot> {
        // 分片重试时计数会回退
        if uploaded < self.last_bytes {
            self.last_bytes = uploaded;
        }

        let since_tick = now.saturating_duration_since(self.last_tick).as_secs_f64();
        if since_tick > 0.0 {
            let delta = uploaded - self.last_bytes;
            self.samples.push_back(delta as f64 / since_tick);
            while self.samples.len() > self.settings.window {
                self.samples.pop_front();
            }
            self.last_tick = now;
            self.last_bytes = uploaded;
        }

        let snapshot = self.snapshot(uploaded, now);
        if self.should_emit(snapshot.speed_bytes_per_sec, now) {
            self.last_emit = now;
            self.last_reported_speed = snapshot.speed_bytes_per_sec;
            Some(snapshot)
        } else {
            None
        }
    }

    /// 全部完成时强制输出 100% 的快照
    pub fn finish(&mut self, now: Instant) -> ProgressSnapshot {
        let mut snapshot = self.snapshot(self.total_bytes, now);
        snapshot.eta_seconds = 0.0;
        self.last_emit = now;
        self.last_reported_speed = snapshot.speed_bytes_per_sec;
        snapshot
    }

    /// 窗口内瞬时速度的平均值
    pub fn smoothed_speed(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    fn speed(&self, uploaded: u64, now: Instant) -> f64 {
        let smoothed = self.smoothed_speed();
        let elapsed = now.saturating_duration_since(self.start_time);

        // 刚开始时平滑速度接近 0，避免给出误导性的剩余时间
        if smoothed < self.settings.min_speed && elapsed >= self.settings.warmup && !elapsed.is_zero() {
            uploaded as f64 / elapsed.as_secs_f64()
        } else {
            smoothed
        }
    }

    fn snapshot(&self, uploaded: u64, now: Instant) -> ProgressSnapshot {
        let speed = self.speed(uploaded, now);
        let remaining = self.total_bytes.saturating_sub(uploaded);
        let eta_seconds = if speed > self.settings.min_speed {
            remaining as f64 / speed
        } else {
            0.0
        };
        let percentage = if self.total_bytes > 0 {
            (uploaded as f64 / self.total_bytes as f64 * 100.0).min(100.0)
        } else {
            100.0
        };

        ProgressSnapshot {
            uploaded_bytes: uploaded,
            total_bytes: self.total_bytes,
            percentage,
            speed_bytes_per_sec: speed,
            eta_seconds,
        }
    }

    fn should_emit(&self, speed: f64, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_emit) >= self.settings.emit_interval {
            return true;
        }

        if self.last_reported_speed <= 0.0 {
            return speed > 0.0;
        }

        (speed - self.last_reported_speed).abs() / self.last_reported_speed
            > self.settings.change_threshold
    }
}

/// 单个任务的进度跟踪：汇总各分片的已上传字节数，喂给速度估算并回调 UI
pub struct UploadProgressTracker {
    job_id: JobId,
    state: Mutex<TrackerState>,
    callback: Option<ProgressCallback>,
}

/// 分片计数和估算器在同一把锁下，保证 record 收到的总数与求和顺序一致
struct TrackerState {
    parts: Vec<u64>,
    estimator: ThroughputEstimator,
}

impl UploadProgressTracker {
    pub fn new(
        job_id: JobId,
        part_count: usize,
        total_bytes: u64,
        settings: EstimatorSettings,
        callback: Option<ProgressCallback>,
    ) -> Self {
        Self {
            job_id,
            state: Mutex::new(TrackerState {
                parts: vec![0; part_count],
                estimator: ThroughputEstimator::new(total_bytes, Instant::now(), settings),
            }),
            callback,
        }
    }

    /// 更新某个分片（下标从 0 开始）本次尝试已发送的字节数
    pub fn update_part(&self, index: usize, bytes: u64) {
        let mut state = self.state.lock();
        if let Some(slot) = state.parts.get_mut(index) {
            *slot = bytes;
        }

        let uploaded = state.parts.iter().sum::<u64>();
        if let Some(snapshot) = state.estimator.record(uploaded, Instant::now()) {
            // 持锁回调，快照按顺序送达
            self.emit(&snapshot);
        }
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.state.lock().parts.iter().sum()
    }

    pub fn finish(&self) {
        let mut state = self.state.lock();
        let snapshot = state.estimator.finish(Instant::now());
        self.emit(&snapshot);
    }

    fn emit(&self, snapshot: &ProgressSnapshot) {
        tracing::debug!(
            job_id = %self.job_id,
            "Uploaded {}/{} ({:.1}%), speed {}, eta {}",
            format_bytes(snapshot.uploaded_bytes),
            format_bytes(snapshot.total_bytes),
            snapshot.percentage,
            format_speed(snapshot.speed_bytes_per_sec),
            format_duration(Duration::try_from_secs_f64(snapshot.eta_seconds).unwrap_or(Duration::ZERO)),
        );

        if let Some(callback) = &self.callback {
            callback(&self.job_id, snapshot);
        }
    }
}

/// 格式化字节数
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const UNIT_SIZE: f64 = 1024.0;

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= UNIT_SIZE && unit_index < UNITS.len() - 1 {
        size /= UNIT_SIZE;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// 格式化速度
pub fn format_speed(bytes_per_second: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_second as u64))
}

/// 格式化持续时间
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
