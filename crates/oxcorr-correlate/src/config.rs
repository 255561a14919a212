use serde::{Deserialize, Serialize};

/// Process-wide knobs of the correlation pipeline.
///
/// Every field has a serde default so a partial TOML file (or an empty
/// one) yields a working configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// 关联滑动窗口长度（秒）
    #[serde(default = "default_window_secs")]
    pub window_secs: i64,
    /// 窗口键 TTL 安全余量（秒）
    #[serde(default = "default_check_window_ttl_margin_secs")]
    pub check_window_ttl_margin_secs: i64,
    /// 上次检测结果缓存 TTL（秒）
    #[serde(default = "default_detect_result_ttl_secs")]
    pub detect_result_ttl_secs: i64,
    /// 单策略动作检测缓存 TTL（秒）
    #[serde(default = "default_action_cache_ttl_secs")]
    pub action_cache_ttl_secs: i64,
    /// 首次触发标记 TTL（秒）
    #[serde(default = "default_first_fire_ttl_secs")]
    pub first_fire_ttl_secs: i64,
    /// QoS 窗口内允许的动作数上限
    #[serde(default = "default_qos_threshold")]
    pub qos_threshold: i64,
    /// QoS 计数窗口（秒）
    #[serde(default = "default_qos_window_secs")]
    pub qos_window_secs: i64,
    /// 未处理告警重新推送动作的时间阈值（秒）
    #[serde(default = "default_qos_drop_window_secs")]
    pub qos_drop_window_secs: i64,
    /// 锁等待上限（秒）
    #[serde(default = "default_lock_wait_secs")]
    pub lock_wait_secs: i64,
    /// 锁持有 TTL（秒）
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: i64,
    /// 重试次数硬上限
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    /// 重试基础倒计时（秒）
    #[serde(default = "default_retry_countdown_base_secs")]
    pub retry_countdown_base_secs: i64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            check_window_ttl_margin_secs: default_check_window_ttl_margin_secs(),
            detect_result_ttl_secs: default_detect_result_ttl_secs(),
            action_cache_ttl_secs: default_action_cache_ttl_secs(),
            first_fire_ttl_secs: default_first_fire_ttl_secs(),
            qos_threshold: default_qos_threshold(),
            qos_window_secs: default_qos_window_secs(),
            qos_drop_window_secs: default_qos_drop_window_secs(),
            lock_wait_secs: default_lock_wait_secs(),
            lock_ttl_secs: default_lock_ttl_secs(),
            max_retry: default_max_retry(),
            retry_countdown_base_secs: default_retry_countdown_base_secs(),
        }
    }
}

fn default_window_secs() -> i64 {
    3600
}

fn default_check_window_ttl_margin_secs() -> i64 {
    600
}

fn default_detect_result_ttl_secs() -> i64 {
    7 * 86400
}

fn default_action_cache_ttl_secs() -> i64 {
    7 * 86400
}

fn default_first_fire_ttl_secs() -> i64 {
    86400
}

fn default_qos_threshold() -> i64 {
    100
}

fn default_qos_window_secs() -> i64 {
    60
}

fn default_qos_drop_window_secs() -> i64 {
    86400
}

fn default_lock_wait_secs() -> i64 {
    3
}

fn default_lock_ttl_secs() -> i64 {
    30
}

fn default_max_retry() -> u32 {
    10
}

fn default_retry_countdown_base_secs() -> i64 {
    1
}

impl ProcessorConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}
