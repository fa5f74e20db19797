//! 智能跳过
//!
//! 统计本会话中模型返回 `SKIP` 的比例。样本数达到下限且比例不低于阈值时进入
//! `Suppressed`，此后本会话内不再发送翻译请求。状态转换是单向的。

use tracing::info;

/// 跳过统计，会话内不重置
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipStats {
    pub skipped: u64,
    pub total: u64,
}

impl SkipStats {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.skipped as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipState {
    Active,
    Suppressed,
}

#[derive(Debug, Clone)]
pub struct SmartSkipController {
    enabled: bool,
    threshold: f64,
    min_samples: u64,
    stats: SkipStats,
    state: SkipState,
}

impl SmartSkipController {
    pub fn new(enabled: bool, threshold: f64, min_samples: u64) -> Self {
        Self {
            enabled,
            threshold,
            min_samples,
            stats: SkipStats::default(),
            state: SkipState::Active,
        }
    }

    pub fn state(&self) -> SkipState {
        self.state
    }

    pub fn is_suppressed(&self) -> bool {
        self.state == SkipState::Suppressed
    }

    pub fn stats(&self) -> SkipStats {
        self.stats
    }

    /// 更新阈值与开关；已进入的抑制状态不受影响
    pub fn configure(&mut self, enabled: bool, threshold: f64, min_samples: u64) {
        self.enabled = enabled;
        self.threshold = threshold;
        self.min_samples = min_samples;
    }

    /// 记录一个已处理批次，返回本次是否刚刚进入抑制状态
    pub fn record_batch(&mut self, skipped: usize, total: usize) -> bool {
        self.stats.skipped += skipped as u64;
        self.stats.total += total as u64;

        if !self.enabled || self.is_suppressed() {
            return false;
        }

        let ratio = self.stats.ratio();
        if self.stats.total >= self.min_samples && ratio >= self.threshold {
            self.state = SkipState::Suppressed;
            info!(
                "跳过比例 {:.2} 达到阈值 {:.2}（{}/{}），本会话停止翻译",
                ratio, self.threshold, self.stats.skipped, self.stats.total
            );
            metrics::counter!("lyrics_smart_skip_suppressed_total").increment(1);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossing_threshold_suppresses() {
        let mut controller = SmartSkipController::new(true, 0.65, 3);
        assert!(controller.record_batch(2, 3));
        assert!(controller.is_suppressed());
        assert_eq!(controller.stats(), SkipStats { skipped: 2, total: 3 });
    }

    #[test]
    fn test_min_samples_required() {
        let mut controller = SmartSkipController::new(true, 0.65, 3);
        assert!(!controller.record_batch(1, 1));
        assert_eq!(controller.state(), SkipState::Active);
        assert!(controller.record_batch(1, 2));
    }

    #[test]
    fn test_one_way() {
        let mut controller = SmartSkipController::new(true, 0.5, 1);
        assert!(controller.record_batch(1, 1));
        assert!(!controller.record_batch(0, 100));
        assert!(controller.is_suppressed());
        assert!(controller.stats().ratio() < 0.5);
    }

    #[test]
    fn test_disabled_never_suppresses() {
        let mut controller = SmartSkipController::new(false, 0.65, 3);
        assert!(!controller.record_batch(10, 10));
        assert_eq!(controller.state(), SkipState::Active);
    }
}
