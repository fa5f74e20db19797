//! 文本单元追踪
//!
//! 只扫描宿主报告为已变化的子树；完整重扫由节流定时器驱动，作为遗漏变化的兜底。
//! 视口外的单元被被动登记，进入扩展视口后才提升为可见并发出事件。
//! 页面隐藏期间暂停观察，重新可见时强制完整重扫。

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use super::host::{ContentTree, TextUnit};
use super::normalizer::{KeyNormalizer, NormalizedKey};

/// 单元事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitChange {
    /// 首次出现（或从被动登记提升为可见）
    Appeared,
    /// 已追踪单元的文本发生变化
    TextChanged,
}

/// 追踪器发出的单元事件
#[derive(Debug, Clone)]
pub struct UnitEvent<N> {
    pub unit: TextUnit<N>,
    pub key: NormalizedKey,
    pub change: UnitChange,
}

#[derive(Debug, Clone)]
struct TrackedUnit {
    key: NormalizedKey,
    visible: bool,
    /// 文本在被动期间发生过变化
    changed_while_passive: bool,
}

/// 单元追踪器
pub struct UnitTracker<N> {
    known: HashMap<N, TrackedUnit>,
    dirty: Vec<N>,
    force_full_scan: bool,
    viewport_dirty: bool,
    page_visible: bool,
    last_full_scan: Option<Instant>,
    rescan_interval: Duration,
    margin: f64,
}

impl<N> UnitTracker<N>
where
    N: Clone + Eq + std::hash::Hash + std::fmt::Debug,
{
    pub fn new(rescan_interval: Duration, margin: f64) -> Self {
        Self {
            known: HashMap::new(),
            dirty: Vec::new(),
            force_full_scan: true,
            viewport_dirty: false,
            page_visible: true,
            last_full_scan: None,
            rescan_interval,
            margin,
        }
    }

    /// 记录发生变化的子树
    pub fn notify_changed(&mut self, scope: N) {
        if !self.page_visible {
            return;
        }
        if !self.dirty.contains(&scope) {
            self.dirty.push(scope);
        }
    }

    /// 视口移动后重新检查被动单元
    pub fn notify_viewport_changed(&mut self) {
        if self.page_visible {
            self.viewport_dirty = true;
        }
    }

    /// 页面可见性变化；隐藏时丢弃待处理的变化，重新可见时强制完整重扫
    pub fn set_page_visible(&mut self, visible: bool) {
        if self.page_visible == visible {
            return;
        }
        self.page_visible = visible;
        if visible {
            self.force_full_scan = true;
            tracing::debug!("页面重新可见，安排完整重扫");
        } else {
            self.dirty.clear();
            self.viewport_dirty = false;
            tracing::debug!("页面隐藏，暂停观察");
        }
    }

    pub fn is_page_visible(&self) -> bool {
        self.page_visible
    }

    /// 请求在下一次轮询时完整重扫
    pub fn request_full_scan(&mut self) {
        self.force_full_scan = true;
    }

    /// 忘记所有已追踪单元，下一次轮询时全部重新发出
    pub fn reset(&mut self) {
        self.known.clear();
        self.dirty.clear();
        self.force_full_scan = true;
    }

    /// 下一次定时完整重扫的时间
    pub fn next_full_scan_at(&self) -> Option<Instant> {
        if !self.page_visible {
            return None;
        }
        match self.last_full_scan {
            Some(last) if !self.force_full_scan => Some(last + self.rescan_interval),
            _ => Some(Instant::now()),
        }
    }

    /// 是否有待处理的工作
    pub fn has_pending_work(&self, now: Instant) -> bool {
        if !self.page_visible {
            return false;
        }
        !self.dirty.is_empty()
            || self.viewport_dirty
            || self.next_full_scan_at().is_some_and(|at| at <= now)
    }

    pub fn tracked_count(&self) -> usize {
        self.known.len()
    }

    /// 单元当前记录的键
    pub fn key_of(&self, node: &N) -> Option<&NormalizedKey> {
        self.known.get(node).map(|t| &t.key)
    }

    /// 当前可见的已追踪单元
    pub fn visible_units(&self) -> Vec<(N, NormalizedKey)> {
        self.known
            .iter()
            .filter(|(_, t)| t.visible)
            .map(|(node, t)| (node.clone(), t.key.clone()))
            .collect()
    }

    pub fn forget(&mut self, node: &N) {
        self.known.remove(node);
    }

    fn is_visible<T>(&self, tree: &T, node: &N) -> bool
    where
        T: ContentTree<Node = N>,
    {
        // 几何信息未知时视为可见
        match (tree.bounds(node), tree.viewport()) {
            (Some(bounds), Some(viewport)) => viewport.intersects(&bounds, self.margin),
            _ => true,
        }
    }

    /// 处理积累的变化并返回新出现或文本变化的可见单元
    pub fn poll<T>(&mut self, tree: &T, normalizer: &mut KeyNormalizer, now: Instant) -> Vec<UnitEvent<N>>
    where
        T: ContentTree<Node = N>,
    {
        if !self.page_visible {
            return Vec::new();
        }

        let full_scan = self.force_full_scan
            || self
                .last_full_scan
                .map_or(true, |last| now.duration_since(last) >= self.rescan_interval);

        let mut events = Vec::new();
        let mut seen: Vec<N> = Vec::new();

        if full_scan {
            self.dirty.clear();
            self.force_full_scan = false;
            self.last_full_scan = Some(now);

            let found = tree.scan(None);
            for node in &found {
                self.observe(tree, normalizer, node, &mut events);
            }

            let before = self.known.len();
            self.known.retain(|node, _| found.contains(node));
            let pruned = before - self.known.len();
            if pruned > 0 {
                tracing::debug!("完整重扫移除 {} 个已分离单元", pruned);
            }
            seen = found;
        } else {
            for scope in std::mem::take(&mut self.dirty) {
                for node in tree.scan(Some(&scope)) {
                    if !seen.contains(&node) {
                        self.observe(tree, normalizer, &node, &mut events);
                        seen.push(node);
                    }
                }
            }
        }

        if self.viewport_dirty || full_scan {
            self.viewport_dirty = false;
            self.promote_passive(tree, &seen, &mut events);
        }

        events
    }

    fn observe<T>(
        &mut self,
        tree: &T,
        normalizer: &mut KeyNormalizer,
        node: &N,
        events: &mut Vec<UnitEvent<N>>,
    ) where
        T: ContentTree<Node = N>,
    {
        let text = tree.extract_text(node);
        let key = normalizer.normalize(&text);
        let visible = self.is_visible(tree, node);

        match self.known.get_mut(node) {
            Some(tracked) => {
                let text_changed = tracked.key != key;
                if text_changed {
                    tracked.key = key.clone();
                }

                let change = if tracked.visible {
                    text_changed.then_some(UnitChange::TextChanged)
                } else if visible {
                    tracked.visible = true;
                    let change = if text_changed || tracked.changed_while_passive {
                        UnitChange::TextChanged
                    } else {
                        UnitChange::Appeared
                    };
                    tracked.changed_while_passive = false;
                    Some(change)
                } else {
                    if text_changed {
                        tracked.changed_while_passive = true;
                    }
                    None
                };

                if let Some(change) = change {
                    events.push(UnitEvent {
                        unit: TextUnit {
                            node: node.clone(),
                            text,
                        },
                        key,
                        change,
                    });
                }
            }
            None => {
                self.known.insert(
                    node.clone(),
                    TrackedUnit {
                        key: key.clone(),
                        visible,
                        changed_while_passive: false,
                    },
                );
                if visible {
                    events.push(UnitEvent {
                        unit: TextUnit {
                            node: node.clone(),
                            text,
                        },
                        key,
                        change: UnitChange::Appeared,
                    });
                }
            }
        }
    }

    /// 把进入扩展视口的被动单元提升为可见
    fn promote_passive<T>(&mut self, tree: &T, already: &[N], events: &mut Vec<UnitEvent<N>>)
    where
        T: ContentTree<Node = N>,
    {
        let candidates: Vec<N> = self
            .known
            .iter()
            .filter(|(_, t)| !t.visible)
            .map(|(node, _)| node.clone())
            .collect();

        for node in candidates {
            if already.contains(&node) {
                continue;
            }
            if !self.is_visible(tree, &node) || !tree.is_attached(&node) {
                continue;
            }
            let Some(tracked) = self.known.get_mut(&node) else {
                continue;
            };
            tracked.visible = true;
            let change = if tracked.changed_while_passive {
                UnitChange::TextChanged
            } else {
                UnitChange::Appeared
            };
            tracked.changed_while_passive = false;
            let key = tracked.key.clone();

            let text = tree.extract_text(&node);
            events.push(UnitEvent {
                unit: TextUnit { node, text },
                key,
                change,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::pipeline::host::{UnitBounds, Viewport};

    #[derive(Default)]
    struct ListTree {
        units: Vec<(u32, String, Option<UnitBounds>)>,
        viewport: Option<Viewport>,
    }

    impl ContentTree for ListTree {
        type Node = u32;

        fn scan(&self, scope: Option<&u32>) -> Vec<u32> {
            self.units
                .iter()
                .filter(|(id, _, _)| scope.map_or(true, |s| s == id))
                .map(|(id, _, _)| *id)
                .collect()
        }

        fn extract_text(&self, node: &u32) -> String {
            self.units
                .iter()
                .find(|(id, _, _)| id == node)
                .map(|(_, text, _)| text.clone())
                .unwrap_or_default()
        }

        fn is_attached(&self, node: &u32) -> bool {
            self.units.iter().any(|(id, _, _)| id == node)
        }

        fn bounds(&self, node: &u32) -> Option<UnitBounds> {
            self.units
                .iter()
                .find(|(id, _, _)| id == node)
                .and_then(|(_, _, b)| *b)
        }

        fn viewport(&self) -> Option<Viewport> {
            self.viewport
        }
    }

    fn normalizer() -> KeyNormalizer {
        KeyNormalizer::new(100, Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_poll_full_scan_then_scoped() {
        let mut tree = ListTree::default();
        tree.units.push((1, "こんにちは".into(), None));
        let mut tracker = UnitTracker::new(Duration::from_millis(500), 0.0);
        let mut norm = normalizer();

        let events = tracker.poll(&tree, &mut norm, Instant::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].change, UnitChange::Appeared);

        // 未到节流时间且无变化通知时不扫描
        tree.units.push((2, "さよなら".into(), None));
        assert!(tracker.poll(&tree, &mut norm, Instant::now()).is_empty());

        tracker.notify_changed(2);
        let events = tracker.poll(&tree, &mut norm, Instant::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].unit.node, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_full_rescan_catches_missed_changes() {
        let mut tree = ListTree::default();
        tree.units.push((1, "一".into(), None));
        let mut tracker = UnitTracker::new(Duration::from_millis(500), 0.0);
        let mut norm = normalizer();
        tracker.poll(&tree, &mut norm, Instant::now());

        tree.units[0].1 = "二".into();
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(tracker.has_pending_work(Instant::now()));

        let events = tracker.poll(&tree, &mut norm, Instant::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].change, UnitChange::TextChanged);
        assert_eq!(events[0].unit.text, "二");
    }

    #[tokio::test(start_paused = true)]
    async fn test_whitespace_only_change_is_not_an_event() {
        let mut tree = ListTree::default();
        tree.units.push((1, "こんにちは".into(), None));
        let mut tracker = UnitTracker::new(Duration::from_millis(500), 0.0);
        let mut norm = normalizer();
        tracker.poll(&tree, &mut norm, Instant::now());

        tree.units[0].1 = "  こんにちは \n".into();
        tracker.notify_changed(1);
        assert!(tracker.poll(&tree, &mut norm, Instant::now()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_passive_units_promoted_on_viewport_change() {
        let mut tree = ListTree::default();
        tree.viewport = Some(Viewport::new(0.0, 500.0));
        tree.units.push((1, "上".into(), Some(UnitBounds::new(100.0, 20.0))));
        tree.units.push((2, "下".into(), Some(UnitBounds::new(2000.0, 20.0))));

        let mut tracker = UnitTracker::new(Duration::from_secs(60), 100.0);
        let mut norm = normalizer();
        let events = tracker.poll(&tree, &mut norm, Instant::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].unit.node, 1);
        assert_eq!(tracker.tracked_count(), 2);

        tree.viewport = Some(Viewport::new(1500.0, 500.0));
        tracker.notify_viewport_changed();
        let events = tracker.poll(&tree, &mut norm, Instant::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].unit.node, 2);
        assert_eq!(events[0].change, UnitChange::Appeared);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_page_suspends_and_visible_forces_rescan() {
        let mut tree = ListTree::default();
        tree.units.push((1, "一".into(), None));
        let mut tracker = UnitTracker::new(Duration::from_secs(60), 0.0);
        let mut norm = normalizer();
        tracker.poll(&tree, &mut norm, Instant::now());

        tracker.set_page_visible(false);
        tree.units.push((2, "二".into(), None));
        tracker.notify_changed(2);
        assert!(!tracker.has_pending_work(Instant::now()));
        assert!(tracker.poll(&tree, &mut norm, Instant::now()).is_empty());

        tracker.set_page_visible(true);
        let events = tracker.poll(&tree, &mut norm, Instant::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].unit.node, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_rescan_prunes_detached() {
        let mut tree = ListTree::default();
        tree.units.push((1, "一".into(), None));
        tree.units.push((2, "二".into(), None));
        let mut tracker = UnitTracker::new(Duration::from_millis(10), 0.0);
        let mut norm = normalizer();
        tracker.poll(&tree, &mut norm, Instant::now());

        tree.units.remove(0);
        tracker.request_full_scan();
        tracker.poll(&tree, &mut norm, Instant::now());
        assert_eq!(tracker.tracked_count(), 1);
        assert!(tracker.key_of(&1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_reemits_known_units() {
        let mut tree = ListTree::default();
        tree.units.push((1, "一".into(), None));
        let mut tracker = UnitTracker::new(Duration::from_millis(500), 0.0);
        let mut norm = normalizer();
        tracker.poll(&tree, &mut norm, Instant::now());

        tracker.request_full_scan();
        assert!(tracker.poll(&tree, &mut norm, Instant::now()).is_empty());

        tracker.reset();
        let events = tracker.poll(&tree, &mut norm, Instant::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].change, UnitChange::Appeared);
    }
}
