//! 宿主页面接口
//!
//! 管道只通过两个原语与宿主交互：节点发现（`ContentTree`）与内容注入（`ContentInjector`）。

use std::fmt::Debug;
use std::hash::Hash;

/// 一个文本单元：活动节点引用加上提取出的纯文本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextUnit<N> {
    pub node: N,
    pub text: String,
}

/// 单元在页面坐标系中的位置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitBounds {
    pub top: f64,
    pub height: f64,
}

impl UnitBounds {
    pub fn new(top: f64, height: f64) -> Self {
        Self { top, height }
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn is_zero_size(&self) -> bool {
        self.height <= 0.0
    }
}

/// 当前视口
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub top: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(top: f64, height: f64) -> Self {
        Self { top, height }
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// 单元是否与按 `margin` 扩展后的视口相交
    pub fn intersects(&self, bounds: &UnitBounds, margin: f64) -> bool {
        bounds.bottom() >= self.top - margin && bounds.top <= self.bottom() + margin
    }
}

/// 调度优先级，数值越小越先发送
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityTier {
    OnScreen = 0,
    BelowFold = 1,
    AboveFold = 2,
    Detached = 3,
}

impl PriorityTier {
    /// 按位置计算优先级；缺少几何信息或尺寸为零时排在最后
    pub fn classify(bounds: Option<UnitBounds>, viewport: Option<Viewport>) -> Self {
        match (bounds, viewport) {
            (Some(b), Some(v)) if !b.is_zero_size() => {
                if v.intersects(&b, 0.0) {
                    PriorityTier::OnScreen
                } else if b.top > v.bottom() {
                    PriorityTier::BelowFold
                } else {
                    PriorityTier::AboveFold
                }
            }
            _ => PriorityTier::Detached,
        }
    }
}

/// 节点发现
pub trait ContentTree {
    type Node: Clone + Eq + Hash + Debug;

    /// 扫描文本单元；`scope` 为 `None` 时扫描整个文档，否则只扫描该子树
    fn scan(&self, scope: Option<&Self::Node>) -> Vec<Self::Node>;

    /// 提取节点当前的纯文本
    fn extract_text(&self, node: &Self::Node) -> String;

    /// 节点是否仍挂在活动文档上
    fn is_attached(&self, node: &Self::Node) -> bool;

    /// 节点位置，未知时为 `None`
    fn bounds(&self, node: &Self::Node) -> Option<UnitBounds>;

    /// 当前视口，未知时为 `None`
    fn viewport(&self) -> Option<Viewport>;
}

/// 内容注入
pub trait ContentInjector<N> {
    /// 在单元旁渲染译文，不改动单元自身
    fn render_result(&mut self, node: &N, text: &str);

    /// 单元当前显示的译文
    fn rendered_text(&self, node: &N) -> Option<String>;

    /// 清除单元的译文
    fn clear_rendered(&mut self, node: &N);

    /// 清除所有译文
    fn clear_all_rendered(&mut self);
}
