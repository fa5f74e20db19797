//! 翻译管道模块
//!
//! 从单元发现到结果回写的各个阶段：
//! - **host**: 宿主接口（节点发现、内容注入）
//! - **dom**: 基于 html5ever 的宿主实现
//! - **normalizer**: 文本规范化与备忘
//! - **tracker**: 增量单元追踪
//! - **filters**: 按文字体系判断是否需要翻译
//! - **queue** / **batch**: 去重队列与批次构建
//! - **reconciler**: 结果回写

pub mod batch;
pub mod dom;
pub mod filters;
pub mod host;
pub mod normalizer;
pub mod queue;
pub mod reconciler;
pub mod tracker;

pub use batch::{Batch, BatchItem};
pub use dom::{DomNode, DomTree};
pub use filters::{FilterDecision, ScriptFamily, SkipReason, TextFilter};
pub use host::{ContentInjector, ContentTree, PriorityTier, TextUnit, UnitBounds, Viewport};
pub use normalizer::{normalize_text, KeyNormalizer, NormalizedKey};
pub use queue::{EnqueueResult, QueueItem, TranslationQueue};
pub use reconciler::{find_live_units_by_key, render_idempotent, ReconcileStats, Reconciler};
pub use tracker::{UnitChange, UnitEvent, UnitTracker};
