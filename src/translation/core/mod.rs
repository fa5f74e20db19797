//! 翻译系统核心模块
//!
//! 管道上下文与调度相关组件：
//!
//! - **服务层** (`service.rs`): `TranslationPipeline`，拥有全部状态并驱动运行循环
//! - **调度器** (`dispatcher.rs`): 最小请求间隔、退避与批次结局分类
//! - **提供商** (`provider.rs`): OpenAI 兼容的 chat-completions 客户端
//! - **修复** (`repair.rs`): 无效 JSON 的一次性修复
//! - **智能跳过** (`smart_skip.rs`): 单向的抑制开关
//!
//! ## 模块依赖关系
//!
//! ```text
//! TranslationPipeline (service.rs)
//!     ├── UnitTracker / TranslationQueue / Reconciler (pipeline/)
//!     ├── TranslationCache / KeyValueStore (storage/)
//!     ├── SmartSkipController (smart_skip.rs)
//!     └── Dispatcher (dispatcher.rs)
//!             ├── TranslationProvider (provider.rs)
//!             └── attempt_repair (repair.rs)
//! ```

pub mod dispatcher;
pub mod provider;
pub mod repair;
pub mod service;
pub mod smart_skip;

pub use dispatcher::{parse_results, BatchOutcome, Dispatcher, DispatcherState, SKIP_MARKER};
pub use provider::{
    system_prompt, BackoffPolicy, ChatCompletionsProvider, SamplingParams, TranslationProvider,
    TranslationRequest,
};
pub use repair::attempt_repair;
pub use service::{
    BatchReport, EnqueueOutcome, HostEvent, PipelineStats, PipelineStatus, TranslationPipeline,
};
pub use smart_skip::{SkipState, SkipStats, SmartSkipController};
