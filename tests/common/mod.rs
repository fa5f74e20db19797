// 集成测试公共模块
//
// 提供脚本化的提供商、内存宿主和配置辅助工具

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use lyrics_translator::translation::{
    ContentInjector, ContentTree, MemoryStore, TranslationConfig, TranslationError,
    TranslationPipeline, TranslationProvider, TranslationRequest, TranslationResult, UnitBounds,
    Viewport,
};

// ============================================================================
// 脚本化提供商
// ============================================================================

/// 按顺序返回预设响应并记录收到的请求
#[derive(Clone, Default)]
pub struct MockProvider {
    responses: Arc<Mutex<VecDeque<TranslationResult<String>>>>,
    requests: Arc<Mutex<Vec<TranslationRequest>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, body: &str) {
        self.responses.lock().unwrap().push_back(Ok(body.to_string()));
    }

    pub fn push_err(&self, err: TranslationError) {
        self.responses.lock().unwrap().push_back(Err(err));
    }

    pub fn push_status(&self, status: u16) {
        self.push_err(TranslationError::HttpStatus {
            status,
            retry_after: None,
            message: format!("status {}", status),
        });
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<TranslationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<TranslationRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl TranslationProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn validate(&self) -> TranslationResult<()> {
        Ok(())
    }

    fn translate(&self, request: TranslationRequest) -> BoxFuture<'_, TranslationResult<String>> {
        self.requests.lock().unwrap().push(request);
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TranslationError::NetworkError("没有预设响应".to_string())));
        Box::pin(async move { next })
    }
}

// ============================================================================
// 内存宿主
// ============================================================================

#[derive(Debug, Clone)]
pub struct FakeUnit {
    pub text: String,
    pub attached: bool,
    pub bounds: Option<UnitBounds>,
}

/// 以 `u32` 作为节点标识的内存宿主
#[derive(Debug, Default)]
pub struct FakeHost {
    units: Vec<(u32, FakeUnit)>,
    next_id: u32,
    pub viewport: Option<Viewport>,
    pub rendered: HashMap<u32, String>,
    pub render_calls: usize,
    pub clear_all_calls: usize,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// 按顺序添加多行，节点编号从 1 开始
    pub fn with_lines(lines: &[&str]) -> Self {
        let mut host = Self::new();
        for line in lines {
            host.add_line(line);
        }
        host
    }

    pub fn add_line(&mut self, text: &str) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.units.push((
            id,
            FakeUnit {
                text: text.to_string(),
                attached: true,
                bounds: None,
            },
        ));
        id
    }

    fn unit_mut(&mut self, id: u32) -> &mut FakeUnit {
        self.units
            .iter_mut()
            .find(|(node, _)| *node == id)
            .map(|(_, unit)| unit)
            .expect("unknown node")
    }

    pub fn set_text(&mut self, id: u32, text: &str) {
        self.unit_mut(id).text = text.to_string();
    }

    pub fn detach(&mut self, id: u32) {
        self.unit_mut(id).attached = false;
    }

    pub fn set_bounds(&mut self, id: u32, top: f64, height: f64) {
        self.unit_mut(id).bounds = Some(UnitBounds::new(top, height));
    }

    pub fn rendered(&self, id: u32) -> Option<&str> {
        self.rendered.get(&id).map(String::as_str)
    }
}

impl ContentTree for FakeHost {
    type Node = u32;

    fn scan(&self, scope: Option<&u32>) -> Vec<u32> {
        self.units
            .iter()
            .filter(|(node, unit)| unit.attached && scope.map_or(true, |s| s == node))
            .map(|(node, _)| *node)
            .collect()
    }

    fn extract_text(&self, node: &u32) -> String {
        self.units
            .iter()
            .find(|(id, _)| id == node)
            .map(|(_, unit)| unit.text.clone())
            .unwrap_or_default()
    }

    fn is_attached(&self, node: &u32) -> bool {
        self.units
            .iter()
            .any(|(id, unit)| id == node && unit.attached)
    }

    fn bounds(&self, node: &u32) -> Option<UnitBounds> {
        self.units
            .iter()
            .find(|(id, _)| id == node)
            .and_then(|(_, unit)| unit.bounds)
    }

    fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }
}

impl ContentInjector<u32> for FakeHost {
    fn render_result(&mut self, node: &u32, text: &str) {
        self.render_calls += 1;
        self.rendered.insert(*node, text.to_string());
    }

    fn rendered_text(&self, node: &u32) -> Option<String> {
        self.rendered.get(node).cloned()
    }

    fn clear_rendered(&mut self, node: &u32) {
        self.rendered.remove(node);
    }

    fn clear_all_rendered(&mut self) {
        self.clear_all_calls += 1;
        self.rendered.clear();
    }
}

// ============================================================================
// 配置与构造辅助
// ============================================================================

/// 带测试密钥的默认配置
pub fn test_config() -> TranslationConfig {
    let mut config = TranslationConfig::default_with_lang("en");
    config.api_key = Some("sk-test".to_string());
    config
}

/// 使用内存存储创建管道
pub fn pipeline_with(provider: &MockProvider, config: TranslationConfig) -> TranslationPipeline<u32> {
    TranslationPipeline::new(config, Box::new(provider.clone()), Box::new(MemoryStore::new()))
        .expect("pipeline")
}

pub fn default_pipeline(provider: &MockProvider) -> TranslationPipeline<u32> {
    pipeline_with(provider, test_config())
}

/// 构造 `{"id_1": "..."}` 形式的响应
pub fn response(pairs: &[(&str, &str)]) -> String {
    let map: serde_json::Map<String, serde_json::Value> = pairs
        .iter()
        .map(|(id, text)| (id.to_string(), serde_json::Value::String(text.to_string())))
        .collect();
    serde_json::Value::Object(map).to_string()
}
