//! 结果回写
//!
//! 结果先写入缓存，再渲染到发起请求的单元上。单元在请求期间可能已被替换或移除，
//! 此时按当前文本的规范化键在活动单元中重新查找。

use tracing::debug;

use super::host::{ContentInjector, ContentTree};
use super::normalizer::{KeyNormalizer, NormalizedKey};
use crate::translation::storage::{CacheValue, TranslationCache};

/// 回写统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub rendered: u64,
    pub fallback_lookups: u64,
    pub abandoned: u64,
}

/// 按规范化键在活动单元中查找
pub fn find_live_units_by_key<T>(
    tree: &T,
    normalizer: &mut KeyNormalizer,
    key: &NormalizedKey,
) -> Vec<T::Node>
where
    T: ContentTree,
{
    tree.scan(None)
        .into_iter()
        .filter(|node| normalizer.normalize(&tree.extract_text(node)) == *key)
        .collect()
}

/// 已显示相同译文时不重复渲染
pub fn render_idempotent<H>(host: &mut H, node: &H::Node, text: &str) -> bool
where
    H: ContentTree + ContentInjector<<H as ContentTree>::Node>,
{
    if host.rendered_text(node).as_deref() == Some(text) {
        return false;
    }
    host.render_result(node, text);
    true
}

/// 结果回写器
#[derive(Debug, Default)]
pub struct Reconciler {
    stats: ReconcileStats,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ReconcileStats {
        self.stats
    }

    /// 写缓存，`render` 为真时再渲染
    ///
    /// 智能跳过生效的批次只写缓存，不渲染。
    #[allow(clippy::too_many_arguments)]
    pub fn apply<H>(
        &mut self,
        host: &mut H,
        cache: &mut TranslationCache,
        normalizer: &mut KeyNormalizer,
        key: &NormalizedKey,
        units: &[H::Node],
        value: CacheValue,
        render: bool,
    ) -> usize
    where
        H: ContentTree + ContentInjector<<H as ContentTree>::Node>,
    {
        cache.put(key.clone(), value.clone());
        match value.translation() {
            Some(text) if render => self.render(host, normalizer, key, units, text),
            _ => 0,
        }
    }

    /// 渲染到所有仍然匹配该键的单元
    ///
    /// 原单元全部失效时回退到按键查找；仍找不到则放弃渲染，缓存保持不变。
    pub fn render<H>(
        &mut self,
        host: &mut H,
        normalizer: &mut KeyNormalizer,
        key: &NormalizedKey,
        units: &[H::Node],
        text: &str,
    ) -> usize
    where
        H: ContentTree + ContentInjector<<H as ContentTree>::Node>,
    {
        let mut targets: Vec<H::Node> = Vec::with_capacity(units.len());
        let mut stale = false;

        for unit in units {
            if host.is_attached(unit) && normalizer.normalize(&host.extract_text(unit)) == *key {
                if !targets.contains(unit) {
                    targets.push(unit.clone());
                }
            } else {
                stale = true;
            }
        }

        if stale {
            self.stats.fallback_lookups += 1;
            for node in find_live_units_by_key(&*host, normalizer, key) {
                if !targets.contains(&node) {
                    targets.push(node);
                }
            }
        }

        if targets.is_empty() {
            self.stats.abandoned += 1;
            debug!("没有匹配的活动单元，结果仅写入缓存: {}", key);
            return 0;
        }

        let mut rendered = 0;
        for node in &targets {
            if render_idempotent(host, node, text) {
                rendered += 1;
            }
        }
        self.stats.rendered += rendered as u64;
        rendered
    }

    /// 一致性检查：把缓存中的译文补到可见单元上
    pub fn reconcile_visible<H>(
        &mut self,
        host: &mut H,
        cache: &TranslationCache,
        normalizer: &mut KeyNormalizer,
        visible: &[(H::Node, NormalizedKey)],
    ) -> usize
    where
        H: ContentTree + ContentInjector<<H as ContentTree>::Node>,
    {
        let mut rendered = 0;
        for (node, key) in visible {
            let Some(text) = cache.peek(key).and_then(CacheValue::translation) else {
                continue;
            };
            if !host.is_attached(node) || normalizer.normalize(&host.extract_text(node)) != *key {
                continue;
            }
            if render_idempotent(host, node, text) {
                rendered += 1;
            }
        }

        if rendered > 0 {
            debug!("一致性检查补渲染 {} 个单元", rendered);
        }
        self.stats.rendered += rendered as u64;
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::pipeline::dom::DomTree;
    use crate::translation::pipeline::normalizer::normalize_text;
    use std::time::Duration;

    const PAGE: &str = r#"<html><body>
        <p class="lyrics-line">こんにちは</p>
        <p class="lyrics-line">さようなら</p>
        <p class="lyrics-line">こんにちは</p>
    </body></html>"#;

    fn setup() -> (DomTree, TranslationCache, KeyNormalizer) {
        let tree = DomTree::parse(PAGE, "lyrics-line").unwrap();
        (
            tree,
            TranslationCache::new(100, "en"),
            KeyNormalizer::new(100, Duration::from_secs(30)),
        )
    }

    #[test]
    fn test_apply_caches_and_renders_once() {
        let (mut tree, mut cache, mut normalizer) = setup();
        let units = tree.scan(None);
        let key = normalize_text("こんにちは");
        let mut reconciler = Reconciler::new();

        let value = CacheValue::Translated("Hello".to_string());
        let rendered = reconciler.apply(
            &mut tree,
            &mut cache,
            &mut normalizer,
            &key,
            &[units[0].clone(), units[2].clone()],
            value.clone(),
            true,
        );
        assert_eq!(rendered, 2);
        assert_eq!(cache.peek(&key), Some(&value));
        assert_eq!(tree.rendered_text(&units[0]).as_deref(), Some("Hello"));

        // 相同结果再次应用不会重复渲染
        let again = reconciler.apply(
            &mut tree,
            &mut cache,
            &mut normalizer,
            &key,
            &units[..1],
            value,
            true,
        );
        assert_eq!(again, 0);
        assert!(tree.rendered_text(&units[1]).is_none());
    }

    #[test]
    fn test_skip_value_is_cached_not_rendered() {
        let (mut tree, mut cache, mut normalizer) = setup();
        let units = tree.scan(None);
        let key = normalize_text("さようなら");
        let mut reconciler = Reconciler::new();

        let rendered = reconciler.apply(
            &mut tree,
            &mut cache,
            &mut normalizer,
            &key,
            &units[1..2],
            CacheValue::Skip,
            true,
        );
        assert_eq!(rendered, 0);
        assert!(cache.peek(&key).is_some_and(CacheValue::is_skip));
        assert!(tree.rendered_text(&units[1]).is_none());
    }

    #[test]
    fn test_cache_only_apply_leaves_units_untouched() {
        let (mut tree, mut cache, mut normalizer) = setup();
        let units = tree.scan(None);
        let key = normalize_text("こんにちは");
        let mut reconciler = Reconciler::new();

        let value = CacheValue::Translated("Hello".to_string());
        let rendered = reconciler.apply(
            &mut tree,
            &mut cache,
            &mut normalizer,
            &key,
            &units[..1],
            value.clone(),
            false,
        );
        assert_eq!(rendered, 0);
        assert_eq!(cache.peek(&key), Some(&value));
        assert!(tree.rendered_text(&units[0]).is_none());
        assert_eq!(reconciler.stats().rendered, 0);
    }

    #[test]
    fn test_replaced_unit_found_by_key() {
        let (mut tree, mut cache, mut normalizer) = setup();
        let units = tree.scan(None);
        let key = normalize_text("さようなら");
        let replacement = tree.replace_unit(&units[1]).unwrap();
        let mut reconciler = Reconciler::new();

        let rendered = reconciler.apply(
            &mut tree,
            &mut cache,
            &mut normalizer,
            &key,
            &units[1..2],
            CacheValue::Translated("Goodbye".to_string()),
            true,
        );
        assert_eq!(rendered, 1);
        assert_eq!(tree.rendered_text(&replacement).as_deref(), Some("Goodbye"));
        assert_eq!(reconciler.stats().fallback_lookups, 1);
    }

    #[test]
    fn test_no_live_unit_abandons_render() {
        let (mut tree, mut cache, mut normalizer) = setup();
        let units = tree.scan(None);
        let key = normalize_text("さようなら");
        tree.remove_unit(&units[1]);
        let mut reconciler = Reconciler::new();

        let rendered = reconciler.apply(
            &mut tree,
            &mut cache,
            &mut normalizer,
            &key,
            &units[1..2],
            CacheValue::Translated("Goodbye".to_string()),
            true,
        );
        assert_eq!(rendered, 0);
        assert!(cache.contains(&key));
        assert_eq!(reconciler.stats().abandoned, 1);
    }

    #[test]
    fn test_reconcile_visible_fills_missing_renders() {
        let (mut tree, mut cache, mut normalizer) = setup();
        let units = tree.scan(None);
        let key = normalize_text("こんにちは");
        cache.put(key.clone(), CacheValue::Translated("Hello".to_string()));
        let mut reconciler = Reconciler::new();

        let visible = vec![
            (units[0].clone(), key.clone()),
            (units[1].clone(), normalize_text("さようなら")),
            (units[2].clone(), key.clone()),
        ];
        assert_eq!(reconciler.reconcile_visible(&mut tree, &cache, &mut normalizer, &visible), 2);
        assert_eq!(reconciler.reconcile_visible(&mut tree, &cache, &mut normalizer, &visible), 0);
    }
}
