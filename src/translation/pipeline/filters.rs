//! 文本过滤器模块
//!
//! 语言启发式：判断一行文本是否需要送去翻译。不含任何源语言文字、为空、
//! 仅由符号数字组成或是 URL 的文本直接判定为跳过，不消耗请求额度。

use std::sync::OnceLock;

use regex::Regex;

/// 文字体系
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptFamily {
    /// 平假名、片假名
    Kana,
    /// 汉字
    Han,
    /// 谚文
    Hangul,
    Cyrillic,
    Thai,
}

impl ScriptFamily {
    /// 字符是否属于该文字体系
    pub fn contains(&self, c: char) -> bool {
        match self {
            ScriptFamily::Kana => {
                ('\u{3040}'..='\u{309f}').contains(&c)
                    || ('\u{30a0}'..='\u{30ff}').contains(&c)
                    || ('\u{31f0}'..='\u{31ff}').contains(&c)
                    || ('\u{ff66}'..='\u{ff9f}').contains(&c)
            }
            ScriptFamily::Han => {
                ('\u{4e00}'..='\u{9fff}').contains(&c)
                    || ('\u{3400}'..='\u{4dbf}').contains(&c)
                    || ('\u{f900}'..='\u{faff}').contains(&c)
            }
            ScriptFamily::Hangul => {
                ('\u{ac00}'..='\u{d7af}').contains(&c)
                    || ('\u{1100}'..='\u{11ff}').contains(&c)
                    || ('\u{3130}'..='\u{318f}').contains(&c)
            }
            ScriptFamily::Cyrillic => ('\u{0400}'..='\u{04ff}').contains(&c),
            ScriptFamily::Thai => ('\u{0e00}'..='\u{0e7f}').contains(&c),
        }
    }

    /// 语言提示对应的文字体系
    pub fn for_language(lang: &str) -> &'static [ScriptFamily] {
        let primary = lang.split(['-', '_']).next().unwrap_or("").to_lowercase();
        match primary.as_str() {
            "ja" => &[ScriptFamily::Kana, ScriptFamily::Han],
            "zh" => &[ScriptFamily::Han],
            "ko" => &[ScriptFamily::Hangul],
            "ru" | "uk" | "be" | "bg" | "sr" => &[ScriptFamily::Cyrillic],
            "th" => &[ScriptFamily::Thai],
            _ => &[],
        }
    }
}

/// 跳过原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    SymbolsOnly,
    Url,
    NoSourceScript,
}

/// 过滤结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Translate,
    Skip(SkipReason),
}

/// 文本过滤器
#[derive(Debug, Clone)]
pub struct TextFilter {
    families: Vec<ScriptFamily>,
}

fn url_regex() -> Option<&'static Regex> {
    static URL_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    URL_REGEX
        .get_or_init(|| Regex::new(r"^(?:(?:https?|ftp)://|www\.)\S+$").ok())
        .as_ref()
}

impl TextFilter {
    /// 使用指定文字体系创建
    pub fn new(families: Vec<ScriptFamily>) -> Self {
        Self { families }
    }

    /// 根据源语言提示创建，未识别的提示被忽略；全部无法识别时使用日中韩
    pub fn from_hints<S: AsRef<str>>(hints: &[S]) -> Self {
        let mut families = Vec::new();
        for hint in hints {
            for family in ScriptFamily::for_language(hint.as_ref()) {
                if !families.contains(family) {
                    families.push(*family);
                }
            }
        }

        if families.is_empty() {
            return Self::default();
        }
        Self { families }
    }

    pub fn families(&self) -> &[ScriptFamily] {
        &self.families
    }

    /// 分类文本
    pub fn classify(&self, text: &str) -> FilterDecision {
        let trimmed = text.trim();

        if trimmed.is_empty() {
            return FilterDecision::Skip(SkipReason::Empty);
        }

        if self.is_url(trimmed) {
            return FilterDecision::Skip(SkipReason::Url);
        }

        if self.is_pure_symbols_or_numbers(trimmed) {
            return FilterDecision::Skip(SkipReason::SymbolsOnly);
        }

        if !self.has_source_script(trimmed) {
            return FilterDecision::Skip(SkipReason::NoSourceScript);
        }

        FilterDecision::Translate
    }

    /// 判断文本是否需要翻译
    pub fn should_translate(&self, text: &str) -> bool {
        self.classify(text) == FilterDecision::Translate
    }

    fn has_source_script(&self, text: &str) -> bool {
        text.chars()
            .any(|c| self.families.iter().any(|family| family.contains(c)))
    }

    fn is_url(&self, text: &str) -> bool {
        if text.starts_with("http://") || text.starts_with("https://") {
            return !text.contains(char::is_whitespace);
        }

        url_regex().is_some_and(|re| re.is_match(text))
    }

    /// 只有数字、标点、符号或空白
    fn is_pure_symbols_or_numbers(&self, text: &str) -> bool {
        text.chars().all(|c| !c.is_alphabetic())
    }
}

impl Default for TextFilter {
    fn default() -> Self {
        Self::new(vec![ScriptFamily::Kana, ScriptFamily::Han, ScriptFamily::Hangul])
    }
}
