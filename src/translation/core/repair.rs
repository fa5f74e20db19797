//! 模型输出修复
//!
//! 模型偶尔返回语法无效的 JSON，最常见的是译文中出现未转义的双引号。
//! 这里只做一次针对性的字符串替换，修复失败的批次按整批失败处理。

use std::sync::OnceLock;

use regex::Regex;

static ENTRY_BOUNDARY: OnceLock<Option<Regex>> = OnceLock::new();
static OBJECT_OPEN: OnceLock<Option<Regex>> = OnceLock::new();
static OBJECT_CLOSE: OnceLock<Option<Regex>> = OnceLock::new();
static ENTRY_LINE: OnceLock<Option<Regex>> = OnceLock::new();

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// 截取第一个 `{` 到最后一个 `}` 之间的内容，去掉代码块围栏和前后说明文字
fn extract_object(raw: &str) -> &str {
    match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => raw.trim(),
    }
}

/// 每个条目独占一行
fn split_entries(body: &str) -> String {
    let mut out = body.to_string();
    if let Some(re) = cached(&ENTRY_BOUNDARY, r#""\s*,\s*"(id_\d+)"\s*:"#) {
        out = re.replace_all(&out, "\",\n\"$1\":").into_owned();
    }
    if let Some(re) = cached(&OBJECT_OPEN, r#"^\{\s*"(id_\d+)""#) {
        out = re.replace(&out, "{\n\"$1\"").into_owned();
    }
    // 同时去掉末尾多余的逗号
    if let Some(re) = cached(&OBJECT_CLOSE, r#""\s*,?\s*\}\s*$"#) {
        out = re.replace(&out, "\"\n}").into_owned();
    }
    out
}

fn escape_inner_quotes(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 8);
    let mut escaped = false;
    for c in value.chars() {
        if c == '"' && !escaped {
            out.push('\\');
        }
        escaped = c == '\\' && !escaped;
        out.push(c);
    }
    out
}

fn repair_line(line: &str) -> String {
    let Some(re) = cached(&ENTRY_LINE, r#"^(\s*"id_\d+"\s*:\s*")(.*)"(\s*,?\s*)$"#) else {
        return line.to_string();
    };
    match re.captures(line) {
        Some(caps) => format!(
            "{}{}\"{}",
            &caps[1],
            escape_inner_quotes(&caps[2]),
            &caps[3]
        ),
        None => line.to_string(),
    }
}

/// 尽力修复模型返回的 JSON 对象文本
pub fn attempt_repair(raw: &str) -> String {
    let body = split_entries(extract_object(raw));
    body.lines().map(repair_line).collect::<Vec<_>>().join("\n")
}
