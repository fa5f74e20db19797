//! 基于 html5ever / rcdom 的宿主适配器
//!
//! 文本单元是 class 列表包含指定类名的元素。译文渲染在紧随单元之后的标记元素
//! （`data-lyrics-translation`）中，单元自身的子树不被改动。几何信息由宿主通过
//! `set_bounds` / `set_viewport` 提供。

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use encoding_rs::Encoding;
use html5ever::interface::{Attribute, NodeOrText, QualName, TreeSink};
use html5ever::serialize::{serialize, SerializeOpts};
use html5ever::tendril::{format_tendril, StrTendril, TendrilSink};
use html5ever::tree_builder::create_element;
use html5ever::{namespace_url, ns, parse_document, LocalName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};

use super::host::{ContentInjector, ContentTree, UnitBounds, Viewport};
use crate::translation::error::{TranslationError, TranslationResult};

/// 标记元素的属性名
pub const MARKER_ATTR: &str = "data-lyrics-translation";
/// 标记元素的类名
pub const MARKER_CLASS: &str = "lyrics-translation";

/// 节点引用
///
/// 持有弱引用：宿主销毁节点后引用失效，但分配不会被复用，身份比较保持稳定。
#[derive(Clone)]
pub struct DomNode(Weak<Node>);

impl DomNode {
    fn from_handle(handle: &Handle) -> Self {
        DomNode(Rc::downgrade(handle))
    }

    fn upgrade(&self) -> Option<Handle> {
        self.0.upgrade()
    }
}

impl PartialEq for DomNode {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for DomNode {}

impl Hash for DomNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Weak::as_ptr(&self.0) as *const () as usize).hash(state);
    }
}

impl fmt::Debug for DomNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomNode({:p})", Weak::as_ptr(&self.0))
    }
}

/// 将 HTML 字节按指定编码解码并解析为 DOM
pub fn html_to_dom(data: &[u8], document_encoding: &str) -> TranslationResult<RcDom> {
    let s = match Encoding::for_label(document_encoding.as_bytes()) {
        Some(encoding) => encoding.decode(data).0.into_owned(),
        None => String::from_utf8_lossy(data).into_owned(),
    };

    parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut s.as_bytes())
        .map_err(|e| TranslationError::ParseError(format!("HTML解析失败: {}", e)))
}

fn get_node_attr(node: &Handle, attr_name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|attr| &*attr.name.local == attr_name)
            .map(|attr| attr.value.to_string()),
        _ => None,
    }
}

fn get_node_name(node: &Handle) -> Option<&'_ str> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.as_ref()),
        _ => None,
    }
}

fn parent_of(node: &Handle) -> Option<Handle> {
    let weak = node.parent.take();
    let parent = weak.as_ref().and_then(|w| w.upgrade());
    node.parent.set(weak);
    parent
}

fn is_marker(node: &Handle) -> bool {
    get_node_attr(node, MARKER_ATTR).is_some()
}

fn is_blank_text(node: &Handle) -> bool {
    match &node.data {
        NodeData::Text { contents } => contents.borrow().trim().is_empty(),
        _ => false,
    }
}

fn collect_text(node: &Handle, out: &mut String) {
    match &node.data {
        NodeData::Text { contents } => out.push_str(&contents.borrow()),
        NodeData::Element { .. } => {
            if matches!(get_node_name(node), Some("script" | "style")) || is_marker(node) {
                return;
            }
            for child in node.children.borrow().iter() {
                collect_text(child, out);
            }
        }
        _ => {
            for child in node.children.borrow().iter() {
                collect_text(child, out);
            }
        }
    }
}

fn attr(name: &str, value: &str) -> Attribute {
    Attribute {
        name: QualName::new(None, ns!(), LocalName::from(name)),
        value: format_tendril!("{}", value),
    }
}

/// rcdom 文档上的宿主实现
pub struct DomTree {
    dom: RcDom,
    unit_class: String,
    bounds: HashMap<DomNode, UnitBounds>,
    viewport: Option<Viewport>,
}

impl DomTree {
    pub fn new(dom: RcDom, unit_class: &str) -> Self {
        Self {
            dom,
            unit_class: unit_class.to_string(),
            bounds: HashMap::new(),
            viewport: None,
        }
    }

    /// 解析 UTF-8 HTML 文本
    pub fn parse(html: &str, unit_class: &str) -> TranslationResult<Self> {
        Self::from_bytes(html.as_bytes(), "utf-8", unit_class)
    }

    /// 按编码解析 HTML 字节
    pub fn from_bytes(data: &[u8], encoding: &str, unit_class: &str) -> TranslationResult<Self> {
        Ok(Self::new(html_to_dom(data, encoding)?, unit_class))
    }

    pub fn document(&self) -> Handle {
        self.dom.document.clone()
    }

    pub fn set_bounds(&mut self, node: &DomNode, bounds: UnitBounds) {
        self.bounds.insert(node.clone(), bounds);
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
    }

    fn is_unit(&self, node: &Handle) -> bool {
        if is_marker(node) {
            return false;
        }
        get_node_attr(node, "class")
            .map(|class| class.split_whitespace().any(|c| c == self.unit_class))
            .unwrap_or(false)
    }

    fn collect_units(&self, node: &Handle, out: &mut Vec<DomNode>) {
        for child in node.children.borrow().iter() {
            if self.is_unit(child) {
                out.push(DomNode::from_handle(child));
            } else if !is_marker(child) {
                self.collect_units(child, out);
            }
        }
    }

    fn collect_markers(node: &Handle, out: &mut Vec<Handle>) {
        for child in node.children.borrow().iter() {
            if is_marker(child) {
                out.push(child.clone());
            } else {
                Self::collect_markers(child, out);
            }
        }
    }

    /// 单元之后的标记元素（跳过空白文本）
    fn marker_of(&self, unit: &Handle) -> Option<Handle> {
        let parent = parent_of(unit)?;
        let children = parent.children.borrow();
        let position = children.iter().position(|c| Rc::ptr_eq(c, unit))?;
        let marker = children[position + 1..]
            .iter()
            .find(|c| !is_blank_text(c))
            .filter(|c| is_marker(c))
            .cloned();
        marker
    }

    fn next_sibling(unit: &Handle) -> Option<Handle> {
        let parent = parent_of(unit)?;
        let children = parent.children.borrow();
        let position = children.iter().position(|c| Rc::ptr_eq(c, unit))?;
        let next = children.get(position + 1).cloned();
        next
    }

    fn set_text(&self, element: &Handle, text: &str) {
        element.children.borrow_mut().clear();
        self.dom.append(
            element,
            NodeOrText::AppendText(StrTendril::from_slice(text)),
        );
    }

    /// 替换单元的文本内容，模拟宿主更新歌词行
    pub fn replace_text(&mut self, node: &DomNode, text: &str) -> bool {
        match node.upgrade() {
            Some(handle) => {
                self.set_text(&handle, text);
                true
            }
            None => false,
        }
    }

    /// 用内容相同的新元素替换单元，模拟宿主重建节点；旧的标记一并移除
    pub fn replace_unit(&mut self, node: &DomNode) -> Option<DomNode> {
        let old = node.upgrade()?;
        parent_of(&old)?;

        let (name, attrs) = match &old.data {
            NodeData::Element { name, attrs, .. } => (name.clone(), attrs.borrow().clone()),
            _ => return None,
        };

        let mut text = String::new();
        collect_text(&old, &mut text);

        let fresh = create_element(&self.dom, name, attrs);
        self.set_text(&fresh, &text);

        if let Some(marker) = self.marker_of(&old) {
            self.dom.remove_from_parent(&marker);
        }
        self.dom
            .append_before_sibling(&old, NodeOrText::AppendNode(fresh.clone()));
        self.dom.remove_from_parent(&old);

        let fresh_node = DomNode::from_handle(&fresh);
        if let Some(bounds) = self.bounds.remove(node) {
            self.bounds.insert(fresh_node.clone(), bounds);
        }
        Some(fresh_node)
    }

    /// 从文档中移除单元及其标记
    pub fn remove_unit(&mut self, node: &DomNode) -> bool {
        let Some(handle) = node.upgrade() else {
            return false;
        };
        if let Some(marker) = self.marker_of(&handle) {
            self.dom.remove_from_parent(&marker);
        }
        self.dom.remove_from_parent(&handle);
        true
    }

    /// 序列化当前文档
    pub fn to_html(&self) -> TranslationResult<String> {
        let mut buf: Vec<u8> = Vec::new();
        let serializable = SerializableHandle::from(self.dom.document.clone());
        serialize(&mut buf, &serializable, SerializeOpts::default())?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

impl ContentTree for DomTree {
    type Node = DomNode;

    fn scan(&self, scope: Option<&DomNode>) -> Vec<DomNode> {
        let root = match scope {
            Some(node) => match node.upgrade() {
                Some(handle) => handle,
                None => return Vec::new(),
            },
            None => self.dom.document.clone(),
        };

        if scope.is_some() && self.is_unit(&root) {
            return vec![DomNode::from_handle(&root)];
        }

        let mut units = Vec::new();
        self.collect_units(&root, &mut units);
        units
    }

    fn extract_text(&self, node: &DomNode) -> String {
        let mut text = String::new();
        if let Some(handle) = node.upgrade() {
            collect_text(&handle, &mut text);
        }
        text
    }

    fn is_attached(&self, node: &DomNode) -> bool {
        let Some(mut current) = node.upgrade() else {
            return false;
        };

        loop {
            if Rc::ptr_eq(&current, &self.dom.document) {
                return true;
            }
            let Some(parent) = parent_of(&current) else {
                return false;
            };
            let linked = parent
                .children
                .borrow()
                .iter()
                .any(|c| Rc::ptr_eq(c, &current));
            if !linked {
                return false;
            }
            current = parent;
        }
    }

    fn bounds(&self, node: &DomNode) -> Option<UnitBounds> {
        self.bounds.get(node).copied()
    }

    fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }
}

impl ContentInjector<DomNode> for DomTree {
    fn render_result(&mut self, node: &DomNode, text: &str) {
        let Some(unit) = node.upgrade() else {
            return;
        };
        if !self.is_attached(node) {
            return;
        }

        if let Some(marker) = self.marker_of(&unit) {
            self.set_text(&marker, text);
            return;
        }

        let marker = create_element(
            &self.dom,
            QualName::new(None, ns!(), LocalName::from("div")),
            vec![attr("class", MARKER_CLASS), attr(MARKER_ATTR, "")],
        );
        self.set_text(&marker, text);

        match Self::next_sibling(&unit) {
            Some(next) => self
                .dom
                .append_before_sibling(&next, NodeOrText::AppendNode(marker)),
            None => {
                if let Some(parent) = parent_of(&unit) {
                    self.dom.append(&parent, NodeOrText::AppendNode(marker));
                }
            }
        }
    }

    fn rendered_text(&self, node: &DomNode) -> Option<String> {
        let unit = node.upgrade()?;
        let marker = self.marker_of(&unit)?;
        let mut text = String::new();
        for child in marker.children.borrow().iter() {
            collect_text(child, &mut text);
        }
        Some(text)
    }

    fn clear_rendered(&mut self, node: &DomNode) {
        if let Some(unit) = node.upgrade() {
            if let Some(marker) = self.marker_of(&unit) {
                self.dom.remove_from_parent(&marker);
            }
        }
    }

    fn clear_all_rendered(&mut self) {
        let mut markers = Vec::new();
        Self::collect_markers(&self.dom.document, &mut markers);
        for marker in markers {
            self.dom.remove_from_parent(&marker);
        }
    }
}
