//! A small CSS parser that merges rules by selector.
//!
//! Stylesheets become nested maps of selector or `@media` query to declarations. Merging
//! two maps unions their selectors, with later declarations replacing earlier ones.
//! Serialization sorts keys, so output is stable regardless of input order.

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use tracing::debug;

/// Key under which unparseable input is kept, wrapped so it stays a CSS comment.
pub const ERROR_MARKER: &str = "/* CSS Parser: ";

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?s)^\s*(?:",
        r"@media\s*([^{]+)\s*\{",
        r"|([^{}]*[^{}\s])\s*\{",
        r"|([^{:\s]+)\s*:\s*([^;}]+);?",
        r"|(\})",
        r")(.*)"
    ))
    .expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CssNode {
    Decl(String),
    Block(BTreeMap<String, CssNode>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stylesheet {
    rules: BTreeMap<String, CssNode>,
}

impl Stylesheet {
    pub fn parse(text: &str) -> Self {
        let (rules, _) = parse_block(text);
        Self { rules }
    }

    pub fn merge(&mut self, other: Stylesheet) {
        merge_into(&mut self.rules, other.rules);
    }

    pub fn rules(&self) -> &BTreeMap<String, CssNode> {
        &self.rules
    }
}

impl fmt::Display for Stylesheet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_block(f, &self.rules)
    }
}

/// Parse declarations and nested rules until a closing brace or the end of input.
fn parse_block(mut rest: &str) -> (BTreeMap<String, CssNode>, &str) {
    let mut block = BTreeMap::new();
    while !rest.trim().is_empty() {
        let Some(caps) = TOKEN_RE.captures(rest) else {
            let (skipped, after) = skip(rest);
            debug!(skipped, "Unparseable CSS");
            block.insert(
                ERROR_MARKER.to_string(),
                CssNode::Decl(format!("Parse error > */{}/* < */", skipped)),
            );
            rest = after;
            continue;
        };
        let tail = caps.get(6).map_or("", |m| m.as_str());

        if let Some(query) = caps.get(1) {
            let (inner, after) = parse_block(tail);
            let key = format!("@media {}", query.as_str().trim());
            merge_into(&mut block, BTreeMap::from([(key, CssNode::Block(inner))]));
            rest = after;
        } else if let Some(selector) = caps.get(2) {
            let (inner, after) = parse_block(tail);
            let key = selector.as_str().trim().to_string();
            merge_into(&mut block, BTreeMap::from([(key, CssNode::Block(inner))]));
            rest = after;
        } else if let (Some(name), Some(value)) = (caps.get(3), caps.get(4)) {
            block.insert(
                name.as_str().to_string(),
                CssNode::Decl(value.as_str().trim().to_string()),
            );
            rest = tail;
        } else {
            // Closing brace
            return (block, tail);
        }
    }
    (block, rest)
}

/// Drop input up to and including the next `;`, or up to the next `}`.
fn skip(text: &str) -> (&str, &str) {
    match text.find([';', '}']) {
        Some(i) if text.as_bytes()[i] == b';' => (text[..=i].trim(), &text[i + 1..]),
        Some(i) => (text[..i].trim(), &text[i..]),
        None => (text.trim(), ""),
    }
}

fn merge_into(target: &mut BTreeMap<String, CssNode>, source: BTreeMap<String, CssNode>) {
    for (key, node) in source {
        if let CssNode::Block(incoming) = node {
            if let Some(CssNode::Block(existing)) = target.get_mut(&key) {
                merge_into(existing, incoming);
                continue;
            }
            target.insert(key, CssNode::Block(incoming));
        } else {
            target.insert(key, node);
        }
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, block: &BTreeMap<String, CssNode>) -> fmt::Result {
    for (key, node) in block {
        f.write_str(key)?;
        match node {
            CssNode::Decl(value) if key == ERROR_MARKER => f.write_str(value)?,
            CssNode::Decl(value) => write!(f, ": {};", value)?,
            CssNode::Block(inner) => {
                f.write_str(" {")?;
                write_block(f, inner)?;
                f.write_str("}")?;
            }
        }
    }
    Ok(())
}
