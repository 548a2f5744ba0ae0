//! A compact textual tree notation for fixtures, tests and benches.
//!
//! ```text
//! node  := atom ( "(" node ( "," node )* ")" )?
//! atom  := name ( ":" label )?
//! label := name | "\"" escaped text "\""
//! ```
//!
//! `a(b(c,d),e)` builds a tree whose type names are also the labels. Type
//! names are interned into [`NodeType`] tags by a [`TypeTable`], so both trees
//! of a pair must be parsed with the same table.

use rapidhash::RapidHashMap as HashMap;

use crate::error::{MatchError, Result};
use crate::tree::{DiffTree, NodeId, NodeType, Tree, TreeBuilder};

/// Interns type names into [`NodeType`] tags.
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    by_name: HashMap<String, NodeType>,
    names: Vec<String>,
}

impl TypeTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag for `name`, allocating one on first use.
    pub fn intern(&mut self, name: &str) -> NodeType {
        if let Some(&ty) = self.by_name.get(name) {
            return ty;
        }
        let ty = NodeType(self.names.len() as u32);
        self.names.push(name.to_owned());
        self.by_name.insert(name.to_owned(), ty);
        ty
    }

    /// Tag for `name` if it was interned.
    pub fn get(&self, name: &str) -> Option<NodeType> {
        self.by_name.get(name).copied()
    }

    /// Name of an interned tag.
    pub fn name(&self, ty: NodeType) -> Option<&str> {
        self.names.get(ty.0 as usize).map(String::as_str)
    }

    /// Parse a tree from notation, interning its type names.
    pub fn parse(&mut self, text: &str) -> Result<Tree> {
        let mut parser = Parser {
            chars: text.char_indices().collect(),
            pos: 0,
            types: self,
        };
        parser.skip_ws();
        let (ty, label) = parser.atom()?;
        let mut builder = TreeBuilder::new(ty, label);
        let root = builder.root();
        parser.children(&mut builder, root)?;
        parser.skip_ws();
        if let Some((offset, c)) = parser.peek_indexed() {
            return Err(syntax(offset, format!("trailing `{c}`")));
        }
        Ok(builder.build())
    }

    /// Render a tree back to notation. Labels equal to the type name are
    /// elided.
    pub fn render<T: DiffTree>(&self, tree: &T) -> String {
        let mut out = String::new();
        self.render_node(tree, tree.root(), &mut out);
        out
    }

    fn render_node<T: DiffTree>(&self, tree: &T, id: NodeId, out: &mut String) {
        let ty = tree.node_type(id);
        let name = self.name(ty).map_or_else(|| ty.to_string(), str::to_owned);
        let label = tree.label(id);
        out.push_str(&name);
        if label != name {
            out.push(':');
            if label.chars().all(is_name_char) && !label.is_empty() {
                out.push_str(label);
            } else {
                out.push('"');
                for c in label.chars() {
                    if matches!(c, '"' | '\\') {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push('"');
            }
        }
        if tree.child_count(id) > 0 {
            out.push('(');
            for (i, child) in tree.children(id).enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.render_node(tree, child, out);
            }
            out.push(')');
        }
    }
}

fn is_name_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '(' | ')' | ',' | ':' | '"')
}

fn syntax(offset: usize, message: String) -> MatchError {
    MatchError::Input(format!("notation error at byte {offset}: {message}"))
}

struct Parser<'t> {
    chars: Vec<(usize, char)>,
    pos: usize,
    types: &'t mut TypeTable,
}

impl Parser<'_> {
    fn peek_indexed(&self) -> Option<(usize, char)> {
        self.chars.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.peek_indexed().map(|(_, c)| c)
    }

    fn offset(&self) -> usize {
        self.peek_indexed()
            .map_or_else(|| self.chars.last().map_or(0, |&(i, c)| i + c.len_utf8()), |(i, _)| i)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn name(&mut self) -> Result<String> {
        let start = self.pos;
        while self.peek().is_some_and(is_name_char) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(match self.peek() {
                Some(c) => syntax(self.offset(), format!("expected a name, found `{c}`")),
                None => syntax(self.offset(), "expected a name, found end of input".into()),
            });
        }
        Ok(self.chars[start..self.pos].iter().map(|&(_, c)| c).collect())
    }

    fn quoted(&mut self) -> Result<String> {
        let open = self.offset();
        self.pos += 1;
        let mut label = String::new();
        loop {
            match self.peek() {
                None => return Err(syntax(open, "unterminated string".into())),
                Some('"') => {
                    self.pos += 1;
                    return Ok(label);
                }
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c) => {
                            label.push(c);
                            self.pos += 1;
                        }
                        None => return Err(syntax(open, "unterminated string".into())),
                    }
                }
                Some(c) => {
                    label.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn atom(&mut self) -> Result<(NodeType, String)> {
        let name = self.name()?;
        let ty = self.types.intern(&name);
        if self.peek() != Some(':') {
            return Ok((ty, name));
        }
        self.pos += 1;
        let label = if self.peek() == Some('"') {
            self.quoted()?
        } else {
            self.name()?
        };
        Ok((ty, label))
    }

    fn children(&mut self, builder: &mut TreeBuilder, parent: NodeId) -> Result<()> {
        self.skip_ws();
        if self.peek() != Some('(') {
            return Ok(());
        }
        self.pos += 1;
        loop {
            self.skip_ws();
            let (ty, label) = self.atom()?;
            let child = builder.add_child(parent, ty, label)?;
            self.children(builder, child)?;
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(')') => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(c) => {
                    return Err(syntax(
                        self.offset(),
                        format!("expected `,` or `)`, found `{c}`"),
                    ));
                }
                None => return Err(syntax(self.offset(), "unclosed `(`".into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shape_and_labels() {
        let mut types = TypeTable::new();
        let tree = types.parse("a(b(c,d),e)").unwrap();
        assert_eq!(tree.node_count(), 5);
        let labels: Vec<_> = tree.iter().map(|n| tree.label(n)).collect();
        assert_eq!(labels, ["a", "b", "c", "d", "e"]);
        assert_eq!(tree.node_type(tree.root()), types.get("a").unwrap());
    }

    #[test]
    fn test_explicit_and_quoted_labels() {
        let mut types = TypeTable::new();
        let tree = types
            .parse(r#"call:foo( arg:"hello, world" , arg:"say \"hi\"", arg:"")"#)
            .unwrap();
        let root = tree.root();
        assert_eq!(tree.label(root), "foo");
        let args: Vec<_> = tree.children(root).map(|n| tree.label(n)).collect();
        assert_eq!(args, ["hello, world", "say \"hi\"", ""]);
        assert_eq!(types.name(tree.node_type(root)), Some("call"));
    }

    #[test]
    fn test_types_shared_across_trees() {
        let mut types = TypeTable::new();
        let a = types.parse("x(y)").unwrap();
        let b = types.parse("y(x)").unwrap();
        assert_eq!(a.node_type(a.root()), b.node_type(b.child(b.root(), 0).unwrap()));
    }

    #[test]
    fn test_render_round_trips_text() {
        let mut types = TypeTable::new();
        let text = r#"a(b:"x y"(c,d),e:"")"#;
        let tree = types.parse(text).unwrap();
        assert_eq!(types.render(&tree), text);
    }

    #[test]
    fn test_syntax_errors() {
        let mut types = TypeTable::new();
        for bad in ["", "a(", "a(b", "a(b,)", "a)b", "a:\"open", "a(b c)"] {
            let err = types.parse(bad).unwrap_err();
            assert!(matches!(err, MatchError::Input(_)), "{bad:?} gave {err:?}");
        }
    }
}
