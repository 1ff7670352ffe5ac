use crate::error::{Error, Result};
use crate::list::{List, ListBuilder, NodeId};
use crate::sourcemap::{SourceMap, Span};
use crate::value::Value;

const OPERATORS: &[char] = &['+', '-', '*', '/', '<', '>', '='];

fn is_operator_char(c: char) -> bool {
    OPERATORS.contains(&c)
}

fn terminates_word(c: char) -> bool {
    c.is_whitespace() || matches!(c, '[' | ']' | '(' | ')' | ';') || is_operator_char(c)
}

struct Frame {
    builder: ListBuilder,
    open_start: usize,
}

/// Hand-rolled tokenizer/parser. Produces a flat list of atoms and nested
/// lists with no semantic interpretation at all — `to`, procedure calls,
/// infix precedence, and literal sigils are all the evaluator's job.
struct Parser {
    chars: Vec<(usize, char)>,
    byte_len: usize,
    idx: usize,
    source_map: SourceMap,
}

impl Parser {
    fn new(source: &str) -> Self {
        Self {
            chars: source.char_indices().collect(),
            byte_len: source.len(),
            idx: 0,
            source_map: SourceMap::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.idx).map(|&(_, c)| c)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.idx + offset).map(|&(_, c)| c)
    }

    fn byte_pos(&self) -> usize {
        self.chars
            .get(self.idx)
            .map(|&(b, _)| b)
            .unwrap_or(self.byte_len)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.idx += 1;
        }
        c
    }

    /// Skips whitespace and `;`-to-end-of-line comments, returning whether
    /// anything was actually skipped.
    fn skip_ws_comments(&mut self) -> bool {
        let start = self.idx;
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some(';') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
        self.idx != start
    }

    fn record(&mut self, id: NodeId, start: usize, end: usize) {
        self.source_map.record(id, Span::new(start, end));
    }

    fn read_number(&mut self, boundary_negative: bool) -> Result<(Value, usize, usize)> {
        let start = self.byte_pos();
        let mut buf = String::new();
        if boundary_negative {
            buf.push('-');
            self.advance();
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                buf.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if self.peek() == Some('.') {
            match self.peek_at(1) {
                Some(d) if d.is_ascii_digit() => {
                    buf.push('.');
                    self.advance();
                    while let Some(c) = self.peek() {
                        if c.is_ascii_digit() {
                            buf.push(c);
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                _ => {
                    return Err(Error::syntax(
                        "missing fractional digits after '.'",
                        Some(Span::new(start, self.byte_pos() + 1)),
                    ));
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mut lookahead = 1;
            if matches!(self.peek_at(lookahead), Some('+') | Some('-')) {
                lookahead += 1;
            }
            match self.peek_at(lookahead) {
                Some(d) if d.is_ascii_digit() => {
                    buf.push('e');
                    self.advance();
                    if matches!(self.peek(), Some('+') | Some('-')) {
                        buf.push(self.advance().unwrap());
                    }
                    while let Some(c) = self.peek() {
                        if c.is_ascii_digit() {
                            buf.push(c);
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                _ => {
                    return Err(Error::syntax(
                        "missing exponent digits after 'e'",
                        Some(Span::new(start, self.byte_pos() + 1)),
                    ));
                }
            }
        }
        if let Some(c) = self.peek() {
            if !c.is_whitespace() && !matches!(c, '[' | ']' | '(' | ')' | ';') && !is_operator_char(c) {
                return Err(Error::syntax(
                    "number must be followed by whitespace or a delimiter",
                    Some(Span::new(start, self.byte_pos() + 1)),
                ));
            }
        }
        let end = self.byte_pos();
        let n: f64 = buf
            .parse()
            .map_err(|_| Error::syntax("invalid number literal", Some(Span::new(start, end))))?;
        Ok((Value::Number(n), start, end))
    }

    fn read_word(&mut self) -> (Value, usize, usize) {
        let start = self.byte_pos();
        let mut buf = String::new();
        let mut first = true;
        loop {
            let c = match self.peek() {
                Some(c) => c,
                None => break,
            };
            if c == '\\' {
                self.advance();
                if let Some(escaped) = self.advance() {
                    buf.push(escaped);
                } else {
                    buf.push('\\');
                }
                first = false;
                continue;
            }
            if first && c == '"' {
                buf.push(c);
                self.advance();
                first = false;
                if let Some(next) = self.peek() {
                    if next != '[' && next != ']' && (is_operator_char(next) || next == '(' || next == ')') {
                        buf.push(next);
                        self.advance();
                    }
                }
                continue;
            }
            if terminates_word(c) {
                break;
            }
            buf.push(c);
            self.advance();
            first = false;
        }
        let end = self.byte_pos();
        (Value::word(buf), start, end)
    }

    fn parse(mut self) -> Result<(List, SourceMap)> {
        let mut stack: Vec<Frame> = Vec::new();
        let mut top = ListBuilder::new();

        loop {
            let before_ws_idx = self.idx;
            let skipped_ws = self.skip_ws_comments();
            let boundary = skipped_ws || before_ws_idx == 0;

            let c = match self.peek() {
                Some(c) => c,
                None => break,
            };
            let start = self.byte_pos();

            if c == '[' {
                self.advance();
                stack.push(Frame {
                    builder: ListBuilder::new(),
                    open_start: start,
                });
                continue;
            }

            if c == ']' {
                self.advance();
                let end = self.byte_pos();
                let frame = stack.pop().ok_or_else(|| {
                    Error::syntax("unexpected ']'", Some(Span::new(start, end)))
                })?;
                let inner = frame.builder.build();
                let value = Value::List(inner);
                let target = stack.last_mut().map(|f| &mut f.builder).unwrap_or(&mut top);
                let id = target.push(value);
                self.record(id, frame.open_start, end);
                continue;
            }

            let is_negative_number = c == '-' && boundary && matches!(self.peek_at(1), Some(d) if d.is_ascii_digit());

            let (value, tok_start, tok_end) = if c.is_ascii_digit() || is_negative_number {
                self.read_number(is_negative_number)?
            } else if is_operator_char(c) || c == '(' || c == ')' {
                self.advance();
                (Value::word(c.to_string()), start, self.byte_pos())
            } else {
                self.read_word()
            };

            let target = stack.last_mut().map(|f| &mut f.builder).unwrap_or(&mut top);
            let id = target.push(value);
            self.record(id, tok_start, tok_end);
        }

        if let Some(frame) = stack.last() {
            return Err(Error::syntax(
                "unterminated list: missing ']'",
                Some(Span::new(frame.open_start, self.byte_len)),
            ));
        }

        Ok((top.build(), self.source_map))
    }
}

/// Parses Logo source text into a program list plus the source map
/// recording each token's byte range.
pub fn parse(source: &str) -> Result<(List, SourceMap)> {
    Parser::new(source).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(list: &List) -> Vec<String> {
        list.iter().map(|v| v.stringify(true)).collect()
    }

    #[test]
    fn tokenizes_flat_words_and_numbers() {
        let (list, _) = parse("print 1 + 2").unwrap();
        assert_eq!(words(&list), vec!["print", "1", "+", "2"]);
    }

    #[test]
    fn nested_list_literal() {
        let (list, _) = parse("print [a b [c]]").unwrap();
        let items: Vec<Value> = list.iter().collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].stringify(true), "[a b [c]]");
    }

    #[test]
    fn unterminated_list_is_syntax_error() {
        let err = parse("[a b").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn unmatched_close_bracket_is_syntax_error() {
        let err = parse("a]").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn leading_minus_before_digit_is_a_number() {
        let (list, _) = parse("print -3 + 4").unwrap();
        assert_eq!(words(&list), vec!["print", "-3", "+", "4"]);
    }

    #[test]
    fn minus_after_value_with_no_space_joins_digit() {
        let (list, _) = parse("print 3 -4").unwrap();
        assert_eq!(words(&list), vec!["print", "3", "-4"]);
    }

    #[test]
    fn minus_between_values_is_an_operator() {
        let (list, _) = parse("print 3 - 4").unwrap();
        assert_eq!(words(&list), vec!["print", "3", "-", "4"]);
    }

    #[test]
    fn quoted_word_with_leading_delimiter() {
        let (list, _) = parse("make \"+ 1").unwrap();
        let items: Vec<Value> = list.iter().collect();
        assert_eq!(items[1].stringify(true), "\"+");
    }

    #[test]
    fn comments_are_discarded() {
        let (list, _) = parse("print 1 ; this is a comment\nprint 2").unwrap();
        assert_eq!(words(&list), vec!["print", "1", "print", "2"]);
    }

    #[test]
    fn source_map_records_token_span() {
        let (list, map) = parse("print 1").unwrap();
        let items: Vec<List> = list.cursors().collect();
        let id = items[1].node_id().unwrap();
        let span = map.get(id).unwrap();
        assert_eq!(span.start, 6);
        assert_eq!(span.end, 7);
    }
}
