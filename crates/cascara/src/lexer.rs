use crate::diagnostics::{Position, SessionRef};
use crate::node::{Node, NodeType};

/// Converts a UTF-8 character stream into a lazy sequence of token nodes,
/// terminated by an EOF node. Invalid input is reported through the session
/// sink and replaced by something safe; the lexer never fails.
///
/// Callers feeding raw bytes are expected to decode with
/// `String::from_utf8_lossy`, so undecodable sequences arrive as U+FFFD.
pub struct Lexer {
    chars: Vec<char>,
    index: usize,
    pushback: Vec<char>,
    pos: Position,
    session: SessionRef,
}

impl Lexer {
    pub fn new(input: &str, filename: &str, session: &SessionRef) -> Self {
        let mut chars: Vec<char> = input.chars().collect();
        if chars.first() == Some(&'\u{FEFF}') {
            chars.remove(0);
        }
        Lexer {
            chars,
            index: 0,
            pushback: Vec::new(),
            pos: Position::new(filename),
            session: SessionRef::clone(session),
        }
    }

    pub fn pos(&self) -> &Position {
        &self.pos
    }

    fn getc(&mut self) -> Option<char> {
        if let Some(c) = self.pushback.pop() {
            return Some(c);
        }
        if self.index >= self.chars.len() {
            return None;
        }
        let mut c = self.chars[self.index];
        self.index += 1;
        if c == '\r' {
            // Normalize CR and CRLF to a plain newline.
            if self.index < self.chars.len() && self.chars[self.index] == '\n' {
                self.index += 1;
            }
            c = '\n';
        }
        match c {
            '\n' => self.pos.next_line(),
            '\u{c}' => self.pos.next_page(),
            _ => {}
        }
        Some(c)
    }

    fn ungetc(&mut self, c: char) {
        self.pushback.push(c);
    }

    fn peek(&mut self) -> Option<char> {
        let c = self.getc()?;
        self.ungetc(c);
        Some(c)
    }

    pub fn next_token(&mut self) -> Node {
        loop {
            let pos = self.pos.clone();
            let Some(c) = self.getc() else {
                return Node::new(NodeType::Eof, pos);
            };
            match c {
                ' ' | '\t' | '\n' | '\u{c}' => {
                    while let Some(next) = self.getc() {
                        if !matches!(next, ' ' | '\t' | '\n' | '\u{c}') {
                            self.ungetc(next);
                            break;
                        }
                    }
                    return Node::new(NodeType::Whitespace, pos);
                }
                '/' => match self.peek() {
                    Some('*') => {
                        self.getc();
                        if let Some(token) = self.c_comment(pos) {
                            return token;
                        }
                    }
                    Some('/') => {
                        self.getc();
                        if let Some(token) = self.line_comment(pos) {
                            return token;
                        }
                    }
                    _ => return Node::new(NodeType::Divide, pos),
                },
                '\'' | '"' => return self.string(pos, c),
                '0'..='9' => return self.number(pos, 1, c),
                '.' => {
                    if self.peek().is_some_and(|next| next.is_ascii_digit()) {
                        return self.number(pos, 1, '.');
                    }
                    return Node::new(NodeType::Period, pos);
                }
                '+' => {
                    if let Some(next) = self.peek() {
                        if next.is_ascii_digit() || next == '.' {
                            self.getc();
                            if next == '.' && !self.peek().is_some_and(|d| d.is_ascii_digit()) {
                                self.ungetc('.');
                                return Node::new(NodeType::Add, pos);
                            }
                            return self.number(pos, 1, next);
                        }
                    }
                    return Node::new(NodeType::Add, pos);
                }
                '-' => {
                    if let Some(next) = self.peek() {
                        if next.is_ascii_digit() || next == '.' {
                            self.getc();
                            if next == '.' && !self.peek().is_some_and(|d| d.is_ascii_digit()) {
                                self.ungetc('.');
                                return Node::new(NodeType::Subtract, pos);
                            }
                            return self.number(pos, -1, next);
                        }
                        if next == '-' {
                            self.getc();
                            if self.peek() == Some('>') {
                                self.getc();
                                return Node::new(NodeType::Cdc, pos);
                            }
                            self.ungetc('-');
                            return Node::new(NodeType::Subtract, pos);
                        }
                        if self.is_identifier_start(next) {
                            return self.identifier_token(pos, '-');
                        }
                    }
                    return Node::new(NodeType::Subtract, pos);
                }
                'u' | 'U' => {
                    if self.peek() == Some('+') {
                        self.getc();
                        if let Some(token) = self.unicode_range(pos.clone()) {
                            return token;
                        }
                        self.ungetc('+');
                    }
                    return self.identifier_token(pos, c);
                }
                '@' => {
                    if self.peek().is_some_and(|next| self.is_identifier_start(next)) {
                        let name = self.identifier(None);
                        let mut node = Node::new(NodeType::AtKeyword, pos);
                        node.string = name.to_ascii_lowercase();
                        return node;
                    }
                    self.session
                        .error(&pos, "character '@' must be followed by an identifier");
                }
                '#' => {
                    let mut name = String::new();
                    while let Some(next) = self.getc() {
                        if next.is_ascii_alphanumeric()
                            || next == '_'
                            || next == '-'
                            || next >= '\u{80}'
                        {
                            name.push(next);
                        } else {
                            self.ungetc(next);
                            break;
                        }
                    }
                    if name.is_empty() {
                        self.session
                            .error(&pos, "'#' by itself is not a valid token");
                    } else {
                        let mut node = Node::new(NodeType::Hash, pos);
                        node.string = name;
                        return node;
                    }
                }
                '%' => {
                    if self.peek().is_some_and(|next| self.is_identifier_start(next)) {
                        let name = self.identifier(None);
                        let mut node = Node::new(NodeType::Placeholder, pos);
                        node.string = name;
                        return node;
                    }
                    return Node::new(NodeType::Modulo, pos);
                }
                '$' => {
                    if self.peek() == Some('=') {
                        self.getc();
                        return Node::new(NodeType::SuffixMatch, pos);
                    }
                    if self
                        .peek()
                        .is_some_and(|next| next.is_ascii_alphanumeric() || next == '_' || next == '-')
                    {
                        return self.variable_token(pos);
                    }
                    return Node::new(NodeType::Dollar, pos);
                }
                '=' => {
                    if self.peek() == Some('=') {
                        self.getc();
                        self.session
                            .warning(&pos, "'==' is not a valid CSS operator, assuming '='");
                    }
                    return Node::new(NodeType::Equal, pos);
                }
                '!' => {
                    if self.peek() == Some('=') {
                        self.getc();
                        return Node::new(NodeType::NotEqual, pos);
                    }
                    return Node::new(NodeType::Exclamation, pos);
                }
                '~' => {
                    if self.peek() == Some('=') {
                        self.getc();
                        return Node::new(NodeType::IncludeMatch, pos);
                    }
                    return Node::new(NodeType::Preceded, pos);
                }
                '^' => {
                    if self.peek() == Some('=') {
                        self.getc();
                        return Node::new(NodeType::PrefixMatch, pos);
                    }
                    self.session.error(&pos, "unexpected character '^'");
                }
                '*' => match self.peek() {
                    Some('=') => {
                        self.getc();
                        return Node::new(NodeType::SubstringMatch, pos);
                    }
                    Some('*') => {
                        self.getc();
                        return Node::new(NodeType::Power, pos);
                    }
                    _ => return Node::new(NodeType::Multiply, pos),
                },
                '|' => match self.peek() {
                    Some('=') => {
                        self.getc();
                        return Node::new(NodeType::DashMatch, pos);
                    }
                    Some('|') => {
                        self.getc();
                        return Node::new(NodeType::Column, pos);
                    }
                    _ => return Node::new(NodeType::Scope, pos),
                },
                '&' => {
                    if self.peek() == Some('&') {
                        self.getc();
                        return Node::new(NodeType::And, pos);
                    }
                    return Node::new(NodeType::Reference, pos);
                }
                '<' => {
                    if self.peek() == Some('=') {
                        self.getc();
                        return Node::new(NodeType::LessEqual, pos);
                    }
                    if self.peek() == Some('!') {
                        self.getc();
                        if self.peek() == Some('-') {
                            self.getc();
                            if self.peek() == Some('-') {
                                self.getc();
                                return Node::new(NodeType::Cdo, pos);
                            }
                            self.ungetc('-');
                        }
                        self.ungetc('!');
                    }
                    return Node::new(NodeType::LessThan, pos);
                }
                '>' => {
                    if self.peek() == Some('=') {
                        self.getc();
                        return Node::new(NodeType::GreaterEqual, pos);
                    }
                    return Node::new(NodeType::GreaterThan, pos);
                }
                ':' => {
                    if self.peek() == Some('=') {
                        self.getc();
                        return Node::new(NodeType::Assignment, pos);
                    }
                    return Node::new(NodeType::Colon, pos);
                }
                ',' => return Node::new(NodeType::Comma, pos),
                ';' => return Node::new(NodeType::Semicolon, pos),
                '?' => return Node::new(NodeType::Conditional, pos),
                '(' => return Node::new(NodeType::OpenParenthesis, pos),
                ')' => return Node::new(NodeType::CloseParenthesis, pos),
                '[' => return Node::new(NodeType::OpenSquarebracket, pos),
                ']' => return Node::new(NodeType::CloseSquarebracket, pos),
                '{' => return Node::new(NodeType::OpenCurlybracket, pos),
                '}' => return Node::new(NodeType::CloseCurlybracket, pos),
                '\u{FFFD}' => {
                    self.session
                        .error(&pos, "invalid input byte replaced by U+FFFD");
                }
                _ => {
                    if self.is_identifier_start(c) {
                        return self.identifier_token(pos, c);
                    }
                    self.session
                        .error(&pos, &format!("unexpected character '{c}'"));
                }
            }
        }
    }

    fn is_identifier_start(&self, c: char) -> bool {
        c.is_ascii_alphabetic() || c == '_' || c == '\\' || c >= '\u{80}'
    }

    fn is_identifier_continue(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '\\' || c >= '\u{80}'
    }

    /// Reads identifier characters, decoding backslash escapes. `first` is a
    /// character that already belongs to the identifier, if any.
    fn identifier(&mut self, first: Option<char>) -> String {
        let mut name = String::new();
        if let Some(c) = first {
            if c == '\\' {
                if let Some(decoded) = self.escape() {
                    name.push(decoded);
                }
            } else {
                name.push(c);
            }
        }
        while let Some(c) = self.getc() {
            if c == '\\' {
                if let Some(decoded) = self.escape() {
                    name.push(decoded);
                }
                continue;
            }
            if Self::is_identifier_continue(c) {
                name.push(c);
                continue;
            }
            self.ungetc(c);
            break;
        }
        name
    }

    /// Decodes one backslash escape; the backslash itself was consumed.
    /// Hex escapes take up to six digits and eat one following blank.
    fn escape(&mut self) -> Option<char> {
        let pos = self.pos.clone();
        let Some(c) = self.getc() else {
            self.session
                .error(&pos, "spurious backslash at the end of the input");
            return None;
        };
        if c.is_ascii_hexdigit() {
            let mut value: u32 = 0;
            let mut digits = 0;
            let mut current = c;
            loop {
                value = value * 16 + current.to_digit(16).unwrap_or(0);
                digits += 1;
                if digits == 6 {
                    break;
                }
                match self.getc() {
                    Some(next) if next.is_ascii_hexdigit() => current = next,
                    Some(next) => {
                        self.ungetc(next);
                        break;
                    }
                    None => break,
                }
            }
            // One blank after a hex escape terminates it and is consumed.
            if matches!(self.peek(), Some(' ') | Some('\t') | Some('\n')) {
                self.getc();
            }
            return match char::from_u32(value) {
                Some(decoded) if value != 0 => Some(decoded),
                _ => {
                    self.session
                        .error(&pos, &format!("invalid escape character '\\{value:x}'"));
                    Some('\u{FFFD}')
                }
            };
        }
        if c == '\n' {
            self.session
                .error(&pos, "spurious backslash before a newline");
            return None;
        }
        Some(c)
    }

    fn identifier_token(&mut self, pos: Position, first: char) -> Node {
        let name = self.identifier(Some(first));
        if name.is_empty() {
            // A backslash escape that failed to decode; nothing to emit.
            let mut node = Node::new(NodeType::Identifier, pos);
            node.string = String::from("\u{FFFD}");
            return node;
        }
        if self.peek() == Some('(') {
            self.getc();
            if name.eq_ignore_ascii_case("url") {
                return self.url(pos);
            }
            let mut node = Node::new(NodeType::Function, pos);
            node.string = name.to_ascii_lowercase();
            return node;
        }
        let mut node = Node::new(NodeType::Identifier, pos);
        node.string = name;
        node
    }

    fn variable_token(&mut self, pos: Position) -> Node {
        let mut name = String::new();
        while let Some(c) = self.getc() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
            } else if c == '-' {
                // Variable names treat '-' and '_' as the same character.
                name.push('_');
            } else {
                self.ungetc(c);
                break;
            }
        }
        if self.peek() == Some('(') {
            self.getc();
            let mut node = Node::new(NodeType::VariableFunction, pos);
            node.string = name;
            return node;
        }
        let mut node = Node::new(NodeType::Variable, pos);
        node.string = name;
        node
    }

    fn string(&mut self, pos: Position, quote: char) -> Node {
        let mut value = String::new();
        loop {
            let Some(c) = self.getc() else {
                self.session
                    .error(&pos, "the last string was not closed before the end of the input");
                break;
            };
            if c == quote {
                break;
            }
            if c == '\n' {
                self.session
                    .error(&pos, "a newline is not allowed inside a string, did you forget a backslash?");
                self.ungetc('\n');
                break;
            }
            if c == '\\' {
                match self.peek() {
                    Some('\n') => {
                        // Escaped newline: continuation, nothing inserted.
                        self.getc();
                    }
                    None => {
                        self.session
                            .error(&pos, "spurious backslash at the end of the input");
                    }
                    _ => {
                        if let Some(decoded) = self.escape() {
                            value.push(decoded);
                        }
                    }
                }
                continue;
            }
            value.push(c);
        }
        let mut node = Node::new(NodeType::String, pos);
        node.string = value;
        node
    }

    fn number(&mut self, pos: Position, sign: i64, first: char) -> Node {
        let mut integer: i64 = 0;
        let mut integer_overflow = false;
        let mut c = Some(first);
        if first != '.' {
            while let Some(digit) = c {
                if !digit.is_ascii_digit() {
                    break;
                }
                let value = (digit as u8 - b'0') as i64;
                if integer > (i64::MAX - value) / 10 {
                    if !integer_overflow {
                        self.session
                            .error(&pos, "integral part too large for a number");
                        integer_overflow = true;
                    }
                } else {
                    integer = integer * 10 + value;
                }
                c = self.getc();
            }
        } else {
            c = Some('.');
        }

        let mut decimal_digits = 0usize;
        let mut fraction = 0.0f64;
        let mut scale = 0.1f64;
        let mut is_decimal = false;
        if c == Some('.') {
            let next = self.getc();
            if next.is_some_and(|digit| digit.is_ascii_digit()) {
                is_decimal = true;
                c = next;
                while let Some(digit) = c {
                    if !digit.is_ascii_digit() {
                        break;
                    }
                    decimal_digits += 1;
                    if decimal_digits == 21 {
                        self.session
                            .error(&pos, "too many decimal digits in a number");
                    }
                    fraction += (digit as u8 - b'0') as f64 * scale;
                    scale /= 10.0;
                    c = self.getc();
                }
            } else {
                if let Some(unread) = next {
                    self.ungetc(unread);
                }
                self.ungetc('.');
                c = None;
            }
        }

        let mut exponent: i32 = 0;
        let mut has_exponent = false;
        if let Some(e @ ('e' | 'E')) = c {
            let next = self.getc();
            let (exp_sign, first_digit) = match next {
                Some(digit) if digit.is_ascii_digit() => (1i32, Some(digit)),
                Some(s @ ('+' | '-')) => {
                    let after = self.getc();
                    match after {
                        Some(digit) if digit.is_ascii_digit() => {
                            (if s == '-' { -1 } else { 1 }, Some(digit))
                        }
                        _ => {
                            if let Some(unread) = after {
                                self.ungetc(unread);
                            }
                            self.ungetc(s);
                            (0, None)
                        }
                    }
                }
                _ => {
                    if let Some(unread) = next {
                        self.ungetc(unread);
                    }
                    (0, None)
                }
            };
            if let Some(digit) = first_digit {
                has_exponent = true;
                is_decimal = true;
                let mut value: i32 = 0;
                let mut d = Some(digit);
                while let Some(current) = d {
                    if !current.is_ascii_digit() {
                        break;
                    }
                    value = value.saturating_mul(10) + (current as u8 - b'0') as i32;
                    d = self.getc();
                }
                c = d;
                exponent = value * exp_sign;
            } else {
                // No digit after the exponent marker: the 'e' starts a
                // dimension identifier instead (keeps "em"/"ex" working).
                self.ungetc(e);
                c = None;
            }
        }
        if let Some(unread) = c {
            self.ungetc(unread);
        }

        // Unit, percent sign, or nothing.
        let next = self.getc();
        match next {
            Some('%') => {
                let value = if is_decimal {
                    integer as f64 + fraction
                } else {
                    integer as f64
                };
                let mut node = Node::new(NodeType::Percent, pos);
                node.decimal = sign as f64 * value / 100.0;
                return node;
            }
            Some(u) if u.is_ascii_alphabetic() || u == '_' || u == '\\' || u >= '\u{80}' => {
                let dimension = self.identifier(Some(u));
                if is_decimal {
                    let value = (integer as f64 + fraction)
                        * 10f64.powi(if has_exponent { exponent } else { 0 });
                    let mut node = Node::new(NodeType::DecimalNumber, pos);
                    node.decimal = sign as f64 * value;
                    node.string = dimension;
                    return node;
                }
                let mut node = Node::new(NodeType::Integer, pos);
                node.integer = sign * integer;
                node.string = dimension;
                return node;
            }
            Some(other) => self.ungetc(other),
            None => {}
        }

        if is_decimal {
            let value =
                (integer as f64 + fraction) * 10f64.powi(if has_exponent { exponent } else { 0 });
            let mut node = Node::new(NodeType::DecimalNumber, pos);
            node.decimal = sign as f64 * value;
            return node;
        }
        let mut node = Node::new(NodeType::Integer, pos);
        node.integer = sign * integer;
        node
    }

    /// `url(` was just consumed; scans a raw or quoted URL up to the `)`.
    fn url(&mut self, pos: Position) -> Node {
        let mut value = String::new();
        // Skip leading blanks.
        while matches!(self.peek(), Some(' ') | Some('\t') | Some('\n')) {
            self.getc();
        }
        match self.peek() {
            Some(quote @ ('\'' | '"')) => {
                self.getc();
                let string_token = self.string(pos.clone(), quote);
                value = string_token.string;
            }
            _ => loop {
                let Some(c) = self.getc() else {
                    self.session
                        .error(&pos, "a url() was not closed before the end of the input");
                    let mut node = Node::new(NodeType::Url, pos);
                    node.string = value;
                    return node;
                };
                if c == ')' {
                    let mut node = Node::new(NodeType::Url, pos);
                    node.string = value;
                    return node;
                }
                if matches!(c, ' ' | '\t' | '\n') {
                    break;
                }
                value.push(c);
            },
        }
        // Only blanks may appear before the closing parenthesis now.
        loop {
            match self.getc() {
                Some(' ') | Some('\t') | Some('\n') => {}
                Some(')') => break,
                Some(other) => {
                    self.session.error(
                        &pos,
                        &format!("found an unexpected character '{other}' in a url() token"),
                    );
                }
                None => {
                    self.session
                        .error(&pos, "a url() was not closed before the end of the input");
                    break;
                }
            }
        }
        let mut node = Node::new(NodeType::Url, pos);
        node.string = value;
        node
    }

    /// `u+` was just consumed; returns None when no hex digit or wildcard
    /// follows so the caller can fall back to an identifier.
    fn unicode_range(&mut self, pos: Position) -> Option<Node> {
        let mut start_digits = String::new();
        let mut wildcards = 0usize;
        while start_digits.len() + wildcards < 6 {
            match self.getc() {
                Some(c) if c.is_ascii_hexdigit() && wildcards == 0 => start_digits.push(c),
                Some('?') => wildcards += 1,
                Some(other) => {
                    self.ungetc(other);
                    break;
                }
                None => break,
            }
        }
        if start_digits.is_empty() && wildcards == 0 {
            return None;
        }

        let mut start = u32::from_str_radix(&start_digits, 16).unwrap_or(0);
        let mut end = start;
        if wildcards > 0 {
            // Wildcard digits widen the range to all maskable values.
            for _ in 0..wildcards {
                start *= 16;
                end = end * 16 + 15;
            }
        } else if self.peek() == Some('-') {
            self.getc();
            let mut end_digits = String::new();
            while end_digits.len() < 6 {
                match self.getc() {
                    Some(c) if c.is_ascii_hexdigit() => end_digits.push(c),
                    Some(other) => {
                        self.ungetc(other);
                        break;
                    }
                    None => break,
                }
            }
            if end_digits.is_empty() {
                self.ungetc('-');
            } else {
                end = u32::from_str_radix(&end_digits, 16).unwrap_or(0);
            }
        }
        if start > end {
            self.session.error(
                &pos,
                "the start of a unicode range must be smaller or equal to the end",
            );
            std::mem::swap(&mut start, &mut end);
        }
        let mut node = Node::new(NodeType::UnicodeRange, pos);
        node.integer = ((end as i64) << 32) | start as i64;
        Some(node)
    }

    /// `/*` was just consumed. Returns a node only for comments carrying the
    /// `@preserve` marker; everything else is dropped.
    fn c_comment(&mut self, pos: Position) -> Option<Node> {
        let mut content = String::new();
        loop {
            let Some(c) = self.getc() else {
                self.session
                    .error(&pos, "a C-like comment was not closed before the end of the input");
                break;
            };
            if c == '*' && self.peek() == Some('/') {
                self.getc();
                break;
            }
            content.push(c);
        }
        if !content.contains("@preserve") {
            return None;
        }
        let mut node = Node::new(NodeType::Comment, pos);
        node.string = content.trim().to_string();
        node.integer = 0;
        Some(node)
    }

    /// `//` was just consumed. Consecutive `//` lines coalesce into one
    /// comment node when preserved.
    fn line_comment(&mut self, pos: Position) -> Option<Node> {
        let mut content = String::new();
        loop {
            match self.getc() {
                Some('\n') => {
                    // Another '//' right at the start of the next line
                    // continues the same comment; anything else ends it and
                    // the newline goes back to the stream.
                    match self.getc() {
                        Some('/') if self.peek() == Some('/') => {
                            self.getc();
                            content.push('\n');
                        }
                        Some(other) => {
                            self.ungetc(other);
                            self.ungetc('\n');
                            break;
                        }
                        None => {
                            self.ungetc('\n');
                            break;
                        }
                    }
                }
                Some(c) => content.push(c),
                None => break,
            }
        }
        let content = content
            .lines()
            .map(|line| line.trim())
            .collect::<Vec<_>>()
            .join("\n");
        if !content.contains("@preserve") {
            return None;
        }
        self.session.warning(
            &pos,
            "C++ comments are not supported by CSS, consider using a C-like comment instead",
        );
        let mut node = Node::new(NodeType::Comment, pos);
        node.string = content;
        node.integer = 1;
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Session;

    fn lex_all(src: &str) -> (Vec<Node>, SessionRef) {
        let session = Session::new();
        let mut lexer = Lexer::new(src, "test.scss", &session);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token();
            let done = token.is(NodeType::Eof);
            tokens.push(token);
            if done {
                break;
            }
        }
        (tokens, session)
    }

    fn types(tokens: &[Node]) -> Vec<NodeType> {
        tokens.iter().map(|t| t.node_type).collect()
    }

    #[test]
    fn whitespace_runs_collapse_to_one_token() {
        let (tokens, session) = lex_all("div  \t\n\n   span");
        assert_eq!(session.error_count(), 0);
        assert_eq!(
            types(&tokens),
            vec![
                NodeType::Identifier,
                NodeType::Whitespace,
                NodeType::Identifier,
                NodeType::Eof,
            ]
        );
    }

    #[test]
    fn integer_with_dimension() {
        let (tokens, _) = lex_all("10px");
        assert!(tokens[0].is(NodeType::Integer));
        assert_eq!(tokens[0].integer, 10);
        assert_eq!(tokens[0].string, "px");
    }

    #[test]
    fn decimal_number() {
        let (tokens, _) = lex_all("3.14");
        assert!(tokens[0].is(NodeType::DecimalNumber));
        assert!((tokens[0].decimal - 3.14).abs() < 1e-9);
    }

    #[test]
    fn percent_is_normalized() {
        let (tokens, _) = lex_all("50%");
        assert!(tokens[0].is(NodeType::Percent));
        assert!((tokens[0].decimal - 0.5).abs() < 1e-9);
    }

    #[test]
    fn negative_exponent_number() {
        let (tokens, _) = lex_all("-1.5e2");
        assert!(tokens[0].is(NodeType::DecimalNumber));
        assert!((tokens[0].decimal + 150.0).abs() < 1e-9);
    }

    #[test]
    fn exponent_without_digit_becomes_dimension() {
        // "1e" keeps the INTEGER(1) and the 'e' is not consumed as an
        // exponent; it reads as the (unknown) dimension identifier.
        let (tokens, _) = lex_all("1e");
        assert!(tokens[0].is(NodeType::Integer));
        assert_eq!(tokens[0].integer, 1);
        assert_eq!(tokens[0].string, "e");
        let (tokens, _) = lex_all("1em");
        assert_eq!(tokens[0].string, "em");
    }

    #[test]
    fn number_overflow_reports_but_continues() {
        let (tokens, session) = lex_all("99999999999999999999 div");
        assert!(session.error_count() >= 1);
        assert!(tokens[0].is(NodeType::Integer));
        assert!(tokens
            .iter()
            .any(|t| t.is(NodeType::Identifier) && t.string == "div"));
    }

    #[test]
    fn strings_decode_escapes() {
        let (tokens, session) = lex_all("\"he\\\"llo\" 'wo\\\nrld'");
        assert_eq!(session.error_count(), 0);
        assert_eq!(tokens[0].string, "he\"llo");
        // The escaped newline is a continuation and inserts nothing.
        assert_eq!(tokens[2].string, "world");
    }

    #[test]
    fn unterminated_string_reports_and_keeps_partial() {
        let (tokens, session) = lex_all("'abc");
        assert_eq!(session.error_count(), 1);
        assert!(tokens[0].is(NodeType::String));
        assert_eq!(tokens[0].string, "abc");
    }

    #[test]
    fn newline_inside_string_reports() {
        let (tokens, session) = lex_all("'abc\ndef'");
        assert!(session.error_count() >= 1);
        assert_eq!(tokens[0].string, "abc");
    }

    #[test]
    fn identifier_hex_escape_consumes_terminating_space() {
        let (tokens, _) = lex_all("\\41 bc");
        assert!(tokens[0].is(NodeType::Identifier));
        assert_eq!(tokens[0].string, "Abc");
    }

    #[test]
    fn function_names_are_case_folded() {
        let (tokens, _) = lex_all("RGBA(1)");
        assert!(tokens[0].is(NodeType::Function));
        assert_eq!(tokens[0].string, "rgba");
    }

    #[test]
    fn url_raw_and_quoted() {
        let (tokens, session) = lex_all("url( /images/a.png ) url('b c.png')");
        assert_eq!(session.error_count(), 0);
        assert!(tokens[0].is(NodeType::Url));
        assert_eq!(tokens[0].string, "/images/a.png");
        assert!(tokens[2].is(NodeType::Url));
        assert_eq!(tokens[2].string, "b c.png");
    }

    #[test]
    fn variables_normalize_dashes() {
        let (tokens, _) = lex_all("$my-var $call-it(1)");
        assert!(tokens[0].is(NodeType::Variable));
        assert_eq!(tokens[0].string, "my_var");
        assert!(tokens[2].is(NodeType::VariableFunction));
        assert_eq!(tokens[2].string, "call_it");
    }

    #[test]
    fn bare_hash_is_an_error() {
        let (_, session) = lex_all("# {}");
        assert_eq!(session.error_count(), 1);
    }

    #[test]
    fn hash_token_keeps_name() {
        let (tokens, _) = lex_all("#header");
        assert!(tokens[0].is(NodeType::Hash));
        assert_eq!(tokens[0].string, "header");
    }

    #[test]
    fn at_keyword_is_lowercased() {
        let (tokens, _) = lex_all("@MiXiN");
        assert!(tokens[0].is(NodeType::AtKeyword));
        assert_eq!(tokens[0].string, "mixin");
    }

    #[test]
    fn unicode_range_with_wildcards() {
        let (tokens, _) = lex_all("u+4??");
        assert!(tokens[0].is(NodeType::UnicodeRange));
        let start = (tokens[0].integer & 0xFFFF_FFFF) as u32;
        let end = (tokens[0].integer >> 32) as u32;
        assert_eq!(start, 0x400);
        assert_eq!(end, 0x4FF);
    }

    #[test]
    fn unicode_range_explicit_end() {
        let (tokens, _) = lex_all("U+400-4ff");
        let start = (tokens[0].integer & 0xFFFF_FFFF) as u32;
        let end = (tokens[0].integer >> 32) as u32;
        assert_eq!(start, 0x400);
        assert_eq!(end, 0x4FF);
    }

    #[test]
    fn unicode_range_start_after_end_reports() {
        let (_, session) = lex_all("U+4ff-400");
        assert_eq!(session.error_count(), 1);
    }

    #[test]
    fn plain_comments_are_dropped() {
        let (tokens, _) = lex_all("/* nothing */ div // gone\n");
        assert!(!tokens.iter().any(|t| t.is(NodeType::Comment)));
    }

    #[test]
    fn preserved_c_comment_is_kept_and_trimmed() {
        let (tokens, session) = lex_all("/* @preserve Copyright (c) 2026  */");
        assert_eq!(session.error_count(), 0);
        assert!(tokens[0].is(NodeType::Comment));
        assert_eq!(tokens[0].string, "@preserve Copyright (c) 2026");
        assert_eq!(tokens[0].integer, 0);
    }

    #[test]
    fn preserved_line_comment_coalesces_and_warns() {
        let (tokens, session) = lex_all("// @preserve first\n// second\ndiv");
        assert_eq!(session.warning_count(), 1);
        assert!(tokens[0].is(NodeType::Comment));
        assert_eq!(tokens[0].string, "@preserve first\nsecond");
        assert_eq!(tokens[0].integer, 1);
    }

    #[test]
    fn double_equal_warns_and_reads_as_equal() {
        let (tokens, session) = lex_all("a == b");
        assert_eq!(session.warning_count(), 1);
        assert!(tokens[2].is(NodeType::Equal));
    }

    #[test]
    fn operator_lookahead() {
        let (tokens, _) = lex_all("~= ^= $= *= |= || ** <= >= <!-- --> :=");
        let ops: Vec<NodeType> = tokens
            .iter()
            .filter(|t| !t.is(NodeType::Whitespace) && !t.is(NodeType::Eof))
            .map(|t| t.node_type)
            .collect();
        assert_eq!(
            ops,
            vec![
                NodeType::IncludeMatch,
                NodeType::PrefixMatch,
                NodeType::SuffixMatch,
                NodeType::SubstringMatch,
                NodeType::DashMatch,
                NodeType::Column,
                NodeType::Power,
                NodeType::LessEqual,
                NodeType::GreaterEqual,
                NodeType::Cdo,
                NodeType::Cdc,
                NodeType::Assignment,
            ]
        );
    }

    #[test]
    fn selector_punctuation() {
        let (tokens, _) = lex_all("a>b+c~d&e");
        let ops = types(&tokens);
        assert_eq!(
            ops,
            vec![
                NodeType::Identifier,
                NodeType::GreaterThan,
                NodeType::Identifier,
                NodeType::Add,
                NodeType::Identifier,
                NodeType::Preceded,
                NodeType::Identifier,
                NodeType::Reference,
                NodeType::Identifier,
                NodeType::Eof,
            ]
        );
    }

    #[test]
    fn replacement_character_reports_error() {
        let (_, session) = lex_all("div \u{FFFD} span");
        assert_eq!(session.error_count(), 1);
    }

    #[test]
    fn positions_track_lines() {
        let (tokens, _) = lex_all("a\nb\n\nc");
        let idents: Vec<&Node> = tokens
            .iter()
            .filter(|t| t.is(NodeType::Identifier))
            .collect();
        assert_eq!(idents[0].pos.line, 1);
        assert_eq!(idents[1].pos.line, 2);
        assert_eq!(idents[2].pos.line, 4);
    }
}
