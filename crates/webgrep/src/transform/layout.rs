//! Line-oriented output buffer shared by the JavaScript and CSS reflowers.

const INDENT: &str = "  ";

/// Accumulates reflowed source. Newlines and spaces are deferred until the
/// next visible character so trailing whitespace never reaches the output.
#[derive(Debug, Default)]
pub(crate) struct LineWriter {
    out: String,
    depth: usize,
    newline_pending: bool,
    space_pending: bool,
}

impl LineWriter {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            out: String::with_capacity(capacity),
            ..Self::default()
        }
    }

    pub(crate) fn push(&mut self, c: char) {
        self.flush_pending();
        self.out.push(c);
    }

    pub(crate) fn push_str(&mut self, s: &str) {
        if s.is_empty() {
            return;
        }
        self.flush_pending();
        self.out.push_str(s);
    }

    /// Break the line before the next visible character.
    pub(crate) fn newline(&mut self) {
        if !self.out.is_empty() {
            self.newline_pending = true;
        }
        self.space_pending = false;
    }

    /// Collapse a whitespace run into one space, unless a line break is due.
    pub(crate) fn space(&mut self) {
        if !self.newline_pending && !self.out.is_empty() && !self.ends_with_space() {
            self.space_pending = true;
        }
    }

    pub(crate) fn indent(&mut self) {
        self.depth += 1;
    }

    /// Returns `false` when there is nothing left to close.
    pub(crate) fn dedent(&mut self) -> bool {
        if self.depth == 0 {
            return false;
        }
        self.depth -= 1;
        true
    }

    /// Output so far, without trailing whitespace.
    pub(crate) fn tail(&self) -> &str {
        self.out.trim_end()
    }

    pub(crate) fn finish(self) -> String {
        self.out
    }

    fn ends_with_space(&self) -> bool {
        self.out.ends_with(' ') || self.out.ends_with('\n')
    }

    fn flush_pending(&mut self) {
        if self.newline_pending {
            self.out.push('\n');
            for _ in 0..self.depth {
                self.out.push_str(INDENT);
            }
        } else if self.space_pending {
            self.out.push(' ');
        }
        self.newline_pending = false;
        self.space_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_whitespace_is_lazy() {
        let mut w = LineWriter::with_capacity(16);
        w.push_str("a;");
        w.newline();
        w.indent();
        w.push('b');
        w.space();
        w.space();
        w.push('c');
        w.newline();
        assert_eq!(w.finish(), "a;\n  b c");
    }

    #[test]
    fn test_dedent_below_zero() {
        let mut w = LineWriter::default();
        assert!(!w.dedent());
        w.indent();
        assert!(w.dedent());
        assert!(!w.dedent());
    }
}
