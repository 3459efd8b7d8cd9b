//! Glob matching for `KEYS`.
//!
//! Supported syntax, matched byte-wise:
//! - `*` any run of bytes, including none
//! - `?` exactly one byte
//! - `[abc]`, `[a-z]`, `[^a]` / `[!a]` character classes
//! - `\x` the literal byte `x`
//!
//! An unterminated `[` is matched literally.

/// A compiled glob pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    pattern: Vec<u8>,
}

impl GlobPattern {
    pub fn new(pattern: impl AsRef<[u8]>) -> Self {
        Self {
            pattern: pattern.as_ref().to_vec(),
        }
    }

    /// Returns true if the pattern is `*` (or only stars) and so matches everything.
    pub fn matches_all(&self) -> bool {
        !self.pattern.is_empty() && self.pattern.iter().all(|&b| b == b'*')
    }

    /// Tests `text` against the pattern.
    ///
    /// Backtracks only to the most recent `*`, so matching is linear in
    /// `text.len() * pattern.len()` in the worst case.
    pub fn matches(&self, text: &[u8]) -> bool {
        let p = &self.pattern;
        let mut pi = 0;
        let mut ti = 0;
        // (pattern index after the star, text index the star currently covers up to)
        let mut star: Option<(usize, usize)> = None;

        while ti < text.len() {
            if pi < p.len() && p[pi] == b'*' {
                star = Some((pi + 1, ti));
                pi += 1;
                continue;
            }

            if pi < p.len() {
                if let Some(next) = self.step(pi, text[ti]) {
                    pi = next;
                    ti += 1;
                    continue;
                }
            }

            match star {
                Some((resume, covered)) => {
                    pi = resume;
                    ti = covered + 1;
                    star = Some((resume, covered + 1));
                }
                None => return false,
            }
        }

        while pi < p.len() && p[pi] == b'*' {
            pi += 1;
        }
        pi == p.len()
    }

    /// Matches the single-byte token at `pi` against `c`, returning the index of
    /// the next token on success. Never called on `*`.
    fn step(&self, pi: usize, c: u8) -> Option<usize> {
        let p = &self.pattern;
        match p[pi] {
            b'?' => Some(pi + 1),
            b'[' => match self.match_class(pi, c) {
                Some((matched, next)) => matched.then_some(next),
                None => (c == b'[').then_some(pi + 1),
            },
            b'\\' if pi + 1 < p.len() => (p[pi + 1] == c).then_some(pi + 2),
            literal => (literal == c).then_some(pi + 1),
        }
    }

    /// Evaluates the class opening at `open`. Returns whether `c` is in the
    /// class and the index after the closing `]`, or `None` if it never closes.
    fn match_class(&self, open: usize, c: u8) -> Option<(bool, usize)> {
        let p = &self.pattern;
        let mut i = open + 1;
        let negate = matches!(p.get(i), Some(b'^') | Some(b'!'));
        if negate {
            i += 1;
        }

        let mut matched = false;
        while i < p.len() && p[i] != b']' {
            if p[i] == b'\\' && i + 1 < p.len() {
                matched |= p[i + 1] == c;
                i += 2;
            } else if i + 2 < p.len() && p[i + 1] == b'-' && p[i + 2] != b']' {
                let (lo, hi) = if p[i] <= p[i + 2] {
                    (p[i], p[i + 2])
                } else {
                    (p[i + 2], p[i])
                };
                matched |= (lo..=hi).contains(&c);
                i += 3;
            } else {
                matched |= p[i] == c;
                i += 1;
            }
        }

        if i >= p.len() {
            return None;
        }
        Some((matched != negate, i + 1))
    }
}
