//! Context references (`github.event.issue.title`) and the dotted
//! patterns used to classify them.

use crate::Expr;

/// A context reference inside an expression.
///
/// The head is usually an identifier (`github`, `inputs`, `steps`), but can
/// also be a call, as in `fromJSON(steps.x.outputs.json).name`.
#[derive(Debug)]
pub struct Context<'src> {
    raw: &'src str,
    /// The components of the context, in order.
    pub parts: Vec<Expr<'src>>,
}

impl<'src> Context<'src> {
    pub(crate) fn new(raw: &'src str, parts: Vec<Expr<'src>>) -> Self {
        Self { raw, parts }
    }

    /// The context exactly as written.
    pub fn as_str(&self) -> &'src str {
        self.raw
    }

    /// Returns the lowercased, dotted form of this context, if every part
    /// can be expressed that way.
    ///
    /// `github['event'].issue[0]` becomes `github.event.issue.*`; contexts
    /// headed by a call or indexed by a computed value return `None`.
    pub fn as_pattern(&self) -> Option<String> {
        let mut out = Vec::with_capacity(self.parts.len());

        for part in &self.parts {
            let piece = match part {
                Expr::Identifier(ident) => ident.as_str().to_ascii_lowercase(),
                Expr::Star => "*".into(),
                Expr::Index(idx) => match idx.as_ref() {
                    Expr::String(s) => s.to_ascii_lowercase(),
                    Expr::Number(_) | Expr::Star => "*".into(),
                    _ => return None,
                },
                _ => return None,
            };
            out.push(piece);
        }

        Some(out.join("."))
    }

    /// Returns whether this context is `pattern` or lives beneath it.
    pub fn child_of(&self, pattern: &str) -> bool {
        ContextPattern::new(pattern).is_some_and(|p| p.parent_of(self))
    }

    /// If the context's head is `head`, returns the remainder of the
    /// context as written.
    pub fn pop_if(&self, head: &str) -> Option<&'src str> {
        match self.parts.first()? {
            Expr::Identifier(ident) if ident == head => {
                self.raw.split_once('.').map(|(_, tail)| tail)
            }
            _ => None,
        }
    }

    /// Returns the identifier or string-index at `idx`, if there is one.
    pub fn segment(&self, idx: usize) -> Option<&str> {
        match self.parts.get(idx)? {
            Expr::Identifier(ident) => Some(ident.as_str()),
            Expr::Index(inner) => inner.as_string(),
            _ => None,
        }
    }
}

impl PartialEq for Context<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.raw.eq_ignore_ascii_case(other.raw)
    }
}

impl PartialEq<str> for Context<'_> {
    fn eq(&self, other: &str) -> bool {
        self.raw.eq_ignore_ascii_case(other)
    }
}

/// A dotted pattern such as `github.event.commits.*.message`.
///
/// `*` matches exactly one component. Patterns never contain indices, but
/// indexed contexts match them: `github.event.pages[0].page_name` is matched
/// by `github.event.pages.*.page_name`.
#[derive(Debug, Clone, Copy)]
pub struct ContextPattern<'p>(&'p str);

impl<'p> ContextPattern<'p> {
    /// Validates and wraps a pattern.
    pub fn new(pattern: &'p str) -> Option<Self> {
        let valid = !pattern.is_empty()
            && pattern.split('.').all(|seg| {
                seg == "*"
                    || (!seg.is_empty()
                        && seg
                            .bytes()
                            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'))
            });

        valid.then_some(Self(pattern))
    }

    /// Walks the pattern against the context. Returns the number of
    /// context parts left over after the pattern is exhausted, or `None`
    /// on a mismatch.
    fn overhang(&self, ctx: &Context) -> Option<usize> {
        let segments = self.0.split('.').collect::<Vec<_>>();
        if segments.len() > ctx.parts.len() {
            return None;
        }

        for (seg, part) in segments.iter().zip(&ctx.parts) {
            let matched = match part {
                Expr::Call { .. } => false,
                // A wildcard in the context is only matched by a wildcard.
                Expr::Star => *seg == "*",
                _ if *seg == "*" => true,
                Expr::Identifier(ident) => ident == *seg,
                Expr::Index(idx) => match idx.as_ref() {
                    Expr::String(key) => key.eq_ignore_ascii_case(seg),
                    _ => false,
                },
                _ => false,
            };

            if !matched {
                return None;
            }
        }

        Some(ctx.parts.len() - segments.len())
    }

    /// Returns whether the context equals the pattern or is nested under it.
    pub fn parent_of(&self, ctx: &Context) -> bool {
        self.overhang(ctx).is_some()
    }

    /// Returns whether the context matches the pattern exactly.
    pub fn matches(&self, ctx: &Context) -> bool {
        self.overhang(ctx) == Some(0)
    }
}
