//! Call-nesting snapshots reported by the engine at every callback.
//!
//! A [`Contexts`] value lists the engine's active frames innermost first.
//! Its length is the "depth" the coordinator orders requests by: a prompt
//! reported at a greater depth means evaluation has recursed, a smaller
//! depth means some evaluation has returned.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a single engine frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallFlag {
    Toplevel,
    Next,
    Break,
    Loop,
    Function,
    #[serde(rename = "ccode")]
    CCode,
    Browser,
    Restart,
    Builtin,
}

impl CallFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Toplevel => "toplevel",
            Self::Next => "next",
            Self::Break => "break",
            Self::Loop => "loop",
            Self::Function => "function",
            Self::CCode => "ccode",
            Self::Browser => "browser",
            Self::Restart => "restart",
            Self::Builtin => "builtin",
        }
    }

    /// Frames that never host a user-visible prompt by default.
    pub fn default_internal() -> Vec<CallFlag> {
        vec![Self::CCode, Self::Builtin]
    }
}

impl fmt::Display for CallFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One nesting frame advertised by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Context {
    pub call_flag: CallFlag,
}

impl Context {
    pub const fn new(call_flag: CallFlag) -> Self {
        Self { call_flag }
    }
}

/// Innermost-first sequence of engine frames.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Contexts(Vec<Context>);

impl Contexts {
    pub fn new(frames: Vec<Context>) -> Self {
        Self(frames)
    }

    /// A single top-level frame, the shallowest state a live engine reports.
    pub fn toplevel() -> Self {
        Self(vec![Context::new(CallFlag::Toplevel)])
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn innermost(&self) -> Option<&Context> {
        self.0.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Context> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Context] {
        &self.0
    }

    /// Depth once the leading run of internal frames is discarded.
    ///
    /// Errors raised from inside builtins or native code belong to the
    /// first user-level frame beneath them.
    pub fn effective_depth(&self, internal: &[CallFlag]) -> usize {
        let skipped = self
            .0
            .iter()
            .take_while(|c| internal.contains(&c.call_flag))
            .count();
        self.0.len() - skipped
    }

    /// Copy of these contexts with `flag` pushed as the new innermost frame.
    pub fn nested(&self, flag: CallFlag) -> Self {
        let mut frames = Vec::with_capacity(self.0.len() + 1);
        frames.push(Context::new(flag));
        frames.extend_from_slice(&self.0);
        Self(frames)
    }
}

impl From<Vec<Context>> for Contexts {
    fn from(frames: Vec<Context>) -> Self {
        Self(frames)
    }
}

impl FromIterator<CallFlag> for Contexts {
    fn from_iter<I: IntoIterator<Item = CallFlag>>(iter: I) -> Self {
        Self(iter.into_iter().map(Context::new).collect())
    }
}

impl fmt::Display for Contexts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, ctx) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(ctx.call_flag.as_str())?;
        }
        f.write_str("]")
    }
}
