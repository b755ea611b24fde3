//! Call-site resolution via stack introspection.
//!
//! All caller-depth fragility in the crate is contained here: one resolver,
//! anchored at its own frame, with one skip constant per public entry depth.
//! If a new wrapping layer is inserted between a public entry point and
//! [`resolve`], the matching constant must be incremented — the regression
//! tests below and in `tests/pipeline.rs` exist to catch that drift.

/// Frames between [`resolve`] and the caller of a [`Logger`][crate::Logger]
/// entry point: `resolve` → `build_attributes` → `Logger::emit` → the public
/// method → the original call site.
pub(crate) const LOG_CALL_SKIP_FRAMES: usize = 4;

/// Frames between [`resolve`] and the caller of
/// [`span::start_span`][crate::span::start_span]: `resolve` → `start_span` →
/// the original call site.
pub(crate) const SPAN_START_SKIP_FRAMES: usize = 2;

/// The resolved identity of one call site.
///
/// Exists only for the duration of a single emission; all fields default to
/// empty/zero when stack information is unavailable, because caller
/// resolution must never abort an emission.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Caller {
    /// Source file of the call site.
    pub file_path: String,

    /// Line number of the call site.
    pub line_number: u32,

    /// Name of the calling function, without its module path.
    pub function_name: String,

    /// Module path of the calling function; empty if the symbol has no path
    /// separator.
    pub namespace: String,
}

/// Resolves the call site `skip_frames` stack frames above this function's
/// own frame.
///
/// The unwinder's own frames above `resolve` vary by platform, so the walk
/// first locates the `resolve` frame by symbol name and counts from there.
#[inline(never)]
pub(crate) fn resolve(skip_frames: usize) -> Caller {
    let backtrace = backtrace::Backtrace::new();
    let frames = backtrace.frames();

    let Some(anchor) = frames.iter().position(|frame| {
        frame.symbols().iter().any(|symbol| {
            symbol
                .name()
                .is_some_and(|name| strip_symbol_hash(&name.to_string()).ends_with("caller::resolve"))
        })
    }) else {
        return Caller::default();
    };

    let Some(symbol) = anchor
        .checked_add(skip_frames)
        .and_then(|index| frames.get(index))
        .and_then(|frame| frame.symbols().first())
    else {
        return Caller::default();
    };

    let (namespace, function_name) = symbol
        .name()
        .map(|name| split_symbol_name(strip_symbol_hash(&name.to_string())))
        .unwrap_or_default();

    Caller {
        file_path: symbol
            .filename()
            .map(|path| path.display().to_string())
            .unwrap_or_default(),
        line_number: symbol.lineno().unwrap_or_default(),
        function_name,
        namespace,
    }
}

/// Strips the trailing `::h<16 hex digits>` disambiguator rustc appends to
/// mangled symbols, if present.
fn strip_symbol_hash(name: &str) -> &str {
    if let Some((head, tail)) = name.rsplit_once("::") {
        let mut chars = tail.chars();
        if tail.len() == 17
            && chars.next() == Some('h')
            && chars.all(|c| c.is_ascii_hexdigit())
        {
            return head;
        }
    }
    name
}

/// Splits a demangled symbol into `(namespace, function_name)` on the last
/// path separator. A symbol with no separator has an empty namespace.
fn split_symbol_name(name: &str) -> (String, String) {
    match name.rsplit_once("::") {
        Some((namespace, function)) => (namespace.to_string(), function.to_string()),
        None => (String::new(), name.to_string()),
    }
}
