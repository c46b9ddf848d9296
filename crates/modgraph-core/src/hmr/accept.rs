//! Heuristic `import.meta.hot` accept analysis.
//!
//! Line scanning, not parsing: it reads `hot.accept(` and
//! `hot.acceptExports(` calls and looks only at the first argument. Calls
//! inside strings or block comments that do not start the line can be
//! misread. A false self-accept makes the client attempt an update it then
//! turns into a reload; a missed accept costs a full reload.

use std::collections::BTreeSet;

/// What a module's source declares about HMR.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HotAccept {
    /// `hot.accept()` or `hot.accept(cb)`.
    pub is_self_accepting: bool,
    /// Specifiers passed as `hot.accept('dep', cb)` or `hot.accept(['a', 'b'], cb)`.
    pub accepted_deps: Vec<String>,
    /// Export names from `hot.acceptExports(...)`.
    pub accepted_exports: Option<BTreeSet<String>>,
}

const ACCEPT: [&str; 2] = [".hot.accept(", ".hot?.accept("];
const ACCEPT_EXPORTS: [&str; 2] = [".hot.acceptExports(", ".hot?.acceptExports("];

#[must_use]
pub fn analyze_hot_accept(code: &str) -> HotAccept {
    let mut info = HotAccept::default();
    for line in code.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("//") || trimmed.starts_with('*') || trimmed.starts_with("/*") {
            continue;
        }
        if !trimmed.contains(".hot.accept") && !trimmed.contains(".hot?.accept") {
            continue;
        }

        for args in calls(trimmed, &ACCEPT) {
            match first_argument(args) {
                Argument::Strings(deps) => {
                    for dep in deps {
                        if !info.accepted_deps.contains(&dep) {
                            info.accepted_deps.push(dep);
                        }
                    }
                }
                Argument::Other => info.is_self_accepting = true,
            }
        }
        for args in calls(trimmed, &ACCEPT_EXPORTS) {
            if let Argument::Strings(names) = first_argument(args) {
                info.accepted_exports
                    .get_or_insert_with(BTreeSet::new)
                    .extend(names);
            }
        }
    }
    info
}

/// Text after the open paren of every matching call.
fn calls<'a>(line: &'a str, patterns: &'a [&'a str]) -> impl Iterator<Item = &'a str> + 'a {
    patterns.iter().flat_map(move |pattern| {
        line.match_indices(pattern)
            .map(move |(idx, _)| &line[idx + pattern.len()..])
    })
}

enum Argument {
    /// A string literal or an array of string literals.
    Strings(Vec<String>),
    /// No argument, a callback, or anything else.
    Other,
}

fn first_argument(args: &str) -> Argument {
    let args = args.trim_start();
    match args.chars().next() {
        Some(q @ ('\'' | '"' | '`')) => match read_string(&args[1..], q) {
            Some(s) => Argument::Strings(vec![s]),
            None => Argument::Other,
        },
        Some('[') => {
            let mut out = Vec::new();
            let mut rest = &args[1..];
            loop {
                rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
                match rest.chars().next() {
                    Some(q @ ('\'' | '"' | '`')) => {
                        let Some(s) = read_string(&rest[1..], q) else {
                            break;
                        };
                        rest = &rest[s.len() + 2..];
                        out.push(s);
                    }
                    _ => break,
                }
            }
            Argument::Strings(out)
        }
        _ => Argument::Other,
    }
}

/// Literal content up to the closing quote. Escapes end the read.
fn read_string(s: &str, quote: char) -> Option<String> {
    let end = s.find(quote)?;
    let value = &s[..end];
    if value.contains('\\') || (quote == '`' && value.contains("${")) {
        return None;
    }
    Some(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_accepting() {
        assert!(analyze_hot_accept("import.meta.hot.accept();").is_self_accepting);
        assert!(analyze_hot_accept("import.meta.hot.accept(mod => { });").is_self_accepting);
        assert!(analyze_hot_accept("if (import.meta.hot) { import.meta.hot.accept(); }").is_self_accepting);
        assert!(analyze_hot_accept("import.meta.hot?.accept((m) => m)").is_self_accepting);
        assert!(!analyze_hot_accept("const x = 42;").is_self_accepting);
        assert!(!analyze_hot_accept("// import.meta.hot.accept()").is_self_accepting);
    }

    #[test]
    fn test_dep_accepts() {
        let info = analyze_hot_accept(
            "import.meta.hot.accept('./dep', cb);\nimport.meta.hot.accept([\"./a\", './b'], cb);\nimport.meta.hot.accept('./dep')",
        );
        assert!(!info.is_self_accepting);
        assert_eq!(info.accepted_deps, vec!["./dep", "./a", "./b"]);
    }

    #[test]
    fn test_accept_exports() {
        let info = analyze_hot_accept("import.meta.hot.acceptExports(['default', 'foo'])");
        assert!(!info.is_self_accepting);
        assert_eq!(
            info.accepted_exports,
            Some(BTreeSet::from(["default".to_string(), "foo".to_string()]))
        );

        let single = analyze_hot_accept("import.meta.hot.acceptExports('default', cb)");
        assert_eq!(single.accepted_exports.map(|e| e.len()), Some(1));
    }
}
