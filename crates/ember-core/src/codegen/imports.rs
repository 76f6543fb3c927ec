//! Recognition of module import statements in cell source.
//!
//! Matching is line based and deliberately shallow: a call-style pattern for
//! `require("name")` and a declarative pattern for `import ... "name"`.

use std::sync::LazyLock;

use regex::Regex;

static REQUIRE_STMT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"require\(\s*['"]([^'"()|]+?)['"]\s*\)"#).expect("valid require pattern")
});

static IMPORT_STMT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"import\s.*?['"]([^'"()|]+?)['"]"#).expect("valid import pattern")
});

/// Node.js builtin modules, never installed from the registry.
const BUILTIN_MODULES: &[&str] = &[
    "assert",
    "async_hooks",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "dns",
    "domain",
    "events",
    "fs",
    "http",
    "http2",
    "https",
    "inspector",
    "module",
    "net",
    "os",
    "path",
    "perf_hooks",
    "process",
    "punycode",
    "querystring",
    "readline",
    "repl",
    "stream",
    "string_decoder",
    "timers",
    "tls",
    "trace_events",
    "tty",
    "url",
    "util",
    "v8",
    "vm",
    "worker_threads",
    "zlib",
];

/// Determine if a line of code contains a module import statement.
pub fn is_module_import_statement(line: &str) -> bool {
    REQUIRE_STMT.is_match(line) || IMPORT_STMT.is_match(line)
}

/// Module specifiers referenced by import or require statements, in order of
/// first appearance.
pub fn find_module_specifiers(code: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = REQUIRE_STMT
        .captures_iter(code)
        .chain(IMPORT_STMT.captures_iter(code))
        .filter_map(|caps| caps.get(1))
        .map(|m| (m.start(), m.as_str().trim().to_string()))
        .collect();
    found.sort_by_key(|(start, _)| *start);

    let mut specifiers: Vec<String> = Vec::new();
    for (_, specifier) in found {
        if !specifiers.contains(&specifier) {
            specifiers.push(specifier);
        }
    }
    specifiers
}

/// Names of registry packages the code depends on.
///
/// Relative and absolute paths, `node:` specifiers and builtins are skipped.
/// Deep imports are reduced to their package (`lodash/fp` to `lodash`,
/// `@scope/pkg/sub` to `@scope/pkg`).
pub fn find_required_packages(code: &str) -> Vec<String> {
    let mut packages: Vec<String> = Vec::new();
    for specifier in find_module_specifiers(code) {
        let Some(package) = package_name(&specifier) else {
            continue;
        };
        if !packages.contains(&package) {
            packages.push(package);
        }
    }
    packages
}

/// Package name of a bare module specifier.
pub fn package_name(specifier: &str) -> Option<String> {
    if specifier.is_empty()
        || specifier.starts_with('.')
        || specifier.starts_with('/')
        || specifier.starts_with("node:")
    {
        return None;
    }

    let mut parts = specifier.split('/');
    let first = parts.next()?;
    let package = if first.starts_with('@') {
        format!("{}/{}", first, parts.next()?)
    } else {
        first.to_string()
    };

    if BUILTIN_MODULES.contains(&package.as_str()) {
        return None;
    }
    Some(package)
}
