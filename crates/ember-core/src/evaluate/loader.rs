//! CommonJS module resolution for `require`.
//!
//! ```text
//! ./lib          ->  ./lib, ./lib.js, ./lib.json, ./lib/index.js
//! lodash         ->  node_modules/lodash/<package.json main | index.js>
//! lodash/fp      ->  node_modules/lodash/fp (same relative candidates)
//! ```
//!
//! Bare names are looked up in `node_modules` of the requiring directory and
//! each of its ancestors.

use std::path::{Path, PathBuf};

use serde_json::{Value, json};

const EXTENSIONS: &[&str] = &["js", "json", "cjs"];

/// Resolve `specifier` required from `base_dir` to a file.
pub fn resolve(base_dir: &Path, specifier: &str) -> Option<PathBuf> {
    if specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/') {
        return resolve_file(&base_dir.join(specifier));
    }

    let specifier = specifier.strip_prefix("node:").unwrap_or(specifier);
    base_dir.ancestors().find_map(|dir| {
        let modules = dir.join("node_modules");
        if modules.is_dir() {
            resolve_package(&modules, specifier)
        } else {
            None
        }
    })
}

fn resolve_package(modules: &Path, specifier: &str) -> Option<PathBuf> {
    let (package, subpath) = split_package(specifier);
    let package_dir = modules.join(package);
    if !package_dir.is_dir() {
        return None;
    }

    match subpath {
        Some(subpath) => resolve_file(&package_dir.join(subpath)),
        None => resolve_directory(&package_dir),
    }
}

/// Split `@scope/name/deep` into `@scope/name` and `deep`.
fn split_package(specifier: &str) -> (&str, Option<&str>) {
    let separator = if specifier.starts_with('@') {
        specifier
            .match_indices('/')
            .nth(1)
            .map(|(index, _)| index)
    } else {
        specifier.find('/')
    };

    match separator {
        Some(index) => (&specifier[..index], Some(&specifier[index + 1..])),
        None => (specifier, None),
    }
}

fn resolve_file(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    for extension in EXTENSIONS {
        let mut candidate = path.as_os_str().to_owned();
        candidate.push(".");
        candidate.push(extension);
        let candidate = PathBuf::from(candidate);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    if path.is_dir() {
        return resolve_directory(path);
    }
    None
}

fn resolve_directory(dir: &Path) -> Option<PathBuf> {
    let main = std::fs::read_to_string(dir.join("package.json"))
        .ok()
        .and_then(|manifest| serde_json::from_str::<Value>(&manifest).ok())
        .and_then(|manifest| manifest.get("main").and_then(Value::as_str).map(str::to_string));

    if let Some(main) = main {
        let main_path = dir.join(main);
        if let Some(resolved) = resolve_file_only(&main_path) {
            return Some(resolved);
        }
    }

    let index = dir.join("index.js");
    index.is_file().then_some(index)
}

fn resolve_file_only(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    let index = path.join("index.js");
    if index.is_file() {
        return Some(index);
    }
    let mut with_extension = path.as_os_str().to_owned();
    with_extension.push(".js");
    let with_extension = PathBuf::from(with_extension);
    with_extension.is_file().then_some(with_extension)
}

/// Read a resolved module into the JSON envelope the prelude expects.
pub fn load(path: &Path) -> Value {
    match std::fs::read_to_string(path) {
        Ok(source) => {
            let format = if path.extension().is_some_and(|ext| ext == "json") {
                "json"
            } else {
                "cjs"
            };
            json!({
                "ok": true,
                "format": format,
                "path": path.display().to_string(),
                "source": source,
            })
        }
        Err(err) => json!({
            "ok": false,
            "error": format!("{}: {}", path.display(), err),
        }),
    }
}
