//! Filesystem probing: exact file, TypeScript source swap, extensions,
//! try-prefix, then directory entry (package.json, then `index`).

use super::{Ctx, ResolveError, Resolver};
use crate::patterns::is_possible_ts_output;
use modgraph_util::path::{extname, is_in_node_modules, normalize_slashes, split_file_and_postfix};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    File,
    Dir,
}

fn stat(path: &str) -> Option<Kind> {
    let meta = std::fs::metadata(path).ok()?;
    if meta.is_file() {
        Some(Kind::File)
    } else if meta.is_dir() {
        Some(Kind::Dir)
    } else {
        None
    }
}

impl Resolver {
    /// Resolve a candidate path to an existing file, keeping any postfix.
    ///
    /// Paths inside `node_modules` may legitimately contain `#`, so the
    /// whole string (up to a `?`) is tried as a file name first.
    pub(super) fn try_fs_resolve(
        &self,
        fs_path: &str,
        ctx: &Ctx<'_>,
        try_index: bool,
        skip_package_json: bool,
    ) -> Result<Option<String>, ResolveError> {
        if let Some(hash) = fs_path.find('#') {
            if is_in_node_modules(fs_path) {
                let query = fs_path.find('?');
                if query.map_or(true, |q| q > hash) {
                    let file = query.map_or(fs_path, |q| &fs_path[..q]);
                    if let Some(res) = self.try_clean_fs_resolve(file, ctx, try_index, skip_package_json)? {
                        return Ok(Some(format!("{res}{}", &fs_path[file.len()..])));
                    }
                }
            }
        }

        let (file, postfix) = split_file_and_postfix(fs_path);
        Ok(self
            .try_clean_fs_resolve(file, ctx, try_index, skip_package_json)?
            .map(|res| format!("{res}{postfix}")))
    }

    fn try_clean_fs_resolve(
        &self,
        file: &str,
        ctx: &Ctx<'_>,
        try_index: bool,
        skip_package_json: bool,
    ) -> Result<Option<String>, ResolveError> {
        let opts = &*self.options;
        let kind = stat(file);
        if kind == Some(Kind::File) {
            return Ok(Some(self.real_path(file)));
        }

        let possible_js_to_ts = ctx.ts_importer && is_possible_ts_output(file);
        if possible_js_to_ts || !opts.extensions.is_empty() || opts.try_prefix.is_some() {
            let dir = super::parent_id(file);
            if stat(dir) == Some(Kind::Dir) {
                if possible_js_to_ts {
                    let ext = extname(file);
                    let stem = &file[..file.len() - ext.len()];
                    if let Some(res) = self.try_real_file(&format!("{stem}{}", ext.replacen("js", "ts", 1))) {
                        return Ok(Some(res));
                    }
                    if ext == ".js" {
                        if let Some(res) = self.try_real_file(&format!("{stem}.tsx")) {
                            return Ok(Some(res));
                        }
                    }
                }

                if let Some(res) = self.try_with_extensions(file) {
                    return Ok(Some(res));
                }

                if let Some(prefix) = &opts.try_prefix {
                    let base = file.rsplit('/').next().unwrap_or(file);
                    let prefixed = format!("{dir}/{prefix}{base}");
                    if let Some(res) = self.try_real_file(&prefixed).or_else(|| self.try_with_extensions(&prefixed)) {
                        return Ok(Some(res));
                    }
                }
            }
        }

        if !try_index || kind != Some(Kind::Dir) {
            return Ok(None);
        }

        if !skip_package_json && Path::new(file).join("package.json").is_file() {
            let pkg_dir = if opts.preserve_symlinks {
                Path::new(file).to_path_buf()
            } else {
                dunce::canonicalize(file).unwrap_or_else(|_| Path::new(file).to_path_buf())
            };
            if let Some(pkg) = self.packages.load_package(&pkg_dir)? {
                match self.resolve_package_entry(file, &pkg, ctx) {
                    Ok(entry) => return Ok(Some(entry)),
                    Err(e) if e.is_package_entry() => {
                        tracing::debug!(dir = file, error = %e, "package entry failed, trying index");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if let Some(res) = self.try_with_extensions(&format!("{file}/index")) {
            return Ok(Some(res));
        }
        if let Some(prefix) = &opts.try_prefix {
            if let Some(res) = self.try_with_extensions(&format!("{file}/{prefix}index")) {
                return Ok(Some(res));
            }
        }
        Ok(None)
    }

    fn try_with_extensions(&self, base: &str) -> Option<String> {
        self.options
            .extensions
            .iter()
            .find_map(|ext| self.try_real_file(&format!("{base}{ext}")))
    }

    fn try_real_file(&self, file: &str) -> Option<String> {
        (stat(file) == Some(Kind::File)).then(|| self.real_path(file))
    }

    fn real_path(&self, file: &str) -> String {
        if self.options.preserve_symlinks {
            return file.to_string();
        }
        dunce::canonicalize(file).map_or_else(|_| file.to_string(), |p| normalize_slashes(&p))
    }
}
