//! The file worker: a pure, re-entrant function from "one changed file" to
//! [`WorkerMetadata`].

use std::{path::Path, sync::Arc};

use camino::Utf8Path;
use color_eyre::{Result, eyre::Context};
use itertools::Itertools;
use lazy_regex::regex;
use relative_path::RelativePathBuf;
use tracing::instrument;

use crate::{error::BuildError, fingerprint::Fingerprint, model::ModuleKind};

/// File extensions this core tracks but never parses for a haste name or
/// dependencies: binary and data formats where any text match would be
/// coincidental. `package.json` is the sole JSON exception and is handled
/// before this list is consulted.
pub const BLACKLISTED_EXTENSIONS: &[&str] = &[
    "json", "bmp", "gif", "ico", "jpeg", "jpg", "png", "svg", "tiff", "tif", "webp", "avi", "mp4",
    "mpeg", "mpg", "ogv", "webm", "3gp", "3g2", "aac", "midi", "mid", "mp3", "oga", "wav", "eot",
    "otf", "ttf", "woff", "woff2",
];

/// Returns whether `extension` (without the leading dot) is blacklisted
/// from parsing.
pub fn is_blacklisted_extension(extension: &str) -> bool {
    BLACKLISTED_EXTENSIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(extension))
}

/// A plugin supplying a haste name for a file, beyond the `package.json`
/// `name`-field convention. Modeled as a trait object since, in a systems
/// language, dynamic plugin loading becomes a capability the embedding
/// application passes in rather than something the builder resolves
/// itself at runtime.
pub trait HasteImpl: Send + Sync {
    /// Derive a haste name for the file at `path`, given its contents.
    /// Returns `None` if this file does not claim a haste name.
    fn get_haste_name(&self, path: &Utf8Path, content: &[u8]) -> Result<Option<String>>;
}

/// A plugin extracting the ordered list of module specifiers a file's
/// source text depends on. The core treats the extraction grammar as a
/// black box behind this single method.
pub trait DependencyExtractor: Send + Sync {
    /// Extract dependency specifiers from `content`. `path` is provided for
    /// diagnostics; extractors should not need to re-read the file.
    fn extract(&self, content: &str, path: &Utf8Path) -> Result<Vec<String>>;
}

/// The default [`DependencyExtractor`]: recognizes `require("...")` and
/// `import ... from "..."`-shaped string literals via a single compiled
/// regex. This stands in for the pluggable grammar the design treats as an
/// external collaborator; it exists so this crate's own tests and
/// benchmarks are self-contained without a real JS/TS parser dependency.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultDependencyExtractor;

impl DependencyExtractor for DefaultDependencyExtractor {
    fn extract(&self, content: &str, _path: &Utf8Path) -> Result<Vec<String>> {
        let pattern = regex!(
            r#"(?:require\s*\(\s*|import\s+(?:[\w*{}\s,]+\s+from\s+)?)["']([^"']+)["']"#
        );
        Ok(pattern
            .captures_iter(content)
            .map(|caps| caps[1].to_string())
            .unique()
            .collect())
    }
}

/// Flags controlling what a single [`process`] call computes.
#[derive(Clone)]
pub struct WorkerFlags {
    /// Whether to extract dependencies at all.
    pub compute_dependencies: bool,
    /// Whether to compute a content fingerprint if the crawl did not
    /// already supply one.
    pub compute_fingerprint: bool,
    /// Optional haste-name plugin.
    pub haste_impl: Option<Arc<dyn HasteImpl>>,
    /// Optional dependency-extraction plugin; defaults to
    /// [`DefaultDependencyExtractor`] when absent.
    pub dependency_extractor: Option<Arc<dyn DependencyExtractor>>,
    /// Whether `node_modules` files should still be fully processed rather
    /// than retained-but-unvisited.
    pub retain_all_files: bool,
}

/// The output of processing a single file.
#[derive(Clone, Debug, Default)]
pub struct WorkerMetadata {
    /// The haste name this file claims, if any.
    pub id: Option<String>,
    /// The module entry to register for `id`, if `id` is present.
    pub module: Option<(RelativePathBuf, ModuleKind)>,
    /// Extracted dependency specifiers, ordered and de-duplicated.
    pub dependencies: Vec<String>,
    /// A content fingerprint, if computed.
    pub fingerprint: Option<Fingerprint>,
}

/// Process one file: compute a fingerprint, extract dependencies, and
/// determine a haste name, per the rules in the design.
///
/// This function is pure with respect to its inputs (file contents plus
/// `flags`); it owns nothing from the index and may be re-entered freely,
/// which is what makes it safe to dispatch across a worker pool.
#[instrument(skip(flags), fields(path = %relative_path))]
pub async fn process(
    root_dir: &Utf8Path,
    relative_path: &RelativePathBuf,
    flags: &WorkerFlags,
    already_fingerprinted: Option<Fingerprint>,
) -> Result<WorkerMetadata> {
    let absolute = root_dir.join(relative_path.as_str());

    if is_node_modules(relative_path) && !flags.retain_all_files {
        return Ok(WorkerMetadata::default());
    }

    // Read directly rather than through `fs::read_buffered`: that helper
    // collapses every error into `Option<Vec<u8>>`, which loses the
    // `io::ErrorKind` this function needs to tell a recovered fault (file
    // vanished, permission denied) from one that should abort the build.
    let content = match tokio::fs::read(absolute.as_std_path()).await {
        Ok(content) => content,
        Err(err)
            if matches!(
                err.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ) =>
        {
            return Err(BuildError::FileUnreadable {
                path: relative_path.clone(),
                code: err.raw_os_error(),
            }
            .into());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("read file {relative_path}"));
        }
    };

    let fingerprint = if flags.compute_fingerprint && already_fingerprinted.is_none() {
        Some(Fingerprint::from_bytes(&content))
    } else {
        already_fingerprinted
    };

    if is_package_json(relative_path) {
        let (id, module) = parse_package_json(relative_path, &content)?;
        return Ok(WorkerMetadata {
            id,
            module,
            dependencies: Vec::new(),
            fingerprint,
        });
    }

    if relative_path
        .extension()
        .is_some_and(is_blacklisted_extension)
    {
        return Ok(WorkerMetadata {
            id: None,
            module: None,
            dependencies: Vec::new(),
            fingerprint,
        });
    }

    let id = match &flags.haste_impl {
        Some(plugin) => plugin
            .get_haste_name(absolute.as_path(), &content)
            .map_err(|cause| BuildError::PluginFailure {
                plugin: "haste_impl",
                cause: cause.to_string(),
            })?,
        None => None,
    };
    let module = id
        .clone()
        .map(|_| (relative_path.clone(), ModuleKind::Module));

    let dependencies = if flags.compute_dependencies {
        let text = String::from_utf8_lossy(&content);
        let extractor = flags.dependency_extractor.clone();
        match extractor {
            Some(extractor) => extractor
                .extract(&text, absolute.as_path())
                .map_err(|cause| BuildError::PluginFailure {
                    plugin: "dependency_extractor",
                    cause: cause.to_string(),
                })?,
            None => DefaultDependencyExtractor.extract(&text, absolute.as_path())?,
        }
    } else {
        Vec::new()
    };

    Ok(WorkerMetadata {
        id,
        module,
        dependencies,
        fingerprint,
    })
}

fn is_node_modules(path: &RelativePathBuf) -> bool {
    path.components()
        .any(|c| matches!(c, relative_path::Component::Normal("node_modules")))
}

fn is_package_json(path: &RelativePathBuf) -> bool {
    path.file_name() == Some("package.json")
}

fn parse_package_json(
    path: &RelativePathBuf,
    content: &[u8],
) -> Result<(Option<String>, Option<(RelativePathBuf, ModuleKind)>)> {
    let value: serde_json::Value =
        serde_json::from_slice(content).map_err(|_| BuildError::InvalidPackageJson { path: path.clone() })?;
    if !value.is_object() {
        return Err(BuildError::InvalidPackageJson { path: path.clone() }.into());
    }
    let name = value.get("name").and_then(|v| v.as_str()).map(str::to_string);
    match name {
        Some(name) => {
            let module = (path.clone(), ModuleKind::Package);
            Ok((Some(name), Some(module)))
        }
        None => Ok((None, None)),
    }
}

/// Borrow the absolute path as a plain filesystem path, for callers needing
/// `&Path` rather than `&Utf8Path`.
pub fn as_std_path(path: &Utf8Path) -> &Path {
    path.as_std_path()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    use super::*;

    fn flags() -> WorkerFlags {
        WorkerFlags {
            compute_dependencies: true,
            compute_fingerprint: true,
            haste_impl: None,
            dependency_extractor: None,
            retain_all_files: false,
        }
    }

    #[tokio::test]
    async fn package_json_with_a_name_field_claims_a_package_module() {
        let dir = tempfile::tempdir().expect("create temp dir");
        tokio::fs::write(dir.path().join("package.json"), br#"{"name":"pkg"}"#)
            .await
            .expect("write file");

        let root = Utf8Path::from_path(dir.path()).expect("utf8 path");
        let result = process(
            root,
            &RelativePathBuf::from("package.json"),
            &flags(),
            None,
        )
        .await
        .expect("process");

        assert_eq!(result.id.as_deref(), Some("pkg"));
        assert_eq!(
            result.module,
            Some((RelativePathBuf::from("package.json"), ModuleKind::Package))
        );
    }

    #[tokio::test]
    async fn package_json_without_a_name_field_claims_nothing() {
        let dir = tempfile::tempdir().expect("create temp dir");
        tokio::fs::write(dir.path().join("package.json"), br#"{}"#)
            .await
            .expect("write file");

        let root = Utf8Path::from_path(dir.path()).expect("utf8 path");
        let result = process(root, &RelativePathBuf::from("package.json"), &flags(), None)
            .await
            .expect("process");

        assert_eq!(result.id, None);
        assert_eq!(result.module, None);
    }

    #[tokio::test]
    async fn missing_file_is_a_recoverable_file_unreadable_error() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let root = Utf8Path::from_path(dir.path()).expect("utf8 path");
        let err = process(root, &RelativePathBuf::from("gone.js"), &flags(), None)
            .await
            .expect_err("should fail");
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::FileUnreadable { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_package_json_is_a_hard_error() {
        let dir = tempfile::tempdir().expect("create temp dir");
        tokio::fs::write(dir.path().join("package.json"), b"not json")
            .await
            .expect("write file");

        let root = Utf8Path::from_path(dir.path()).expect("utf8 path");
        let err = process(root, &RelativePathBuf::from("package.json"), &flags(), None)
            .await
            .expect_err("should fail");
        assert!(err.downcast_ref::<BuildError>().is_some());
    }

    #[test_case("foo.json", true; "json_is_blacklisted")]
    #[test_case("foo.png", true; "png_is_blacklisted")]
    #[test_case("foo.js", false; "js_is_not_blacklisted")]
    #[test]
    fn blacklist_membership(extension: &str, expected: bool) {
        let ext = extension.rsplit('.').next().unwrap();
        assert_eq!(is_blacklisted_extension(ext), expected);
    }

    #[tokio::test]
    async fn node_modules_files_are_skipped_unless_retaining_all() {
        let dir = tempfile::tempdir().expect("create temp dir");
        tokio::fs::create_dir_all(dir.path().join("node_modules/x"))
            .await
            .expect("create dir");
        tokio::fs::write(dir.path().join("node_modules/x/i.js"), b"")
            .await
            .expect("write file");

        let root = Utf8Path::from_path(dir.path()).expect("utf8 path");
        let rel = RelativePathBuf::from("node_modules/x/i.js");
        let result = process(root, &rel, &flags(), None).await.expect("process");
        assert_eq!(result.id, None);
        assert_eq!(result.fingerprint, None);
    }

    #[tokio::test]
    async fn default_extractor_finds_require_and_import_specifiers() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let content = b"const a = require('./a');\nimport b from \"./b\";\n";
        tokio::fs::write(dir.path().join("index.js"), content)
            .await
            .expect("write file");

        let root = Utf8Path::from_path(dir.path()).expect("utf8 path");
        let result = process(root, &RelativePathBuf::from("index.js"), &flags(), None)
            .await
            .expect("process");

        assert_eq!(result.dependencies, vec!["./a".to_string(), "./b".to_string()]);
    }
}
