//! Integration tests for the persistent cache
//!
//! Every "run" below is a fresh `CacheManager` over the same directory,
//! standing in for a separate build process.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use kura_cache::{
    CacheManager, CacheOptions, CacheStatus, PluginRef, StorageMode, TransformConfig,
    TransformOutput, TransformedOutput, Transformer, TransformerIdentity,
};
use pretty_assertions::assert_eq;
use rayon::prelude::*;
use rstest::rstest;

/// Strips `// ...` comments and counts how often it runs.
#[derive(Default)]
struct StripComments {
    calls: AtomicUsize,
    dependencies: Vec<PathBuf>,
}

impl StripComments {
    fn with_dependency(path: PathBuf) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            dependencies: vec![path],
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transformer for StripComments {
    type Error = String;

    fn identity(&self) -> TransformerIdentity {
        TransformerIdentity::new("strip-comments", "0.3.1")
    }

    fn transform(&self, source: &str, config: &TransformConfig) -> Result<TransformOutput, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if source.contains("@@") {
            return Err(format!(
                "{}: unexpected token",
                config.filename.as_deref().unwrap_or("?")
            ));
        }
        let code: String = source
            .lines()
            .filter(|line| !line.trim_start().starts_with("//"))
            .map(|line| format!("{line}\n"))
            .collect();
        let output = if config.source_maps {
            TransformedOutput::new(code).with_map(r#"{"version":3}"#)
        } else {
            TransformedOutput::new(code)
        };
        Ok(TransformOutput::new(output).with_dependencies(self.dependencies.clone()))
    }
}

fn config(filename: &str) -> TransformConfig {
    TransformConfig {
        filename: Some(filename.to_string()),
        ..TransformConfig::default()
    }
}

fn options(dir: &Path, mode: StorageMode) -> CacheOptions {
    CacheOptions::new(dir).with_storage(mode)
}

fn entry_count(dir: &Path, mode: StorageMode) -> u64 {
    CacheManager::new(&options(dir, mode))
        .store()
        .unwrap()
        .stats()
        .unwrap()
        .entry_count
}

const BASIC: &str = "// header\nconst answer = 42;\n";

#[rstest]
#[case::database(StorageMode::Database)]
#[case::legacy(StorageMode::Legacy)]
fn repeat_build_is_served_from_cache(#[case] mode: StorageMode) {
    let dir = tempfile::tempdir().unwrap();
    let transformer = StripComments::default();

    let first = CacheManager::new(&options(dir.path(), mode))
        .resolve(BASIC, &config("basic.js"), &transformer)
        .unwrap();
    let (second, status) = CacheManager::new(&options(dir.path(), mode))
        .resolve_with_status(BASIC, &config("basic.js"), &transformer)
        .unwrap();

    assert_eq!(first.code, "const answer = 42;\n");
    assert_eq!(first, second);
    assert_eq!(status, CacheStatus::Hit);
    assert_eq!(transformer.calls(), 1);
    assert_eq!(entry_count(dir.path(), mode), 1);
}

#[test]
fn source_map_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let transformer = StripComments::default();
    let mut config = config("basic.js");
    config.source_maps = true;

    let first = CacheManager::new(&CacheOptions::new(dir.path()))
        .resolve(BASIC, &config, &transformer)
        .unwrap();
    let second = CacheManager::new(&CacheOptions::new(dir.path()))
        .resolve(BASIC, &config, &transformer)
        .unwrap();

    assert_eq!(second.map.as_deref(), Some(r#"{"version":3}"#));
    assert_eq!(first, second);
    assert_eq!(transformer.calls(), 1);
}

#[rstest]
#[case::database(StorageMode::Database)]
#[case::legacy(StorageMode::Legacy)]
fn identifiers_partition_the_store(#[case] mode: StorageMode) {
    let dir = tempfile::tempdir().unwrap();
    let transformer = StripComments::default();

    for id in ["a", "b"] {
        let options = options(dir.path(), mode).with_identifier(id);
        let (_, status) = CacheManager::new(&options)
            .resolve_with_status(BASIC, &config("basic.js"), &transformer)
            .unwrap();
        assert_eq!(status, CacheStatus::Miss);
    }

    assert_eq!(transformer.calls(), 2);
    assert_eq!(entry_count(dir.path(), mode), 2);
}

#[rstest]
#[case::database(StorageMode::Database)]
#[case::legacy(StorageMode::Legacy)]
fn one_entry_per_source(#[case] mode: StorageMode) {
    let dir = tempfile::tempdir().unwrap();
    let manager = CacheManager::new(&options(dir.path(), mode));
    let transformer = StripComments::default();

    for (name, source) in [("a.js", "let a;"), ("b.js", "let b;"), ("c.js", "let c;")] {
        manager.resolve(source, &config(name), &transformer).unwrap();
    }

    assert_eq!(entry_count(dir.path(), mode), 3);
}

#[test]
fn plugin_upgrade_invalidates() {
    let dir = tempfile::tempdir().unwrap();
    let transformer = StripComments::default();
    let with_plugin = |version: &str| {
        let mut config = config("basic.js");
        config.plugins.push(PluginRef::new("minify", version));
        config
    };

    CacheManager::new(&CacheOptions::new(dir.path()))
        .resolve(BASIC, &with_plugin("1.0.0"), &transformer)
        .unwrap();
    let (_, status) = CacheManager::new(&CacheOptions::new(dir.path()))
        .resolve_with_status(BASIC, &with_plugin("1.1.0"), &transformer)
        .unwrap();

    assert_eq!(status, CacheStatus::Miss);
}

#[test]
fn anonymous_plugin_is_never_cached() {
    let dir = tempfile::tempdir().unwrap();
    let transformer = StripComments::default();
    let mut config = config("basic.js");
    config.plugins.push(PluginRef::anonymous());

    for _ in 0..2 {
        let (out, status) = CacheManager::new(&CacheOptions::new(dir.path()))
            .resolve_with_status(BASIC, &config, &transformer)
            .unwrap();
        assert_eq!(out.code, "const answer = 42;\n");
        assert_eq!(status, CacheStatus::Bypassed);
    }
    assert_eq!(transformer.calls(), 2);
}

#[rstest]
#[case::database(StorageMode::Database)]
#[case::legacy(StorageMode::Legacy)]
fn dependency_edit_invalidates(#[case] mode: StorageMode) {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cache");
    let rc = dir.path().join(".kurarc.json");
    std::fs::write(&rc, r#"{ "strict": true }"#).unwrap();
    let transformer = StripComments::with_dependency(rc.clone());

    CacheManager::new(&options(&cache, mode))
        .resolve(BASIC, &config("basic.js"), &transformer)
        .unwrap();
    std::fs::write(&rc, r#"{ "strict": false }"#).unwrap();

    let (_, status) = CacheManager::new(&options(&cache, mode))
        .resolve_with_status(BASIC, &config("basic.js"), &transformer)
        .unwrap();
    assert_eq!(status, CacheStatus::Miss);
    assert_eq!(transformer.calls(), 2);

    let (_, status) = CacheManager::new(&options(&cache, mode))
        .resolve_with_status(BASIC, &config("basic.js"), &transformer)
        .unwrap();
    assert_eq!(status, CacheStatus::Hit);
}

#[test]
fn corrupt_legacy_entry_is_recomputed() {
    let dir = tempfile::tempdir().unwrap();
    let transformer = StripComments::default();
    let options = options(dir.path(), StorageMode::Legacy);

    let manager = CacheManager::new(&options);
    manager.resolve(BASIC, &config("basic.js"), &transformer).unwrap();
    let key = manager
        .cache_key(BASIC, &config("basic.js"), &transformer)
        .unwrap();
    let path = dir.path().join(key.to_hex());
    let mut blob = std::fs::read(&path).unwrap();
    blob.truncate(blob.len() / 2);
    std::fs::write(&path, blob).unwrap();

    let (out, status) = CacheManager::new(&options)
        .resolve_with_status(BASIC, &config("basic.js"), &transformer)
        .unwrap();
    assert_eq!(out.code, "const answer = 42;\n");
    assert_eq!(status, CacheStatus::Miss);

    let (_, status) = CacheManager::new(&options)
        .resolve_with_status(BASIC, &config("basic.js"), &transformer)
        .unwrap();
    assert_eq!(status, CacheStatus::Hit);
}

#[test]
fn corrupt_database_is_recomputed_and_recreated() {
    let dir = tempfile::tempdir().unwrap();
    let transformer = StripComments::default();

    CacheManager::new(&CacheOptions::new(dir.path()))
        .resolve(BASIC, &config("basic.js"), &transformer)
        .unwrap();
    for name in ["kura.db-wal", "kura.db-shm"] {
        let _ = std::fs::remove_file(dir.path().join(name));
    }
    std::fs::write(dir.path().join("kura.db"), b"this is not a database at all").unwrap();

    let manager = CacheManager::new(&CacheOptions::new(dir.path()));
    let (out, status) = manager
        .resolve_with_status(BASIC, &config("basic.js"), &transformer)
        .unwrap();
    assert_eq!(out.code, "const answer = 42;\n");
    assert_eq!(status, CacheStatus::Miss);
    assert_eq!(manager.stats().write_failures, 0);

    let (_, status) = CacheManager::new(&CacheOptions::new(dir.path()))
        .resolve_with_status(BASIC, &config("basic.js"), &transformer)
        .unwrap();
    assert_eq!(status, CacheStatus::Hit);
}

#[rstest]
#[case::database(StorageMode::Database)]
#[case::legacy(StorageMode::Legacy)]
fn read_only_never_creates_a_store(#[case] mode: StorageMode) {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cache");
    let transformer = StripComments::default();
    let options = options(&cache, mode).with_read_only(true);

    for _ in 0..2 {
        let out = CacheManager::new(&options)
            .resolve(BASIC, &config("basic.js"), &transformer)
            .unwrap();
        assert_eq!(out.code, "const answer = 42;\n");
    }

    assert_eq!(transformer.calls(), 2);
    assert!(!cache.exists());
}

#[rstest]
#[case::database(StorageMode::Database)]
#[case::legacy(StorageMode::Legacy)]
fn read_only_uses_existing_entries(#[case] mode: StorageMode) {
    let dir = tempfile::tempdir().unwrap();
    let transformer = StripComments::default();

    CacheManager::new(&options(dir.path(), mode))
        .resolve(BASIC, &config("basic.js"), &transformer)
        .unwrap();

    let read_only = CacheManager::new(&options(dir.path(), mode).with_read_only(true));
    let (_, status) = read_only
        .resolve_with_status(BASIC, &config("basic.js"), &transformer)
        .unwrap();
    assert_eq!(status, CacheStatus::Hit);

    read_only
        .resolve("let fresh;", &config("fresh.js"), &transformer)
        .unwrap();
    assert_eq!(entry_count(dir.path(), mode), 1);
}

#[test]
fn disabled_cache_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let transformer = StripComments::default();
    let manager = CacheManager::new(&CacheOptions::disabled());

    for _ in 0..3 {
        let (_, status) = manager
            .resolve_with_status(BASIC, &config("basic.js"), &transformer)
            .unwrap();
        assert_eq!(status, CacheStatus::Bypassed);
    }

    assert_eq!(transformer.calls(), 3);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn transform_errors_reach_the_caller_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let transformer = StripComments::default();
    let manager = CacheManager::new(&CacheOptions::new(dir.path()));

    let err = manager
        .resolve("let x = @@;", &config("broken.js"), &transformer)
        .unwrap_err();
    assert_eq!(err, "broken.js: unexpected token");
    assert_eq!(entry_count(dir.path(), StorageMode::Database), 0);
}

#[rstest]
#[case::database(StorageMode::Database)]
#[case::legacy(StorageMode::Legacy)]
fn concurrent_builds_share_one_directory(#[case] mode: StorageMode) {
    let dir = tempfile::tempdir().unwrap();
    let transformer = StripComments::default();
    let sources: Vec<String> = (0..24).map(|n| format!("// file {n}\nlet v{n};\n")).collect();

    // Four "processes", each with its own manager, over the same sources.
    let outputs: Vec<Vec<String>> = (0..4)
        .into_par_iter()
        .map(|_| {
            let manager = CacheManager::new(&options(dir.path(), mode));
            sources
                .par_iter()
                .map(|source| {
                    manager
                        .resolve(source, &config("shared.js"), &transformer)
                        .unwrap()
                        .code
                })
                .collect()
        })
        .collect();

    for run in &outputs {
        assert_eq!(run, &outputs[0]);
    }
    assert_eq!(outputs[0][3], "let v3;\n");
    assert_eq!(entry_count(dir.path(), mode), 24);

    // A later run is served entirely from cache.
    let before = transformer.calls();
    let manager = CacheManager::new(&options(dir.path(), mode));
    for source in &sources {
        manager.resolve(source, &config("shared.js"), &transformer).unwrap();
    }
    assert_eq!(transformer.calls(), before);
    assert_eq!(manager.stats().hits, 24);
}
