use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::driver::StorageDriver;
use super::table::{is_reserved, parent_dir, plan, table_path, Action, EventKind};
use crate::error::{Error, Result};
use crate::kv::{HostCapabilities, KvStore};
use crate::plugin::{ConfigMap, ModuleDescriptor, SandboxOptions, SandboxedInstance, MODULE_EXTENSION};

/// Hooks raised by the file front end. Every hook defaults to doing nothing.
///
/// `target` is the virtual path the operation touches, or the user name for
/// the login hooks.
#[async_trait]
pub trait FileEventNotifier: Send + Sync {
    async fn before_put_file(&self, _target: &str) {}
    async fn after_file_put(&self, _target: &str) {}
    async fn before_delete_file(&self, _target: &str) {}
    async fn after_file_deleted(&self, _target: &str) {}
    async fn before_download_file(&self, _target: &str) {}
    async fn after_file_downloaded(&self, _target: &str) {}
    async fn before_change_cur_dir(&self, _target: &str) {}
    async fn after_cur_dir_changed(&self, _target: &str) {}
    async fn before_create_dir(&self, _target: &str) {}
    async fn after_dir_created(&self, _target: &str) {}
    async fn before_delete_dir(&self, _target: &str) {}
    async fn after_dir_deleted(&self, _target: &str) {}
    async fn before_login_user(&self, _target: &str) {}
    async fn after_user_login(&self, _target: &str) {}
}

/// Outcome of one chain run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainReport {
    pub applied: usize,
    pub skipped: usize,
}

impl ChainReport {
    pub fn is_noop(&self) -> bool {
        self.applied == 0 && self.skipped == 0
    }
}

enum Step {
    Applied,
    Skipped,
}

/// Runs the action chain of a directory against a freshly written file.
pub struct EventPipeline {
    driver: Arc<dyn StorageDriver>,
    capabilities: HostCapabilities,
    options: SandboxOptions,
}

impl EventPipeline {
    /// Chain steps always get OS-like capabilities; `options` supplies the
    /// call deadline.
    pub fn new(driver: Arc<dyn StorageDriver>, kv: KvStore, options: SandboxOptions) -> Self {
        Self {
            driver,
            capabilities: HostCapabilities::new(kv),
            options: options.with_wasi(true),
        }
    }

    /// Runs the `kind` chain for `file_path`. Steps are applied in table
    /// order, each seeing the content left by the previous one. The first
    /// failing step stops the chain; earlier replacements stay in place.
    pub async fn run(&self, kind: EventKind, file_path: &str) -> Result<ChainReport> {
        let mut report = ChainReport::default();
        if is_reserved(file_path) {
            debug!("{file_path} is a module or action table, not triggering {kind}");
            return Ok(report);
        }

        let table = match self.driver.get(&table_path(file_path)).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        let actions = plan(kind, table.as_deref())?;
        if actions.is_empty() {
            return Ok(report);
        }

        info!("Running {} {kind} action(s) for {file_path}", actions.len());
        for (index, action) in actions.iter().enumerate() {
            match self.step(kind, file_path, action).await {
                Ok(Step::Applied) => report.applied += 1,
                Ok(Step::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!(
                        "{kind} chain for {file_path} aborted at step {index} ({}): {e}",
                        action.module
                    );
                    return Err(e);
                }
            }
        }
        info!(
            "{kind} chain for {file_path} done: {} applied, {} skipped",
            report.applied, report.skipped
        );
        Ok(report)
    }

    async fn step(&self, kind: EventKind, file_path: &str, action: &Action) -> Result<Step> {
        let content = self.driver.get(file_path).await?;

        let location = action.module_location(parent_dir(file_path))?;
        let bytes = match self.driver.get(&location).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Err(Error::ModuleNotFound(PathBuf::from(location))),
            Err(e) => return Err(e),
        };
        let name = action
            .module
            .strip_suffix(&format!(".{MODULE_EXTENSION}"))
            .unwrap_or(&action.module);
        let descriptor = ModuleDescriptor::from_bytes(name, bytes, action.permissions())?;

        let capabilities = self.capabilities.clone();
        let options = self.options.clone();
        let export = kind.export_name();
        let outcome = tokio::task::spawn_blocking(move || {
            let instance =
                SandboxedInstance::load(&descriptor, &ConfigMap::new(), &capabilities, &options)?;
            instance.call(export, &content)
        })
        .await
        .map_err(|e| Error::Call {
            function: export.to_string(),
            code: -1,
            reason: e.to_string(),
        })?;

        let output = match outcome {
            Ok(output) => output,
            Err(e) if !e.aborts_chain() => {
                debug!("{} has no {export}, skipping", action.module);
                return Ok(Step::Skipped);
            }
            Err(e) => return Err(e),
        };
        if !output.is_success() {
            return Err(Error::Call {
                function: export.to_string(),
                code: output.code,
                reason: String::from_utf8_lossy(&output.output).into_owned(),
            });
        }

        self.driver.replace(file_path, &output.output).await?;
        debug!(
            "{} rewrote {file_path} ({} bytes)",
            action.module,
            output.output.len()
        );
        Ok(Step::Applied)
    }
}

#[async_trait]
impl FileEventNotifier for EventPipeline {
    /// Failures are logged, never surfaced to the uploader.
    async fn after_file_put(&self, target: &str) {
        if let Err(e) = self.run(EventKind::AfterFilePut, target).await {
            error!("after_file_put chain for {target} failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::driver::{LocalFsDriver, MemoryDriver};
    use crate::plugin::invoker::testing::*;

    const FILE: &str = "/docs/file.txt";

    async fn setup(table: &str, modules: &[(&str, Vec<u8>)]) -> (Arc<MemoryDriver>, EventPipeline) {
        let driver = Arc::new(MemoryDriver::new());
        driver.put("/docs/.wasmhook.json", table.as_bytes()).await.unwrap();
        for (name, bytes) in modules {
            driver.put(&format!("/docs/{name}"), bytes).await.unwrap();
        }
        driver.put(FILE, b"abc").await.unwrap();
        let pipeline = EventPipeline::new(driver.clone(), KvStore::in_memory(), SandboxOptions::default());
        (driver, pipeline)
    }

    fn chain(modules: &[&str]) -> String {
        let actions: Vec<String> = modules
            .iter()
            .map(|m| format!(r#"{{"module": "{m}"}}"#))
            .collect();
        format!(r#"{{"after_file_put": [{}]}}"#, actions.join(","))
    }

    #[tokio::test]
    async fn test_reverse_action_rewrites_file() {
        let (driver, pipeline) = setup(&chain(&["reverse.wasm"]), &[("reverse.wasm", reverse_module())]).await;
        let report = pipeline.run(EventKind::AfterFilePut, FILE).await.unwrap();
        assert_eq!(report, ChainReport { applied: 1, skipped: 0 });
        assert_eq!(driver.get(FILE).await.unwrap(), b"cba");
    }

    #[tokio::test]
    async fn test_content_evolves_through_chain() {
        let modules = [("reverse.wasm", reverse_module()), ("exclaim.wasm", exclaim_module())];

        let (driver, pipeline) = setup(&chain(&["reverse.wasm", "exclaim.wasm"]), &modules).await;
        pipeline.run(EventKind::AfterFilePut, FILE).await.unwrap();
        assert_eq!(driver.get(FILE).await.unwrap(), b"cba!");

        let (driver, pipeline) = setup(&chain(&["exclaim.wasm", "reverse.wasm"]), &modules).await;
        pipeline.run(EventKind::AfterFilePut, FILE).await.unwrap();
        assert_eq!(driver.get(FILE).await.unwrap(), b"!cba");
    }

    #[tokio::test]
    async fn test_missing_export_skips_step() {
        let (driver, pipeline) = setup(
            &chain(&["echo.wasm", "reverse.wasm"]),
            &[("echo.wasm", echo_module()), ("reverse.wasm", reverse_module())],
        )
        .await;
        let report = pipeline.run(EventKind::AfterFilePut, FILE).await.unwrap();
        assert_eq!(report, ChainReport { applied: 1, skipped: 1 });
        assert_eq!(driver.get(FILE).await.unwrap(), b"cba");
    }

    #[tokio::test]
    async fn test_skip_only_leaves_content_and_stays_silent() {
        let (driver, pipeline) = setup(&chain(&["echo.wasm"]), &[("echo.wasm", echo_module())]).await;
        pipeline.after_file_put(FILE).await;
        assert_eq!(driver.get(FILE).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_abort_keeps_earlier_steps() {
        let (driver, pipeline) = setup(
            &chain(&["reverse.wasm", "faults.wasm", "exclaim.wasm"]),
            &[
                ("reverse.wasm", reverse_module()),
                ("faults.wasm", fault_module()),
                ("exclaim.wasm", exclaim_module()),
            ],
        )
        .await;
        let err = pipeline.run(EventKind::AfterFilePut, FILE).await.unwrap_err();
        assert!(matches!(err, Error::Call { .. }));
        assert_eq!(driver.get(FILE).await.unwrap(), b"cba");
    }

    #[tokio::test]
    async fn test_missing_module_aborts() {
        let (driver, pipeline) = setup(
            &chain(&["missing.wasm", "reverse.wasm"]),
            &[("reverse.wasm", reverse_module())],
        )
        .await;
        let err = pipeline.run(EventKind::AfterFilePut, FILE).await.unwrap_err();
        assert!(matches!(err, Error::ModuleNotFound(_)));
        assert_eq!(driver.get(FILE).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_invalid_module_name_aborts() {
        let (_, pipeline) = setup(&chain(&["../reverse.wasm"]), &[]).await;
        let err = pipeline.run(EventKind::AfterFilePut, FILE).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_reserved_files_never_trigger() {
        let (driver, pipeline) = setup(&chain(&["reverse.wasm"]), &[("reverse.wasm", reverse_module())]).await;
        let original = driver.get("/docs/reverse.wasm").await.unwrap();

        for path in ["/docs/reverse.wasm", "/docs/.wasmhook.json"] {
            let report = pipeline.run(EventKind::AfterFilePut, path).await.unwrap();
            assert!(report.is_noop(), "{path}");
        }
        assert_eq!(driver.get("/docs/reverse.wasm").await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_no_table_is_noop() {
        let driver = Arc::new(MemoryDriver::new());
        driver.put(FILE, b"abc").await.unwrap();
        let pipeline = EventPipeline::new(driver.clone(), KvStore::in_memory(), SandboxOptions::default());

        let report = pipeline.run(EventKind::AfterFilePut, FILE).await.unwrap();
        assert!(report.is_noop());
        assert_eq!(driver.get(FILE).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_other_hooks_do_nothing() {
        let (driver, pipeline) = setup(&chain(&["reverse.wasm"]), &[("reverse.wasm", reverse_module())]).await;
        assert!(pipeline.run(EventKind::BeforePutFile, FILE).await.unwrap().is_noop());

        pipeline.before_put_file(FILE).await;
        pipeline.after_file_deleted(FILE).await;
        pipeline.after_user_login("alice").await;
        assert_eq!(driver.get(FILE).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_malformed_table_is_config_error() {
        let (driver, pipeline) = setup("{ not json", &[]).await;
        let err = pipeline.run(EventKind::AfterFilePut, FILE).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        pipeline.after_file_put(FILE).await;
        assert_eq!(driver.get(FILE).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_local_filesystem_chain() {
        let dir = tempfile::tempdir().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join(".wasmhook.json"), chain(&["reverse.wasm"])).unwrap();
        std::fs::write(docs.join("reverse.wasm"), reverse_module()).unwrap();
        std::fs::write(docs.join("file.txt"), "hello").unwrap();

        let pipeline = EventPipeline::new(
            Arc::new(LocalFsDriver::new(dir.path())),
            KvStore::in_memory(),
            SandboxOptions::default(),
        );
        pipeline.after_file_put(FILE).await;
        assert_eq!(std::fs::read(docs.join("file.txt")).unwrap(), b"olleh");
    }
}
